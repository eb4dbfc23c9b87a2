//! Reasoning Gateway -- obtains a root-cause diagnosis for an incident.
//!
//! The gateway claims an `OPEN` incident (`OPEN -> DIAGNOSING`), submits its
//! context to the reasoning service under a timeout, validates the reply and
//! records it. Timeouts and unusable replies are retried with backoff; once
//! the retry budget is spent the incident fails with `diagnosis-unavailable`.

pub mod http;
pub mod parse;
pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::incident::{
    ActionRecord, BreachKind, Evidence, FailureReason, Incident, IncidentStatus, IncidentStore,
    StoreError,
};
use crate::retry::RetryPolicy;

pub use self::http::HttpReasoningClient;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReasoningError {
    #[error("reasoning service timed out")]
    Timeout,
    #[error("reasoning service unavailable: {0}")]
    Unavailable(String),
    #[error("malformed diagnosis: {0}")]
    Malformed(String),
}

/// Context submitted to the reasoning service.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisRequest {
    pub incident_id: Uuid,
    pub target: String,
    pub target_id: Option<String>,
    pub image: Option<String>,
    pub breach_kind: BreachKind,
    pub evidence: Vec<Evidence>,
    pub incident_age_sec: i64,
    pub attempt_count: u32,
    pub action_history: Vec<ActionRecord>,
}

impl DiagnosisRequest {
    pub fn from_incident(incident: &Incident, now: DateTime<Utc>) -> Self {
        Self {
            incident_id: incident.id,
            target: incident.target.clone(),
            target_id: incident.target_id.clone(),
            image: incident.image.clone(),
            breach_kind: incident.breach_kind,
            evidence: incident.observability_context.iter().cloned().collect(),
            incident_age_sec: incident.age(now).num_seconds(),
            attempt_count: incident.attempt_count,
            action_history: incident.action_history.clone(),
        }
    }
}

/// External service that turns incident context into a recommendation.
///
/// Implementations return the raw JSON reply; validation is the gateway's job.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn diagnose(&self, request: &DiagnosisRequest) -> Result<serde_json::Value, ReasoningError>;
}

/// How a diagnosis pass ended.
#[derive(Debug, Clone)]
pub enum DiagnosisOutcome {
    /// Diagnosis stored, incident is `ACTION_PENDING`.
    ActionPending(Incident),
    /// Reasoning service recommended `IGNORE`; incident is `RESOLVED`.
    Ignored(Incident),
    /// Retry budget exhausted; incident is `FAILED`.
    Failed(Incident),
    /// Another worker owns the incident; nothing done.
    Dropped,
}

pub struct ReasoningGateway {
    service: Arc<dyn ReasoningService>,
    store: Arc<IncidentStore>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ReasoningGateway {
    pub fn new(
        service: Arc<dyn ReasoningService>,
        store: Arc<IncidentStore>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            store,
            retry,
            timeout,
        }
    }

    /// Run one diagnosis pass for an `OPEN` incident.
    pub async fn diagnose(&self, id: Uuid) -> Result<DiagnosisOutcome, EngineError> {
        match self
            .store
            .transition(id, IncidentStatus::Open, IncidentStatus::Diagnosing)
        {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                debug!(incident_id = %id, error = %e, "diagnosis already claimed");
                return Ok(DiagnosisOutcome::Dropped);
            }
            Err(e) => return Err(e.into()),
        }

        let mut attempts = 0u32;
        loop {
            let snapshot = self.store.get(id)?;
            if snapshot.status != IncidentStatus::Diagnosing {
                debug!(incident_id = %id, status = %snapshot.status, "incident left DIAGNOSING");
                return Ok(DiagnosisOutcome::Dropped);
            }
            attempts += 1;

            let request = DiagnosisRequest::from_incident(&snapshot, Utc::now());
            debug!(incident_id = %id, attempt = attempts, generation = snapshot.generation, "requesting diagnosis");
            let reply = match tokio::time::timeout(self.timeout, self.service.diagnose(&request)).await {
                Ok(reply) => reply,
                Err(_) => Err(ReasoningError::Timeout),
            };

            let mut backoff = true;
            match reply.and_then(|value| parse::parse_reply(&value)) {
                Ok(parsed) => {
                    let diagnosis = parsed.into_diagnosis(snapshot.generation, Utc::now());
                    let action = diagnosis.recommended_action;
                    match self.store.record_diagnosis(id, diagnosis) {
                        Ok(incident) => {
                            info!(incident_id = %id, %action, attempt = attempts, "diagnosis recorded");
                            return Ok(if incident.status == IncidentStatus::Resolved {
                                DiagnosisOutcome::Ignored(incident)
                            } else {
                                DiagnosisOutcome::ActionPending(incident)
                            });
                        }
                        Err(StoreError::StaleGeneration { expected, actual, .. }) => {
                            info!(
                                incident_id = %id,
                                expected,
                                actual,
                                "evidence changed during diagnosis, discarding result"
                            );
                            backoff = false;
                        }
                        Err(e) if e.is_conflict() => {
                            debug!(incident_id = %id, error = %e, "diagnosis result no longer wanted");
                            return Ok(DiagnosisOutcome::Dropped);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(err) => {
                    let err = EngineError::from(err);
                    warn!(incident_id = %id, attempt = attempts, error = %err, "diagnosis attempt failed");
                    if !err.is_retryable() {
                        break;
                    }
                }
            }

            if !self.retry.should_retry(attempts) {
                break;
            }
            if backoff {
                tokio::time::sleep(self.retry.delay(attempts)).await;
            }
        }

        warn!(incident_id = %id, attempts, "diagnosis unavailable, failing incident");
        match self
            .store
            .fail(id, IncidentStatus::Diagnosing, FailureReason::DiagnosisUnavailable)
        {
            Ok(incident) => Ok(DiagnosisOutcome::Failed(incident)),
            Err(e) if e.is_conflict() => Ok(DiagnosisOutcome::Dropped),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::tests::evidence;
    use crate::incident::{RemediationAction, SeverityOrder, StoreLimits, TargetRef};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// Replays scripted replies; `None` means hang past the timeout.
    struct Scripted {
        replies: Mutex<VecDeque<Option<Result<Value, ReasoningError>>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(replies: Vec<Option<Result<Value, ReasoningError>>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ReasoningService for Scripted {
        async fn diagnose(&self, _request: &DiagnosisRequest) -> Result<Value, ReasoningError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().await.pop_front().flatten();
            match next {
                Some(reply) => reply,
                None => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ReasoningError::Timeout)
                }
            }
        }
    }

    fn setup(service: Arc<Scripted>, attempts: u32) -> (Arc<IncidentStore>, ReasoningGateway, Uuid) {
        let store = Arc::new(IncidentStore::new(StoreLimits::default()));
        let id = store
            .upsert_by_target(
                &TargetRef::named("svc-1"),
                BreachKind::MemorySaturation,
                evidence(BreachKind::MemorySaturation),
                &SeverityOrder::default(),
            )
            .incident_id;
        let gateway = ReasoningGateway::new(
            service,
            store.clone(),
            RetryPolicy::immediate(attempts),
            Duration::from_secs(5),
        );
        (store, gateway, id)
    }

    fn restart() -> Value {
        json!({"root_cause": "leak", "recommended_action": "RESTART"})
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_moves_to_action_pending() {
        let service = Scripted::new(vec![Some(Ok(restart()))]);
        let (store, gateway, id) = setup(service.clone(), 3);

        let outcome = gateway.diagnose(id).await.unwrap();
        assert!(matches!(outcome, DiagnosisOutcome::ActionPending(_)));
        let inc = store.get(id).unwrap();
        assert_eq!(inc.status, IncidentStatus::ActionPending);
        assert_eq!(inc.diagnosis.unwrap().recommended_action, RemediationAction::Restart);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_to_diagnosis_unavailable() {
        let service = Scripted::new(vec![None, None, None]);
        let (store, gateway, id) = setup(service.clone(), 3);

        let outcome = gateway.diagnose(id).await.unwrap();
        assert!(matches!(outcome, DiagnosisOutcome::Failed(_)));
        let inc = store.get(id).unwrap();
        assert_eq!(inc.status, IncidentStatus::Failed);
        assert_eq!(inc.failure, Some(FailureReason::DiagnosisUnavailable));
        assert!(inc.diagnosis.is_none());
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_action_is_retried() {
        let service = Scripted::new(vec![
            Some(Ok(json!({"root_cause": "leak", "recommended_action": "REBOOT"}))),
            Some(Ok(restart())),
        ]);
        let (store, gateway, id) = setup(service.clone(), 3);

        gateway.diagnose(id).await.unwrap();
        assert_eq!(store.get(id).unwrap().status, IncidentStatus::ActionPending);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignore_resolves() {
        let service = Scripted::new(vec![Some(Ok(
            json!({"root_cause": "transient blip", "recommended_action": "IGNORE"}),
        ))]);
        let (store, gateway, id) = setup(service, 3);

        let outcome = gateway.diagnose(id).await.unwrap();
        assert!(matches!(outcome, DiagnosisOutcome::Ignored(_)));
        let inc = store.get(id).unwrap();
        assert_eq!(inc.status, IncidentStatus::Resolved);
        assert!(inc.action_history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_claim_is_dropped() {
        let service = Scripted::new(vec![Some(Ok(restart()))]);
        let (store, gateway, id) = setup(service.clone(), 3);
        store
            .transition(id, IncidentStatus::Open, IncidentStatus::Diagnosing)
            .unwrap();

        let outcome = gateway.diagnose(id).await.unwrap();
        assert!(matches!(outcome, DiagnosisOutcome::Dropped));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    /// Bumps the incident's generation while the call is in flight.
    struct Superseding {
        store: Arc<IncidentStore>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReasoningService for Superseding {
        async fn diagnose(&self, _request: &DiagnosisRequest) -> Result<Value, ReasoningError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.store.upsert_by_target(
                    &TargetRef::named("svc-1"),
                    BreachKind::CrashLoop,
                    evidence(BreachKind::CrashLoop),
                    &SeverityOrder::default(),
                );
            }
            Ok(restart())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_result_discarded_and_rediagnosed() {
        let store = Arc::new(IncidentStore::new(StoreLimits::default()));
        let id = store
            .upsert_by_target(
                &TargetRef::named("svc-1"),
                BreachKind::LatencyBreach,
                evidence(BreachKind::LatencyBreach),
                &SeverityOrder::default(),
            )
            .incident_id;
        let service = Arc::new(Superseding {
            store: store.clone(),
            calls: AtomicU32::new(0),
        });
        let gateway = ReasoningGateway::new(
            service.clone(),
            store.clone(),
            RetryPolicy::immediate(3),
            Duration::from_secs(5),
        );

        gateway.diagnose(id).await.unwrap();
        let inc = store.get(id).unwrap();
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert_eq!(inc.status, IncidentStatus::ActionPending);
        assert_eq!(inc.breach_kind, BreachKind::CrashLoop);
        assert_eq!(inc.diagnosis.unwrap().generation, inc.generation);
    }
}

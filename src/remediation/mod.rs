//! Remediation Executor -- carries out a diagnosed action under guardrails.
//!
//! For an `ACTION_PENDING` incident the executor checks, in order: the
//! attempt cap, the target allow-list, whether the target already reflects
//! the action, and the per-target cooldown. Only then is the runtime
//! invoked. A completed action opens the observation window; the lifecycle
//! controller decides what happens when it closes.

pub mod cooldown;
pub mod runtime;
pub mod target;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::error::EngineError;
use crate::incident::{
    ActionOutcome, ActionRecord, FailureReason, Incident, IncidentStatus, IncidentStore,
    Observation, StoreError,
};
use crate::retry::RetryPolicy;

pub use self::cooldown::CooldownGuard;
pub use self::runtime::HttpRuntimeClient;
pub use self::target::{ActionTarget, CommandResult, Operation, TargetError, TargetState};

/// How a remediation pass ended.
#[derive(Debug, Clone)]
pub enum RemediationOutcome {
    /// Action done (or not needed); observation window is open.
    Observing(Observation),
    /// Incident moved to `FAILED`.
    Failed(Incident),
    /// Incident was not ours to act on.
    Dropped,
}

pub struct RemediationExecutor {
    target: Arc<dyn ActionTarget>,
    store: Arc<IncidentStore>,
    cooldown: Arc<CooldownGuard>,
    config: ExecutorConfig,
    observation_window: Duration,
}

impl RemediationExecutor {
    pub fn new(
        target: Arc<dyn ActionTarget>,
        store: Arc<IncidentStore>,
        cooldown: Arc<CooldownGuard>,
        config: ExecutorConfig,
        observation_window: Duration,
    ) -> Self {
        Self {
            target,
            store,
            cooldown,
            config,
            observation_window,
        }
    }

    /// Drop cooldown entries that no longer block anything.
    pub async fn prune_cooldowns(&self) -> usize {
        self.cooldown.prune().await
    }

    fn retry(&self) -> &RetryPolicy {
        &self.config.retry
    }

    /// Execute the recommended action for an `ACTION_PENDING` incident.
    pub async fn remediate(&self, id: Uuid) -> Result<RemediationOutcome, EngineError> {
        let max = self.store.limits().max_attempts;
        let mut invoked = 0u32;

        loop {
            let incident = self.store.get(id)?;
            if incident.status != IncidentStatus::ActionPending || incident.observation.is_some() {
                debug!(incident_id = %id, status = %incident.status, "nothing to remediate");
                return Ok(RemediationOutcome::Dropped);
            }
            if incident.attempt_count >= max {
                warn!(incident_id = %id, attempts = incident.attempt_count, max, "attempt cap reached");
                return self.fail(id, FailureReason::AttemptsExhausted);
            }
            if !self.config.is_allowed(&incident.target) {
                warn!(incident_id = %id, target = %incident.target, "target not in allow-list");
                return self.fail(id, FailureReason::TargetNotAllowed);
            }

            let diagnosis = incident.diagnosis.as_ref().ok_or_else(|| {
                EngineError::Internal(format!("incident {} is ACTION_PENDING without a diagnosis", id))
            })?;
            let operation = Operation::plan(diagnosis, &self.config).ok_or_else(|| {
                EngineError::Internal(format!("incident {} has nothing to execute", id))
            })?;
            let address = incident
                .target_id
                .clone()
                .unwrap_or_else(|| incident.target.clone());

            if invoked == 0 && self.already_satisfied(&incident, &operation, &address).await {
                info!(
                    incident_id = %id,
                    target = %incident.target,
                    operation = %operation.describe(),
                    "target already reflects action, skipping invocation"
                );
                return self.settle(id, &operation, ActionOutcome::AlreadySatisfied).await;
            }

            if let Err(remaining) = self.cooldown.try_acquire(&incident.target).await {
                if invoked == 0 {
                    info!(
                        incident_id = %id,
                        target = %incident.target,
                        remaining_ms = remaining.as_millis() as u64,
                        "target in cooldown, observing instead of acting"
                    );
                    let outcome = ActionOutcome::SkippedCooldown {
                        remaining_ms: remaining.as_millis() as u64,
                    };
                    return self.settle(id, &operation, outcome).await;
                }
                debug!(incident_id = %id, remaining_ms = remaining.as_millis() as u64, "waiting out cooldown");
                if !self.heartbeat(id)? {
                    return Ok(RemediationOutcome::Dropped);
                }
                tokio::time::sleep(remaining).await;
                continue;
            }

            invoked += 1;
            info!(
                incident_id = %id,
                target = %incident.target,
                operation = %operation.describe(),
                attempt = incident.attempt_count + 1,
                "invoking remediation"
            );
            let result = match tokio::time::timeout(
                self.config.timeout(),
                operation.invoke(self.target.as_ref(), &address),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TargetError::Timeout),
            };
            let result = result.and_then(|reply| {
                if reply.success {
                    Ok(reply)
                } else {
                    Err(TargetError::Rejected(
                        reply
                            .message
                            .unwrap_or_else(|| "runtime reported failure".to_string()),
                    ))
                }
            });
            let (outcome, retryable) = match result {
                Ok(_) => (ActionOutcome::Succeeded, false),
                Err(e) => {
                    let retryable = EngineError::from(e.clone()).is_retryable();
                    (ActionOutcome::Failed { error: e.to_string() }, retryable)
                }
            };
            let succeeded = outcome == ActionOutcome::Succeeded;

            let updated = match self.record(id, &operation, outcome) {
                Ok(updated) => updated,
                Err(StoreError::AttemptCap { .. }) => {
                    return self.fail(id, FailureReason::AttemptsExhausted)
                }
                Err(e) if e.is_conflict() => {
                    debug!(incident_id = %id, error = %e, "incident changed during remediation");
                    return Ok(RemediationOutcome::Dropped);
                }
                Err(e) => return Err(e.into()),
            };

            if succeeded {
                if updated.attempt_count >= max {
                    warn!(incident_id = %id, attempts = updated.attempt_count, "final attempt used");
                    return self.fail(id, FailureReason::AttemptsExhausted);
                }
                return self.observe(id);
            }

            warn!(incident_id = %id, attempts = updated.attempt_count, retryable, "remediation attempt failed");
            if updated.attempt_count >= max || !retryable || !self.retry().should_retry(invoked) {
                return self.fail(id, FailureReason::RemediationFailed);
            }
            if !self.heartbeat(id)? {
                return Ok(RemediationOutcome::Dropped);
            }
            tokio::time::sleep(self.retry().delay(invoked)).await;
        }
    }

    async fn already_satisfied(&self, incident: &Incident, operation: &Operation, address: &str) -> bool {
        match tokio::time::timeout(self.config.timeout(), self.target.observe(address)).await {
            Ok(Ok(Some(state))) => operation.is_satisfied(&state, incident.last_breach_at),
            Ok(Ok(None)) => false,
            Ok(Err(e)) => {
                debug!(incident_id = %incident.id, error = %e, "target state unavailable");
                false
            }
            Err(_) => {
                debug!(incident_id = %incident.id, "target state query timed out");
                false
            }
        }
    }

    /// Record a no-op entry and go straight to observation.
    async fn settle(
        &self,
        id: Uuid,
        operation: &Operation,
        outcome: ActionOutcome,
    ) -> Result<RemediationOutcome, EngineError> {
        match self.record(id, operation, outcome) {
            Ok(_) => self.observe(id),
            Err(e) if e.is_conflict() => Ok(RemediationOutcome::Dropped),
            Err(e) => Err(e.into()),
        }
    }

    fn record(&self, id: Uuid, operation: &Operation, outcome: ActionOutcome) -> Result<Incident, StoreError> {
        self.store.record_action(
            id,
            ActionRecord {
                action: operation.action(),
                operation: operation.describe(),
                at: Utc::now(),
                outcome,
            },
        )
    }

    /// Mark the incident as still owned before a wait, so the reconcile
    /// sweep does not take a long cooldown for a stall. `false` means
    /// another worker moved it on.
    fn heartbeat(&self, id: Uuid) -> Result<bool, EngineError> {
        match self.store.touch(id, IncidentStatus::ActionPending) {
            Ok(_) => Ok(true),
            Err(e) if e.is_conflict() => {
                debug!(incident_id = %id, error = %e, "incident changed while retrying");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn observe(&self, id: Uuid) -> Result<RemediationOutcome, EngineError> {
        let window = chrono::Duration::from_std(self.observation_window)
            .map_err(|e| EngineError::Internal(format!("observation window out of range: {}", e)))?;
        match self.store.begin_observation(id, window) {
            Ok(observation) => {
                debug!(incident_id = %id, generation = observation.generation, "observation window opened");
                Ok(RemediationOutcome::Observing(observation))
            }
            Err(e) if e.is_conflict() => Ok(RemediationOutcome::Dropped),
            Err(e) => Err(e.into()),
        }
    }

    fn fail(&self, id: Uuid, reason: FailureReason) -> Result<RemediationOutcome, EngineError> {
        match self.store.fail(id, IncidentStatus::ActionPending, reason) {
            Ok(incident) => {
                warn!(incident_id = %id, reason = reason.as_str(), "incident failed");
                Ok(RemediationOutcome::Failed(incident))
            }
            Err(e) if e.is_conflict() => Ok(RemediationOutcome::Dropped),
            Err(e) => Err(e.into()),
        }
    }
}

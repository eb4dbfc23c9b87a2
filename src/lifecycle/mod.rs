//! Lifecycle Controller -- drives each incident through its state machine.
//!
//! ```text
//! OPEN -> DIAGNOSING -> ACTION_PENDING -> RESOLVED
//!   |          |              |   \-> FAILED
//!   |          |              \-----> OPEN (repeat breach while observing)
//!   |          \-> RESOLVED (IGNORE) / FAILED
//!   \-> SUPPRESSED
//! ```
//!
//! Every alert that creates or reopens an incident spawns one driver task.
//! Drivers only advance the incident through compare-and-set transitions, so
//! a second driver for the same incident finds nothing to claim and exits.
//! The reconcile sweep picks up incidents whose driver went away.

pub mod reconcile;

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::{EngineConfig, LifecycleConfig};
use crate::correlate::{Alert, Correlation, Correlator};
use crate::error::EngineError;
use crate::incident::{IncidentStatus, IncidentStore, Observation};
use crate::reasoning::{DiagnosisOutcome, HttpReasoningClient, ReasoningGateway, ReasoningService};
use crate::remediation::{
    ActionTarget, CooldownGuard, HttpRuntimeClient, RemediationExecutor, RemediationOutcome,
};

pub use self::reconcile::ReconcileReport;

pub struct Engine {
    store: Arc<IncidentStore>,
    correlator: Correlator,
    gateway: ReasoningGateway,
    executor: RemediationExecutor,
    lifecycle: LifecycleConfig,
}

impl Engine {
    pub fn new(
        store: Arc<IncidentStore>,
        correlator: Correlator,
        gateway: ReasoningGateway,
        executor: RemediationExecutor,
        lifecycle: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            correlator,
            gateway,
            executor,
            lifecycle,
        }
    }

    /// Wire the engine to the HTTP reasoning service and runtime agent.
    pub fn from_config(cfg: &EngineConfig) -> Result<Arc<Self>> {
        let reasoner = Arc::new(HttpReasoningClient::from_config(&cfg.reasoning)?);
        let target = Arc::new(HttpRuntimeClient::from_config(&cfg.executor)?);
        Ok(Self::with_services(cfg, reasoner, target))
    }

    /// Wire the engine to caller-supplied collaborators.
    pub fn with_services(
        cfg: &EngineConfig,
        reasoner: Arc<dyn ReasoningService>,
        target: Arc<dyn ActionTarget>,
    ) -> Arc<Self> {
        let store = Arc::new(IncidentStore::new(cfg.store_limits()));
        let correlator = Correlator::new(
            store.clone(),
            cfg.severity.order.clone(),
            cfg.correlation.related_groups.clone(),
        );
        let gateway = ReasoningGateway::new(
            reasoner,
            store.clone(),
            cfg.reasoning.retry.clone(),
            cfg.reasoning.timeout(),
        );
        let executor = RemediationExecutor::new(
            target,
            store.clone(),
            Arc::new(CooldownGuard::new(cfg.lifecycle.cooldown())),
            cfg.executor.clone(),
            cfg.lifecycle.observation_window(),
        );
        Arc::new(Self::new(store, correlator, gateway, executor, cfg.lifecycle.clone()))
    }

    pub fn store(&self) -> &Arc<IncidentStore> {
        &self.store
    }

    pub fn lifecycle(&self) -> &LifecycleConfig {
        &self.lifecycle
    }

    /// Correlate a validated alert and, if it opened work, start a driver.
    pub fn submit(self: &Arc<Self>, alert: &Alert) -> Correlation {
        let correlation = self.correlator.correlate(alert);
        if correlation.needs_drive() {
            self.spawn_drive(correlation.incident_id);
        }
        correlation
    }

    pub fn spawn_drive(self: &Arc<Self>, id: Uuid) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let span = tracing::info_span!("incident", incident_id = %id);
        tokio::spawn(
            async move {
                match engine.drive(id).await {
                    Ok(status) => debug!(%status, "driver finished"),
                    Err(e) => error!(error = %e, "driver aborted"),
                }
            }
            .instrument(span),
        )
    }

    /// Advance one incident as far as it can go. Returns the status the
    /// driver last saw.
    pub async fn drive(&self, id: Uuid) -> Result<IncidentStatus, EngineError> {
        loop {
            let incident = self.store.get(id)?;
            match incident.status {
                IncidentStatus::Open => {
                    if let Some(by) = self.correlator.remediating_related(&incident) {
                        match self.store.suppress(id, by) {
                            Ok(_) => {
                                info!(incident_id = %id, suppressed_by = %by, "related target already in remediation");
                                return Ok(IncidentStatus::Suppressed);
                            }
                            Err(e) if e.is_conflict() => continue,
                            Err(e) => return Err(e.into()),
                        }
                    }
                    match self.gateway.diagnose(id).await? {
                        DiagnosisOutcome::ActionPending(_) => continue,
                        DiagnosisOutcome::Ignored(inc) | DiagnosisOutcome::Failed(inc) => {
                            return Ok(inc.status)
                        }
                        DiagnosisOutcome::Dropped => return Ok(self.store.get(id)?.status),
                    }
                }
                IncidentStatus::ActionPending => match incident.observation {
                    Some(observation) => return self.watch(id, observation).await,
                    None => match self.executor.remediate(id).await? {
                        RemediationOutcome::Observing(observation) => {
                            return self.watch(id, observation).await
                        }
                        RemediationOutcome::Failed(inc) => return Ok(inc.status),
                        RemediationOutcome::Dropped => return Ok(self.store.get(id)?.status),
                    },
                },
                // DIAGNOSING belongs to whoever claimed it.
                other => return Ok(other),
            }
        }
    }

    /// Wait out the observation window, then resolve if nothing reopened it.
    async fn watch(&self, id: Uuid, observation: Observation) -> Result<IncidentStatus, EngineError> {
        let remaining = (observation.ends_at - chrono::Utc::now())
            .to_std()
            .unwrap_or_default()
            .min(self.lifecycle.observation_window());
        tokio::time::sleep(remaining).await;

        match self.store.resolve_observed(id, observation.generation) {
            Ok(incident) => {
                info!(
                    incident_id = %id,
                    attempts = incident.attempt_count,
                    "observation window clean, incident resolved"
                );
                Ok(incident.status)
            }
            Err(e) if e.is_conflict() => {
                debug!(incident_id = %id, error = %e, "observation superseded");
                Ok(self.store.get(id)?.status)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Periodically run the reconcile sweep until the task is dropped.
    pub fn spawn_reconciler(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = self.lifecycle.reconcile_interval();
        tokio::spawn(async move {
            info!(interval_sec = period.as_secs(), "reconciler started");
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let report = engine.reconcile(chrono::Utc::now());
                let lapsed = engine.executor.prune_cooldowns().await;
                if report.pruned > 0 || lapsed > 0 {
                    debug!(incidents = report.pruned, cooldowns = lapsed, "pruned expired entries");
                }
                if !report.is_empty() {
                    warn!(
                        resolved = report.resolved.len(),
                        stalled = report.stalled.len(),
                        redriven = report.redriven.len(),
                        "reconcile sweep acted on incidents"
                    );
                }
                for id in report.redriven {
                    engine.spawn_drive(id);
                }
            }
        })
    }
}

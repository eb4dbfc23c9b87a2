//! Sweep for incidents whose driver is gone.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Engine;
use crate::incident::{FailureReason, IncidentFilter, IncidentStatus};

/// What one sweep did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Observation windows that had expired cleanly.
    pub resolved: Vec<Uuid>,
    /// In-flight incidents failed with `stalled`.
    pub stalled: Vec<Uuid>,
    /// `OPEN` incidents that need a new driver.
    pub redriven: Vec<Uuid>,
    /// Terminal incidents past retention that were dropped from the store.
    pub pruned: usize,
}

impl ReconcileReport {
    /// True when no active incident needed attention. Pruning is routine
    /// and does not count.
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty() && self.stalled.is_empty() && self.redriven.is_empty()
    }
}

impl Engine {
    /// Inspect every active incident as of `now`, then drop terminal
    /// incidents older than the retention period.
    pub fn reconcile(&self, now: DateTime<Utc>) -> ReconcileReport {
        let stall = chrono::Duration::from_std(self.lifecycle().stall_timeout())
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
        let retention = chrono::Duration::from_std(self.lifecycle().retention())
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
        let mut report = ReconcileReport::default();

        for incident in self.store().list(IncidentFilter::active()) {
            let id = incident.id;
            let idle = now - incident.updated_at;
            match (incident.status, &incident.observation) {
                (IncidentStatus::ActionPending, Some(obs)) if obs.ends_at <= now => {
                    match self.store().resolve_observed(id, obs.generation) {
                        Ok(_) => {
                            info!(incident_id = %id, "expired observation window resolved by sweep");
                            report.resolved.push(id);
                        }
                        Err(e) => debug!(incident_id = %id, error = %e, "sweep lost resolve race"),
                    }
                }
                (IncidentStatus::Diagnosing, _) | (IncidentStatus::ActionPending, None)
                    if idle > stall =>
                {
                    match self.store().fail(id, incident.status, FailureReason::Stalled) {
                        Ok(_) => {
                            warn!(
                                incident_id = %id,
                                status = %incident.status,
                                idle_sec = idle.num_seconds(),
                                "incident stalled"
                            );
                            report.stalled.push(id);
                        }
                        Err(e) => debug!(incident_id = %id, error = %e, "sweep lost fail race"),
                    }
                }
                (IncidentStatus::Open, _) if idle > stall => {
                    debug!(incident_id = %id, idle_sec = idle.num_seconds(), "open incident has no driver");
                    report.redriven.push(id);
                }
                _ => {}
            }
        }
        report.pruned = self.store().prune(now - retention);
        report
    }
}

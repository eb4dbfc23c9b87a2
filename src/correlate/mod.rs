//! Deduplication and correlation of inbound alerts.
//!
//! An alert either extends the target's active incident or opens a new one.
//! The correlator also answers the suppression question: is a related target
//! already being remediated?

pub mod alert;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::incident::{Incident, IncidentStatus, IncidentStore, MergeOutcome, SeverityOrder};

pub use self::alert::{Alert, AlertError, AlertPayload};

/// What happened to an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Correlation {
    pub incident_id: Uuid,
    pub target: String,
    pub outcome: MergeOutcome,
}

impl Correlation {
    /// The incident is `OPEN` because of this alert and needs a driver.
    pub fn needs_drive(&self) -> bool {
        matches!(self.outcome, MergeOutcome::Created | MergeOutcome::Reopened)
    }
}

pub struct Correlator {
    store: Arc<IncidentStore>,
    order: SeverityOrder,
    related_groups: Vec<Vec<String>>,
}

impl Correlator {
    pub fn new(store: Arc<IncidentStore>, order: SeverityOrder, related_groups: Vec<Vec<String>>) -> Self {
        Self {
            store,
            order,
            related_groups,
        }
    }

    /// Fold a validated alert into the store.
    pub fn correlate(&self, alert: &Alert) -> Correlation {
        let evidence = alert.evidence(Utc::now());
        let upserted =
            self.store
                .upsert_by_target(&alert.target, alert.breach_kind, evidence, &self.order);

        if let Some(hint) = &alert.hint {
            if hint != &upserted.incident_id.to_string() {
                debug!(
                    incident_id = %upserted.incident_id,
                    hint = %hint,
                    "sender incident id superseded by correlation"
                );
            }
        }
        info!(
            incident_id = %upserted.incident_id,
            target = %alert.target.name,
            breach = %alert.breach_kind,
            outcome = ?upserted.outcome,
            "alert correlated"
        );

        Correlation {
            incident_id: upserted.incident_id,
            target: alert.target.name.clone(),
            outcome: upserted.outcome,
        }
    }

    /// Targets sharing a related group with `target`, excluding itself.
    pub fn related_targets<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.related_groups
            .iter()
            .filter(move |group| group.iter().any(|t| t == target))
            .flatten()
            .map(String::as_str)
            .filter(move |t| *t != target)
    }

    /// An in-flight remediation on a related target that covers `incident`.
    pub fn remediating_related(&self, incident: &Incident) -> Option<Uuid> {
        self.related_targets(&incident.target).find_map(|other| {
            let id = self.store.active_for(other)?;
            let related = self.store.get(id).ok()?;
            (related.status == IncidentStatus::ActionPending).then_some(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{BreachKind, RemediationAction, StoreLimits};
    use serde_json::json;

    fn alert(target: &str, slo: &str) -> Alert {
        Alert::from_json(json!({
            "timestamp": "2024-05-01T12:00:00Z",
            "breached_slo": slo,
            "container_info": {"id": format!("{}-id", target), "name": target, "image": "app:v1"},
            "observability_context": {"correlated_logs": "boom"}
        }))
        .unwrap()
    }

    fn correlator(groups: Vec<Vec<String>>) -> (Arc<IncidentStore>, Correlator) {
        let store = Arc::new(IncidentStore::new(StoreLimits::default()));
        let c = Correlator::new(store.clone(), SeverityOrder::default(), groups);
        (store, c)
    }

    #[test]
    fn test_same_target_merges() {
        let (store, c) = correlator(vec![]);
        let first = c.correlate(&alert("svc-1", "latency-breach"));
        let second = c.correlate(&alert("svc-1", "crash-loop"));
        assert!(first.needs_drive());
        assert!(!second.needs_drive());
        assert_eq!(first.incident_id, second.incident_id);
        assert_eq!(second.outcome, MergeOutcome::Merged { upgraded: true });
        assert_eq!(store.get(first.incident_id).unwrap().breach_kind, BreachKind::CrashLoop);
    }

    #[test]
    fn test_weaker_breach_does_not_downgrade() {
        let (store, c) = correlator(vec![]);
        let first = c.correlate(&alert("svc-1", "crash-loop"));
        c.correlate(&alert("svc-1", "latency-breach"));
        let inc = store.get(first.incident_id).unwrap();
        assert_eq!(inc.breach_kind, BreachKind::CrashLoop);
        assert_eq!(inc.observability_context.len(), 2);
    }

    #[test]
    fn test_related_targets() {
        let (_, c) = correlator(vec![vec!["api".into(), "worker".into(), "db".into()]]);
        let related: Vec<&str> = c.related_targets("api").collect();
        assert_eq!(related, vec!["worker", "db"]);
        assert_eq!(c.related_targets("other").count(), 0);
    }

    #[test]
    fn test_remediating_related_detects_action_pending_peer() {
        let (store, c) = correlator(vec![vec!["api".into(), "worker".into()]]);
        let api = c.correlate(&alert("api", "memory-saturation")).incident_id;
        let worker = c.correlate(&alert("worker", "latency-breach")).incident_id;

        let worker_inc = store.get(worker).unwrap();
        assert_eq!(c.remediating_related(&worker_inc), None);

        let claimed = store
            .transition(api, IncidentStatus::Open, IncidentStatus::Diagnosing)
            .unwrap();
        store
            .record_diagnosis(
                api,
                crate::incident::Diagnosis {
                    root_cause: "leak".into(),
                    recommended_action: RemediationAction::Restart,
                    rationale: None,
                    confidence: None,
                    scale_factor: None,
                    rollback_to: None,
                    generation: claimed.generation,
                    diagnosed_at: Utc::now(),
                },
            )
            .unwrap();
        assert_eq!(c.remediating_related(&worker_inc), Some(api));
    }
}

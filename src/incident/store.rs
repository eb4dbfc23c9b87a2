//! In-memory Incident Store.
//!
//! Owns incident identity and lifetime. Every mutation takes the per-target
//! slot lock and then the incident's own lock, in that order, so alerts for
//! different targets never contend and no lock is ever held across an
//! external call. Status changes are compare-and-set: callers name the status
//! they believe is current and get [`StoreError::Conflict`] on mismatch.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    ActionRecord, BreachKind, Diagnosis, Evidence, FailureReason, Incident, IncidentStatus,
    MergeOutcome, Observation, RemediationAction, SeverityOrder, TargetRef,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("incident {0} not found")]
    NotFound(Uuid),
    #[error("incident {id} is {actual}, expected {expected}")]
    Conflict {
        id: Uuid,
        expected: IncidentStatus,
        actual: IncidentStatus,
    },
    #[error("incident {id} changed underneath (generation {actual}, expected {expected})")]
    StaleGeneration { id: Uuid, expected: u64, actual: u64 },
    #[error("illegal transition {from} -> {to} for incident {id}")]
    IllegalTransition {
        id: Uuid,
        from: IncidentStatus,
        to: IncidentStatus,
    },
    #[error("incident {id} already has {max} remediation attempts")]
    AttemptCap { id: Uuid, max: u32 },
    #[error("incident {0} is not in an observation window")]
    NotObserving(Uuid),
}

impl StoreError {
    /// Another worker advanced the incident first.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::StaleGeneration { .. } | StoreError::NotObserving(_)
        )
    }
}

/// Bounds the store enforces on every incident.
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub evidence_cap: usize,
    pub max_attempts: u32,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            evidence_cap: 32,
            max_attempts: 3,
        }
    }
}

/// Result of [`IncidentStore::upsert_by_target`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub incident_id: Uuid,
    pub outcome: MergeOutcome,
}

/// Predicate for [`IncidentStore::list`].
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub statuses: Option<Vec<IncidentStatus>>,
    pub target: Option<String>,
}

impl IncidentFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: IncidentStatus) -> Self {
        Self {
            statuses: Some(vec![status]),
            target: None,
        }
    }

    pub fn active() -> Self {
        Self {
            statuses: Some(vec![
                IncidentStatus::Open,
                IncidentStatus::Diagnosing,
                IncidentStatus::ActionPending,
            ]),
            target: None,
        }
    }

    pub fn matches(&self, incident: &Incident) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&incident.status) {
                return false;
            }
        }
        match &self.target {
            Some(target) => &incident.target == target,
            None => true,
        }
    }
}

type Handle = Arc<RwLock<Incident>>;
/// Holds the id of the target's single active incident, if any.
type TargetSlot = Arc<Mutex<Option<Uuid>>>;

/// Keyed registry of incidents. Construct one per engine instance.
pub struct IncidentStore {
    incidents: RwLock<HashMap<Uuid, Handle>>,
    targets: RwLock<HashMap<String, TargetSlot>>,
    limits: StoreLimits,
}

impl IncidentStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            incidents: RwLock::new(HashMap::new()),
            targets: RwLock::new(HashMap::new()),
            limits,
        }
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    fn handle(&self, id: Uuid) -> Option<Handle> {
        self.incidents.read().get(&id).cloned()
    }

    fn slot(&self, target: &str) -> TargetSlot {
        if let Some(slot) = self.targets.read().get(target) {
            return slot.clone();
        }
        self.targets
            .write()
            .entry(target.to_string())
            .or_default()
            .clone()
    }

    /// Merge an alert into the target's active incident or open a new one.
    pub fn upsert_by_target(
        &self,
        target: &TargetRef,
        breach_kind: BreachKind,
        evidence: Evidence,
        order: &SeverityOrder,
    ) -> Upserted {
        let slot = self.slot(&target.name);
        let mut active = slot.lock();

        if let Some(handle) = (*active).and_then(|id| self.handle(id)) {
            let mut incident = handle.write();
            if incident.status.is_active() {
                let outcome = incident.absorb(
                    target,
                    breach_kind,
                    evidence,
                    order,
                    self.limits.evidence_cap,
                );
                if outcome == MergeOutcome::Reopened {
                    incident.generation += 1;
                    incident.observation = None;
                    incident.status = IncidentStatus::Open;
                    info!(
                        incident_id = %incident.id,
                        target = %incident.target,
                        generation = incident.generation,
                        "repeat breach during observation, incident reopened"
                    );
                }
                debug!(incident_id = %incident.id, ?outcome, "alert merged");
                return Upserted {
                    incident_id: incident.id,
                    outcome,
                };
            }
        }

        let incident = Incident::open(target, breach_kind, evidence);
        let id = incident.id;
        self.incidents
            .write()
            .insert(id, Arc::new(RwLock::new(incident)));
        *active = Some(id);
        info!(incident_id = %id, target = %target.name, %breach_kind, "incident opened");
        Upserted {
            incident_id: id,
            outcome: MergeOutcome::Created,
        }
    }

    /// Snapshot of one incident.
    pub fn get(&self, id: Uuid) -> Result<Incident, StoreError> {
        self.handle(id)
            .map(|h| h.read().clone())
            .ok_or(StoreError::NotFound(id))
    }

    /// Lazily yields snapshots of incidents matching `filter`.
    pub fn list(&self, filter: IncidentFilter) -> impl Iterator<Item = Incident> {
        let handles: Vec<Handle> = self.incidents.read().values().cloned().collect();
        handles
            .into_iter()
            .map(|h| h.read().clone())
            .filter(move |incident| filter.matches(incident))
    }

    pub fn len(&self) -> usize {
        self.incidents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the target's active incident, if one exists.
    pub fn active_for(&self, target: &str) -> Option<Uuid> {
        let slot = self.targets.read().get(target).cloned()?;
        let id = *slot.lock();
        id
    }

    /// Compare-and-set status change.
    pub fn transition(
        &self,
        id: Uuid,
        expected: IncidentStatus,
        next: IncidentStatus,
    ) -> Result<Incident, StoreError> {
        self.mutate(id, expected, None, next, |_| Ok(()))
    }

    /// Store a diagnosis and advance `DIAGNOSING` to `ACTION_PENDING`, or to
    /// `RESOLVED` for `IGNORE`. Rejected if the incident's generation moved
    /// past the one the diagnosis was computed against.
    pub fn record_diagnosis(&self, id: Uuid, diagnosis: Diagnosis) -> Result<Incident, StoreError> {
        let next = match diagnosis.recommended_action {
            RemediationAction::Ignore => IncidentStatus::Resolved,
            _ => IncidentStatus::ActionPending,
        };
        let generation = diagnosis.generation;
        self.mutate(id, IncidentStatus::Diagnosing, Some(generation), next, move |incident| {
            incident.diagnosis = Some(diagnosis);
            Ok(())
        })
    }

    /// Terminal failure with a reason code.
    pub fn fail(
        &self,
        id: Uuid,
        expected: IncidentStatus,
        reason: FailureReason,
    ) -> Result<Incident, StoreError> {
        self.mutate(id, expected, None, IncidentStatus::Failed, |incident| {
            incident.failure = Some(reason);
            Ok(())
        })
    }

    /// `OPEN -> SUPPRESSED` in favour of another in-flight incident.
    pub fn suppress(&self, id: Uuid, by: Uuid) -> Result<Incident, StoreError> {
        self.mutate(id, IncidentStatus::Open, None, IncidentStatus::Suppressed, |incident| {
            incident.suppressed_by = Some(by);
            Ok(())
        })
    }

    /// Append a remediation record to an `ACTION_PENDING` incident.
    ///
    /// Runtime invocations increment `attempt_count`; the store refuses the
    /// record once the cap is reached.
    pub fn record_action(&self, id: Uuid, record: ActionRecord) -> Result<Incident, StoreError> {
        let max = self.limits.max_attempts;
        self.update(id, IncidentStatus::ActionPending, move |incident| {
            if incident.observation.is_some() {
                return Err(StoreError::Conflict {
                    id,
                    expected: IncidentStatus::ActionPending,
                    actual: incident.status,
                });
            }
            if record.outcome.is_attempt() {
                if incident.attempt_count >= max {
                    return Err(StoreError::AttemptCap { id, max });
                }
                incident.attempt_count += 1;
            }
            incident.action_history.push(record);
            Ok(())
        })
    }

    /// Open the post-remediation observation window.
    pub fn begin_observation(
        &self,
        id: Uuid,
        window: chrono::Duration,
    ) -> Result<Observation, StoreError> {
        let mut opened = None;
        self.update(id, IncidentStatus::ActionPending, |incident| {
            if incident.observation.is_some() {
                return Err(StoreError::Conflict {
                    id,
                    expected: IncidentStatus::ActionPending,
                    actual: incident.status,
                });
            }
            let now = Utc::now();
            let observation = Observation {
                generation: incident.generation,
                started_at: now,
                ends_at: now + window,
            };
            incident.observation = Some(observation.clone());
            opened = Some(observation);
            Ok(())
        })?;
        opened.ok_or(StoreError::NotObserving(id))
    }

    /// Close a clean observation window: `ACTION_PENDING -> RESOLVED`.
    pub fn resolve_observed(&self, id: Uuid, generation: u64) -> Result<Incident, StoreError> {
        self.mutate(
            id,
            IncidentStatus::ActionPending,
            Some(generation),
            IncidentStatus::Resolved,
            move |incident| match &incident.observation {
                Some(o) if o.generation == generation => Ok(()),
                _ => Err(StoreError::NotObserving(id)),
            },
        )
    }

    /// Forget terminal incidents that ended before `cutoff`, and target
    /// slots nobody holds. Busy entries are left for the next call.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> usize {
        let removed = {
            let mut incidents = self.incidents.write();
            let before = incidents.len();
            incidents.retain(|_, handle| match handle.try_read() {
                Some(incident) => !(incident.status.is_terminal()
                    && incident.resolved_at.is_some_and(|at| at < cutoff)),
                None => true,
            });
            before - incidents.len()
        };
        self.targets.write().retain(|_, slot| {
            Arc::strong_count(slot) > 1 || slot.try_lock().map_or(true, |active| active.is_some())
        });
        if removed > 0 {
            debug!(removed, "pruned terminal incidents");
        }
        removed
    }

    /// Refresh `updated_at` for an incident a worker still owns.
    pub fn touch(&self, id: Uuid, expected: IncidentStatus) -> Result<Incident, StoreError> {
        self.update(id, expected, |_| Ok(()))
    }

    /// Mutate fields without a status change, guarded by `expected`.
    fn update<F>(&self, id: Uuid, expected: IncidentStatus, f: F) -> Result<Incident, StoreError>
    where
        F: FnOnce(&mut Incident) -> Result<(), StoreError>,
    {
        self.locked(id, |incident, _| {
            if incident.status != expected {
                return Err(StoreError::Conflict {
                    id,
                    expected,
                    actual: incident.status,
                });
            }
            f(incident)?;
            incident.updated_at = Utc::now();
            Ok(incident.clone())
        })
    }

    /// Compare-and-set on status (and optionally generation), then apply `f`
    /// and move to `next`. Nothing is written if any check fails.
    fn mutate<F>(
        &self,
        id: Uuid,
        expected: IncidentStatus,
        generation: Option<u64>,
        next: IncidentStatus,
        f: F,
    ) -> Result<Incident, StoreError>
    where
        F: FnOnce(&mut Incident) -> Result<(), StoreError>,
    {
        self.locked(id, |incident, active| {
            if incident.status != expected {
                return Err(StoreError::Conflict {
                    id,
                    expected,
                    actual: incident.status,
                });
            }
            if let Some(expected_generation) = generation {
                if incident.generation != expected_generation {
                    return Err(StoreError::StaleGeneration {
                        id,
                        expected: expected_generation,
                        actual: incident.generation,
                    });
                }
            }
            if !expected.can_transition_to(next) {
                return Err(StoreError::IllegalTransition {
                    id,
                    from: expected,
                    to: next,
                });
            }

            // Validate against a scratch copy so a failing `f` leaves no trace.
            let mut staged = incident.clone();
            f(&mut staged)?;

            let now = Utc::now();
            staged.status = next;
            staged.updated_at = now;
            if expected == IncidentStatus::ActionPending {
                staged.observation = None;
            }
            if next.is_terminal() {
                staged.resolved_at = Some(now);
                if *active == Some(id) {
                    *active = None;
                }
            }
            *incident = staged;
            info!(incident_id = %id, from = %expected, to = %next, "incident transition");
            Ok(incident.clone())
        })
    }

    /// Run `f` holding the target slot lock, then the incident lock.
    fn locked<T, F>(&self, id: Uuid, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Incident, &mut Option<Uuid>) -> Result<T, StoreError>,
    {
        let handle = self.handle(id).ok_or(StoreError::NotFound(id))?;
        let target = handle.read().target.clone();
        let slot = self.slot(&target);
        let mut active = slot.lock();
        let mut incident = handle.write();
        f(&mut incident, &mut active)
    }
}

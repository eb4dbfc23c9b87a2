//! Incident data model and the in-memory Incident Store.
//!
//! An [`Incident`] tracks one degraded target from its first breach until a
//! terminal status. All mutation goes through [`store::IncidentStore`].

pub mod severity;
pub mod store;

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use self::severity::SeverityOrder;
pub use self::store::{IncidentFilter, IncidentStore, StoreError, StoreLimits, Upserted};

// ---------------------------------------------------------------------------
// Breach kinds
// ---------------------------------------------------------------------------

/// Category of SLO violation reported by the telemetry pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreachKind {
    LatencyBreach,
    ErrorRateBreach,
    CpuSaturation,
    MemorySaturation,
    CrashLoop,
}

impl BreachKind {
    pub const ALL: [BreachKind; 5] = [
        BreachKind::LatencyBreach,
        BreachKind::ErrorRateBreach,
        BreachKind::CpuSaturation,
        BreachKind::MemorySaturation,
        BreachKind::CrashLoop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BreachKind::LatencyBreach => "latency-breach",
            BreachKind::ErrorRateBreach => "error-rate-breach",
            BreachKind::CpuSaturation => "cpu-saturation",
            BreachKind::MemorySaturation => "memory-saturation",
            BreachKind::CrashLoop => "crash-loop",
        }
    }
}

impl fmt::Display for BreachKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreachKind {
    type Err = String;

    /// Accepts kebab-case, snake_case and SCREAMING_SNAKE_CASE spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        BreachKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown breach kind '{}'", s))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Open,
    Diagnosing,
    ActionPending,
    Resolved,
    Failed,
    Suppressed,
}

impl IncidentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IncidentStatus::Resolved | IncidentStatus::Failed | IncidentStatus::Suppressed
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the state machine has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: IncidentStatus) -> bool {
        use IncidentStatus::*;
        matches!(
            (self, next),
            (Open, Diagnosing)
                | (Open, Suppressed)
                | (Diagnosing, ActionPending)
                | (Diagnosing, Resolved)
                | (Diagnosing, Failed)
                | (ActionPending, Resolved)
                | (ActionPending, Failed)
                | (ActionPending, Open)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "OPEN",
            IncidentStatus::Diagnosing => "DIAGNOSING",
            IncidentStatus::ActionPending => "ACTION_PENDING",
            IncidentStatus::Resolved => "RESOLVED",
            IncidentStatus::Failed => "FAILED",
            IncidentStatus::Suppressed => "SUPPRESSED",
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "OPEN" => Ok(IncidentStatus::Open),
            "DIAGNOSING" => Ok(IncidentStatus::Diagnosing),
            "ACTION_PENDING" => Ok(IncidentStatus::ActionPending),
            "RESOLVED" => Ok(IncidentStatus::Resolved),
            "FAILED" => Ok(IncidentStatus::Failed),
            "SUPPRESSED" => Ok(IncidentStatus::Suppressed),
            _ => Err(format!("unknown incident status '{}'", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

/// Identity of the workload an alert refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    /// Stable dedup key (container / workload name).
    pub name: String,
    /// Runtime identifier, may change when the workload is recreated.
    pub id: Option<String>,
    pub image: Option<String>,
}

impl TargetRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            image: None,
        }
    }
}

/// One alert's worth of observability context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// When the telemetry pipeline observed the breach.
    pub observed_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub breach_kind: BreachKind,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub trace_ids: Vec<String>,
    #[serde(default)]
    pub logs: String,
    /// Incident id suggested by the sender; informational only.
    pub alert_hint: Option<String>,
}

// ---------------------------------------------------------------------------
// Diagnosis and remediation
// ---------------------------------------------------------------------------

/// Remediation kinds the reasoning service may recommend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemediationAction {
    Restart,
    ScaleOut,
    Rollback,
    Ignore,
}

impl RemediationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationAction::Restart => "RESTART",
            RemediationAction::ScaleOut => "SCALE_OUT",
            RemediationAction::Rollback => "ROLLBACK",
            RemediationAction::Ignore => "IGNORE",
        }
    }
}

impl fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemediationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "RESTART" => Ok(RemediationAction::Restart),
            "SCALE_OUT" => Ok(RemediationAction::ScaleOut),
            "ROLLBACK" => Ok(RemediationAction::Rollback),
            "IGNORE" => Ok(RemediationAction::Ignore),
            other => Err(format!("unrecognized remediation action '{}'", other)),
        }
    }
}

/// Structured result returned by the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub root_cause: String,
    pub recommended_action: RemediationAction,
    pub rationale: Option<String>,
    /// Model-reported confidence in `0.0..=1.0`.
    pub confidence: Option<f64>,
    pub scale_factor: Option<u32>,
    pub rollback_to: Option<String>,
    /// Incident generation the diagnosis was computed against.
    pub generation: u64,
    pub diagnosed_at: DateTime<Utc>,
}

/// Result of one entry in `action_history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The runtime accepted and completed the operation.
    Succeeded,
    /// The runtime was unreachable or rejected the operation.
    Failed { error: String },
    /// Target was already in the post-action state; nothing invoked.
    AlreadySatisfied,
    /// Cooldown for the target had not elapsed; nothing invoked.
    SkippedCooldown { remaining_ms: u64 },
}

impl ActionOutcome {
    /// Whether the entry represents an invocation of the runtime.
    pub fn is_attempt(&self) -> bool {
        matches!(self, ActionOutcome::Succeeded | ActionOutcome::Failed { .. })
    }
}

/// An append-only remediation history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: RemediationAction,
    /// Human-readable form of the concrete operation, e.g. `scale_out(x2)`.
    pub operation: String,
    pub at: DateTime<Utc>,
    pub outcome: ActionOutcome,
}

/// Reason code recorded when an incident ends `FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    DiagnosisUnavailable,
    AttemptsExhausted,
    RemediationFailed,
    TargetNotAllowed,
    Stalled,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::DiagnosisUnavailable => "diagnosis-unavailable",
            FailureReason::AttemptsExhausted => "attempts-exhausted",
            FailureReason::RemediationFailed => "remediation-failed",
            FailureReason::TargetNotAllowed => "target-not-allowed",
            FailureReason::Stalled => "stalled",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-remediation watch for a repeat breach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Incident generation when the window opened. A reopen bumps the
    /// generation, which invalidates the window.
    pub generation: u64,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Incident
// ---------------------------------------------------------------------------

/// How an alert was folded into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    Created,
    /// Evidence appended to an active incident.
    Merged { upgraded: bool },
    /// Repeat breach during an observation window; incident is `OPEN` again.
    Reopened,
}

/// The unit of tracked degradation for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub target: String,
    pub target_id: Option<String>,
    pub image: Option<String>,
    pub breach_kind: BreachKind,
    pub status: IncidentStatus,
    /// Bumped whenever the evidence materially changes.
    pub generation: u64,
    pub observability_context: VecDeque<Evidence>,
    /// Evidence entries dropped to respect the retention cap.
    pub evidence_evicted: u64,
    pub diagnosis: Option<Diagnosis>,
    pub action_history: Vec<ActionRecord>,
    pub attempt_count: u32,
    pub observation: Option<Observation>,
    pub failure: Option<FailureReason>,
    pub suppressed_by: Option<Uuid>,
    pub last_breach_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// Create a fresh `OPEN` incident from its first alert.
    pub fn open(target: &TargetRef, breach_kind: BreachKind, evidence: Evidence) -> Self {
        let now = Utc::now();
        let mut context = VecDeque::new();
        let last_breach_at = evidence.observed_at;
        context.push_back(evidence);
        Self {
            id: Uuid::new_v4(),
            target: target.name.clone(),
            target_id: target.id.clone(),
            image: target.image.clone(),
            breach_kind,
            status: IncidentStatus::Open,
            generation: 0,
            observability_context: context,
            evidence_evicted: 0,
            diagnosis: None,
            action_history: Vec::new(),
            attempt_count: 0,
            observation: None,
            failure: None,
            suppressed_by: None,
            last_breach_at,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    /// Age since creation, clamped to zero.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.created_at).max(chrono::Duration::zero())
    }

    /// Append evidence, evicting the oldest entries beyond `cap`.
    pub fn push_evidence(&mut self, evidence: Evidence, cap: usize) {
        if evidence.observed_at > self.last_breach_at {
            self.last_breach_at = evidence.observed_at;
        }
        self.observability_context.push_back(evidence);
        while self.observability_context.len() > cap.max(1) {
            self.observability_context.pop_front();
            self.evidence_evicted += 1;
        }
    }

    /// Fold a new alert for the same target into this incident.
    ///
    /// Does not change `status`; a `Reopened` result tells the store to move
    /// the incident back to `OPEN`.
    pub fn absorb(
        &mut self,
        target: &TargetRef,
        breach_kind: BreachKind,
        evidence: Evidence,
        order: &SeverityOrder,
        cap: usize,
    ) -> MergeOutcome {
        self.push_evidence(evidence, cap);
        if target.id.is_some() {
            self.target_id = target.id.clone();
        }
        if target.image.is_some() {
            self.image = target.image.clone();
        }

        let upgraded = order.outranks(breach_kind, self.breach_kind);
        if order.at_least(breach_kind, self.breach_kind) {
            self.breach_kind = breach_kind;
        }
        if upgraded {
            self.generation += 1;
        }
        self.updated_at = Utc::now();

        if self.status == IncidentStatus::ActionPending && self.observation.is_some() {
            MergeOutcome::Reopened
        } else {
            MergeOutcome::Merged { upgraded }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn evidence(kind: BreachKind) -> Evidence {
        let now = Utc::now();
        Evidence {
            observed_at: now,
            received_at: now,
            breach_kind: kind,
            metrics: BTreeMap::new(),
            trace_ids: vec![],
            logs: String::new(),
            alert_hint: None,
        }
    }

    #[test]
    fn test_breach_kind_parsing_accepts_common_spellings() {
        assert_eq!("memory-saturation".parse::<BreachKind>(), Ok(BreachKind::MemorySaturation));
        assert_eq!("CRASH_LOOP".parse::<BreachKind>(), Ok(BreachKind::CrashLoop));
        assert_eq!("latency_breach".parse::<BreachKind>(), Ok(BreachKind::LatencyBreach));
        assert!("disk-full".parse::<BreachKind>().is_err());
    }

    #[test]
    fn test_state_machine_edges() {
        use IncidentStatus::*;
        assert!(Open.can_transition_to(Diagnosing));
        assert!(Open.can_transition_to(Suppressed));
        assert!(Diagnosing.can_transition_to(Failed));
        assert!(ActionPending.can_transition_to(Open));
        assert!(!Open.can_transition_to(Resolved));
        assert!(!Resolved.can_transition_to(Open));
        assert!(!Failed.can_transition_to(Diagnosing));
        assert!(!Suppressed.can_transition_to(Open));
    }

    #[test]
    fn test_evidence_cap_evicts_oldest() {
        let target = TargetRef::named("svc-1");
        let mut inc = Incident::open(&target, BreachKind::LatencyBreach, evidence(BreachKind::LatencyBreach));
        for i in 0..5 {
            let mut e = evidence(BreachKind::LatencyBreach);
            e.logs = format!("entry-{}", i);
            inc.push_evidence(e, 3);
        }
        assert_eq!(inc.observability_context.len(), 3);
        assert_eq!(inc.evidence_evicted, 3);
        assert_eq!(inc.observability_context.front().unwrap().logs, "entry-2");
        assert_eq!(inc.observability_context.back().unwrap().logs, "entry-4");
    }

    #[test]
    fn test_absorb_upgrades_and_bumps_generation() {
        let order = SeverityOrder::default();
        let target = TargetRef::named("svc-1");
        let mut inc = Incident::open(&target, BreachKind::LatencyBreach, evidence(BreachKind::LatencyBreach));

        let outcome = inc.absorb(&target, BreachKind::MemorySaturation, evidence(BreachKind::MemorySaturation), &order, 10);
        assert_eq!(outcome, MergeOutcome::Merged { upgraded: true });
        assert_eq!(inc.breach_kind, BreachKind::MemorySaturation);
        assert_eq!(inc.generation, 1);

        // A weaker breach is recorded as evidence only.
        let outcome = inc.absorb(&target, BreachKind::LatencyBreach, evidence(BreachKind::LatencyBreach), &order, 10);
        assert_eq!(outcome, MergeOutcome::Merged { upgraded: false });
        assert_eq!(inc.breach_kind, BreachKind::MemorySaturation);
        assert_eq!(inc.generation, 1);
        assert_eq!(inc.observability_context.len(), 3);
    }

    #[test]
    fn test_absorb_during_observation_requests_reopen() {
        let order = SeverityOrder::default();
        let target = TargetRef::named("svc-1");
        let mut inc = Incident::open(&target, BreachKind::CrashLoop, evidence(BreachKind::CrashLoop));
        inc.status = IncidentStatus::ActionPending;
        inc.observation = Some(Observation {
            generation: 0,
            started_at: Utc::now(),
            ends_at: Utc::now(),
        });
        let outcome = inc.absorb(&target, BreachKind::CrashLoop, evidence(BreachKind::CrashLoop), &order, 10);
        assert_eq!(outcome, MergeOutcome::Reopened);
    }

    #[test]
    fn test_action_and_reason_wire_names() {
        assert_eq!(serde_json::to_value(RemediationAction::ScaleOut).unwrap(), "SCALE_OUT");
        assert_eq!(
            serde_json::to_value(FailureReason::DiagnosisUnavailable).unwrap(),
            "diagnosis-unavailable"
        );
        assert_eq!(serde_json::to_value(IncidentStatus::ActionPending).unwrap(), "ACTION_PENDING");
        assert!("REBOOT".parse::<RemediationAction>().is_err());
    }
}

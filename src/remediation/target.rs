//! Action target contract and the concrete operations the executor issues.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ExecutorConfig;
use crate::incident::{Diagnosis, RemediationAction};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("action target timed out")]
    Timeout,
    #[error("action target unreachable: {0}")]
    Unreachable(String),
    #[error("operation rejected by action target: {0}")]
    Rejected(String),
}

/// State of a workload as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Reply to a restart / scale / rollback command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// State observed after the command ran.
    #[serde(default)]
    pub state: Option<TargetState>,
}

/// The workload runtime that performs remediation.
///
/// Commands are not assumed idempotent; the executor checks state first.
#[async_trait]
pub trait ActionTarget: Send + Sync {
    async fn restart(&self, target_id: &str) -> Result<CommandResult, TargetError>;

    async fn scale_out(&self, target_id: &str, factor: u32) -> Result<CommandResult, TargetError>;

    async fn rollback(&self, target_id: &str, to_version: &str) -> Result<CommandResult, TargetError>;

    /// Current state, or `None` if the runtime does not expose one.
    async fn observe(&self, _target_id: &str) -> Result<Option<TargetState>, TargetError> {
        Ok(None)
    }
}

/// A concrete command derived from a diagnosis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Restart,
    ScaleOut { factor: u32 },
    Rollback { to_version: String },
}

impl Operation {
    /// `None` for `IGNORE`, which has nothing to execute.
    pub fn plan(diagnosis: &Diagnosis, cfg: &ExecutorConfig) -> Option<Self> {
        match diagnosis.recommended_action {
            RemediationAction::Restart => Some(Operation::Restart),
            RemediationAction::ScaleOut => Some(Operation::ScaleOut {
                factor: diagnosis.scale_factor.unwrap_or(cfg.default_scale_factor),
            }),
            RemediationAction::Rollback => Some(Operation::Rollback {
                to_version: diagnosis
                    .rollback_to
                    .clone()
                    .unwrap_or_else(|| cfg.default_rollback_version.clone()),
            }),
            RemediationAction::Ignore => None,
        }
    }

    pub fn action(&self) -> RemediationAction {
        match self {
            Operation::Restart => RemediationAction::Restart,
            Operation::ScaleOut { .. } => RemediationAction::ScaleOut,
            Operation::Rollback { .. } => RemediationAction::Rollback,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Operation::Restart => "restart".to_string(),
            Operation::ScaleOut { factor } => format!("scale_out(x{})", factor),
            Operation::Rollback { to_version } => format!("rollback({})", to_version),
        }
    }

    /// Whether `state` already reflects this operation for a breach last
    /// seen at `last_breach_at`.
    pub fn is_satisfied(&self, state: &TargetState, last_breach_at: DateTime<Utc>) -> bool {
        match self {
            Operation::Restart => state
                .started_at
                .is_some_and(|started| state.running && started > last_breach_at),
            // Scale-out has no baseline to compare against.
            Operation::ScaleOut { .. } => false,
            Operation::Rollback { to_version } => {
                state.version.as_deref() == Some(to_version.as_str())
            }
        }
    }

    pub async fn invoke(
        &self,
        target: &dyn ActionTarget,
        target_id: &str,
    ) -> Result<CommandResult, TargetError> {
        match self {
            Operation::Restart => target.restart(target_id).await,
            Operation::ScaleOut { factor } => target.scale_out(target_id, *factor).await,
            Operation::Rollback { to_version } => target.rollback(target_id, to_version).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnosis(action: RemediationAction) -> Diagnosis {
        Diagnosis {
            root_cause: "x".into(),
            recommended_action: action,
            rationale: None,
            confidence: None,
            scale_factor: None,
            rollback_to: None,
            generation: 0,
            diagnosed_at: Utc::now(),
        }
    }

    #[test]
    fn test_plan_uses_config_defaults() {
        let cfg = ExecutorConfig::default();
        assert_eq!(Operation::plan(&diagnosis(RemediationAction::Restart), &cfg), Some(Operation::Restart));
        assert_eq!(
            Operation::plan(&diagnosis(RemediationAction::ScaleOut), &cfg),
            Some(Operation::ScaleOut { factor: 2 })
        );
        assert_eq!(
            Operation::plan(&diagnosis(RemediationAction::Rollback), &cfg),
            Some(Operation::Rollback { to_version: "previous".into() })
        );
        assert_eq!(Operation::plan(&diagnosis(RemediationAction::Ignore), &cfg), None);

        let mut d = diagnosis(RemediationAction::ScaleOut);
        d.scale_factor = Some(4);
        assert_eq!(Operation::plan(&d, &cfg), Some(Operation::ScaleOut { factor: 4 }));
    }

    #[test]
    fn test_restart_satisfied_only_after_breach() {
        let breach = Utc::now();
        let before = TargetState {
            running: true,
            started_at: Some(breach - chrono::Duration::seconds(30)),
            ..TargetState::default()
        };
        let after = TargetState {
            running: true,
            started_at: Some(breach + chrono::Duration::seconds(5)),
            ..TargetState::default()
        };
        let after_but_down = TargetState {
            running: false,
            ..after.clone()
        };
        assert!(!Operation::Restart.is_satisfied(&before, breach));
        assert!(Operation::Restart.is_satisfied(&after, breach));
        assert!(!Operation::Restart.is_satisfied(&after_but_down, breach));
    }

    #[test]
    fn test_rollback_satisfied_on_matching_version() {
        let op = Operation::Rollback { to_version: "v1.2".into() };
        let state = TargetState {
            version: Some("v1.2".into()),
            ..TargetState::default()
        };
        assert!(op.is_satisfied(&state, Utc::now()));
        assert!(!Operation::ScaleOut { factor: 2 }.is_satisfied(&state, Utc::now()));
    }
}

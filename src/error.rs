//! Engine-level error taxonomy.

use thiserror::Error;
use uuid::Uuid;

use crate::correlate::alert::AlertError;
use crate::incident::StoreError;
use crate::reasoning::ReasoningError;
use crate::remediation::target::TargetError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed inbound alert; rejected at the boundary.
    #[error("validation error: {0}")]
    Validation(#[from] AlertError),

    /// Reasoning service or action target timed out or was unreachable.
    #[error("dependency unavailable: {0}")]
    TransientDependency(String),

    /// Well-formed but semantically invalid diagnosis.
    #[error("unusable diagnosis: {0}")]
    Parse(String),

    /// Cooldown, attempt cap or allow-list blocked a remediation.
    #[error("guardrail: {0}")]
    Guardrail(String),

    /// Compare-and-set lost to another worker.
    #[error("concurrency conflict: {0}")]
    Conflict(StoreError),

    #[error("incident {0} not found")]
    NotFound(Uuid),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Errors a retry loop may try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientDependency(_) | EngineError::Parse(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::AttemptCap { .. } => EngineError::Guardrail(err.to_string()),
            StoreError::IllegalTransition { .. } => EngineError::Internal(err.to_string()),
            other => EngineError::Conflict(other),
        }
    }
}

impl From<ReasoningError> for EngineError {
    fn from(err: ReasoningError) -> Self {
        match err {
            ReasoningError::Malformed(msg) => EngineError::Parse(msg),
            other => EngineError::TransientDependency(other.to_string()),
        }
    }
}

impl From<TargetError> for EngineError {
    fn from(err: TargetError) -> Self {
        EngineError::TransientDependency(err.to_string())
    }
}

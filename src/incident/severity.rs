//! Fixed total order over breach kinds.
//!
//! Used only to decide whether a merged alert upgrades an incident's
//! `breach_kind`; never consulted when choosing a remediation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::BreachKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeverityOrderError {
    #[error("breach kind '{0}' listed more than once")]
    Duplicate(BreachKind),
    #[error("breach kind '{0}' missing from severity order")]
    Missing(BreachKind),
}

/// Breach kinds ranked from least to most severe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<BreachKind>", into = "Vec<BreachKind>")]
pub struct SeverityOrder {
    ranked: Vec<BreachKind>,
}

impl SeverityOrder {
    /// Build an order from a lowest-first list that names every kind once.
    pub fn from_list(ranked: Vec<BreachKind>) -> Result<Self, SeverityOrderError> {
        for (i, kind) in ranked.iter().enumerate() {
            if ranked[..i].contains(kind) {
                return Err(SeverityOrderError::Duplicate(*kind));
            }
        }
        if let Some(missing) = BreachKind::ALL.into_iter().find(|k| !ranked.contains(k)) {
            return Err(SeverityOrderError::Missing(missing));
        }
        Ok(Self { ranked })
    }

    pub fn rank(&self, kind: BreachKind) -> usize {
        self.ranked
            .iter()
            .position(|k| *k == kind)
            .unwrap_or_default()
    }

    /// `candidate` is at least as severe as `current`.
    pub fn at_least(&self, candidate: BreachKind, current: BreachKind) -> bool {
        self.rank(candidate) >= self.rank(current)
    }

    /// `candidate` is strictly more severe than `current`.
    pub fn outranks(&self, candidate: BreachKind, current: BreachKind) -> bool {
        self.rank(candidate) > self.rank(current)
    }
}

impl Default for SeverityOrder {
    fn default() -> Self {
        Self {
            ranked: vec![
                BreachKind::LatencyBreach,
                BreachKind::ErrorRateBreach,
                BreachKind::CpuSaturation,
                BreachKind::MemorySaturation,
                BreachKind::CrashLoop,
            ],
        }
    }
}

impl TryFrom<Vec<BreachKind>> for SeverityOrder {
    type Error = SeverityOrderError;

    fn try_from(value: Vec<BreachKind>) -> Result<Self, Self::Error> {
        Self::from_list(value)
    }
}

impl From<SeverityOrder> for Vec<BreachKind> {
    fn from(order: SeverityOrder) -> Self {
        order.ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let order = SeverityOrder::default();
        assert!(order.outranks(BreachKind::MemorySaturation, BreachKind::LatencyBreach));
        assert!(order.outranks(BreachKind::CrashLoop, BreachKind::MemorySaturation));
        assert!(order.at_least(BreachKind::CpuSaturation, BreachKind::CpuSaturation));
        assert!(!order.outranks(BreachKind::CpuSaturation, BreachKind::CpuSaturation));
    }

    #[test]
    fn test_rejects_incomplete_or_duplicate_lists() {
        let err = SeverityOrder::from_list(vec![BreachKind::CrashLoop]).unwrap_err();
        assert_eq!(err, SeverityOrderError::Missing(BreachKind::LatencyBreach));

        let mut dup = BreachKind::ALL.to_vec();
        dup.push(BreachKind::CrashLoop);
        assert_eq!(
            SeverityOrder::from_list(dup).unwrap_err(),
            SeverityOrderError::Duplicate(BreachKind::CrashLoop)
        );
    }

    #[test]
    fn test_custom_order_round_trips_through_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            order: SeverityOrder,
        }
        let parsed: Wrapper = toml::from_str(
            r#"order = ["crash-loop", "latency-breach", "error-rate-breach", "cpu-saturation", "memory-saturation"]"#,
        )
        .unwrap();
        assert!(parsed.order.outranks(BreachKind::LatencyBreach, BreachKind::CrashLoop));
    }
}

//! Inbound alert payload from the telemetry pipeline.
//!
//! Payloads are deserialized leniently and then validated field by field so
//! the sender gets a precise message about what to fix.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::incident::{BreachKind, Evidence, TargetRef};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlertError {
    #[error("malformed alert payload: {0}")]
    Malformed(String),
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Wire shape of an alert, as sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertPayload {
    #[serde(default)]
    pub incident_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub breached_slo: Option<String>,
    #[serde(default)]
    pub container_info: Option<ContainerInfo>,
    #[serde(default)]
    pub observability_context: Option<ObservabilityContext>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityContext {
    /// Metric name to value or trend description.
    #[serde(default)]
    pub metrics_snapshot: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub trace_ids: Vec<String>,
    #[serde(default)]
    pub correlated_logs: String,
}

/// A validated alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub hint: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub breach_kind: BreachKind,
    pub target: TargetRef,
    pub metrics: BTreeMap<String, serde_json::Value>,
    pub trace_ids: Vec<String>,
    pub logs: String,
}

impl Alert {
    /// Parse and validate a JSON alert body.
    pub fn from_json(value: serde_json::Value) -> Result<Self, AlertError> {
        let payload: AlertPayload =
            serde_json::from_value(value).map_err(|e| AlertError::Malformed(e.to_string()))?;
        payload.validate()
    }

    /// Parse and validate raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AlertError> {
        let payload: AlertPayload =
            serde_json::from_slice(bytes).map_err(|e| AlertError::Malformed(e.to_string()))?;
        payload.validate()
    }

    /// Evidence entry recorded on the incident for this alert.
    pub fn evidence(&self, received_at: DateTime<Utc>) -> Evidence {
        Evidence {
            observed_at: self.timestamp,
            received_at,
            breach_kind: self.breach_kind,
            metrics: self.metrics.clone(),
            trace_ids: self.trace_ids.clone(),
            logs: self.logs.clone(),
            alert_hint: self.hint.clone(),
        }
    }
}

impl AlertPayload {
    pub fn validate(self) -> Result<Alert, AlertError> {
        let raw_ts = required(self.timestamp, "timestamp")?;
        let timestamp = parse_timestamp(&raw_ts).ok_or_else(|| AlertError::InvalidField {
            field: "timestamp",
            reason: format!("'{}' is not an ISO-8601 timestamp", raw_ts),
        })?;

        let slo = required(self.breached_slo, "breached_slo")?;
        let breach_kind = slo
            .parse::<BreachKind>()
            .map_err(|reason| AlertError::InvalidField {
                field: "breached_slo",
                reason,
            })?;

        let container = self
            .container_info
            .ok_or(AlertError::MissingField("container_info"))?;
        let name = required(container.name, "container_info.name")?;
        let id = required(container.id, "container_info.id")?;
        let image = required(container.image, "container_info.image")?;

        let context = self
            .observability_context
            .ok_or(AlertError::MissingField("observability_context"))?;

        Ok(Alert {
            hint: self.incident_id.filter(|s| !s.trim().is_empty()),
            timestamp,
            breach_kind,
            target: TargetRef {
                name,
                id: Some(id),
                image: Some(image),
            },
            metrics: context.metrics_snapshot,
            trace_ids: context.trace_ids,
            logs: context.correlated_logs,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, AlertError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(AlertError::MissingField(field)),
    }
}

/// RFC 3339, or an offset-less ISO-8601 timestamp taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

//! Validation of reasoning service replies.
//!
//! Accepts the diagnosis object directly or wrapped in a completion envelope:
//! `{"choices": [{"text": ...}]}`, chat-style `message.content`, or Gemini's
//! `candidates[0].content.parts[0].text`. Anything that does not yield a
//! recognized action is a parse failure.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::ReasoningError;
use crate::incident::{Diagnosis, RemediationAction};

/// Fields extracted from a valid reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDiagnosis {
    pub root_cause: String,
    pub recommended_action: RemediationAction,
    pub rationale: Option<String>,
    pub confidence: Option<f64>,
    pub scale_factor: Option<u32>,
    pub rollback_to: Option<String>,
}

impl ParsedDiagnosis {
    pub fn into_diagnosis(self, generation: u64, at: DateTime<Utc>) -> Diagnosis {
        Diagnosis {
            root_cause: self.root_cause,
            recommended_action: self.recommended_action,
            rationale: self.rationale,
            confidence: self.confidence,
            scale_factor: self.scale_factor,
            rollback_to: self.rollback_to,
            generation,
            diagnosed_at: at,
        }
    }
}

fn malformed(msg: impl Into<String>) -> ReasoningError {
    ReasoningError::Malformed(msg.into())
}

/// Parse a raw reply body.
pub fn parse_reply(value: &Value) -> Result<ParsedDiagnosis, ReasoningError> {
    let obj = value
        .as_object()
        .ok_or_else(|| malformed("reply is not a JSON object"))?;

    if obj.contains_key("recommended_action") || obj.contains_key("root_cause") {
        return parse_object(value);
    }
    if let Some(text) = completion_text(value) {
        let inner = extract_json(text)?;
        return parse_object(&inner);
    }
    if let Some(err) = obj.get("error") {
        return Err(ReasoningError::Unavailable(match err {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }));
    }
    Err(malformed("reply has neither a diagnosis nor a completion"))
}

fn completion_text(value: &Value) -> Option<&str> {
    if let Some(choice) = value.get("choices").and_then(|c| c.get(0)) {
        return choice
            .get("text")
            .or_else(|| choice.get("message").and_then(|m| m.get("content")))
            .and_then(Value::as_str);
    }
    value
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
}

/// Pull the JSON object out of model text, tolerating code fences and prose.
pub fn extract_json(text: &str) -> Result<Value, ReasoningError> {
    let start = text.find('{');
    let end = text.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => serde_json::from_str(&text[s..=e])
            .map_err(|err| malformed(format!("completion text is not valid JSON: {}", err))),
        _ => Err(malformed("completion text contains no JSON object")),
    }
}

fn parse_object(value: &Value) -> Result<ParsedDiagnosis, ReasoningError> {
    let root_cause = value
        .get("root_cause")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| malformed("missing 'root_cause'"))?
        .to_string();

    let recommended_action = value
        .get("recommended_action")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing 'recommended_action'"))?
        .parse::<RemediationAction>()
        .map_err(malformed)?;

    let rationale = value
        .get("justification")
        .or_else(|| value.get("rationale"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let confidence = match value.get("confidence") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let c = v
                .as_f64()
                .ok_or_else(|| malformed("'confidence' is not a number"))?;
            if !(0.0..=1.0).contains(&c) {
                return Err(malformed(format!("'confidence' {} outside 0..1", c)));
            }
            Some(c)
        }
    };

    let scale_factor = match value.get("scale_factor") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let f = v
                .as_u64()
                .filter(|f| (2..=u32::MAX as u64).contains(f))
                .ok_or_else(|| malformed("'scale_factor' must be an integer >= 2"))?;
            Some(f as u32)
        }
    };

    let rollback_to = value
        .get("rollback_to")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(ParsedDiagnosis {
        root_cause,
        recommended_action,
        rationale,
        confidence,
        scale_factor,
        rollback_to,
    })
}

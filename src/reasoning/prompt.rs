//! Natural-language prompt sent alongside the structured context.

use std::fmt::Write;

use super::DiagnosisRequest;

const ACTIONS: &str = "RESTART, SCALE_OUT, ROLLBACK, IGNORE";

/// Render the SRE prompt for a diagnosis request.
pub fn build_prompt(req: &DiagnosisRequest) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "You are OpsMedic, a senior site reliability engineer. Analyze the incident below, \
         determine the most likely root cause and recommend exactly one remediation."
    );
    let _ = writeln!(
        out,
        "Incident {} on container '{}' (ID: {}, Image: {}), open for {}s.",
        req.incident_id,
        req.target,
        req.target_id.as_deref().unwrap_or("unknown"),
        req.image.as_deref().unwrap_or("unknown"),
        req.incident_age_sec
    );
    let _ = writeln!(out, "SLO breached: {}", req.breach_kind);

    if req.evidence.is_empty() {
        let _ = writeln!(out, "Observability context: none recorded");
    }
    for (i, ev) in req.evidence.iter().enumerate() {
        let _ = writeln!(out, "\nEvidence #{} ({} at {}):", i + 1, ev.breach_kind, ev.observed_at.to_rfc3339());
        if !ev.metrics.is_empty() {
            let metrics: Vec<String> = ev.metrics.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            let _ = writeln!(out, "  Metrics snapshot: {}", metrics.join(", "));
        }
        if !ev.trace_ids.is_empty() {
            let _ = writeln!(out, "  Trace IDs: {}", ev.trace_ids.join(", "));
        }
        if !ev.logs.is_empty() {
            let _ = writeln!(out, "  Correlated logs: {}", ev.logs);
        }
    }

    if req.action_history.is_empty() {
        let _ = writeln!(out, "\nNo remediation has been attempted yet.");
    } else {
        let _ = writeln!(out, "\nPrevious remediation ({} attempts):", req.attempt_count);
        for record in &req.action_history {
            let _ = writeln!(out, "  - {} at {}: {:?}", record.operation, record.at.to_rfc3339(), record.outcome);
        }
    }

    let _ = writeln!(
        out,
        "\nRespond with a single JSON object with keys \"root_cause\", \"recommended_action\" \
         (one of {}) and \"justification\". Optional keys: \"confidence\" (0-1), \
         \"scale_factor\" (integer >= 2, SCALE_OUT only), \"rollback_to\" (version, ROLLBACK only).",
        ACTIONS
    );
    let _ = write!(
        out,
        "Example: {{\"root_cause\": \"Likely memory leak in request cache\", \"recommended_action\": \"RESTART\", \
         \"justification\": \"Reclaims leaked memory and restores service health.\"}}"
    );
    out
}

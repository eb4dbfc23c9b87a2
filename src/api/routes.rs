//! API route definitions.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::state::AppState;
use super::ApiError;
use crate::correlate::Alert;
use crate::incident::IncidentStatus;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/incidents", get(list_incidents))
        .route("/incidents/{id}", get(get_incident))
        .route("/alerts", post(submit_alert))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let active = state.feed.list_incidents(&[
        IncidentStatus::Open,
        IncidentStatus::Diagnosing,
        IncidentStatus::ActionPending,
    ]);
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "active_incidents": active.len()
        },
        "meta": meta()
    }))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    /// Comma-separated statuses, e.g. `OPEN,ACTION_PENDING`.
    status: Option<String>,
}

async fn list_incidents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let statuses = match query.status.as_deref() {
        Some(raw) => raw
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<IncidentStatus>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::BadRequest)?,
        None => Vec::new(),
    };
    let incidents = state.feed.list_incidents(&statuses);
    let mut meta = meta();
    meta["total"] = json!(incidents.len());
    Ok(Json(json!({ "data": incidents, "meta": meta })))
}

async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let incident = state.feed.get_incident(id)?;
    Ok(Json(json!({ "data": incident, "meta": meta() })))
}

async fn submit_alert(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let alert = Alert::from_slice(&body).map_err(|e| {
        warn!(error = %e, "rejected inbound alert");
        ApiError::from(crate::error::EngineError::from(e))
    })?;
    let correlation = state.engine.submit(&alert);
    info!(
        incident_id = %correlation.incident_id,
        target = %correlation.target,
        "alert accepted"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "data": correlation, "meta": meta() })),
    ))
}

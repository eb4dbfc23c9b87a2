//! API layer -- axum routes, handlers, and middleware.

mod routes;
pub mod state;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use self::state::AppState;
use crate::error::EngineError;

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

/// Handler error rendered as `{"error": ..., "status": ...}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Engine(err) => {
                let status = match &err {
                    EngineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                    EngineError::Conflict(_) => StatusCode::CONFLICT,
                    EngineError::TransientDependency(_) => StatusCode::BAD_GATEWAY,
                    EngineError::Parse(_) | EngineError::Guardrail(_) | EngineError::Internal(_) => {
                        error!(error = %err, "request failed");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.to_string())
            }
        };
        let body = Json(json!({
            "error": message,
            "status": status.as_u16()
        }));
        (status, body).into_response()
    }
}

//! OpsMedic -- incident lifecycle and remediation orchestration.
//!
//! This crate provides the engine that turns SLO breach alerts into tracked
//! incidents, obtains a diagnosis from a reasoning service, executes the
//! recommended remediation under guardrails, and exposes incident state to
//! dashboards.

pub mod api;
pub mod config;
pub mod correlate;
pub mod error;
pub mod feed;
pub mod incident;
pub mod lifecycle;
pub mod reasoning;
pub mod remediation;
pub mod retry;

use anyhow::{Context, Result};

use crate::config::EngineConfig;

/// Start the OpsMedic daemon: API server and reconcile sweep.
pub async fn serve(config: EngineConfig) -> Result<()> {
    // 1. Engine (store, correlator, gateway, executor)
    let engine = lifecycle::Engine::from_config(&config)?;

    // 2. Reconcile sweep (background task)
    let reconciler = engine.spawn_reconciler();

    // 3. API server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let app = api::router(api::state::AppState::new(engine));

    tracing::info!(%addr, "OpsMedic listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reconciler.abort();
    tracing::info!("OpsMedic stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

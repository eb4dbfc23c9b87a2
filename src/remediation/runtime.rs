//! HTTP client for the workload runtime agent.
//!
//! Endpoints, relative to `executor.runtime_url`:
//!
//! | Method | Path                          | Body                      |
//! |--------|-------------------------------|---------------------------|
//! | POST   | `/v1/targets/{id}/restart`    | none                      |
//! | POST   | `/v1/targets/{id}/scale`      | `{"factor": n}`           |
//! | POST   | `/v1/targets/{id}/rollback`   | `{"to_version": "..."}`   |
//! | GET    | `/v1/targets/{id}/state`      | none                      |

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::json;
use tracing::debug;

use super::target::{ActionTarget, CommandResult, TargetError, TargetState};
use crate::config::ExecutorConfig;

pub struct HttpRuntimeClient {
    client: Client,
    base_url: String,
}

impl HttpRuntimeClient {
    pub fn from_config(cfg: &ExecutorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(cfg.timeout())
            .build()
            .context("failed to build runtime HTTP client")?;
        Ok(Self {
            client,
            base_url: cfg.runtime_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, target_id: &str, op: &str) -> String {
        format!("{}/v1/targets/{}/{}", self.base_url, target_id, op)
    }

    async fn command(&self, req: RequestBuilder) -> Result<CommandResult, TargetError> {
        let resp = req.send().await.map_err(transport_error)?;
        let status = resp.status();
        let text = resp.text().await.map_err(transport_error)?;

        if status.is_client_error() {
            return Err(TargetError::Rejected(format!("HTTP {}: {}", status.as_u16(), text.trim())));
        }
        if !status.is_success() {
            return Err(TargetError::Unreachable(format!("HTTP {}", status.as_u16())));
        }
        // Agents that reply with an empty body report success by status alone.
        if text.trim().is_empty() {
            return Ok(CommandResult {
                success: true,
                message: None,
                state: None,
            });
        }
        serde_json::from_str(&text)
            .map_err(|e| TargetError::Rejected(format!("unreadable reply: {}: {}", e, text.trim())))
    }
}

fn transport_error(e: reqwest::Error) -> TargetError {
    if e.is_timeout() {
        TargetError::Timeout
    } else {
        TargetError::Unreachable(e.to_string())
    }
}

#[async_trait]
impl ActionTarget for HttpRuntimeClient {
    async fn restart(&self, target_id: &str) -> Result<CommandResult, TargetError> {
        debug!(target_id, "runtime restart");
        self.command(self.client.post(self.url(target_id, "restart"))).await
    }

    async fn scale_out(&self, target_id: &str, factor: u32) -> Result<CommandResult, TargetError> {
        debug!(target_id, factor, "runtime scale");
        self.command(
            self.client
                .post(self.url(target_id, "scale"))
                .json(&json!({ "factor": factor })),
        )
        .await
    }

    async fn rollback(&self, target_id: &str, to_version: &str) -> Result<CommandResult, TargetError> {
        debug!(target_id, to_version, "runtime rollback");
        self.command(
            self.client
                .post(self.url(target_id, "rollback"))
                .json(&json!({ "to_version": to_version })),
        )
        .await
    }

    async fn observe(&self, target_id: &str) -> Result<Option<TargetState>, TargetError> {
        let resp = self
            .client
            .get(self.url(target_id, "state"))
            .send()
            .await
            .map_err(transport_error)?;
        match resp.status() {
            StatusCode::NOT_FOUND | StatusCode::NOT_IMPLEMENTED => Ok(None),
            s if s.is_success() => resp
                .json::<TargetState>()
                .await
                .map(Some)
                .map_err(|e| TargetError::Unreachable(format!("unreadable state: {}", e))),
            s => Err(TargetError::Unreachable(format!("HTTP {}", s.as_u16()))),
        }
    }
}

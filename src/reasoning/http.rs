//! HTTP client for the hosted or self-hosted reasoning model.
//!
//! | Provider     | Request                                               | Auth              |
//! |--------------|-------------------------------------------------------|-------------------|
//! | `gemini`     | `POST {endpoint}/models/{model}:generateContent`      | `x-goog-api-key`  |
//! | `llama`      | `POST {endpoint}` with `{prompt, max_tokens, ...}`    | bearer            |
//! | `fastrouter` | `POST {endpoint}` with `{prompt, max_tokens, ...}`    | bearer            |

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{prompt, DiagnosisRequest, ReasoningError, ReasoningService};
use crate::config::{ReasoningConfig, ReasoningProvider};

pub struct HttpReasoningClient {
    client: Client,
    provider: ReasoningProvider,
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
    max_tokens: u32,
}

impl HttpReasoningClient {
    pub fn from_config(cfg: &ReasoningConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(cfg.timeout())
            .build()
            .context("failed to build reasoning HTTP client")?;
        let api_key = std::env::var(cfg.api_key_env()).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!(
                provider = %cfg.provider,
                env = %cfg.api_key_env(),
                "no reasoning API key set, sending unauthenticated requests"
            );
        }
        Ok(Self {
            client,
            provider: cfg.provider,
            endpoint: cfg.endpoint().trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model().map(str::to_string),
            max_tokens: cfg.max_tokens,
        })
    }

    fn url(&self) -> String {
        match self.provider {
            ReasoningProvider::Gemini => format!(
                "{}/models/{}:generateContent",
                self.endpoint,
                self.model.as_deref().unwrap_or("gemini-1.5-flash")
            ),
            ReasoningProvider::Llama | ReasoningProvider::FastRouter => self.endpoint.clone(),
        }
    }

    fn body(&self, request: &DiagnosisRequest) -> Value {
        let prompt = prompt::build_prompt(request);
        match self.provider {
            ReasoningProvider::Gemini => json!({
                "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
                "generationConfig": {
                    "maxOutputTokens": self.max_tokens,
                    "responseMimeType": "application/json",
                },
            }),
            ReasoningProvider::Llama | ReasoningProvider::FastRouter => {
                let mut body = json!({
                    "prompt": prompt,
                    "max_tokens": self.max_tokens,
                    "context": request,
                });
                if let Some(model) = &self.model {
                    body["model"] = json!(model);
                }
                body
            }
        }
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        let Some(key) = &self.api_key else {
            return req;
        };
        match self.provider {
            ReasoningProvider::Gemini => req.header("x-goog-api-key", key),
            ReasoningProvider::Llama | ReasoningProvider::FastRouter => req.bearer_auth(key),
        }
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningClient {
    async fn diagnose(&self, request: &DiagnosisRequest) -> Result<Value, ReasoningError> {
        let url = self.url();
        let req = self.authorize(self.client.post(&url).json(&self.body(request)));

        debug!(
            incident_id = %request.incident_id,
            provider = %self.provider,
            endpoint = %url,
            "calling reasoning service"
        );
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ReasoningError::Timeout
            } else {
                ReasoningError::Unavailable(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ReasoningError::Unavailable(format!(
                "reasoning service returned HTTP {}",
                status.as_u16()
            )));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| ReasoningError::Malformed(format!("reply body is not JSON: {}", e)))
    }
}

//! TOML configuration for the OpsMedic engine.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at
//! all) yields a working configuration. The config file path can be given on
//! the command line or through `OPSMEDIC_CONFIG`.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::incident::{SeverityOrder, StoreLimits};
use crate::retry::RetryPolicy;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "OPSMEDIC_CONFIG";

/// Standard system location for the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/opsmedic/opsmedic.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the engine process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub severity: SeverityConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded engine configuration");
        Ok(config)
    }

    /// Try, in order: `OPSMEDIC_CONFIG`, the system path, compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "OPSMEDIC_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Explicit path if given, otherwise the fallback chain.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::load_or_default()),
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let lc = &self.lifecycle;
        if lc.max_attempts == 0 {
            bail!("lifecycle.max_attempts must be at least 1");
        }
        if lc.evidence_cap == 0 {
            bail!("lifecycle.evidence_cap must be at least 1");
        }
        if lc.reconcile_interval_sec == 0 {
            bail!("lifecycle.reconcile_interval_sec must be at least 1");
        }
        for (name, retry) in [("reasoning", &self.reasoning.retry), ("executor", &self.executor.retry)] {
            if retry.max_attempts == 0 {
                bail!("{}.retry.max_attempts must be at least 1", name);
            }
            if retry.multiplier < 1.0 {
                bail!("{}.retry.multiplier must be >= 1.0", name);
            }
        }
        if self.reasoning.timeout_sec == 0 || self.executor.timeout_sec == 0 {
            bail!("request timeouts must be at least 1 second");
        }
        let stall = lc.stall_timeout();
        let diagnosis = self.reasoning.pass_budget();
        if stall < diagnosis {
            bail!(
                "lifecycle.stall_timeout_sec ({}) must cover a full diagnosis pass ({}s)",
                lc.stall_timeout_sec,
                diagnosis.as_secs_f64()
            );
        }
        let remediation = self.executor.step_budget(lc.cooldown());
        if stall < remediation {
            bail!(
                "lifecycle.stall_timeout_sec ({}) must cover a remediation step with cooldown ({}s)",
                lc.stall_timeout_sec,
                remediation.as_secs_f64()
            );
        }
        if lc.retention_sec == 0 {
            bail!("lifecycle.retention_sec must be at least 1");
        }
        if self.executor.default_scale_factor < 2 {
            bail!("executor.default_scale_factor must be at least 2");
        }
        for group in &self.correlation.related_groups {
            if group.len() < 2 {
                bail!("correlation.related_groups entries need at least two targets");
            }
        }
        Ok(())
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            evidence_cap: self.lifecycle.evidence_cap,
            max_attempts: self.lifecycle.max_attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API listens on.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8001".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Guardrails and timing for the incident lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Remediation attempts allowed per incident before it fails.
    pub max_attempts: u32,
    /// Minimum spacing between two remediation attempts on one target.
    pub cooldown_sec: u64,
    /// How long a remediated incident is watched for a repeat breach.
    pub observation_window_sec: u64,
    /// Evidence entries retained per incident (oldest evicted first).
    pub evidence_cap: usize,
    /// Period of the reconciliation sweep.
    pub reconcile_interval_sec: u64,
    /// A claimed incident untouched this long is considered stalled.
    pub stall_timeout_sec: u64,
    /// How long terminal incidents stay queryable before the sweep drops them.
    pub retention_sec: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown_sec: 60,
            observation_window_sec: 120,
            evidence_cap: 32,
            reconcile_interval_sec: 30,
            stall_timeout_sec: 300,
            retention_sec: 86_400,
        }
    }
}

impl LifecycleConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_sec)
    }

    pub fn observation_window(&self) -> Duration {
        Duration::from_secs(self.observation_window_sec)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_sec)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_sec)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_sec)
    }
}

// ---------------------------------------------------------------------------
// Severity / correlation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityConfig {
    /// Breach kinds from least to most severe.
    pub order: SeverityOrder,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Groups of targets whose breaches share a cause. While one member is
    /// being remediated, new incidents for the others are suppressed.
    pub related_groups: Vec<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Reasoning service
// ---------------------------------------------------------------------------

/// Hosted or self-hosted model behind the reasoning gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningProvider {
    /// Google Gemini `generateContent` API.
    Gemini,
    /// Self-hosted completion endpoint (llama.cpp server and friends).
    #[default]
    Llama,
    /// FastRouter completion gateway.
    FastRouter,
}

impl ReasoningProvider {
    pub fn default_endpoint(self) -> &'static str {
        match self {
            ReasoningProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            ReasoningProvider::Llama => "http://127.0.0.1:8090/v1/completions",
            ReasoningProvider::FastRouter => "https://go.fastrouter.ai/api/v1",
        }
    }

    pub fn default_api_key_env(self) -> &'static str {
        match self {
            ReasoningProvider::Gemini => "GEMINI_API_KEY",
            ReasoningProvider::Llama => "LLAMA_API_KEY",
            ReasoningProvider::FastRouter => "FASTRTR_API_KEY",
        }
    }

    pub fn default_model(self) -> Option<&'static str> {
        match self {
            ReasoningProvider::Gemini => Some("gemini-1.5-flash"),
            ReasoningProvider::Llama | ReasoningProvider::FastRouter => None,
        }
    }
}

impl std::fmt::Display for ReasoningProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ReasoningProvider::Gemini => "gemini",
            ReasoningProvider::Llama => "llama",
            ReasoningProvider::FastRouter => "fastrouter",
        })
    }
}

/// Reasoning service connection. `endpoint`, `api_key_env` and `model`
/// fall back to the provider's defaults when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub provider: ReasoningProvider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub max_tokens: u32,
    pub timeout_sec: u64,
    pub retry: RetryPolicy,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            provider: ReasoningProvider::default(),
            endpoint: None,
            api_key_env: None,
            model: None,
            max_tokens: 512,
            timeout_sec: 30,
            retry: RetryPolicy::default(),
        }
    }
}

impl ReasoningConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.provider.default_endpoint())
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.provider.default_api_key_env())
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref().or_else(|| self.provider.default_model())
    }

    /// Worst case for one diagnosis pass: every attempt times out and every
    /// backoff runs to its cap.
    pub fn pass_budget(&self) -> Duration {
        let calls = self.timeout() * self.retry.max_attempts;
        calls + self.retry.schedule().into_iter().sum::<Duration>()
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Base URL of the workload runtime agent.
    pub runtime_url: String,
    pub timeout_sec: u64,
    /// Targets the executor may act on. Empty allows every target.
    pub allowed_targets: Vec<String>,
    pub default_scale_factor: u32,
    pub default_rollback_version: String,
    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            runtime_url: "http://127.0.0.1:8091".to_string(),
            timeout_sec: 30,
            allowed_targets: Vec::new(),
            default_scale_factor: 2,
            default_rollback_version: "previous".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }

    pub fn is_allowed(&self, target: &str) -> bool {
        self.allowed_targets.is_empty() || self.allowed_targets.iter().any(|t| t == target)
    }

    /// Longest the executor goes without touching an incident: a state
    /// query, the longest backoff, a full cooldown, then the invocation.
    pub fn step_budget(&self, cooldown: Duration) -> Duration {
        let backoff = self.retry.schedule().into_iter().max().unwrap_or_default();
        self.timeout() * 2 + backoff + cooldown
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! In-process stand-ins for the reasoning service and workload runtime.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use opsmedic::config::EngineConfig;
use opsmedic::correlate::Alert;
use opsmedic::lifecycle::Engine;
use opsmedic::reasoning::{DiagnosisRequest, ReasoningError, ReasoningService};
use opsmedic::remediation::{ActionTarget, CommandResult, TargetError, TargetState};
use opsmedic::retry::RetryPolicy;

/// Answers every request with the same reply after `latency`.
pub struct FakeReasoner {
    reply: Value,
    latency: Duration,
    pub calls: AtomicU32,
}

impl FakeReasoner {
    fn new(reply: Value, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply,
            latency,
            calls: AtomicU32::new(0),
        })
    }

    pub fn recommending(action: &str) -> Arc<Self> {
        Self::slow(action, Duration::ZERO)
    }

    /// Replies after `latency`.
    pub fn slow(action: &str, latency: Duration) -> Arc<Self> {
        Self::new(
            json!({
                "root_cause": "Memory leak detected in application",
                "recommended_action": action,
                "justification": "Reclaims leaked memory."
            }),
            latency,
        )
    }

    /// Never answers within any sane timeout.
    pub fn hanging() -> Arc<Self> {
        Self::new(Value::Null, Duration::from_secs(24 * 3600))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningService for FakeReasoner {
    async fn diagnose(&self, _request: &DiagnosisRequest) -> Result<Value, ReasoningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.reply.clone())
    }
}

/// Records every command; the first `failures` commands are refused.
#[derive(Default)]
pub struct FakeRuntime {
    failures: AtomicU32,
    pub calls: Mutex<Vec<String>>,
    /// When each command arrived, on the tokio clock.
    pub called_at: Mutex<Vec<tokio::time::Instant>>,
    pub state: Mutex<Option<TargetState>>,
}

impl FakeRuntime {
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(failures),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Gaps between consecutive commands.
    pub fn spacing(&self) -> Vec<Duration> {
        self.called_at
            .lock()
            .windows(2)
            .map(|w| w[1].duration_since(w[0]))
            .collect()
    }

    fn command(&self, call: String) -> Result<CommandResult, TargetError> {
        self.calls.lock().push(call);
        self.called_at.lock().push(tokio::time::Instant::now());
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TargetError::Unreachable("connection refused".into()));
        }
        Ok(CommandResult {
            success: true,
            message: None,
            state: None,
        })
    }
}

#[async_trait]
impl ActionTarget for FakeRuntime {
    async fn restart(&self, target_id: &str) -> Result<CommandResult, TargetError> {
        self.command(format!("restart {}", target_id))
    }

    async fn scale_out(&self, target_id: &str, factor: u32) -> Result<CommandResult, TargetError> {
        self.command(format!("scale_out {} {}", target_id, factor))
    }

    async fn rollback(&self, target_id: &str, to_version: &str) -> Result<CommandResult, TargetError> {
        self.command(format!("rollback {} {}", target_id, to_version))
    }

    async fn observe(&self, _target_id: &str) -> Result<Option<TargetState>, TargetError> {
        Ok(self.state.lock().clone())
    }
}

/// Defaults with deterministic, jitter-free retries.
pub fn config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.reasoning.retry = RetryPolicy {
        jitter: false,
        ..RetryPolicy::default()
    };
    cfg.executor.retry = RetryPolicy {
        jitter: false,
        ..RetryPolicy::default()
    };
    cfg
}

pub fn engine(cfg: &EngineConfig, reasoner: Arc<FakeReasoner>, runtime: Arc<FakeRuntime>) -> Arc<Engine> {
    Engine::with_services(cfg, reasoner, runtime)
}

pub fn alert_json(target: &str, slo: &str) -> Value {
    json!({
        "incident_id": "sender-generated-id",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "breached_slo": slo,
        "container_info": {"id": target, "name": target, "image": "buggy-app:v2"},
        "observability_context": {
            "metrics_snapshot": {"memory_usage": "95%", "cpu_usage": "80%"},
            "trace_ids": ["trace123"],
            "correlated_logs": "Out of memory error"
        }
    })
}

pub fn alert(target: &str, slo: &str) -> Alert {
    Alert::from_json(alert_json(target, slo)).unwrap()
}

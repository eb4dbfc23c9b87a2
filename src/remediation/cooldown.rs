//! Per-target cooldown between remediation attempts.
//!
//! Check and reservation happen under one lock, so two incidents racing on
//! the same target cannot both pass.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub struct CooldownGuard {
    interval: Duration,
    last_attempt: Mutex<HashMap<String, Instant>>,
}

impl CooldownGuard {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_attempt: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve an attempt slot for `target`, or return the time left.
    pub async fn try_acquire(&self, target: &str) -> Result<(), Duration> {
        let mut last = self.last_attempt.lock().await;
        let now = Instant::now();
        if let Some(prev) = last.get(target) {
            let elapsed = now.saturating_duration_since(*prev);
            if elapsed < self.interval {
                let remaining = self.interval - elapsed;
                debug!(target = target, remaining_ms = remaining.as_millis() as u64, "cooldown active");
                return Err(remaining);
            }
        }
        last.insert(target.to_string(), now);
        Ok(())
    }

    /// Forget targets whose cooldown has lapsed. Returns how many were dropped.
    pub async fn prune(&self) -> usize {
        let mut last = self.last_attempt.lock().await;
        let before = last.len();
        let interval = self.interval;
        last.retain(|_, prev| prev.elapsed() < interval);
        before - last.len()
    }
}

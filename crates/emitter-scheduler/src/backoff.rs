//! Rate-limit and backoff utilities shared by the notifier and the dispatcher.

use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use emitter_core::config::DeliveryConfig;

/// Bounded retry policy for channel sends.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub backoff_ceiling: Duration,
    pub throttle_margin: Duration,
    /// Upper bound on a single channel call.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            backoff_ceiling: Duration::from_millis(config.backoff_ceiling_ms),
            throttle_margin: Duration::from_millis(config.throttle_margin_ms),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
        }
    }

    /// Exponential backoff after the given (1-based) failed attempt:
    /// `base * 2^(attempt-1)`, capped at the ceiling.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.backoff_ceiling)
    }

    /// Wait after a throttled attempt: the channel's hint (or plain backoff) plus the margin.
    pub fn throttle_delay(&self, retry_after: Option<Duration>, attempt: u32) -> Duration {
        retry_after.unwrap_or_else(|| self.backoff_delay(attempt)) + self.throttle_margin
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

/// Enforces a minimum spacing between consecutive sends.
///
/// One pacer per channel-wide throughput budget; callers `await` it right
/// before each send.
#[derive(Debug)]
pub struct SendPacer {
    spacing: RwLock<Duration>,
    last: Mutex<Option<Instant>>,
}

impl SendPacer {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing: RwLock::new(spacing),
            last: Mutex::new(None),
        }
    }

    pub async fn spacing(&self) -> Duration {
        *self.spacing.read().await
    }

    /// Change the spacing; applies from the next `wait`.
    pub async fn set_spacing(&self, spacing: Duration) {
        *self.spacing.write().await = spacing;
    }

    /// Sleep until at least `spacing` has passed since the previous call returned.
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.spacing().await;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

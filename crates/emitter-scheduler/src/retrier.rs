//! Bounded retry/backoff around a single channel send.
//!
//! ```text
//! Attempting ──► Delivered                      (done)
//!            ├─► Unreachable                    (done, never retried)
//!            ├─► Throttled  ── sleep hint+margin ──► Attempting
//!            └─► Transient  ── sleep backoff     ──► Attempting
//! attempts == max_attempts while throttled/transient ──► Exhausted
//! ```

use std::time::Duration;
use tokio::sync::RwLock;

use emitter_core::traits::Channel;
use emitter_core::types::{ArtifactHandle, OutgoingContent, RecipientId, SendOutcome};

use crate::backoff::RetryPolicy;

/// Terminal state of one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered { handle: Option<ArtifactHandle> },
    Unreachable { reason: String },
    Exhausted { last_error: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Per-recipient result of one delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub recipient: RecipientId,
    pub outcome: DeliveryOutcome,
    pub attempts: u32,
    /// Number of backoff/throttle sleeps taken.
    pub waits: u32,
    pub waited: Duration,
    /// Handle the content referred to, if it was a cached send.
    pub handle_used: Option<ArtifactHandle>,
}

/// Wraps a channel send with the retry state machine.
///
/// The policy can be swapped at runtime; a delivery already in progress
/// finishes under the policy it started with.
#[derive(Debug)]
pub struct DeliveryRetrier {
    policy: RwLock<RetryPolicy>,
}

impl DeliveryRetrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
        }
    }

    pub async fn policy(&self) -> RetryPolicy {
        self.policy.read().await.clone()
    }

    pub async fn set_policy(&self, policy: RetryPolicy) {
        *self.policy.write().await = policy;
    }

    /// Deliver `content` to `recipient`, retrying throttled and transient failures.
    pub async fn deliver(
        &self,
        channel: &dyn Channel,
        recipient: &str,
        content: &OutgoingContent,
    ) -> DeliveryReport {
        let policy = self.policy().await;
        let mut attempts = 0;
        let mut waits = 0;
        let mut waited = Duration::ZERO;

        let outcome = loop {
            attempts += 1;
            let result =
                match tokio::time::timeout(policy.attempt_timeout, channel.send(recipient, content))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => SendOutcome::Transient(format!(
                        "attempt timed out after {:?}",
                        policy.attempt_timeout
                    )),
                };

            let (delay, error) = match result {
                SendOutcome::Delivered { handle } => break DeliveryOutcome::Delivered { handle },
                SendOutcome::Unreachable(reason) => {
                    tracing::debug!("🚫 {} unreachable on {}: {}", recipient, channel.name(), reason);
                    break DeliveryOutcome::Unreachable { reason };
                }
                SendOutcome::Throttled { retry_after } => (
                    policy.throttle_delay(retry_after, attempts),
                    format!("throttled (retry_after={retry_after:?})"),
                ),
                SendOutcome::Transient(e) => (policy.backoff_delay(attempts), e),
            };

            if attempts >= policy.max_attempts {
                tracing::warn!(
                    "⚠️ Delivery to {} exhausted after {} attempts: {}",
                    recipient,
                    attempts,
                    error
                );
                break DeliveryOutcome::Exhausted { last_error: error };
            }

            tracing::debug!(
                "🔁 Retry {} for {} in {:?} ({})",
                attempts + 1,
                recipient,
                delay,
                error
            );
            tokio::time::sleep(delay).await;
            waits += 1;
            waited += delay;
        };

        DeliveryReport {
            recipient: recipient.to_string(),
            outcome,
            attempts,
            waits,
            waited,
            handle_used: content.handle().cloned(),
        }
    }
}

impl Default for DeliveryRetrier {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedChannel;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(100),
            backoff_ceiling: Duration::from_secs(2),
            throttle_margin: Duration::from_millis(10),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn text() -> OutgoingContent {
        OutgoingContent::Text("hello".into())
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_throttled_exhausts_after_max_attempts() {
        let channel = ScriptedChannel::always(SendOutcome::Throttled {
            retry_after: Some(Duration::from_secs(1)),
        });
        let retrier = DeliveryRetrier::new(policy(4));
        let report = retrier.deliver(&channel, "42", &text()).await;

        assert!(matches!(report.outcome, DeliveryOutcome::Exhausted { .. }));
        assert_eq!(report.attempts, 4);
        assert_eq!(channel.calls().len(), 4);
        // No sleep after the final attempt.
        assert_eq!(report.waits, 3);
        assert_eq!(report.waited, Duration::from_millis(3 * 1010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_one_attempt_no_wait() {
        let channel = ScriptedChannel::always(SendOutcome::Unreachable("blocked".into()));
        let retrier = DeliveryRetrier::new(policy(5));
        let report = retrier.deliver(&channel, "42", &text()).await;

        assert_eq!(
            report.outcome,
            DeliveryOutcome::Unreachable {
                reason: "blocked".into()
            }
        );
        assert_eq!(report.attempts, 1);
        assert_eq!(report.waits, 0);
        assert_eq!(report.waited, Duration::ZERO);
        assert_eq!(channel.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success_uses_exponential_backoff() {
        let channel = ScriptedChannel::script(vec![
            SendOutcome::Transient("502".into()),
            SendOutcome::Transient("502".into()),
            SendOutcome::Delivered { handle: None },
        ]);
        let retrier = DeliveryRetrier::new(policy(5));
        let report = retrier.deliver(&channel, "42", &text()).await;

        assert!(report.outcome.is_delivered());
        assert_eq!(report.attempts, 3);
        assert_eq!(report.waited, Duration::from_millis(100 + 200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_without_hint_falls_back_to_backoff() {
        let channel = ScriptedChannel::script(vec![
            SendOutcome::Throttled { retry_after: None },
            SendOutcome::Delivered { handle: None },
        ]);
        let retrier = DeliveryRetrier::new(policy(3));
        let report = retrier.deliver(&channel, "42", &text()).await;

        assert!(report.outcome.is_delivered());
        assert_eq!(report.waited, Duration::from_millis(110));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_send_times_out_as_transient() {
        let channel = ScriptedChannel::hanging();
        let mut p = policy(2);
        p.attempt_timeout = Duration::from_millis(500);
        let report = DeliveryRetrier::new(p).deliver(&channel, "42", &text()).await;

        assert!(matches!(report.outcome, DeliveryOutcome::Exhausted { .. }));
        assert_eq!(report.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_swapped_policy_applies_to_next_delivery() {
        let channel = ScriptedChannel::always(SendOutcome::Transient("502".into()));
        let retrier = DeliveryRetrier::new(policy(2));
        assert_eq!(retrier.deliver(&channel, "42", &text()).await.attempts, 2);

        retrier.set_policy(policy(4)).await;
        assert_eq!(retrier.policy().await.max_attempts, 4);
        assert_eq!(retrier.deliver(&channel, "42", &text()).await.attempts, 4);
        assert_eq!(channel.calls().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_cached_handle_used() {
        let channel = ScriptedChannel::always(SendOutcome::Delivered { handle: None });
        let content = OutgoingContent::CachedPhoto {
            handle: ArtifactHandle("H".into()),
            caption: None,
        };
        let report = DeliveryRetrier::new(policy(1)).deliver(&channel, "42", &content).await;
        assert_eq!(report.handle_used, Some(ArtifactHandle("H".into())));
    }
}

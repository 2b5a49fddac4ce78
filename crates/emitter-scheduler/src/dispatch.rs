//! Broadcast dispatch. Renders one artifact and fans it out to every
//! eligible recipient.
//!
//! The first successful upload returns a channel handle; every later
//! recipient in the same cycle gets the handle instead of the raw bytes.

use std::sync::Arc;
use std::time::Duration;

use emitter_core::error::Result;
use emitter_core::traits::{ArtifactRenderer, Channel, RecipientSource};
use emitter_core::types::{ArtifactHandle, OutgoingContent};

use crate::backoff::{RetryPolicy, SendPacer};
use crate::retrier::{DeliveryOutcome, DeliveryRetrier};

/// Aggregate result of one broadcast cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSummary {
    pub recipients: usize,
    pub delivered: usize,
    pub unreachable: usize,
    pub failed: usize,
    pub attempts: u32,
    /// Handle cached for reuse, if any upload succeeded.
    pub handle: Option<ArtifactHandle>,
}

pub struct BroadcastDispatcher {
    channel: Arc<dyn Channel>,
    renderer: Arc<dyn ArtifactRenderer>,
    recipients: Arc<dyn RecipientSource>,
    retrier: DeliveryRetrier,
    pacer: SendPacer,
}

impl BroadcastDispatcher {
    pub fn new(
        channel: Arc<dyn Channel>,
        renderer: Arc<dyn ArtifactRenderer>,
        recipients: Arc<dyn RecipientSource>,
        retrier: DeliveryRetrier,
        inter_send_delay: Duration,
    ) -> Self {
        Self {
            channel,
            renderer,
            recipients,
            retrier,
            pacer: SendPacer::new(inter_send_delay),
        }
    }

    /// Apply reloaded delivery settings to later sends, including the rest of
    /// a cycle already in progress.
    pub async fn reconfigure(&self, policy: RetryPolicy, inter_send_delay: Duration) {
        tracing::info!(
            "🔧 Dispatcher reconfigured: {} attempts, {:?} between sends",
            policy.max_attempts,
            inter_send_delay
        );
        self.retrier.set_policy(policy).await;
        self.pacer.set_spacing(inter_send_delay).await;
    }

    /// Run one cycle. Render or enumeration errors abort before anything is sent.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let artifact = self.renderer.render().await?;
        let recipients = self.recipients.eligible_recipients().await?;
        tracing::info!(
            "📣 Broadcasting {} ({} bytes) to {} recipients",
            artifact.file_name,
            artifact.bytes.len(),
            recipients.len()
        );

        let mut summary = CycleSummary {
            recipients: recipients.len(),
            ..Default::default()
        };
        let mut cached: Option<ArtifactHandle> = None;

        for recipient in &recipients {
            self.pacer.wait().await;
            let content = match &cached {
                Some(handle) => OutgoingContent::CachedPhoto {
                    handle: handle.clone(),
                    caption: artifact.caption.clone(),
                },
                None => OutgoingContent::Photo(artifact.clone()),
            };

            let report = self
                .retrier
                .deliver(self.channel.as_ref(), &recipient.id, &content)
                .await;
            summary.attempts += report.attempts;

            match report.outcome {
                DeliveryOutcome::Delivered { handle } => {
                    summary.delivered += 1;
                    if cached.is_none() && handle.is_some() {
                        tracing::debug!("📎 Reusing artifact handle for the rest of the cycle");
                        cached = handle;
                    }
                }
                DeliveryOutcome::Unreachable { .. } => summary.unreachable += 1,
                DeliveryOutcome::Exhausted { .. } => summary.failed += 1,
            }
        }

        summary.handle = cached;
        Ok(summary)
    }

    /// Run a cycle and log its outcome; errors never propagate past here.
    pub async fn run_cycle_logged(&self) -> Option<CycleSummary> {
        match self.run_cycle().await {
            Ok(summary) => {
                tracing::info!(
                    "✅ Broadcast done: {} recipients, {} delivered, {} unreachable, {} failed ({} attempts)",
                    summary.recipients,
                    summary.delivered,
                    summary.unreachable,
                    summary.failed,
                    summary.attempts
                );
                Some(summary)
            }
            Err(e) => {
                tracing::error!("❌ Broadcast cycle aborted: {e}");
                None
            }
        }
    }
}

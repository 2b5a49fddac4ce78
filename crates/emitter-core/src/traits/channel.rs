//! Delivery channel trait.

use async_trait::async_trait;

use crate::types::{OutgoingContent, SendOutcome};

/// A rate-limited messaging channel.
///
/// `send` never returns an error: every failure is classified into a
/// [`SendOutcome`] so the retrier can decide what to do with it.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name (e.g. "telegram").
    fn name(&self) -> &str;

    /// Send one piece of content to one recipient.
    async fn send(&self, recipient: &str, content: &OutgoingContent) -> SendOutcome;
}

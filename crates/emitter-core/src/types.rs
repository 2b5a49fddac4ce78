//! Domain types shared between the channel clients and the scheduler.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Addressable endpoint on the messaging channel (a Telegram chat id, as text).
pub type RecipientId = String;

/// A recipient eligible for broadcasts and profit generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    /// Precomputed synthetic profit for the current day (0 = nothing to emit).
    pub daily_total: f64,
}

impl Recipient {
    pub fn new(id: impl Into<RecipientId>, daily_total: f64) -> Self {
        Self {
            id: id.into(),
            daily_total,
        }
    }
}

/// Rendered broadcast content.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub bytes: Arc<Vec<u8>>,
    pub file_name: String,
    pub caption: Option<String>,
}

impl Artifact {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self {
            bytes: Arc::new(bytes),
            file_name: file_name.into(),
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }
}

/// Opaque reference to content already accepted by the channel.
/// Reusable for later sends of the same content (Telegram `file_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactHandle(pub String);

impl std::fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What gets sent to a single recipient.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingContent {
    /// Plain text notification.
    Text(String),
    /// Upload the rendered bytes.
    Photo(Artifact),
    /// Re-send content the channel already holds.
    CachedPhoto {
        handle: ArtifactHandle,
        caption: Option<String>,
    },
}

impl OutgoingContent {
    /// Handle this content refers to, if it is a cached send.
    pub fn handle(&self) -> Option<&ArtifactHandle> {
        match self {
            OutgoingContent::CachedPhoto { handle, .. } => Some(handle),
            _ => None,
        }
    }
}

/// Result of one channel send attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Accepted. Uploads return a handle reusable for identical content.
    Delivered { handle: Option<ArtifactHandle> },
    /// The recipient will never accept delivery (blocked bot, deleted account).
    Unreachable(String),
    /// The channel asked us to slow down.
    Throttled { retry_after: Option<Duration> },
    /// Network blip, 5xx or timeout. Worth retrying.
    Transient(String),
}

/// One increment of a recipient's daily synthetic profit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledProfitEvent {
    pub id: String,
    pub recipient_id: RecipientId,
    /// Local calendar day (reference timezone) the event belongs to.
    pub day: NaiveDate,
    pub amount: f64,
    pub due_at: DateTime<Utc>,
    /// The daily total this batch sums to.
    pub daily_total: f64,
    pub delivered: bool,
    pub created_at: DateTime<Utc>,
}

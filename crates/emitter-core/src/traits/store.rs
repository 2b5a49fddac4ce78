//! Persistent store for scheduled profit events.

use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;

use crate::error::Result;
use crate::types::ScheduledProfitEvent;

/// Storage operations the generator and notifier rely on.
///
/// Implementations must make `claim_due` and `mark_delivered` free of lost
/// updates: an event claimed by one poll is invisible to another until the
/// claim is released or its lease expires, and `mark_delivered` flips the flag
/// at most once.
pub trait EventStore: Send + Sync {
    /// Whether any event exists for `(recipient, day)`.
    fn has_batch(&self, recipient: &str, day: NaiveDate) -> Result<bool>;

    /// Sum of the amounts of `(recipient, day)` that are already spoken for:
    /// delivered events plus events a poll currently holds a claim on.
    fn committed_total(&self, recipient: &str, day: NaiveDate) -> Result<f64>;

    /// Atomically drop the undelivered, unclaimed events of `(recipient, day)`
    /// and insert `events`. Claimed events stay so their delivery can still be marked.
    fn replace_batch(
        &self,
        recipient: &str,
        day: NaiveDate,
        events: &[ScheduledProfitEvent],
    ) -> Result<()>;

    /// Claim every due, undelivered, unclaimed event (earliest due first).
    /// Claims older than `lease` are considered abandoned and can be re-claimed.
    fn claim_due(&self, now: DateTime<Utc>, lease: Duration) -> Result<Vec<ScheduledProfitEvent>>;

    /// Flip `delivered` to true. Returns false if it was already delivered.
    fn mark_delivered(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Drop the claim on an event so the next poll picks it up again.
    fn release_claim(&self, id: &str) -> Result<()>;

    /// All events of `(recipient, day)`, ordered by due time.
    fn events_for(&self, recipient: &str, day: NaiveDate) -> Result<Vec<ScheduledProfitEvent>>;
}

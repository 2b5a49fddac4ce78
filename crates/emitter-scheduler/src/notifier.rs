//! Due-time notifier: delivers profit events once their due time has passed.
//!
//! Each poll claims due events in the store (conditional update), so two
//! overlapping polls never act on the same event. Delivered and unreachable
//! events are marked delivered; exhausted ones get their claim released and
//! are picked up again by the next poll.

use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use emitter_core::error::Result;
use emitter_core::traits::{Channel, EventStore};
use emitter_core::types::{OutgoingContent, ScheduledProfitEvent};

use crate::backoff::{RetryPolicy, SendPacer};
use crate::retrier::{DeliveryOutcome, DeliveryRetrier};

/// Counts for one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollSummary {
    pub claimed: usize,
    pub delivered: usize,
    pub unreachable: usize,
    pub exhausted: usize,
    /// Deliveries whose mark found the event already delivered.
    pub already_marked: usize,
    /// The poll did not run because another one was in flight.
    pub skipped: bool,
}

pub struct DueNotifier {
    store: Arc<dyn EventStore>,
    channel: Arc<dyn Channel>,
    retrier: DeliveryRetrier,
    pacer: SendPacer,
    poll_interval: RwLock<Duration>,
    claim_lease: Duration,
    currency: String,
    offset: FixedOffset,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag however the poll ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DueNotifier {
    pub fn new(
        store: Arc<dyn EventStore>,
        channel: Arc<dyn Channel>,
        retrier: DeliveryRetrier,
        offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            channel,
            retrier,
            pacer: SendPacer::new(Duration::ZERO),
            poll_interval: RwLock::new(Duration::from_secs(30)),
            claim_lease: Duration::from_secs(600),
            currency: "USDT".into(),
            offset,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_send_spacing(mut self, spacing: Duration) -> Self {
        self.pacer = SendPacer::new(spacing);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = RwLock::new(interval.max(Duration::from_secs(1)));
        self
    }

    pub async fn poll_interval(&self) -> Duration {
        *self.poll_interval.read().await
    }

    /// Apply reloaded delivery settings. A poll in progress keeps its current
    /// retry policy for the send it is on; the loop picks up the new interval
    /// after its next tick.
    pub async fn reconfigure(&self, policy: RetryPolicy, send_spacing: Duration, poll_interval: Duration) {
        tracing::info!(
            "🔧 Notifier reconfigured: {} attempts, {:?} spacing, poll every {:?}",
            policy.max_attempts,
            send_spacing,
            poll_interval
        );
        self.retrier.set_policy(policy).await;
        self.pacer.set_spacing(send_spacing).await;
        *self.poll_interval.write().await = poll_interval.max(Duration::from_secs(1));
    }

    /// Deliver every event due at `now`. Earliest due first.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<PollSummary> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!("⏭️ Notifier poll skipped: previous poll still running");
            return Ok(PollSummary {
                skipped: true,
                ..Default::default()
            });
        }
        let _guard = InFlight(&self.in_flight);

        let events = self.store.claim_due(now, self.claim_lease)?;
        let mut summary = PollSummary {
            claimed: events.len(),
            ..Default::default()
        };
        if events.is_empty() {
            return Ok(summary);
        }

        for event in &events {
            self.pacer.wait().await;
            let content = OutgoingContent::Text(format_profit_message(event, &self.currency, self.offset));
            let report = self
                .retrier
                .deliver(self.channel.as_ref(), &event.recipient_id, &content)
                .await;

            match report.outcome {
                DeliveryOutcome::Delivered { .. } => match self.store.mark_delivered(&event.id, Utc::now()) {
                    Ok(true) => summary.delivered += 1,
                    Ok(false) => summary.already_marked += 1,
                    Err(e) => tracing::warn!("⚠️ Failed to mark event {} delivered: {e}", event.id),
                },
                DeliveryOutcome::Unreachable { reason } => {
                    summary.unreachable += 1;
                    tracing::info!("🚫 {} unreachable, closing event {}: {}", event.recipient_id, event.id, reason);
                    if let Err(e) = self.store.mark_delivered(&event.id, Utc::now()) {
                        tracing::warn!("⚠️ Failed to close event {}: {e}", event.id);
                    }
                }
                DeliveryOutcome::Exhausted { last_error } => {
                    summary.exhausted += 1;
                    tracing::warn!(
                        "⚠️ Event {} for {} not delivered after {} attempts: {}",
                        event.id,
                        event.recipient_id,
                        report.attempts,
                        last_error
                    );
                    if let Err(e) = self.store.release_claim(&event.id) {
                        tracing::warn!("⚠️ Failed to release claim on {}: {e}", event.id);
                    }
                }
            }
        }

        tracing::info!(
            "🔔 Notifier poll: {} due, {} delivered, {} unreachable, {} exhausted",
            summary.claimed,
            summary.delivered,
            summary.unreachable,
            summary.exhausted
        );
        Ok(summary)
    }
}

/// Text sent to the recipient for one profit increment.
pub fn format_profit_message(event: &ScheduledProfitEvent, currency: &str, offset: FixedOffset) -> String {
    format!(
        "💰 *Profit credited*\n+{:.2} {}\n🕒 {}",
        event.amount,
        currency,
        event.due_at.with_timezone(&offset).format("%d.%m.%Y %H:%M")
    )
}

fn poll_ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval
}

/// Spawn the poll loop. Ticks that fall due while a poll is still running are
/// skipped. A changed poll interval restarts the ticker.
pub async fn spawn_notifier(notifier: Arc<DueNotifier>) {
    let mut period = notifier.poll_interval().await;
    tracing::info!("⏰ Notifier started (poll every {:?})", period);

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        if let Err(e) = notifier.poll_once(Utc::now()).await {
            tracing::error!("❌ Notifier poll failed: {e}");
        }

        let current = notifier.poll_interval().await;
        if current != period {
            tracing::debug!("⏱️ Poll interval {:?} -> {:?}", period, current);
            period = current;
            interval = poll_ticker(period);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::RetryPolicy;
    use crate::persistence::EmitterDb;
    use crate::test_support::ScriptedChannel;
    use chrono::{NaiveDate, TimeZone};
    use emitter_core::types::SendOutcome;

    fn utc3() -> FixedOffset {
        FixedOffset::east_opt(3 * 3600).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, h, m, 0).unwrap()
    }

    fn retrier(max_attempts: u32) -> DeliveryRetrier {
        DeliveryRetrier::new(RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            backoff_ceiling: Duration::from_millis(4),
            throttle_margin: Duration::from_millis(1),
            attempt_timeout: Duration::from_secs(5),
        })
    }

    fn event(id: &str, recipient: &str, due_at: DateTime<Utc>, amount: f64) -> ScheduledProfitEvent {
        ScheduledProfitEvent {
            id: id.into(),
            recipient_id: recipient.into(),
            day: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            amount,
            due_at,
            daily_total: 10.0,
            delivered: false,
            created_at: at(8, 0),
        }
    }

    fn seeded_db() -> Arc<EmitterDb> {
        let db = EmitterDb::open_in_memory().unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        db.replace_batch(
            "100",
            day,
            &[event("e2", "100", at(10, 0), 4.0), event("e1", "100", at(9, 0), 1.0), event("e3", "100", at(18, 0), 5.0)],
        )
        .unwrap();
        db.replace_batch("200", day, &[event("f1", "200", at(9, 30), 10.0)]).unwrap();
        Arc::new(db)
    }

    fn notifier(db: Arc<EmitterDb>, channel: Arc<ScriptedChannel>, max_attempts: u32) -> DueNotifier {
        DueNotifier::new(db, channel, retrier(max_attempts), utc3())
    }

    #[tokio::test]
    async fn test_delivers_due_events_earliest_first() {
        let db = seeded_db();
        let channel = Arc::new(ScriptedChannel::always(SendOutcome::Delivered { handle: None }));
        let notifier = notifier(db.clone(), channel.clone(), 3);

        let summary = notifier.poll_once(at(12, 0)).await.unwrap();
        assert_eq!(summary.claimed, 3);
        assert_eq!(summary.delivered, 3);

        let recipients: Vec<_> = channel.calls().into_iter().map(|(r, _)| r).collect();
        assert_eq!(recipients, vec!["100", "200", "100"]);
        assert_eq!(db.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_second_poll_delivers_nothing_new() {
        let db = seeded_db();
        let channel = Arc::new(ScriptedChannel::always(SendOutcome::Delivered { handle: None }));
        let notifier = notifier(db, channel.clone(), 3);

        let first = notifier.poll_once(at(12, 0)).await.unwrap();
        let second = notifier.poll_once(at(12, 1)).await.unwrap();
        assert_eq!(first.delivered, 3);
        assert_eq!(second.claimed, 0);
        assert_eq!(second.delivered, 0);
        assert_eq!(channel.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_overlapping_notifiers_never_double_deliver() {
        let db = seeded_db();
        let channel = Arc::new(ScriptedChannel::always(SendOutcome::Delivered { handle: None }));
        let a = notifier(db.clone(), channel.clone(), 3);
        let b = notifier(db.clone(), channel.clone(), 3);

        let (ra, rb) = tokio::join!(a.poll_once(at(12, 0)), b.poll_once(at(12, 0)));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(ra.delivered + rb.delivered, 3);
        assert_eq!(ra.already_marked + rb.already_marked, 0);
        assert_eq!(channel.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_same_notifier_skips_overlapping_poll() {
        let db = seeded_db();
        let channel = Arc::new(ScriptedChannel::always(SendOutcome::Delivered { handle: None }));
        let notifier = notifier(db, channel.clone(), 3).with_send_spacing(Duration::from_millis(5));

        let (first, second) = tokio::join!(notifier.poll_once(at(12, 0)), notifier.poll_once(at(12, 0)));
        let (first, second) = (first.unwrap(), second.unwrap());
        assert!(!first.skipped);
        assert!(second.skipped);
        assert_eq!(channel.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_is_closed_but_counted_separately() {
        let db = seeded_db();
        let channel = Arc::new(
            ScriptedChannel::always(SendOutcome::Delivered { handle: None })
                .with_recipient("200", SendOutcome::Unreachable("bot was blocked".into())),
        );
        let notifier = notifier(db.clone(), channel.clone(), 3);

        let summary = notifier.poll_once(at(12, 0)).await.unwrap();
        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.unreachable, 1);
        // Not retried on the next poll.
        let again = notifier.poll_once(at(12, 5)).await.unwrap();
        assert_eq!(again.claimed, 0);
        assert_eq!(channel.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_event_stays_undelivered_for_next_poll() {
        let db = seeded_db();
        let channel = Arc::new(
            ScriptedChannel::always(SendOutcome::Delivered { handle: None })
                .with_recipient("200", SendOutcome::Transient("502 Bad Gateway".into())),
        );
        let notifier = notifier(db.clone(), channel.clone(), 2);

        let summary = notifier.poll_once(at(12, 0)).await.unwrap();
        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.exhausted, 1);

        let retry = notifier.poll_once(at(12, 1)).await.unwrap();
        assert_eq!(retry.claimed, 1);
        assert_eq!(retry.exhausted, 1);
        // 2 attempts per poll for "200", one send each for "100".
        assert_eq!(channel.calls().len(), 2 + 2 + 2);
    }

    #[tokio::test]
    async fn test_reconfigured_attempts_apply_to_next_poll() {
        let db = seeded_db();
        let channel = Arc::new(
            ScriptedChannel::always(SendOutcome::Delivered { handle: None })
                .with_recipient("200", SendOutcome::Transient("502 Bad Gateway".into())),
        );
        let notifier = notifier(db, channel.clone(), 2);

        let first = notifier.poll_once(at(12, 0)).await.unwrap();
        assert_eq!(first.exhausted, 1);
        assert_eq!(channel.calls_to("200"), 2);

        let mut policy = notifier.retrier.policy().await;
        policy.max_attempts = 4;
        notifier
            .reconfigure(policy, Duration::from_millis(1), Duration::from_secs(5))
            .await;
        assert_eq!(notifier.poll_interval().await, Duration::from_secs(5));

        let second = notifier.poll_once(at(12, 1)).await.unwrap();
        assert_eq!(second.exhausted, 1);
        assert_eq!(channel.calls_to("200"), 2 + 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_follows_reloaded_interval() {
        let db = Arc::new(EmitterDb::open_in_memory().unwrap());
        let channel = Arc::new(ScriptedChannel::always(SendOutcome::Delivered { handle: None }));
        let notifier = Arc::new(notifier(db.clone(), channel.clone(), 1).with_poll_interval(Duration::from_secs(60)));
        let task = tokio::spawn(spawn_notifier(notifier.clone()));

        // First tick fires immediately; shorten the interval before the second.
        tokio::time::sleep(Duration::from_secs(1)).await;
        notifier
            .reconfigure(RetryPolicy::default(), Duration::ZERO, Duration::from_secs(5))
            .await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        // The 60s tick restarts the ticker at 5s; an event due now is picked up within it.
        let now = Utc::now();
        db.replace_batch("100", now.date_naive(), &[event("n1", "100", now, 1.0)]).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(channel.calls_to("100"), 1);
        task.abort();
    }

    #[test]
    fn test_profit_message_format() {
        let e = event("e1", "100", at(9, 5), 12.3456);
        let text = format_profit_message(&e, "USDT", utc3());
        assert!(text.contains("+12.35 USDT"));
        assert!(text.contains("19.10.2026 12:05"));
    }
}

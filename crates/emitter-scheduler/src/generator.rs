//! Profit event generator. Splits a recipient's daily total into timestamped
//! increments spread over the rest of the local day.
//!
//! Amounts: `n` random weights in [0.1, 1.0), normalised, scaled by the total;
//! the last amount absorbs floating-point drift so the batch sums exactly.
//! Due times: uniform in the open interval (now, local end-of-day), sorted.

use chrono::{DateTime, FixedOffset, SubsecRound, Utc};
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use emitter_core::config::EmitterConfig;
use emitter_core::error::{EmitterError, Result};
use emitter_core::traits::{EventStore, RecipientSource};
use emitter_core::types::{Recipient, ScheduledProfitEvent};

use crate::clock;

/// Amounts below this are treated as zero.
pub const AMOUNT_EPSILON: f64 = 1e-9;

/// Generates one batch of profit events per recipient per local day.
#[derive(Debug, Clone)]
pub struct ProfitEventGenerator {
    min_events: u32,
    max_events: u32,
    offset: FixedOffset,
}

/// What a generation pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationSummary {
    pub recipients: usize,
    pub batches: usize,
    pub events: usize,
    /// Recipients with nothing to emit or already scheduled today.
    pub skipped: usize,
    pub failed: usize,
}

impl ProfitEventGenerator {
    pub fn new(min_events: u32, max_events: u32, offset: FixedOffset) -> Self {
        let min_events = min_events.max(1);
        Self {
            min_events,
            max_events: max_events.max(min_events),
            offset,
        }
    }

    pub fn from_config(config: &EmitterConfig) -> Result<Self> {
        config.profit.validate()?;
        Ok(Self::new(
            config.profit.min_events,
            config.profit.max_events,
            config.offset()?,
        ))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Plan a fresh batch for `daily_total` over the rest of today. Not persisted.
    pub fn plan<R: Rng + ?Sized>(
        &self,
        recipient: &str,
        daily_total: f64,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<ScheduledProfitEvent> {
        match clock::next_local_midnight(now, self.offset) {
            Some(end) => self.plan_until(recipient, daily_total, daily_total, now, end, rng),
            None => Vec::new(),
        }
    }

    /// Plan events emitting `amount` (part of `daily_total`) strictly inside (now, end).
    /// Empty when there is nothing to emit or no room left before `end`.
    pub fn plan_until<R: Rng + ?Sized>(
        &self,
        recipient: &str,
        amount: f64,
        daily_total: f64,
        now: DateTime<Utc>,
        end: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<ScheduledProfitEvent> {
        if !(amount > AMOUNT_EPSILON) {
            return Vec::new();
        }
        // Due times are whole milliseconds in [trunc(now) + 2ms, now + span - 1ms].
        let span_ms = (end - now).num_milliseconds();
        if span_ms < 3 {
            return Vec::new();
        }

        let count = rng.gen_range(self.min_events..=self.max_events) as usize;
        let amounts = split_amount(amount, count, rng);

        let base = now.trunc_subsecs(3);
        let mut due: Vec<DateTime<Utc>> = (0..count)
            .map(|_| base + chrono::Duration::milliseconds(rng.gen_range(2..span_ms)))
            .collect();
        due.sort();

        let day = clock::local_day(now, self.offset);
        amounts
            .into_iter()
            .zip(due)
            .map(|(amount, due_at)| ScheduledProfitEvent {
                id: uuid::Uuid::new_v4().to_string(),
                recipient_id: recipient.to_string(),
                day,
                amount,
                due_at,
                daily_total,
                delivered: false,
                created_at: now,
            })
            .collect()
    }

    /// Generate and persist today's batch for one recipient.
    ///
    /// An existing batch for the same day is replaced: its pending events are
    /// discarded and the new batch covers only what is left of the total after
    /// the committed amounts (delivered or claimed by an in-flight poll), so the
    /// day still sums to the total.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        store: &dyn EventStore,
        recipient: &Recipient,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Vec<ScheduledProfitEvent>> {
        let day = clock::local_day(now, self.offset);
        let end = clock::next_local_midnight(now, self.offset)
            .ok_or_else(|| EmitterError::Other(format!("no local midnight after {now}")))?;

        let existing = store.has_batch(&recipient.id, day)?;
        let committed = if existing {
            store.committed_total(&recipient.id, day)?
        } else {
            0.0
        };
        let remaining = recipient.daily_total - committed;
        let events = self.plan_until(&recipient.id, remaining, recipient.daily_total, now, end, rng);

        if events.is_empty() && !existing {
            tracing::debug!("⏭️ Nothing to generate for {} on {}", recipient.id, day);
            return Ok(events);
        }

        store.replace_batch(&recipient.id, day, &events)?;
        tracing::info!(
            "📅 Generated {} profit events for {} on {} (total {:.2}, remaining {:.2})",
            events.len(),
            recipient.id,
            day,
            recipient.daily_total,
            remaining.max(0.0)
        );
        Ok(events)
    }

    /// Generate today's batch for every eligible recipient.
    /// With `skip_existing`, recipients that already have a batch today are left alone.
    pub async fn generate_all(
        &self,
        store: &dyn EventStore,
        source: &dyn RecipientSource,
        now: DateTime<Utc>,
        skip_existing: bool,
    ) -> Result<GenerationSummary> {
        let recipients = source.eligible_recipients().await?;
        let day = clock::local_day(now, self.offset);
        let mut rng = rand::rngs::StdRng::from_entropy();
        let mut summary = GenerationSummary {
            recipients: recipients.len(),
            ..Default::default()
        };

        for recipient in &recipients {
            if skip_existing {
                match store.has_batch(&recipient.id, day) {
                    Ok(true) => {
                        summary.skipped += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!("⚠️ Batch lookup failed for {}: {e}", recipient.id);
                        summary.failed += 1;
                        continue;
                    }
                }
            }
            let result = self.generate(store, recipient, now, &mut rng);
            match result {
                Ok(events) if events.is_empty() => summary.skipped += 1,
                Ok(events) => {
                    summary.batches += 1;
                    summary.events += events.len();
                }
                Err(e) => {
                    tracing::warn!("⚠️ Profit generation failed for {}: {e}", recipient.id);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            "📊 Profit generation for {}: {} recipients, {} batches, {} events, {} skipped, {} failed",
            day,
            summary.recipients,
            summary.batches,
            summary.events,
            summary.skipped,
            summary.failed
        );
        Ok(summary)
    }
}

/// Split `total` into `count` positive parts that sum to `total`.
fn split_amount<R: Rng + ?Sized>(total: f64, count: usize, rng: &mut R) -> Vec<f64> {
    if count == 0 {
        return Vec::new();
    }
    let weights: Vec<f64> = (0..count).map(|_| rng.gen_range(0.1..1.0)).collect();
    let weight_sum: f64 = weights.iter().sum();

    let mut amounts: Vec<f64> = weights[..count - 1]
        .iter()
        .map(|w| total * w / weight_sum)
        .collect();
    let head: f64 = amounts.iter().sum();
    amounts.push((total - head).max(0.0));
    amounts
}

/// Run generation at startup and again after every local midnight.
pub async fn spawn_daily_generation(
    generator: Arc<ProfitEventGenerator>,
    store: Arc<dyn EventStore>,
    source: Arc<dyn RecipientSource>,
) {
    tracing::info!("⏰ Daily profit generation started (offset {})", generator.offset());
    loop {
        let now = Utc::now();
        if let Err(e) = generator
            .generate_all(store.as_ref(), source.as_ref(), now, true)
            .await
        {
            tracing::error!("❌ Profit generation pass failed: {e}");
        }

        let now = Utc::now();
        let wait = match clock::next_local_midnight(now, generator.offset()) {
            Some(midnight) => clock::until(midnight, now) + std::time::Duration::from_secs(1),
            None => std::time::Duration::from_secs(3600),
        };
        tokio::time::sleep(wait).await;
    }
}

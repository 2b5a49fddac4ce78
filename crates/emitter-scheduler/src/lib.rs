//! # Emitter Scheduler
//!
//! Time-driven emission engine: per-recipient synthetic profit events and
//! randomized daily broadcasts, both delivered through one retrying channel
//! client.
//!
//! ## Architecture
//! ```text
//! Daily generation (local midnight)
//!   └── RecipientSource → ProfitEventGenerator → EventStore (SQLite)
//!
//! DueNotifier (tokio interval)
//!   └── claim_due → DeliveryRetrier → Channel → mark_delivered / release
//!
//! BroadcastScheduler (local midnight / SIGHUP)
//!   ├── BroadcastWindow::plan → armed timers
//!   └── on fire → BroadcastDispatcher
//!                   ├── ArtifactRenderer (once per cycle)
//!                   ├── RecipientSource (fresh per cycle)
//!                   └── DeliveryRetrier → Channel (handle reuse)
//! ```

pub mod backoff;
pub mod broadcast;
pub mod clock;
pub mod dispatch;
pub mod generator;
pub mod notifier;
pub mod persistence;
pub mod render;
pub mod retrier;
pub mod window;

#[cfg(test)]
mod test_support;

pub use backoff::{RetryPolicy, SendPacer};
pub use broadcast::{BroadcastScheduler, spawn_broadcast_scheduler};
pub use dispatch::{BroadcastDispatcher, CycleSummary};
pub use generator::{GenerationSummary, ProfitEventGenerator, spawn_daily_generation};
pub use notifier::{DueNotifier, PollSummary, spawn_notifier};
pub use persistence::EmitterDb;
pub use render::CommandRenderer;
pub use retrier::{DeliveryOutcome, DeliveryReport, DeliveryRetrier};
pub use window::{BroadcastFireTime, BroadcastWindow};

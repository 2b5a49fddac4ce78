//! Broadcast scheduler. Owns the day's armed broadcast timers.
//!
//! Every local midnight (and on explicit reconfiguration) all unfired timers
//! are cancelled under one lock and a fresh plan is armed. A timer that fires
//! hands the cycle to its own task, so cancelling never interrupts a
//! broadcast already in flight.

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::clock;
use crate::dispatch::BroadcastDispatcher;
use crate::window::{BroadcastFireTime, BroadcastWindow};

struct ArmedTimer {
    fire: BroadcastFireTime,
    handle: JoinHandle<()>,
}

pub struct BroadcastScheduler {
    window: RwLock<BroadcastWindow>,
    dispatcher: Arc<BroadcastDispatcher>,
    armed: Mutex<Vec<ArmedTimer>>,
}

impl BroadcastScheduler {
    pub fn new(window: BroadcastWindow, dispatcher: Arc<BroadcastDispatcher>) -> Self {
        Self {
            window: RwLock::new(window),
            dispatcher,
            armed: Mutex::new(Vec::new()),
        }
    }

    /// Current window configuration.
    pub async fn window(&self) -> BroadcastWindow {
        self.window.read().await.clone()
    }

    /// Compute today's plan without arming anything.
    pub async fn plan_preview(&self, now: DateTime<Utc>) -> Vec<BroadcastFireTime> {
        let window = self.window.read().await;
        window.plan(now, &mut rand::rngs::StdRng::from_entropy())
    }

    /// Fire times armed and not yet fired.
    pub async fn pending(&self) -> Vec<BroadcastFireTime> {
        self.armed
            .lock()
            .await
            .iter()
            .filter(|t| !t.handle.is_finished())
            .map(|t| t.fire.clone())
            .collect()
    }

    /// Cancel every timer that has not fired yet. Returns how many were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let mut armed = self.armed.lock().await;
        Self::cancel_locked(&mut armed)
    }

    fn cancel_locked(armed: &mut Vec<ArmedTimer>) -> usize {
        let mut cancelled = 0;
        for timer in armed.drain(..) {
            if !timer.handle.is_finished() {
                timer.handle.abort();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancel pending timers and arm a fresh plan for today.
    pub async fn rearm(&self, now: DateTime<Utc>) -> Vec<BroadcastFireTime> {
        let window = self.window.read().await.clone();
        let fires = window.plan(now, &mut rand::rngs::StdRng::from_entropy());
        self.arm(fires, now).await
    }

    /// Replace the window and re-plan from scratch.
    pub async fn reconfigure(&self, window: BroadcastWindow, now: DateTime<Utc>) -> Vec<BroadcastFireTime> {
        tracing::info!(
            "🔧 Broadcast reconfigured: {}–{} ({}), {}..={} posts/day",
            window.start.format("%H:%M"),
            window.end.format("%H:%M"),
            window.offset,
            window.min_posts,
            window.max_posts
        );
        *self.window.write().await = window;
        self.rearm(now).await
    }

    /// Cancel pending timers and arm exactly `fires`.
    pub async fn arm(&self, fires: Vec<BroadcastFireTime>, now: DateTime<Utc>) -> Vec<BroadcastFireTime> {
        let mut armed = self.armed.lock().await;
        let cancelled = Self::cancel_locked(&mut armed);
        if cancelled > 0 {
            tracing::debug!("🗑️ Cancelled {} pending broadcast timers", cancelled);
        }

        for fire in &fires {
            let delay = clock::until(fire.fire_at, now);
            let dispatcher = self.dispatcher.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                tokio::spawn(async move {
                    dispatcher.run_cycle_logged().await;
                });
            });
            armed.push(ArmedTimer {
                fire: fire.clone(),
                handle,
            });
        }

        let times: Vec<String> = fires
            .iter()
            .map(|f| f.local_time.format("%H:%M").to_string())
            .collect();
        tracing::info!("📅 Armed {} broadcasts (local): {}", fires.len(), times.join(", "));
        fires
    }
}

impl Drop for BroadcastScheduler {
    fn drop(&mut self) {
        for timer in self.armed.get_mut().drain(..) {
            timer.handle.abort();
        }
    }
}

/// Arm today's broadcasts, then re-arm after every local midnight.
pub async fn spawn_broadcast_scheduler(scheduler: Arc<BroadcastScheduler>) {
    tracing::info!("⏰ Broadcast scheduler started");
    loop {
        let now = Utc::now();
        scheduler.rearm(now).await;

        let offset = scheduler.window().await.offset;
        let now = Utc::now();
        let wait = match clock::next_local_midnight(now, offset) {
            Some(midnight) => clock::until(midnight, now) + Duration::from_secs(1),
            None => Duration::from_secs(3600),
        };
        tokio::time::sleep(wait).await;
    }
}

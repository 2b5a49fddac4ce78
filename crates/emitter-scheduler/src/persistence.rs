//! SQLite-backed persistence for profit events and broadcast recipients.
//! Survives restarts; every read-then-write sequence runs in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use emitter_core::error::{EmitterError, Result};
use emitter_core::traits::{EventStore, RecipientSource};
use emitter_core::types::{Recipient, ScheduledProfitEvent};

/// Recipient status that makes an account eligible.
pub const STATUS_ACTIVE: &str = "active";

/// SQLite-backed store for all scheduler data.
pub struct EmitterDb {
    conn: Mutex<rusqlite::Connection>,
}

impl EmitterDb {
    /// Open or create the database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| EmitterError::Database(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    /// In-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| EmitterError::Database(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: rusqlite::Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| EmitterError::Database("connection mutex poisoned".into()))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            -- One row per synthetic profit increment
            CREATE TABLE IF NOT EXISTS profit_events (
                id TEXT PRIMARY KEY,
                recipient_id TEXT NOT NULL,
                day TEXT NOT NULL,               -- local calendar day, YYYY-MM-DD
                amount REAL NOT NULL,
                due_at TEXT NOT NULL,            -- RFC3339 UTC, millisecond precision
                daily_total REAL NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                claimed_at TEXT,                 -- set while a poll owns the event
                delivered_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_profit_events_due ON profit_events(delivered, due_at);
            CREATE INDEX IF NOT EXISTS idx_profit_events_day ON profit_events(recipient_id, day);

            -- Broadcast / profit recipients, maintained by the CRM
            CREATE TABLE IF NOT EXISTS recipients (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'active',
                daily_total REAL NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );
         ",
            )
            .map_err(|e| EmitterError::Database(format!("Migration: {e}")))?;
        Ok(())
    }

    // ─── Recipients ──────────────────────────────────────

    /// Insert or update a recipient's daily total (status untouched on update).
    pub fn upsert_recipient(&self, id: &str, daily_total: f64) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO recipients (id, status, daily_total, updated_at)
                 VALUES (?1, 'active', ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET daily_total = excluded.daily_total,
                                               updated_at = excluded.updated_at",
                rusqlite::params![id, daily_total, ts(Utc::now())],
            )
            .map_err(|e| EmitterError::Database(format!("Upsert recipient: {e}")))?;
        Ok(())
    }

    /// Change a recipient's status ("active", "blocked", ...).
    pub fn set_recipient_status(&self, id: &str, status: &str) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE recipients SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status, ts(Utc::now()), id],
            )
            .map_err(|e| EmitterError::Database(format!("Update recipient: {e}")))?;
        Ok(changed > 0)
    }

    /// Active recipients in enumeration order.
    pub fn active_recipients(&self) -> Result<Vec<Recipient>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, daily_total FROM recipients WHERE status = ?1 ORDER BY rowid")
            .map_err(|e| EmitterError::Database(format!("Query recipients: {e}")))?;
        let rows = stmt
            .query_map([STATUS_ACTIVE], |row| {
                Ok(Recipient {
                    id: row.get(0)?,
                    daily_total: row.get(1)?,
                })
            })
            .map_err(|e| EmitterError::Database(format!("Query recipients: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EmitterError::Database(format!("Read recipients: {e}")))
    }

    // ─── Events ──────────────────────────────────────

    /// Number of events not yet delivered (any day).
    pub fn pending_count(&self) -> Result<u64> {
        self.conn()?
            .query_row(
                "SELECT COUNT(*) FROM profit_events WHERE delivered = 0",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
            .map_err(|e| EmitterError::Database(format!("Count events: {e}")))
    }
}

const EVENT_COLUMNS: &str =
    "id, recipient_id, day, amount, due_at, daily_total, delivered, created_at";

impl EventStore for EmitterDb {
    fn has_batch(&self, recipient: &str, day: NaiveDate) -> Result<bool> {
        self.conn()?
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM profit_events WHERE recipient_id = ?1 AND day = ?2)",
                rusqlite::params![recipient, day.to_string()],
                |row| row.get::<_, bool>(0),
            )
            .map_err(|e| EmitterError::Database(format!("Check batch: {e}")))
    }

    fn committed_total(&self, recipient: &str, day: NaiveDate) -> Result<f64> {
        self.conn()?
            .query_row(
                "SELECT COALESCE(SUM(amount), 0.0) FROM profit_events
                 WHERE recipient_id = ?1 AND day = ?2
                   AND (delivered = 1 OR claimed_at IS NOT NULL)",
                rusqlite::params![recipient, day.to_string()],
                |row| row.get::<_, f64>(0),
            )
            .map_err(|e| EmitterError::Database(format!("Sum committed: {e}")))
    }

    fn replace_batch(
        &self,
        recipient: &str,
        day: NaiveDate,
        events: &[ScheduledProfitEvent],
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| EmitterError::Database(format!("Begin: {e}")))?;
        let dropped = tx
            .execute(
                "DELETE FROM profit_events
                 WHERE recipient_id = ?1 AND day = ?2 AND delivered = 0 AND claimed_at IS NULL",
                rusqlite::params![recipient, day.to_string()],
            )
            .map_err(|e| EmitterError::Database(format!("Drop stale batch: {e}")))?;
        if dropped > 0 {
            tracing::debug!("🗑️ Dropped {} stale events for {} on {}", dropped, recipient, day);
        }
        for event in events {
            tx.execute(
                "INSERT INTO profit_events
                 (id, recipient_id, day, amount, due_at, daily_total, delivered, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    event.id,
                    event.recipient_id,
                    event.day.to_string(),
                    event.amount,
                    ts(event.due_at),
                    event.daily_total,
                    event.delivered as i32,
                    ts(event.created_at),
                ],
            )
            .map_err(|e| EmitterError::Database(format!("Insert event: {e}")))?;
        }
        tx.commit()
            .map_err(|e| EmitterError::Database(format!("Commit batch: {e}")))?;
        Ok(())
    }

    fn claim_due(&self, now: DateTime<Utc>, lease: Duration) -> Result<Vec<ScheduledProfitEvent>> {
        let stale_before = now
            - chrono::Duration::from_std(lease)
                .map_err(|e| EmitterError::Database(format!("Invalid lease: {e}")))?;
        let now_s = ts(now);
        let stale_s = ts(stale_before);

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| EmitterError::Database(format!("Begin: {e}")))?;

        let candidates = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {EVENT_COLUMNS} FROM profit_events
                     WHERE delivered = 0 AND due_at <= ?1
                       AND (claimed_at IS NULL OR claimed_at < ?2)
                     ORDER BY due_at, id"
                ))
                .map_err(|e| EmitterError::Database(format!("Query due: {e}")))?;
            let rows = stmt
                .query_map(rusqlite::params![now_s, stale_s], row_to_event)
                .map_err(|e| EmitterError::Database(format!("Query due: {e}")))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| EmitterError::Database(format!("Read due: {e}")))?
        };

        let mut claimed = Vec::with_capacity(candidates.len());
        for event in candidates {
            let changed = tx
                .execute(
                    "UPDATE profit_events SET claimed_at = ?1
                     WHERE id = ?2 AND delivered = 0 AND (claimed_at IS NULL OR claimed_at < ?3)",
                    rusqlite::params![now_s, event.id, stale_s],
                )
                .map_err(|e| EmitterError::Database(format!("Claim event: {e}")))?;
            if changed == 1 {
                claimed.push(event);
            }
        }
        tx.commit()
            .map_err(|e| EmitterError::Database(format!("Commit claim: {e}")))?;
        Ok(claimed)
    }

    fn mark_delivered(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE profit_events SET delivered = 1, delivered_at = ?1, claimed_at = NULL
                 WHERE id = ?2 AND delivered = 0",
                rusqlite::params![ts(at), id],
            )
            .map_err(|e| EmitterError::Database(format!("Mark delivered: {e}")))?;
        Ok(changed == 1)
    }

    fn release_claim(&self, id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE profit_events SET claimed_at = NULL WHERE id = ?1 AND delivered = 0",
                [id],
            )
            .map_err(|e| EmitterError::Database(format!("Release claim: {e}")))?;
        Ok(())
    }

    fn events_for(&self, recipient: &str, day: NaiveDate) -> Result<Vec<ScheduledProfitEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM profit_events
                 WHERE recipient_id = ?1 AND day = ?2 ORDER BY due_at, id"
            ))
            .map_err(|e| EmitterError::Database(format!("Query events: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params![recipient, day.to_string()], row_to_event)
            .map_err(|e| EmitterError::Database(format!("Query events: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EmitterError::Database(format!("Read events: {e}")))
    }
}

#[async_trait]
impl RecipientSource for EmitterDb {
    async fn eligible_recipients(&self) -> Result<Vec<Recipient>> {
        self.active_recipients()
            .map_err(|e| EmitterError::Recipients(e.to_string()))
    }
}

/// Fixed-width UTC timestamp so TEXT comparison matches time order.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledProfitEvent> {
    let day_str: String = row.get(2)?;
    let due_str: String = row.get(4)?;
    let created_str: String = row.get(7)?;
    let day = NaiveDate::parse_from_str(&day_str, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ScheduledProfitEvent {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        day,
        amount: row.get(3)?,
        due_at: parse_ts(4, &due_str)?,
        daily_total: row.get(5)?,
        delivered: row.get::<_, i32>(6)? != 0,
        created_at: parse_ts(7, &created_str)?,
    })
}

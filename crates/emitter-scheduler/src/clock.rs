//! Local-day arithmetic in the fixed reference timezone.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};

/// Local calendar day `at` falls on.
pub fn local_day(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

/// Next local midnight strictly after `at`, as a UTC instant.
pub fn next_local_midnight(at: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let next_day = local_day(at, offset).succ_opt()?;
    let midnight = next_day.and_hms_opt(0, 0, 0)?;
    offset
        .from_local_datetime(&midnight)
        .single()
        .map(|d| d.with_timezone(&Utc))
}

/// Wall-clock time left until `target` (zero if already past).
pub fn until(target: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (target - now).to_std().unwrap_or_default()
}

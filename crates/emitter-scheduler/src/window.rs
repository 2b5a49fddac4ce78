//! Broadcast window planning: picks a day's fire times inside a local window.
//!
//! The window is configured in the reference timezone and converted to
//! native-clock (UTC) minutes-of-day. When the converted end is numerically
//! before the start, the window crosses native midnight and is split into
//! `[start, 1440)` and `[0, end)`; each candidate minute is drawn from a
//! uniformly chosen sub-range.

use chrono::{DateTime, FixedOffset, NaiveTime, Timelike, Utc};
use rand::Rng;
use std::collections::BTreeSet;
use std::ops::Range;

use emitter_core::config::{EmitterConfig, parse_time_of_day};
use emitter_core::error::Result;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Daily broadcast window and post-count range.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastWindow {
    pub min_posts: u32,
    pub max_posts: u32,
    /// Local (reference timezone) start of the window.
    pub start: NaiveTime,
    /// Local end of the window (exclusive).
    pub end: NaiveTime,
    pub offset: FixedOffset,
}

/// One scheduled broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastFireTime {
    /// Time of day in the reference timezone.
    pub local_time: NaiveTime,
    /// Time of day on the native clock.
    pub native_time: NaiveTime,
    pub fire_at: DateTime<Utc>,
    /// Pushed to the next day because the instant had already passed.
    pub deferred: bool,
}

impl BroadcastWindow {
    pub fn from_config(config: &EmitterConfig) -> Result<Self> {
        config.broadcast.validate()?;
        Ok(Self {
            min_posts: config.broadcast.min_posts,
            max_posts: config.broadcast.max_posts,
            start: parse_time_of_day(&config.broadcast.window_start)?,
            end: parse_time_of_day(&config.broadcast.window_end)?,
            offset: config.offset()?,
        })
    }

    /// Native minute-of-day for a local time of day.
    pub fn to_native_minute(&self, local: NaiveTime) -> u32 {
        let local_minute = (local.hour() * 60 + local.minute()) as i32;
        let offset_minutes = self.offset.local_minus_utc() / 60;
        (local_minute - offset_minutes).rem_euclid(MINUTES_PER_DAY as i32) as u32
    }

    /// The window as disjoint native minute ranges.
    pub fn native_ranges(&self) -> Vec<Range<u32>> {
        let start = self.to_native_minute(self.start);
        let end = self.to_native_minute(self.end);
        if start == end {
            return vec![0..MINUTES_PER_DAY];
        }
        if end > start {
            return vec![start..end];
        }
        [start..MINUTES_PER_DAY, 0..end]
            .into_iter()
            .filter(|r| !r.is_empty())
            .collect()
    }

    /// Pick today's fire times. Instants not after `now` are deferred by one day.
    /// The result is sorted by `fire_at` and free of duplicates.
    pub fn plan<R: Rng + ?Sized>(&self, now: DateTime<Utc>, rng: &mut R) -> Vec<BroadcastFireTime> {
        let ranges = self.native_ranges();
        let capacity: u32 = ranges.iter().map(|r| r.end - r.start).sum();
        let wanted = rng.gen_range(self.min_posts..=self.max_posts.max(self.min_posts));
        let count = wanted.min(capacity) as usize;

        let mut minutes = BTreeSet::new();
        let mut draws = 0usize;
        while minutes.len() < count && draws < count * 1000 {
            let range = &ranges[rng.gen_range(0..ranges.len())];
            minutes.insert(rng.gen_range(range.clone()));
            draws += 1;
        }
        if minutes.len() < count {
            // Nearly full window: take the remaining minutes in order.
            let missing = count - minutes.len();
            let rest: Vec<u32> = ranges
                .iter()
                .flat_map(|r| r.clone())
                .filter(|m| !minutes.contains(m))
                .take(missing)
                .collect();
            minutes.extend(rest);
        }

        let today = now.date_naive();
        let mut fires: Vec<BroadcastFireTime> = minutes
            .into_iter()
            .filter_map(|minute| {
                let native_time = NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)?;
                let mut fire_at = today.and_time(native_time).and_utc();
                let deferred = fire_at <= now;
                if deferred {
                    fire_at += chrono::Duration::days(1);
                }
                Some(BroadcastFireTime {
                    local_time: fire_at.with_timezone(&self.offset).time(),
                    native_time,
                    fire_at,
                    deferred,
                })
            })
            .collect();
        fires.sort_by_key(|f| f.fire_at);
        fires
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn window(min: u32, max: u32, start: &str, end: &str, offset_h: i32) -> BroadcastWindow {
        BroadcastWindow {
            min_posts: min,
            max_posts: max,
            start: parse_time_of_day(start).unwrap(),
            end: parse_time_of_day(end).unwrap(),
            offset: FixedOffset::east_opt(offset_h * 3600).unwrap(),
        }
    }

    fn minute_of(t: NaiveTime) -> u32 {
        t.hour() * 60 + t.minute()
    }

    #[test]
    fn test_simple_window_converts_to_native() {
        let w = window(1, 1, "10:00", "22:00", 3);
        assert_eq!(w.native_ranges(), vec![420..1140]);
    }

    #[test]
    fn test_window_crossing_native_midnight_is_split() {
        let w = window(3, 3, "22:00", "06:00", 2);
        assert_eq!(w.native_ranges(), vec![1200..1440, 0..240]);
    }

    #[test]
    fn test_local_window_that_wraps_only_after_conversion() {
        // 01:00–10:00 at +03:00 → 22:00–07:00 UTC.
        let w = window(1, 1, "01:00", "10:00", 3);
        assert_eq!(w.native_ranges(), vec![1320..1440, 0..420]);
    }

    #[test]
    fn test_equal_bounds_mean_whole_day() {
        let w = window(1, 1, "00:00", "00:00", 5);
        assert_eq!(w.native_ranges(), vec![0..1440]);
    }

    #[test]
    fn test_split_window_never_fires_between_0400_and_2000() {
        let w = window(3, 3, "22:00", "06:00", 2);
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();
        for seed in 0..500u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let fires = w.plan(now, &mut rng);
            assert_eq!(fires.len(), 3);
            for f in &fires {
                let m = minute_of(f.native_time);
                assert!(m >= 1200 || m < 240, "seed {seed}: {}", f.native_time);
                let local = minute_of(f.local_time);
                assert!(local >= 22 * 60 || local < 6 * 60);
            }
        }
    }

    #[test]
    fn test_fire_times_unique_and_increasing() {
        let w = window(20, 30, "09:00", "09:40", 0);
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();
        for seed in 0..50u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let fires = w.plan(now, &mut rng);
            assert!((20..=30).contains(&fires.len()));
            assert!(fires.windows(2).all(|p| p[0].fire_at < p[1].fire_at));
        }
    }

    #[test]
    fn test_count_capped_by_window_size() {
        let w = window(10, 10, "12:00", "12:03", 0);
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let fires = w.plan(now, &mut rng);
        let minutes: Vec<u32> = fires.iter().map(|f| minute_of(f.native_time)).collect();
        assert_eq!(minutes, vec![720, 721, 722]);
    }

    #[test]
    fn test_elapsed_times_are_deferred_one_day() {
        let w = window(3, 3, "08:00", "10:00", 0);
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let fires = w.plan(now, &mut rng);
        assert_eq!(fires.len(), 3);
        for f in &fires {
            assert!(f.deferred);
            assert!(f.fire_at > now);
            assert_eq!(f.fire_at.date_naive(), now.date_naive().succ_opt().unwrap());
        }
    }

    #[test]
    fn test_future_times_fire_today() {
        let w = window(2, 2, "20:00", "21:00", 0);
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let fires = w.plan(now, &mut rng);
        assert!(fires.iter().all(|f| !f.deferred && f.fire_at.date_naive() == now.date_naive()));
    }
}

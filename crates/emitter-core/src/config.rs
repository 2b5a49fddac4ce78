//! Emitter configuration system.

use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EmitterError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Fixed offset of the reference timezone, e.g. "+03:00".
    /// Local days, midnights and the broadcast window are all expressed in it.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub profit: ProfitConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
}

fn default_utc_offset() -> String { "+03:00".into() }

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            utc_offset: default_utc_offset(),
            broadcast: BroadcastConfig::default(),
            profit: ProfitConfig::default(),
            delivery: DeliveryConfig::default(),
            database: DatabaseConfig::default(),
            renderer: RendererConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl EmitterConfig {
    /// Load config from the default path (~/.emitter/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EmitterError::Config(format!("Failed to read config: {e}")))?;
        tracing::debug!("Loading config from {}", path.display());
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| EmitterError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| EmitterError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the emitter home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".emitter")
    }

    /// Parsed reference timezone offset.
    pub fn offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.utc_offset)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.offset()?;
        self.broadcast.validate()?;
        self.profit.validate()?;
        self.delivery.validate()?;
        self.renderer.validate()?;
        Ok(())
    }
}

/// Daily broadcast settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_min_posts")]
    pub min_posts: u32,
    #[serde(default = "default_max_posts")]
    pub max_posts: u32,
    /// Window start, "HH:MM" in the reference timezone.
    #[serde(default = "default_window_start")]
    pub window_start: String,
    /// Window end, "HH:MM" in the reference timezone. May be earlier than
    /// the start, in which case the window crosses midnight.
    #[serde(default = "default_window_end")]
    pub window_end: String,
    /// Pause between two recipients of the same broadcast.
    #[serde(default = "default_inter_send_delay_ms")]
    pub inter_send_delay_ms: u64,
}

fn bool_true() -> bool { true }
fn default_min_posts() -> u32 { 2 }
fn default_max_posts() -> u32 { 4 }
fn default_window_start() -> String { "10:00".into() }
fn default_window_end() -> String { "22:00".into() }
fn default_inter_send_delay_ms() -> u64 { 50 }

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_posts: default_min_posts(),
            max_posts: default_max_posts(),
            window_start: default_window_start(),
            window_end: default_window_end(),
            inter_send_delay_ms: default_inter_send_delay_ms(),
        }
    }
}

impl BroadcastConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_posts > self.max_posts {
            return Err(EmitterError::Config(format!(
                "broadcast.min_posts ({}) > broadcast.max_posts ({})",
                self.min_posts, self.max_posts
            )));
        }
        parse_time_of_day(&self.window_start)?;
        parse_time_of_day(&self.window_end)?;
        Ok(())
    }
}

/// Synthetic profit generation and notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_min_events")]
    pub min_events: u32,
    #[serde(default = "default_max_events")]
    pub max_events: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// How long a poll's claim on an event stays valid.
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Minimum spacing between two notification sends.
    #[serde(default = "default_notify_delay_ms")]
    pub send_delay_ms: u64,
}

fn default_min_events() -> u32 { 4 }
fn default_max_events() -> u32 { 11 }
fn default_poll_interval_secs() -> u64 { 60 }
fn default_claim_lease_secs() -> u64 { 600 }
fn default_currency() -> String { "USDT".into() }
fn default_notify_delay_ms() -> u64 { 40 }

impl Default for ProfitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_events: default_min_events(),
            max_events: default_max_events(),
            poll_interval_secs: default_poll_interval_secs(),
            claim_lease_secs: default_claim_lease_secs(),
            currency: default_currency(),
            send_delay_ms: default_notify_delay_ms(),
        }
    }
}

impl ProfitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_events == 0 || self.min_events > self.max_events {
            return Err(EmitterError::Config(format!(
                "profit event range {}..={} is empty",
                self.min_events, self.max_events
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(EmitterError::Config("profit.poll_interval_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// Retry/backoff policy for channel sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_backoff_ceiling_ms")]
    pub backoff_ceiling_ms: u64,
    /// Added on top of the channel's suggested wait when throttled.
    #[serde(default = "default_throttle_margin_ms")]
    pub throttle_margin_ms: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

fn default_max_attempts() -> u32 { 5 }
fn default_base_backoff_ms() -> u64 { 500 }
fn default_backoff_ceiling_ms() -> u64 { 30_000 }
fn default_throttle_margin_ms() -> u64 { 250 }
fn default_attempt_timeout_secs() -> u64 { 30 }

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            backoff_ceiling_ms: default_backoff_ceiling_ms(),
            throttle_margin_ms: default_throttle_margin_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl DeliveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(EmitterError::Config("delivery.max_attempts must be >= 1".into()));
        }
        if self.base_backoff_ms > self.backoff_ceiling_ms {
            return Err(EmitterError::Config(
                "delivery.base_backoff_ms exceeds delivery.backoff_ceiling_ms".into(),
            ));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(EmitterError::Config("delivery.attempt_timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// SQLite store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.emitter/emitter.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// External image generator. Its stdout is the broadcast artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_file_name")]
    pub file_name: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default = "default_render_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_file_name() -> String { "broadcast.png".into() }
fn default_render_timeout_secs() -> u64 { 60 }

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            file_name: default_file_name(),
            caption: None,
            timeout_secs: default_render_timeout_secs(),
        }
    }
}

impl RendererConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(EmitterError::Config("renderer.timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// Channel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub telegram: Option<TelegramChannelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChannelConfig {
    pub bot_token: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String { "https://api.telegram.org".into() }

/// Parse "+HH:MM" / "-HH:MM" / "Z" into a fixed offset.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0)
            .ok_or_else(|| EmitterError::Config("invalid zero offset".into()));
    }
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(EmitterError::Config(format!("Invalid UTC offset '{s}' (expected +HH:MM)"))),
    };
    let (h, m) = rest
        .split_once(':')
        .ok_or_else(|| EmitterError::Config(format!("Invalid UTC offset '{s}' (expected +HH:MM)")))?;
    let hours: i32 = h
        .parse()
        .map_err(|_| EmitterError::Config(format!("Invalid offset hours in '{s}'")))?;
    let minutes: i32 = m
        .parse()
        .map_err(|_| EmitterError::Config(format!("Invalid offset minutes in '{s}'")))?;
    if hours > 14 || minutes > 59 {
        return Err(EmitterError::Config(format!("UTC offset '{s}' out of range")));
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| EmitterError::Config(format!("UTC offset '{s}' out of range")))
}

/// Parse "HH:MM" into a time of day.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| EmitterError::Config(format!("Invalid time of day '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EmitterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.offset().unwrap().local_minus_utc(), 3 * 3600);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = EmitterConfig::from_toml(
            r#"
            utc_offset = "+02:00"

            [broadcast]
            min_posts = 3
            max_posts = 3
            window_start = "22:00"
            window_end = "06:00"

            [channel.telegram]
            bot_token = "123:abc"
            "#,
        )
        .unwrap();
        assert_eq!(config.broadcast.min_posts, 3);
        assert_eq!(config.broadcast.window_end, "06:00");
        assert_eq!(config.profit.max_events, 11);
        let tg = config.channel.telegram.unwrap();
        assert!(tg.enabled);
        assert_eq!(tg.api_base, "https://api.telegram.org");
    }

    #[test]
    fn test_rejects_inverted_post_range() {
        let err = EmitterConfig::from_toml("[broadcast]\nmin_posts = 5\nmax_posts = 2\n");
        assert!(matches!(err, Err(EmitterError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_window() {
        let err = EmitterConfig::from_toml("[broadcast]\nwindow_start = \"25:00\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let err = EmitterConfig::from_toml("[delivery]\nattempt_timeout_secs = 0\n");
        assert!(matches!(err, Err(EmitterError::Config(m)) if m.contains("attempt_timeout_secs")));
        let err = EmitterConfig::from_toml("[renderer]\ncommand = \"render\"\ntimeout_secs = 0\n");
        assert!(matches!(err, Err(EmitterError::Config(m)) if m.contains("renderer.timeout_secs")));
        assert!(EmitterConfig::from_toml("[delivery]\nattempt_timeout_secs = 1\n").is_ok());
    }

    #[test]
    fn test_parse_offsets() {
        assert_eq!(parse_utc_offset("-05:30").unwrap().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("03:00").is_err());
        assert!(parse_utc_offset("+15:00").is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join(format!("emitter-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");
        let mut config = EmitterConfig::default();
        config.broadcast.max_posts = 7;
        config.save_to(&path).unwrap();
        let loaded = EmitterConfig::load_from(&path).unwrap();
        assert_eq!(loaded.broadcast.max_posts, 7);
        std::fs::remove_dir_all(&dir).ok();
    }
}

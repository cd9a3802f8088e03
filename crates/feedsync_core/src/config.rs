//! Engine configuration.
//!
//! # Responsibility
//! - Hold every tunable of the feed engine with documented defaults.
//! - Load overrides from TOML and validate them before use.
//!
//! # Invariants
//! - A `FeedConfig` handed to engine components has passed `validate()`.

use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;
const MINUTES_PER_DAY: u32 = 24 * 60;

/// Configuration loading/validation error.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid { field: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid { field, message } => write!(f, "invalid `{field}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}

/// Tunables of the feed synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Items per feed page.
    pub page_size: usize,
    /// Upper bound of records requested from one partition per page.
    pub per_partition_limit: usize,
    /// Partition queries in flight at once.
    pub max_concurrent_fetches: usize,
    pub fetch_timeout_ms: u64,
    pub cache_ttl_ms: i64,
    /// Read-your-own-write window after a local write.
    pub write_grace_ms: i64,
    pub poll_interval_ms: u64,
    /// Clock/replication skew absorbed by the staleness poller.
    pub poll_tolerance_ms: i64,
    pub name_lookup_concurrency: usize,
    pub placeholder_name: String,
    /// Offset used for day truncation (date filters, alerts).
    pub utc_offset_minutes: i32,
    pub include_draft_summaries: bool,
    pub missing_submission_alerts: bool,
    /// Minutes after local midnight when a missing post becomes an alert.
    pub alert_deadline_minutes: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            per_partition_limit: 20,
            max_concurrent_fetches: 8,
            fetch_timeout_ms: 10_000,
            cache_ttl_ms: 30_000,
            write_grace_ms: 3_000,
            poll_interval_ms: 60_000,
            poll_tolerance_ms: 1_000,
            name_lookup_concurrency: 8,
            placeholder_name: "Unknown user".to_string(),
            utc_offset_minutes: 0,
            include_draft_summaries: false,
            missing_submission_alerts: true,
            alert_deadline_minutes: 18 * 60,
        }
    }
}

impl FeedConfig {
    /// Parses TOML overrides on top of defaults and validates the result.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    /// - Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("page_size", self.page_size as u64),
            ("per_partition_limit", self.per_partition_limit as u64),
            ("max_concurrent_fetches", self.max_concurrent_fetches as u64),
            ("name_lookup_concurrency", self.name_lookup_concurrency as u64),
            ("fetch_timeout_ms", self.fetch_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        if self.cache_ttl_ms <= 0 {
            return Err(invalid("cache_ttl_ms", "must be greater than zero"));
        }
        if self.write_grace_ms < 0 {
            return Err(invalid("write_grace_ms", "must not be negative"));
        }
        if self.poll_tolerance_ms < 0 {
            return Err(invalid("poll_tolerance_ms", "must not be negative"));
        }
        if self.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(invalid("utc_offset_minutes", "must be within +/-14h"));
        }
        if self.alert_deadline_minutes > MINUTES_PER_DAY {
            return Err(invalid("alert_deadline_minutes", "must be within one day"));
        }
        if self.placeholder_name.trim().is_empty() {
            return Err(invalid("placeholder_name", "cannot be blank"));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn invalid(field: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.to_string(),
    }
}

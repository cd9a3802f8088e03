//! Timestamp normalization.
//!
//! # Responsibility
//! - Model every timestamp encoding the remote store is known to produce as
//!   one closed enum, probed once at the decoding boundary.
//! - Convert any supported encoding to Unix epoch milliseconds.
//!
//! # Invariants
//! - Normalization never panics; overflow and unknown shapes yield `None`.
//! - `None` means UNKNOWN: callers keep the item and sort it last.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// Value that knows how to express itself in epoch milliseconds.
///
/// Implemented by store-native timestamp objects that carry their own
/// conversion method.
pub trait ToMillis: Debug + Send + Sync {
    fn to_millis(&self) -> Option<i64>;
}

/// Supported raw timestamp encodings.
#[derive(Debug, Clone)]
pub enum RawTimestamp {
    /// Already an integer epoch-millisecond value.
    EpochMillis(i64),
    /// Object exposing `seconds` (and optionally `nanoseconds`).
    Seconds { seconds: i64, nanos: u32 },
    /// Serialized object exposing `_seconds` / `_nanoseconds`.
    UnderscoreSeconds { seconds: i64, nanoseconds: u32 },
    /// Object with a millisecond-conversion method.
    Convertible(Arc<dyn ToMillis>),
    /// RFC 3339 text, e.g. `2024-05-01T09:30:00+09:00`.
    Iso8601(String),
    /// Shape not recognized; kept verbatim for diagnostics.
    Unrecognized(String),
}

impl RawTimestamp {
    /// Classifies a JSON field value into a timestamp encoding.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Number(number) => {
                if let Some(ms) = number.as_i64() {
                    return Self::EpochMillis(ms);
                }
                match number.as_f64() {
                    Some(ms) if ms.is_finite() && ms.abs() < i64::MAX as f64 => {
                        Self::EpochMillis(ms.trunc() as i64)
                    }
                    _ => Self::Unrecognized(value.to_string()),
                }
            }
            Value::Object(fields) => {
                if let Some(seconds) = fields.get("seconds").and_then(Value::as_i64) {
                    let nanos = fields
                        .get("nanoseconds")
                        .or_else(|| fields.get("nanos"))
                        .and_then(Value::as_u64)
                        .and_then(|n| u32::try_from(n).ok())
                        .unwrap_or(0);
                    return Self::Seconds { seconds, nanos };
                }
                if let Some(seconds) = fields.get("_seconds").and_then(Value::as_i64) {
                    let nanoseconds = fields
                        .get("_nanoseconds")
                        .and_then(Value::as_u64)
                        .and_then(|n| u32::try_from(n).ok())
                        .unwrap_or(0);
                    return Self::UnderscoreSeconds {
                        seconds,
                        nanoseconds,
                    };
                }
                Self::Unrecognized(value.to_string())
            }
            Value::String(text) => Self::Iso8601(text.clone()),
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Returns whether the encoding is one the normalizer understands.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl From<i64> for RawTimestamp {
    fn from(value: i64) -> Self {
        Self::EpochMillis(value)
    }
}

/// Converts a raw timestamp to epoch milliseconds; `None` means UNKNOWN.
pub fn normalize(raw: &RawTimestamp) -> Option<i64> {
    match raw {
        RawTimestamp::EpochMillis(ms) => Some(*ms),
        RawTimestamp::Seconds { seconds, nanos } => seconds_to_millis(*seconds, *nanos),
        RawTimestamp::UnderscoreSeconds {
            seconds,
            nanoseconds,
        } => seconds_to_millis(*seconds, *nanoseconds),
        RawTimestamp::Convertible(source) => source.to_millis(),
        RawTimestamp::Iso8601(text) => DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|parsed| parsed.timestamp_millis()),
        RawTimestamp::Unrecognized(_) => None,
    }
}

fn seconds_to_millis(seconds: i64, nanos: u32) -> Option<i64> {
    seconds
        .checked_mul(1000)?
        .checked_add(i64::from(nanos / 1_000_000))
}

/// Returns the calendar day of `ms` in a fixed UTC offset.
///
/// Returns `None` for out-of-range timestamps or offsets.
pub fn local_day(ms: i64, utc_offset_minutes: i32) -> Option<NaiveDate> {
    let offset = FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?;
    let instant = DateTime::from_timestamp_millis(ms)?;
    Some(instant.with_timezone(&offset).date_naive())
}

/// Returns epoch milliseconds of local midnight of `day` plus `minutes`.
pub fn local_day_offset_ms(day: NaiveDate, minutes: u32, utc_offset_minutes: i32) -> Option<i64> {
    let midnight = day.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis();
    let offset_ms = i64::from(utc_offset_minutes) * 60_000;
    midnight
        .checked_sub(offset_ms)?
        .checked_add(i64::from(minutes) * 60_000)
}

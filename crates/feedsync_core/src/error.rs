//! Shared error and degradation types.
//!
//! # Responsibility
//! - Describe failures reported by remote collaborators (`StoreError`).
//! - Describe non-fatal degradations the engine absorbs (`FeedIssue`).
//!
//! # Invariants
//! - A `FeedIssue` never aborts an operation; it is logged and surfaced on
//!   results as a passive indicator.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure returned by the remote document or profile store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Network or backend failure; retry on the next trigger.
    Unavailable(String),
    /// The call did not finish within the configured fetch timeout.
    Timeout(Duration),
    /// The backend returned a record the engine cannot decode.
    InvalidRecord { record_id: String, message: String },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
            Self::Timeout(limit) => write!(f, "store call timed out after {}ms", limit.as_millis()),
            Self::InvalidRecord { record_id, message } => {
                write!(f, "invalid record `{record_id}`: {message}")
            }
        }
    }
}

impl Error for StoreError {}

/// Non-fatal degradation absorbed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedIssue {
    /// One partition failed to load; it contributed zero items.
    TransientFetch {
        partition_id: String,
        message: String,
    },
    /// No remote profile exists; the placeholder name was used.
    ProfileNotFound { identity: String },
    /// A record timestamp had an unrecognized encoding; it sorts last.
    MalformedTimestamp { record_id: String },
    /// The same ID arrived twice across merged pages; the later copy was dropped.
    CacheConsistency { duplicate_id: String },
}

impl FeedIssue {
    /// Stable machine-readable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransientFetch { .. } => "transient_fetch",
            Self::ProfileNotFound { .. } => "profile_not_found",
            Self::MalformedTimestamp { .. } => "malformed_timestamp",
            Self::CacheConsistency { .. } => "cache_consistency",
        }
    }
}

impl Display for FeedIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientFetch {
                partition_id,
                message,
            } => write!(f, "partition `{partition_id}` failed to load: {message}"),
            Self::ProfileNotFound { identity } => write!(f, "profile not found: {identity}"),
            Self::MalformedTimestamp { record_id } => {
                write!(f, "record `{record_id}` has an unrecognized timestamp")
            }
            Self::CacheConsistency { duplicate_id } => {
                write!(f, "duplicate item id dropped: {duplicate_id}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FeedIssue, StoreError};
    use std::time::Duration;

    #[test]
    fn timeout_message_reports_limit() {
        let err = StoreError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "store call timed out after 250ms");
    }

    #[test]
    fn issue_codes_are_stable() {
        let issue = FeedIssue::CacheConsistency {
            duplicate_id: "p1".to_string(),
        };
        assert_eq!(issue.code(), "cache_consistency");
        assert!(issue.to_string().contains("p1"));
    }
}

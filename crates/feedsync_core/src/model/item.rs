//! Timeline item model.
//!
//! # Responsibility
//! - Define `Post`, `MeetingSummary` and `Alert` plus the `TimelineItem` union.
//! - Provide the total timeline order used by merge, pagination and search.
//!
//! # Invariants
//! - `timestamp_ms == None` means the source timestamp was not recognized.
//! - Alerts never carry an author.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Discriminant of a timeline item, ordered by tie-break precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Post,
    MeetingSummary,
    Alert,
}

impl ItemKind {
    /// Lower rank wins a timestamp tie.
    pub fn rank(self) -> u8 {
        match self {
            Self::Post => 0,
            Self::MeetingSummary => 1,
            Self::Alert => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::MeetingSummary => "meeting_summary",
            Self::Alert => "alert",
        }
    }
}

/// Short note attached to a post by any authorized member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memo {
    pub author_id: String,
    pub text: String,
    pub created_at_ms: Option<i64>,
}

/// Member-authored report in one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub partition_id: String,
    pub message: String,
    /// Kept as authored, e.g. `#safety`.
    pub tags: Vec<String>,
    pub photo_refs: Vec<String>,
    /// Identity -> free-form status label.
    pub status_by_user: BTreeMap<String, String>,
    /// Identity -> epoch milliseconds of the read receipt.
    pub read_by: BTreeMap<String, i64>,
    pub memos: Vec<Memo>,
    pub timestamp_ms: Option<i64>,
}

/// Lifecycle of an externally produced meeting summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Draft,
    Published,
}

/// Finished meeting summary produced outside the engine. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingSummary {
    pub id: String,
    /// `None` while the summary is not yet assigned to a work group.
    pub partition_id: Option<String>,
    pub title: String,
    pub created_at_ms: Option<i64>,
    pub status: SummaryStatus,
}

/// Category of a computed alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A roster member has not posted on `day`.
    MissingSubmission,
}

/// System-computed item; has no author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub partition_id: String,
    /// Identity the alert is about.
    pub subject_id: String,
    pub kind: AlertKind,
    pub day: NaiveDate,
    pub timestamp_ms: i64,
}

/// Unit of feed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineItem {
    Post(Post),
    Alert(Alert),
    MeetingSummary(MeetingSummary),
}

impl TimelineItem {
    pub fn id(&self) -> &str {
        match self {
            Self::Post(post) => &post.id,
            Self::Alert(alert) => &alert.id,
            Self::MeetingSummary(summary) => &summary.id,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Post(_) => ItemKind::Post,
            Self::Alert(_) => ItemKind::Alert,
            Self::MeetingSummary(_) => ItemKind::MeetingSummary,
        }
    }

    pub fn partition_id(&self) -> Option<&str> {
        match self {
            Self::Post(post) => Some(&post.partition_id),
            Self::Alert(alert) => Some(&alert.partition_id),
            Self::MeetingSummary(summary) => summary.partition_id.as_deref(),
        }
    }

    /// Normalized time; `None` is UNKNOWN.
    pub fn timestamp_ms(&self) -> Option<i64> {
        match self {
            Self::Post(post) => post.timestamp_ms,
            Self::Alert(alert) => Some(alert.timestamp_ms),
            Self::MeetingSummary(summary) => summary.created_at_ms,
        }
    }

    pub fn author_id(&self) -> Option<&str> {
        match self {
            Self::Post(post) => Some(&post.author_id),
            Self::Alert(_) | Self::MeetingSummary(_) => None,
        }
    }

    /// Identities whose display names the feed needs to render this item.
    pub fn referenced_identities(&self) -> Vec<&str> {
        match self {
            Self::Post(post) => {
                let mut ids = vec![post.author_id.as_str()];
                ids.extend(post.memos.iter().map(|memo| memo.author_id.as_str()));
                ids
            }
            Self::Alert(alert) => vec![alert.subject_id.as_str()],
            Self::MeetingSummary(_) => Vec::new(),
        }
    }

    /// Compares two items by timeline order (newest first).
    pub fn timeline_cmp(&self, other: &Self) -> Ordering {
        compare_order(
            (self.timestamp_ms(), self.kind(), self.id()),
            (other.timestamp_ms(), other.kind(), other.id()),
        )
    }
}

/// Total timeline order over `(timestamp, kind, id)` triples.
///
/// Known timestamps descend, unknown timestamps sort after all known ones,
/// ties fall back to kind rank and then ascending ID.
pub fn compare_order(
    left: (Option<i64>, ItemKind, &str),
    right: (Option<i64>, ItemKind, &str),
) -> Ordering {
    let by_time = match (left.0, right.0) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time
        .then_with(|| left.1.rank().cmp(&right.1.rank()))
        .then_with(|| left.2.cmp(right.2))
}

#[cfg(test)]
mod tests {
    use super::{compare_order, ItemKind};
    use std::cmp::Ordering;

    #[test]
    fn newer_items_sort_first() {
        assert_eq!(
            compare_order((Some(2), ItemKind::Alert, "a"), (Some(1), ItemKind::Post, "b")),
            Ordering::Less
        );
    }

    #[test]
    fn unknown_time_sorts_last() {
        assert_eq!(
            compare_order((None, ItemKind::Post, "a"), (Some(0), ItemKind::Alert, "z")),
            Ordering::Greater
        );
    }

    #[test]
    fn ties_break_by_kind_then_id() {
        assert_eq!(
            compare_order(
                (Some(5), ItemKind::MeetingSummary, "a"),
                (Some(5), ItemKind::Post, "z")
            ),
            Ordering::Greater
        );
        assert_eq!(
            compare_order((Some(5), ItemKind::Post, "a"), (Some(5), ItemKind::Post, "b")),
            Ordering::Less
        );
    }
}

//! Remote record shape and decoding.
//!
//! # Responsibility
//! - Represent a store document as opaque JSON plus the few fields the
//!   engine reads directly (`id`, timestamp, author).
//! - Decode documents into `TimelineItem`s.
//!
//! # Invariants
//! - Decoding never fails on a bad timestamp; the item keeps `None` time and
//!   the caller receives a `MalformedTimestamp` issue.
//! - A post without an author is rejected as an invalid record.

use crate::error::{FeedIssue, StoreError};
use crate::model::cursor::RecordRef;
use crate::model::item::{ItemKind, MeetingSummary, Memo, Post, SummaryStatus, TimelineItem};
use crate::timestamp::{normalize, RawTimestamp};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Collection a record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Post,
    MeetingSummary,
}

impl RecordKind {
    pub fn item_kind(self) -> ItemKind {
        match self {
            Self::Post => ItemKind::Post,
            Self::MeetingSummary => ItemKind::MeetingSummary,
        }
    }
}

/// Store document as seen by the engine.
#[derive(Debug, Clone)]
pub struct RemoteRecord {
    pub id: String,
    pub partition_id: Option<String>,
    pub kind: RecordKind,
    pub timestamp: RawTimestamp,
    pub author_id: Option<String>,
    /// Remaining document fields, interpreted per `kind`.
    pub body: Value,
}

/// Outcome of decoding one record.
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    pub item: TimelineItem,
    pub issue: Option<FeedIssue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PostBody {
    message: String,
    tags: Vec<String>,
    photo_refs: Vec<String>,
    status_by_user: BTreeMap<String, String>,
    read_by: BTreeMap<String, Value>,
    memos: Vec<MemoBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MemoBody {
    author_id: String,
    text: String,
    created_at: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SummaryBody {
    title: String,
    status: Option<String>,
}

impl RemoteRecord {
    /// Normalized record time; `None` is UNKNOWN.
    pub fn timestamp_ms(&self) -> Option<i64> {
        normalize(&self.timestamp)
    }

    /// Timeline position of this record.
    pub fn record_ref(&self) -> RecordRef {
        RecordRef {
            id: self.id.clone(),
            kind: self.kind.item_kind(),
            timestamp_ms: self.timestamp_ms(),
        }
    }

    /// Decodes this record into a timeline item.
    ///
    /// `queried_partition` fills in a missing partition on posts, which are
    /// always read through a partition-scoped query.
    ///
    /// # Errors
    /// - `StoreError::InvalidRecord` when a post has no author or the body
    ///   does not match the expected shape.
    pub fn decode(&self, queried_partition: &str) -> Result<DecodedRecord, StoreError> {
        let timestamp_ms = self.timestamp_ms();
        let issue = timestamp_ms.is_none().then(|| FeedIssue::MalformedTimestamp {
            record_id: self.id.clone(),
        });

        let item = match self.kind {
            RecordKind::Post => TimelineItem::Post(self.decode_post(queried_partition, timestamp_ms)?),
            RecordKind::MeetingSummary => {
                TimelineItem::MeetingSummary(self.decode_summary(timestamp_ms)?)
            }
        };

        Ok(DecodedRecord { item, issue })
    }

    fn decode_post(&self, queried_partition: &str, timestamp_ms: Option<i64>) -> Result<Post, StoreError> {
        let author_id = self
            .author_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| self.invalid("post has no author"))?;
        let body: PostBody = self.parse_body()?;

        let read_by = body
            .read_by
            .iter()
            .filter_map(|(identity, raw)| {
                normalize(&RawTimestamp::from_json(raw)).map(|ms| (identity.clone(), ms))
            })
            .collect();
        let memos = body
            .memos
            .into_iter()
            .map(|memo| Memo {
                author_id: memo.author_id,
                text: memo.text,
                created_at_ms: memo
                    .created_at
                    .as_ref()
                    .and_then(|raw| normalize(&RawTimestamp::from_json(raw))),
            })
            .collect();

        Ok(Post {
            id: self.id.clone(),
            author_id: author_id.to_string(),
            partition_id: self
                .partition_id
                .clone()
                .unwrap_or_else(|| queried_partition.to_string()),
            message: body.message,
            tags: body.tags,
            photo_refs: body.photo_refs,
            status_by_user: body.status_by_user,
            read_by,
            memos,
            timestamp_ms,
        })
    }

    fn decode_summary(&self, timestamp_ms: Option<i64>) -> Result<MeetingSummary, StoreError> {
        let body: SummaryBody = self.parse_body()?;
        Ok(MeetingSummary {
            id: self.id.clone(),
            partition_id: self.partition_id.clone(),
            title: body.title,
            created_at_ms: timestamp_ms,
            status: parse_summary_status(body.status.as_deref()),
        })
    }

    fn parse_body<T: DeserializeOwned + Default>(&self) -> Result<T, StoreError> {
        if self.body.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.body.clone()).map_err(|err| self.invalid(&err.to_string()))
    }

    fn invalid(&self, message: &str) -> StoreError {
        StoreError::InvalidRecord {
            record_id: self.id.clone(),
            message: message.to_string(),
        }
    }
}

/// Records written before the status field existed count as published.
fn parse_summary_status(value: Option<&str>) -> SummaryStatus {
    match value.map(str::trim) {
        None | Some("published") => SummaryStatus::Published,
        Some(_) => SummaryStatus::Draft,
    }
}

#[cfg(test)]
mod tests {
    use super::{RecordKind, RemoteRecord};
    use crate::error::{FeedIssue, StoreError};
    use crate::model::item::{SummaryStatus, TimelineItem};
    use crate::timestamp::RawTimestamp;
    use serde_json::json;

    fn post_record(body: serde_json::Value) -> RemoteRecord {
        RemoteRecord {
            id: "p1".to_string(),
            partition_id: None,
            kind: RecordKind::Post,
            timestamp: RawTimestamp::from_json(&json!({"_seconds": 100})),
            author_id: Some("alice".to_string()),
            body,
        }
    }

    #[test]
    fn decodes_post_body_and_normalizes_nested_times() {
        let record = post_record(json!({
            "message": "routine check",
            "tags": ["#safety"],
            "readBy": {"bob": {"seconds": 200}, "eve": "garbage"},
            "memos": [{"authorId": "bob", "text": "ok", "createdAt": 300000}]
        }));
        let decoded = record.decode("g1").unwrap();
        assert!(decoded.issue.is_none());
        let TimelineItem::Post(post) = decoded.item else {
            panic!("expected post");
        };
        assert_eq!(post.partition_id, "g1");
        assert_eq!(post.timestamp_ms, Some(100_000));
        assert_eq!(post.read_by.get("bob"), Some(&200_000));
        assert!(!post.read_by.contains_key("eve"));
        assert_eq!(post.memos[0].created_at_ms, Some(300_000));
    }

    #[test]
    fn malformed_timestamp_keeps_item_and_reports_issue() {
        let mut record = post_record(json!({"message": "x"}));
        record.timestamp = RawTimestamp::from_json(&json!({"when": "now"}));
        let decoded = record.decode("g1").unwrap();
        assert_eq!(decoded.item.timestamp_ms(), None);
        assert!(matches!(
            decoded.issue,
            Some(FeedIssue::MalformedTimestamp { .. })
        ));
    }

    #[test]
    fn post_without_author_is_invalid() {
        let mut record = post_record(json!({}));
        record.author_id = Some("  ".to_string());
        let err = record.decode("g1").unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { .. }));
    }

    #[test]
    fn summary_status_defaults_to_published() {
        let record = RemoteRecord {
            id: "m1".to_string(),
            partition_id: None,
            kind: RecordKind::MeetingSummary,
            timestamp: RawTimestamp::EpochMillis(5),
            author_id: None,
            body: json!({"title": "weekly sync"}),
        };
        let TimelineItem::MeetingSummary(summary) = record.decode("g1").unwrap().item else {
            panic!("expected summary");
        };
        assert_eq!(summary.status, SummaryStatus::Published);
        assert_eq!(summary.partition_id, None);
    }
}

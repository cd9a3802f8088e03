//! Resumable pagination cursor.
//!
//! # Responsibility
//! - Remember, per partition, the last record handed to the caller.
//! - Carry the global `has_more` flag between page requests.
//!
//! # Invariants
//! - `last_consumed` only moves forward in timeline order, so resuming never
//!   returns an already consumed record.

use crate::model::item::{compare_order, ItemKind, TimelineItem};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Position of one record in timeline order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub id: String,
    pub kind: ItemKind,
    pub timestamp_ms: Option<i64>,
}

impl RecordRef {
    pub fn of(item: &TimelineItem) -> Self {
        Self {
            id: item.id().to_string(),
            kind: item.kind(),
            timestamp_ms: item.timestamp_ms(),
        }
    }

    /// Timeline comparison against another position.
    pub fn order_cmp(&self, other: &Self) -> Ordering {
        compare_order(
            (self.timestamp_ms, self.kind, self.id.as_str()),
            (other.timestamp_ms, other.kind, other.id.as_str()),
        )
    }

    /// Returns whether `item` is positioned strictly after this reference.
    pub fn precedes(&self, item: &TimelineItem) -> bool {
        compare_order(
            (self.timestamp_ms, self.kind, self.id.as_str()),
            (item.timestamp_ms(), item.kind(), item.id()),
        ) == Ordering::Less
    }
}

/// Per-partition resume state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionCursor {
    /// Last record of this partition already returned to the caller.
    pub last_consumed: Option<RecordRef>,
    /// Store reported no records beyond `last_consumed`.
    pub exhausted: bool,
}

/// Opaque per-session resumption token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationCursor {
    pub(crate) partitions: BTreeMap<String, PartitionCursor>,
    pub(crate) has_more: bool,
}

impl PaginationCursor {
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn partition(&self, partition_id: &str) -> Option<&PartitionCursor> {
        self.partitions.get(partition_id)
    }

    /// Partitions the cursor currently tracks.
    pub fn partition_ids(&self) -> impl Iterator<Item = &str> {
        self.partitions.keys().map(String::as_str)
    }
}

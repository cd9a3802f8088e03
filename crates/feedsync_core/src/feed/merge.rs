//! Merge and dedupe of timeline sequences.
//!
//! # Responsibility
//! - Combine already-held items with newly fetched items into one
//!   timeline-ordered, ID-unique sequence.
//!
//! # Invariants
//! - Idempotent: `merge(merge(a, b), b) == merge(a, b)`.
//! - The first occurrence of an ID wins; `existing` is scanned before
//!   `incoming`.
//! - Output is sorted by `model::item::compare_order`.

use crate::error::FeedIssue;
use crate::model::item::TimelineItem;
use log::{debug, warn};
use std::collections::HashSet;

/// Merge result plus the duplicates that were dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Merged {
    pub items: Vec<TimelineItem>,
    /// One `CacheConsistency` issue per dropped duplicate.
    pub issues: Vec<FeedIssue>,
}

/// Merges `incoming` into `existing`.
pub fn merge(existing: &[TimelineItem], incoming: &[TimelineItem]) -> Merged {
    let mut seen = HashSet::with_capacity(existing.len() + incoming.len());
    let mut items = Vec::with_capacity(existing.len() + incoming.len());
    let mut issues = Vec::new();

    for item in existing.iter().chain(incoming) {
        if seen.insert(item.id().to_string()) {
            items.push(item.clone());
        } else {
            debug!(
                "event=merge_duplicate module=feed status=dropped item_id={} kind={}",
                item.id(),
                item.kind().as_str()
            );
            issues.push(FeedIssue::CacheConsistency {
                duplicate_id: item.id().to_string(),
            });
        }
    }
    items.sort_by(TimelineItem::timeline_cmp);

    if !issues.is_empty() {
        warn!(
            "event=merge_dedupe module=feed status=deduped duplicates={} items={}",
            issues.len(),
            items.len()
        );
    }

    Merged { items, issues }
}

/// Returns whether `items` is ID-unique and in timeline order.
pub fn is_timeline_ordered(items: &[TimelineItem]) -> bool {
    let mut seen = HashSet::with_capacity(items.len());
    items.iter().all(|item| seen.insert(item.id()))
        && items
            .windows(2)
            .all(|pair| pair[0].timeline_cmp(&pair[1]).is_lt())
}

#[cfg(test)]
mod tests {
    use super::{is_timeline_ordered, merge};
    use crate::error::FeedIssue;
    use crate::model::item::{Alert, AlertKind, MeetingSummary, Post, SummaryStatus, TimelineItem};
    use chrono::NaiveDate;

    fn post(id: &str, ms: Option<i64>) -> TimelineItem {
        TimelineItem::Post(Post {
            id: id.to_string(),
            author_id: "alice".to_string(),
            partition_id: "g1".to_string(),
            message: String::new(),
            tags: Vec::new(),
            photo_refs: Vec::new(),
            status_by_user: Default::default(),
            read_by: Default::default(),
            memos: Vec::new(),
            timestamp_ms: ms,
        })
    }

    fn summary(id: &str, ms: i64) -> TimelineItem {
        TimelineItem::MeetingSummary(MeetingSummary {
            id: id.to_string(),
            partition_id: Some("g1".to_string()),
            title: "sync".to_string(),
            created_at_ms: Some(ms),
            status: SummaryStatus::Published,
        })
    }

    fn alert(id: &str, ms: i64) -> TimelineItem {
        TimelineItem::Alert(Alert {
            id: id.to_string(),
            partition_id: "g1".to_string(),
            subject_id: "bob".to_string(),
            kind: AlertKind::MissingSubmission,
            day: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            timestamp_ms: ms,
        })
    }

    fn ids(items: &[TimelineItem]) -> Vec<&str> {
        items.iter().map(TimelineItem::id).collect()
    }

    #[test]
    fn merge_is_idempotent() {
        let a = vec![post("p1", Some(10)), post("p2", Some(5))];
        let b = vec![post("p3", Some(7)), post("p1", Some(10)), alert("a1", 7)];
        let once = merge(&a, &b);
        let twice = merge(&once.items, &b);
        assert_eq!(once.items, twice.items);
        assert!(is_timeline_ordered(&twice.items));
    }

    #[test]
    fn first_occurrence_wins_and_duplicate_is_reported() {
        let mut newer = post("p1", Some(10));
        if let TimelineItem::Post(inner) = &mut newer {
            inner.message = "edited".to_string();
        }
        let merged = merge(&[post("p1", Some(10))], &[newer]);
        assert_eq!(merged.items.len(), 1);
        let TimelineItem::Post(kept) = &merged.items[0] else {
            panic!("expected post");
        };
        assert!(kept.message.is_empty());
        assert_eq!(
            merged.issues,
            vec![FeedIssue::CacheConsistency {
                duplicate_id: "p1".to_string()
            }]
        );
    }

    #[test]
    fn ties_prefer_post_then_summary_then_alert() {
        let merged = merge(
            &[alert("a", 5), summary("m", 5)],
            &[post("z", Some(5)), post("b", Some(5))],
        );
        assert_eq!(ids(&merged.items), vec!["b", "z", "m", "a"]);
    }

    #[test]
    fn unknown_timestamps_sort_last() {
        let merged = merge(&[post("u", None)], &[post("k", Some(1))]);
        assert_eq!(ids(&merged.items), vec!["k", "u"]);
    }
}

//! Filter composition and ranking.

use crate::model::item::TimelineItem;
use crate::search::scoring::{parse_keywords, score};
use crate::timestamp::local_day;
use chrono::NaiveDate;
use log::debug;
use std::collections::{BTreeMap, HashMap};

/// Inclusive calendar-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Builds a range, swapping bounds given in reverse order.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

/// Active search filters; all of them compose with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilter {
    /// Normalized keywords, see `parse_keywords`.
    pub keywords: Vec<String>,
    pub date_range: Option<DateRange>,
    pub partition_id: Option<String>,
}

impl FeedFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.keywords = parse_keywords(query);
        self
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn with_partition(mut self, partition_id: impl Into<String>) -> Self {
        self.partition_id = Some(partition_id.into());
        self
    }

    pub fn is_active(&self) -> bool {
        !self.keywords.is_empty() || self.date_range.is_some() || self.partition_id.is_some()
    }
}

/// Lookup tables a search needs besides the items.
#[derive(Debug, Clone, Copy)]
pub struct SearchContext<'a> {
    /// Identity -> display name.
    pub names: &'a HashMap<String, String>,
    /// Partition ID -> partition display name.
    pub partition_names: &'a BTreeMap<String, String>,
    pub utc_offset_minutes: i32,
}

impl<'a> SearchContext<'a> {
    pub fn new(
        names: &'a HashMap<String, String>,
        partition_names: &'a BTreeMap<String, String>,
        utc_offset_minutes: i32,
    ) -> Self {
        Self {
            names,
            partition_names,
            utc_offset_minutes,
        }
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub item: TimelineItem,
    /// 0 when no keywords were given.
    pub score: u32,
}

/// Filters and ranks `items`.
///
/// With keywords, hits are sorted by score descending and then by timeline
/// order; without keywords they keep timeline order.
pub fn search(items: &[TimelineItem], filter: &FeedFilter, ctx: &SearchContext<'_>) -> Vec<SearchHit> {
    let mut hits = items
        .iter()
        .filter(|item| {
            filter
                .partition_id
                .as_deref()
                .map_or(true, |partition| item.partition_id() == Some(partition))
        })
        .filter(|item| {
            filter.date_range.map_or(true, |range| {
                item.timestamp_ms()
                    .and_then(|ms| local_day(ms, ctx.utc_offset_minutes))
                    .is_some_and(|day| range.contains(day))
            })
        })
        .filter_map(|item| {
            if filter.keywords.is_empty() {
                return Some(SearchHit {
                    item: item.clone(),
                    score: 0,
                });
            }
            let score = score(item, &filter.keywords, ctx);
            (score > 0).then(|| SearchHit {
                item: item.clone(),
                score,
            })
        })
        .collect::<Vec<_>>();

    hits.sort_by(|left, right| {
        right
            .score
            .cmp(&left.score)
            .then_with(|| left.item.timeline_cmp(&right.item))
    });

    debug!(
        "event=search module=search status=ok keywords={} date_filter={} partition_filter={} candidates={} hits={}",
        filter.keywords.len(),
        filter.date_range.is_some(),
        filter.partition_id.is_some(),
        items.len(),
        hits.len()
    );
    hits
}

#[cfg(test)]
mod tests {
    use super::{search, DateRange, FeedFilter, SearchContext};
    use crate::model::item::{Post, TimelineItem};
    use chrono::NaiveDate;
    use std::collections::{BTreeMap, HashMap};

    // 2024-05-01T00:00:00Z
    const DAY_START_MS: i64 = 1_714_521_600_000;
    const DAY_MS: i64 = 86_400_000;

    fn post(id: &str, partition: &str, message: &str, ms: Option<i64>) -> TimelineItem {
        TimelineItem::Post(Post {
            id: id.to_string(),
            author_id: "u1".to_string(),
            partition_id: partition.to_string(),
            message: message.to_string(),
            tags: Vec::new(),
            photo_refs: Vec::new(),
            status_by_user: BTreeMap::new(),
            read_by: BTreeMap::new(),
            memos: Vec::new(),
            timestamp_ms: ms,
        })
    }

    fn ids(hits: &[super::SearchHit]) -> Vec<&str> {
        hits.iter().map(|hit| hit.item.id()).collect()
    }

    #[test]
    fn higher_score_wins_then_recency() {
        let names = HashMap::new();
        let partitions = BTreeMap::new();
        let ctx = SearchContext::new(&names, &partitions, 0);
        let items = vec![
            post("new", "g1", "a pump check", Some(30)),
            post("old", "g1", "pump failure", Some(10)),
            post("mid", "g1", "pump ok", Some(20)),
        ];
        let hits = search(&items, &FeedFilter::new().with_query("pump"), &ctx);
        assert_eq!(ids(&hits), vec!["mid", "old", "new"]);
    }

    #[test]
    fn date_and_partition_filters_compose() {
        let names = HashMap::new();
        let partitions = BTreeMap::new();
        let ctx = SearchContext::new(&names, &partitions, 0);
        let items = vec![
            post("in", "g1", "x", Some(DAY_START_MS + DAY_MS - 1)),
            post("late", "g1", "x", Some(DAY_START_MS + DAY_MS)),
            post("other", "g2", "x", Some(DAY_START_MS)),
            post("unknown", "g1", "x", None),
        ];
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let filter = FeedFilter::new()
            .with_date_range(DateRange::new(day, day))
            .with_partition("g1");
        assert_eq!(ids(&search(&items, &filter, &ctx)), vec!["in"]);
    }

    #[test]
    fn blank_query_keeps_timeline_order() {
        let names = HashMap::new();
        let partitions = BTreeMap::new();
        let ctx = SearchContext::new(&names, &partitions, 0);
        let items = vec![post("b", "g1", "", Some(1)), post("a", "g1", "", Some(2))];
        let hits = search(&items, &FeedFilter::new().with_query("   "), &ctx);
        assert_eq!(ids(&hits), vec!["a", "b"]);
        assert!(hits.iter().all(|hit| hit.score == 0));
        assert!(!FeedFilter::new().with_query(" ").is_active());
    }
}

use chrono::NaiveDate;
use feedsync_core::{
    parse_keywords, score, search, DateRange, FeedFilter, MeetingSummary, Post, SearchContext,
    SummaryStatus, TimelineItem,
};
use std::collections::{BTreeMap, HashMap};

// 2024-05-01T00:00:00Z
const DAY_START_MS: i64 = 1_714_521_600_000;
const HOUR_MS: i64 = 3_600_000;

fn post(id: &str, tags: &[&str], message: &str, ms: Option<i64>) -> TimelineItem {
    TimelineItem::Post(Post {
        id: id.to_string(),
        author_id: "u1".to_string(),
        partition_id: "g1".to_string(),
        message: message.to_string(),
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        photo_refs: Vec::new(),
        status_by_user: BTreeMap::new(),
        read_by: BTreeMap::new(),
        memos: Vec::new(),
        timestamp_ms: ms,
    })
}

#[test]
fn keywords_combine_with_and_semantics() {
    let names = HashMap::new();
    let partitions = BTreeMap::new();
    let ctx = SearchContext::new(&names, &partitions, 0);
    let item = post("p1", &["#safety"], "routine check", Some(1));

    assert!(score(&item, &parse_keywords("safety check"), &ctx) > 0);
    assert_eq!(score(&item, &parse_keywords("safety missing"), &ctx), 0);
}

#[test]
fn exact_tag_outranks_message_mentions() {
    let names = HashMap::new();
    let partitions = BTreeMap::new();
    let ctx = SearchContext::new(&names, &partitions, 0);
    let items = vec![
        post("mention", &[], "safety walk done", Some(3)),
        post("tagged", &["#Safety"], "walk", Some(1)),
    ];

    let hits = search(&items, &FeedFilter::new().with_query("#safety"), &ctx);
    let ids: Vec<_> = hits.iter().map(|hit| hit.item.id()).collect();
    assert_eq!(ids, vec!["tagged", "mention"]);
    assert!(hits[0].score > hits[1].score);
}

#[test]
fn date_filter_uses_local_day_and_skips_unknown_times() {
    let names = HashMap::new();
    let partitions = BTreeMap::new();
    // UTC+9: 2024-04-30T16:00Z is already 2024-05-01 locally.
    let ctx = SearchContext::new(&names, &partitions, 9 * 60);
    let items = vec![
        post("local-may", &[], "x", Some(DAY_START_MS - 8 * HOUR_MS)),
        post("local-april", &[], "x", Some(DAY_START_MS - 10 * HOUR_MS)),
        post("unknown", &[], "x", None),
        TimelineItem::MeetingSummary(MeetingSummary {
            id: "m1".to_string(),
            partition_id: None,
            title: "x".to_string(),
            created_at_ms: Some(DAY_START_MS),
            status: SummaryStatus::Published,
        }),
    ];
    let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

    let hits = search(
        &items,
        &FeedFilter::new().with_date_range(DateRange::new(day, day)),
        &ctx,
    );
    let ids: Vec<_> = hits.iter().map(|hit| hit.item.id()).collect();
    assert_eq!(ids, vec!["m1", "local-may"]);
}

#[test]
fn no_match_is_an_empty_result() {
    let names = HashMap::new();
    let partitions = BTreeMap::new();
    let ctx = SearchContext::new(&names, &partitions, 0);
    let items = vec![post("p1", &[], "hello", Some(1))];
    assert!(search(&items, &FeedFilter::new().with_query("absent"), &ctx).is_empty());
}

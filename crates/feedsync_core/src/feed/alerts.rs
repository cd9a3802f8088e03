//! Computed "missing submission" alerts.
//!
//! # Responsibility
//! - Derive one alert per roster member who has not posted on the current
//!   local day once the daily deadline has passed.
//!
//! # Invariants
//! - Alert IDs are deterministic per `(partition, member, day)`, so
//!   recomputing alerts and merging them dedupes.
//! - Alerts are timestamped at the deadline, never in the future.
//! - A partition contributes alerts only once every post it holds for the
//!   day is loaded; a failed or lagging partition contributes none.

use crate::config::FeedConfig;
use crate::model::cursor::PaginationCursor;
use crate::model::item::{Alert, AlertKind, TimelineItem};
use crate::timestamp::{local_day, local_day_offset_ms};
use chrono::NaiveDate;
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Builds the stable ID of a missing-submission alert.
pub fn missing_submission_id(partition_id: &str, member_id: &str, day: NaiveDate) -> String {
    format!(
        "alert:missing:{partition_id}:{member_id}:{}",
        day.format("%Y-%m-%d")
    )
}

/// Computes missing-submission alerts for the local day containing `now_ms`.
///
/// `rosters` maps partition ID to the identities expected to post there.
/// `items` is scanned for posts only.
pub fn compute_missing_submission_alerts(
    rosters: &BTreeMap<String, Vec<String>>,
    items: &[TimelineItem],
    now_ms: i64,
    config: &FeedConfig,
) -> Vec<TimelineItem> {
    if !config.missing_submission_alerts {
        return Vec::new();
    }
    let offset = config.utc_offset_minutes;
    let Some(day) = local_day(now_ms, offset) else {
        return Vec::new();
    };
    let Some(deadline_ms) = local_day_offset_ms(day, config.alert_deadline_minutes, offset) else {
        return Vec::new();
    };
    if now_ms < deadline_ms {
        return Vec::new();
    }

    let submitted: HashSet<(&str, &str)> = items
        .iter()
        .filter_map(|item| match item {
            TimelineItem::Post(post) => post
                .timestamp_ms
                .and_then(|ms| local_day(ms, offset))
                .filter(|post_day| *post_day == day)
                .map(|_| (post.partition_id.as_str(), post.author_id.as_str())),
            _ => None,
        })
        .collect();

    let mut alerts = Vec::new();
    for (partition_id, members) in rosters {
        let mut seen = HashSet::new();
        for member_id in members {
            if !seen.insert(member_id.as_str())
                || submitted.contains(&(partition_id.as_str(), member_id.as_str()))
            {
                continue;
            }
            alerts.push(TimelineItem::Alert(Alert {
                id: missing_submission_id(partition_id, member_id, day),
                partition_id: partition_id.clone(),
                subject_id: member_id.clone(),
                kind: AlertKind::MissingSubmission,
                day,
                timestamp_ms: deadline_ms,
            }));
        }
    }

    debug!(
        "event=alerts_compute module=feed status=ok partitions={} alerts={}",
        rosters.len(),
        alerts.len()
    );
    alerts
}

/// Partitions whose posts for the local day containing `now_ms` are all
/// loaded after a page load.
///
/// `cursor` is the cursor after the load, `page` the items it emitted and
/// `failed` the partitions that reported a fetch failure during it. A
/// partition qualifies when it is exhausted, when its own cursor already
/// reached local midnight, or when it did not fail and the page reached
/// local midnight. Pages stay in timeline order across healthy partitions,
/// so the last case covers everything they hold for the day.
pub fn partitions_loaded_through_day(
    cursor: &PaginationCursor,
    page: &[TimelineItem],
    failed: &HashSet<&str>,
    now_ms: i64,
    utc_offset_minutes: i32,
) -> BTreeSet<String> {
    let Some(day_start_ms) = local_day(now_ms, utc_offset_minutes)
        .and_then(|day| local_day_offset_ms(day, 0, utc_offset_minutes))
    else {
        return BTreeSet::new();
    };
    // Unknown times sort after every known time.
    let before_day = |ms: Option<i64>| ms.map_or(true, |ms| ms < day_start_ms);
    let page_reached_day_start = page
        .iter()
        .filter(|item| !matches!(item, TimelineItem::Alert(_)))
        .any(|item| before_day(item.timestamp_ms()));

    cursor
        .partition_ids()
        .filter(|partition_id| {
            let Some(partition) = cursor.partition(partition_id) else {
                return false;
            };
            partition.exhausted
                || partition
                    .last_consumed
                    .as_ref()
                    .is_some_and(|last| before_day(last.timestamp_ms))
                || (page_reached_day_start && !failed.contains(partition_id))
        })
        .map(str::to_string)
        .collect()
}

/// IDs of alerts in `items` whose member has a post for the alerted day in
/// the same partition.
pub fn settled_alert_ids(items: &[TimelineItem], utc_offset_minutes: i32) -> HashSet<String> {
    let posted: HashSet<(&str, &str, NaiveDate)> = items
        .iter()
        .filter_map(|item| match item {
            TimelineItem::Post(post) => post
                .timestamp_ms
                .and_then(|ms| local_day(ms, utc_offset_minutes))
                .map(|day| (post.partition_id.as_str(), post.author_id.as_str(), day)),
            _ => None,
        })
        .collect();
    items
        .iter()
        .filter_map(|item| match item {
            TimelineItem::Alert(alert)
                if posted.contains(&(
                    alert.partition_id.as_str(),
                    alert.subject_id.as_str(),
                    alert.day,
                )) =>
            {
                Some(alert.id.clone())
            }
            _ => None,
        })
        .collect()
}

//! Multi-partition paginated loader.
//!
//! # Responsibility
//! - Query every authorized partition with bounded fan-out and per-fetch
//!   timeouts, decode records, and assemble one timeline-ordered page.
//! - Produce a cursor that resumes each partition after its last consumed
//!   record.
//!
//! # Invariants
//! - A record is emitted only when it is ordered at or before the fetch
//!   frontier of every open partition, so concatenated pages stay in
//!   timeline order.
//! - A failing partition contributes zero new items and keeps its previous
//!   cursor state; it never aborts the page.
//! - `has_more` is false only when every partition is exhausted.

use crate::config::FeedConfig;
use crate::error::{FeedIssue, StoreError, StoreResult};
use crate::logging::sanitize_for_log;
use crate::model::cursor::{PaginationCursor, PartitionCursor, RecordRef};
use crate::model::item::{SummaryStatus, TimelineItem};
use crate::store::{DocumentStore, PageQuery, StorePage};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

/// One page assembled from all partitions.
#[derive(Debug, Clone, Default)]
pub struct LoadedPage {
    pub items: Vec<TimelineItem>,
    pub next_cursor: PaginationCursor,
    pub has_more: bool,
    pub issues: Vec<FeedIssue>,
}

/// Fetch-time view of one partition while a page is assembled.
struct PartitionState {
    id: String,
    previous: PartitionCursor,
    fetch_after: Option<RecordRef>,
    store_exhausted: bool,
    failed: bool,
    buffered: usize,
    emitted: usize,
    consumed: Option<RecordRef>,
}

impl PartitionState {
    fn is_open(&self) -> bool {
        !self.store_exhausted && !self.failed
    }

    fn into_cursor(self) -> (String, PartitionCursor) {
        let exhausted = !self.failed && self.store_exhausted && self.emitted == self.buffered;
        let cursor = PartitionCursor {
            last_consumed: self.consumed.or(self.previous.last_consumed),
            exhausted,
        };
        (self.id, cursor)
    }
}

struct Candidate {
    partition: usize,
    item: TimelineItem,
    issue: Option<FeedIssue>,
}

/// Loads feed pages from a partitioned document store.
pub struct PaginatedLoader {
    store: Arc<dyn DocumentStore>,
    config: FeedConfig,
}

impl PaginatedLoader {
    pub fn new(store: Arc<dyn DocumentStore>, config: FeedConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Fetches the page following `cursor` (`None` starts at the newest).
    ///
    /// Never fails: partition errors are returned as `FeedIssue`s.
    pub async fn fetch_next_page(
        &self,
        partition_ids: &BTreeSet<String>,
        page_size: usize,
        cursor: Option<&PaginationCursor>,
    ) -> LoadedPage {
        if let Some(cursor) = cursor.filter(|cursor| !cursor.has_more()) {
            debug!("event=page_fetch module=loader status=skip reason=exhausted");
            return LoadedPage {
                next_cursor: cursor.clone(),
                ..LoadedPage::default()
            };
        }

        let page_size = page_size.max(1);
        let limit = self.config.per_partition_limit.min(page_size).max(1);
        info!(
            "event=page_fetch module=loader status=start partitions={} page_size={} resumed={}",
            partition_ids.len(),
            page_size,
            cursor.is_some()
        );

        let mut states = partition_ids
            .iter()
            .map(|id| {
                let previous = cursor
                    .and_then(|cursor| cursor.partition(id))
                    .cloned()
                    .unwrap_or_default();
                PartitionState {
                    id: id.clone(),
                    fetch_after: previous.last_consumed.clone(),
                    store_exhausted: previous.exhausted,
                    failed: false,
                    buffered: 0,
                    emitted: 0,
                    consumed: None,
                    previous,
                }
            })
            .collect::<Vec<_>>();

        let mut candidates = Vec::new();
        let mut issues = Vec::new();
        let mut pending = (0..states.len())
            .filter(|index| states[*index].is_open())
            .collect::<Vec<_>>();

        while !pending.is_empty() {
            self.fetch_round(&mut states, &pending, limit, &mut candidates, &mut issues)
                .await;
            candidates.sort_by(|left: &Candidate, right: &Candidate| {
                left.item.timeline_cmp(&right.item)
            });

            let Some(frontier) = binding_frontier(&states) else {
                break;
            };
            let ready = candidates
                .iter()
                .take_while(|candidate| !is_beyond(&candidate.item, &frontier))
                .count();
            if ready >= page_size {
                break;
            }
            pending = states
                .iter()
                .enumerate()
                .filter(|(_, state)| {
                    state.is_open()
                        && state
                            .fetch_after
                            .as_ref()
                            .is_some_and(|after| after.order_cmp(&frontier).is_eq())
                })
                .map(|(index, _)| index)
                .collect();
        }

        let frontier = binding_frontier(&states);
        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(page_size);
        for candidate in candidates {
            if items.len() >= page_size {
                break;
            }
            if frontier
                .as_ref()
                .is_some_and(|frontier| is_beyond(&candidate.item, frontier))
            {
                break;
            }
            let state = &mut states[candidate.partition];
            state.consumed = Some(RecordRef::of(&candidate.item));
            state.emitted += 1;
            if !seen.insert(candidate.item.id().to_string()) {
                issues.push(FeedIssue::CacheConsistency {
                    duplicate_id: candidate.item.id().to_string(),
                });
                continue;
            }
            issues.extend(candidate.issue);
            items.push(candidate.item);
        }

        let failed = states.iter().filter(|state| state.failed).count();
        let partitions = states
            .into_iter()
            .map(PartitionState::into_cursor)
            .collect::<BTreeMap<_, _>>();
        let has_more = partitions.values().any(|cursor| !cursor.exhausted);

        info!(
            "event=page_fetch module=loader status=ok items={} has_more={} failed_partitions={} issues={}",
            items.len(),
            has_more,
            failed,
            issues.len()
        );

        LoadedPage {
            items,
            next_cursor: PaginationCursor {
                partitions,
                has_more,
            },
            has_more,
            issues,
        }
    }

    async fn fetch_round(
        &self,
        states: &mut [PartitionState],
        pending: &[usize],
        limit: usize,
        candidates: &mut Vec<Candidate>,
        issues: &mut Vec<FeedIssue>,
    ) {
        let timeout = self.config.fetch_timeout();
        let queries = pending
            .iter()
            .map(|index| {
                let state = &states[*index];
                (
                    *index,
                    PageQuery {
                        partition_id: state.id.clone(),
                        after: state.fetch_after.clone(),
                        limit,
                    },
                )
            })
            .collect::<Vec<_>>();

        let results = stream::iter(queries)
            .map(|(index, query)| {
                let store = Arc::clone(&self.store);
                async move {
                    let result = match tokio::time::timeout(timeout, store.query_page(&query)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(StoreError::Timeout(timeout)),
                    };
                    (index, result)
                }
            })
            .buffer_unordered(self.config.max_concurrent_fetches.max(1))
            .collect::<Vec<(usize, StoreResult<StorePage>)>>()
            .await;

        for (index, result) in results {
            let state = &mut states[index];
            match result {
                Ok(page) => {
                    state.store_exhausted = page.is_exhausted();
                    if page.resume_token.is_some() {
                        state.fetch_after = page.resume_token;
                    }
                    for record in page.records {
                        let decoded = match record.decode(&state.id) {
                            Ok(decoded) => decoded,
                            Err(err) => {
                                warn!(
                                    "event=record_decode module=loader status=skip partition_id={} error={}",
                                    state.id,
                                    sanitize_for_log(&err.to_string())
                                );
                                continue;
                            }
                        };
                        if !self.config.include_draft_summaries && is_draft(&decoded.item) {
                            continue;
                        }
                        state.buffered += 1;
                        candidates.push(Candidate {
                            partition: index,
                            item: decoded.item,
                            issue: decoded.issue,
                        });
                    }
                }
                Err(err) => {
                    let message = sanitize_for_log(&err.to_string());
                    warn!(
                        "event=partition_fetch module=loader status=error partition_id={} error={}",
                        state.id, message
                    );
                    state.failed = true;
                    issues.push(FeedIssue::TransientFetch {
                        partition_id: state.id.clone(),
                        message,
                    });
                }
            }
        }
    }
}

/// Earliest-ordered fetch position among open partitions.
fn binding_frontier(states: &[PartitionState]) -> Option<RecordRef> {
    states
        .iter()
        .filter(|state| state.is_open())
        .filter_map(|state| state.fetch_after.as_ref())
        .min_by(|left, right| left.order_cmp(right))
        .cloned()
}

fn is_beyond(item: &TimelineItem, frontier: &RecordRef) -> bool {
    frontier.precedes(item)
}

fn is_draft(item: &TimelineItem) -> bool {
    matches!(item, TimelineItem::MeetingSummary(summary) if summary.status == SummaryStatus::Draft)
}

#[cfg(test)]
mod tests {
    use super::PaginatedLoader;
    use crate::config::FeedConfig;
    use crate::error::FeedIssue;
    use crate::model::record::{RecordKind, RemoteRecord};
    use crate::store::memory::MemoryDocumentStore;
    use crate::timestamp::RawTimestamp;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn post(id: &str, partition: &str, ms: i64) -> RemoteRecord {
        RemoteRecord {
            id: id.to_string(),
            partition_id: Some(partition.to_string()),
            kind: RecordKind::Post,
            timestamp: RawTimestamp::EpochMillis(ms),
            author_id: Some("alice".to_string()),
            body: json!({"message": id}),
        }
    }

    fn partitions(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn small_partition_limit_still_yields_ordered_pages() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .insert_all([
                post("a1", "a", 100),
                post("a2", "a", 99),
                post("a3", "a", 98),
                post("b1", "b", 50),
            ])
            .unwrap();
        let config = FeedConfig {
            per_partition_limit: 1,
            ..FeedConfig::default()
        };
        let loader = PaginatedLoader::new(store, config);

        let page = loader.fetch_next_page(&partitions(&["a", "b"]), 3, None).await;
        let ids: Vec<_> = page.items.iter().map(|item| item.id()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a3"]);
        assert!(page.has_more);

        let last = loader
            .fetch_next_page(&partitions(&["a", "b"]), 3, Some(&page.next_cursor))
            .await;
        let ids: Vec<_> = last.items.iter().map(|item| item.id()).collect();
        assert_eq!(ids, vec!["b1"]);
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn failing_partition_is_isolated() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .insert_all([post("a1", "a", 10), post("b1", "b", 20)])
            .unwrap();
        store.fail_partition("b").unwrap();
        let loader = PaginatedLoader::new(store.clone(), FeedConfig::default());

        let page = loader.fetch_next_page(&partitions(&["a", "b"]), 5, None).await;
        assert_eq!(page.items.len(), 1);
        assert!(page.has_more);
        assert!(page
            .issues
            .iter()
            .any(|issue| matches!(issue, FeedIssue::TransientFetch { partition_id, .. } if partition_id == "b")));

        store.restore_partition("b").unwrap();
        let retry = loader
            .fetch_next_page(&partitions(&["a", "b"]), 5, Some(&page.next_cursor))
            .await;
        let ids: Vec<_> = retry.items.iter().map(|item| item.id()).collect();
        assert_eq!(ids, vec!["b1"]);
        assert!(!retry.has_more);
    }

    #[tokio::test]
    async fn exhausted_cursor_short_circuits() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.insert(post("a1", "a", 10)).unwrap();
        let loader = PaginatedLoader::new(store.clone(), FeedConfig::default());
        let page = loader.fetch_next_page(&partitions(&["a"]), 5, None).await;
        assert!(!page.has_more);
        let calls = store.page_calls();

        let again = loader
            .fetch_next_page(&partitions(&["a"]), 5, Some(&page.next_cursor))
            .await;
        assert!(again.items.is_empty());
        assert_eq!(store.page_calls(), calls);
    }

    #[tokio::test]
    async fn draft_summaries_are_skipped_by_default() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .insert(RemoteRecord {
                id: "m1".to_string(),
                partition_id: Some("a".to_string()),
                kind: RecordKind::MeetingSummary,
                timestamp: RawTimestamp::EpochMillis(5),
                author_id: None,
                body: json!({"title": "draft", "status": "draft"}),
            })
            .unwrap();
        let loader = PaginatedLoader::new(store.clone(), FeedConfig::default());
        let page = loader.fetch_next_page(&partitions(&["a"]), 5, None).await;
        assert!(page.items.is_empty());
        assert!(!page.has_more);

        let with_drafts = PaginatedLoader::new(
            store,
            FeedConfig {
                include_draft_summaries: true,
                ..FeedConfig::default()
            },
        );
        let page = with_drafts.fetch_next_page(&partitions(&["a"]), 5, None).await;
        assert_eq!(page.items.len(), 1);
    }
}

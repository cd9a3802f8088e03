//! Per-caller feed session.
//!
//! # Responsibility
//! - Run the feed data flow: cache lookup, paginated load, alert
//!   computation, merge, batch name resolution, cache write and
//!   high-water-mark update.
//! - Serialize page advances and discard results of superseded requests.
//!
//! # Invariants
//! - At most one page operation runs per session; overlapping calls return
//!   `PageOutcome::Busy` instead of waiting.
//! - A load started before `reset()` never writes its result.
//! - Remote failures degrade to the last cached snapshot; nothing here
//!   returns an error.

use crate::clock::Clock;
use crate::config::FeedConfig;
use crate::error::{FeedIssue, StoreError};
use crate::feed::alerts::{
    compute_missing_submission_alerts, partitions_loaded_through_day, settled_alert_ids,
};
use crate::feed::cache::{CacheEntry, CacheLookup, FeedCache, FeedKey, InvalidationReason};
use crate::feed::loader::{LoadedPage, PaginatedLoader};
use crate::feed::merge::merge;
use crate::kv::KeyValueStore;
use crate::logging::sanitize_for_log;
use crate::model::cursor::PaginationCursor;
use crate::model::item::TimelineItem;
use crate::names::DisplayNameResolver;
use crate::search::{search, FeedFilter, SearchContext, SearchHit};
use crate::store::{DocumentStore, ProfileStore};
use crate::sync::{HighWaterMarkStore, StalenessPoller};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Shared engine services for one caller identity.
#[derive(Clone)]
pub struct FeedServices {
    pub config: FeedConfig,
    pub clock: Arc<dyn Clock>,
    pub documents: Arc<dyn DocumentStore>,
    pub cache: Arc<FeedCache>,
    pub loader: Arc<PaginatedLoader>,
    pub names: Arc<DisplayNameResolver>,
    pub watermarks: Arc<HighWaterMarkStore>,
}

impl FeedServices {
    /// Wires the engine services over the given collaborators.
    pub fn new(
        config: FeedConfig,
        clock: Arc<dyn Clock>,
        documents: Arc<dyn DocumentStore>,
        profiles: Arc<dyn ProfileStore>,
        kv: Arc<dyn KeyValueStore>,
        identity: &str,
    ) -> Self {
        let cache = Arc::new(FeedCache::new(
            Arc::clone(&clock),
            Arc::clone(&kv),
            config.cache_ttl_ms,
            config.write_grace_ms,
        ));
        let loader = Arc::new(PaginatedLoader::new(Arc::clone(&documents), config.clone()));
        let names = Arc::new(DisplayNameResolver::new(
            profiles,
            Arc::clone(&kv),
            identity,
            &config,
        ));
        let watermarks = Arc::new(HighWaterMarkStore::new(kv));
        Self {
            config,
            clock,
            documents,
            cache,
            loader,
            names,
            watermarks,
        }
    }

    /// Builds a staleness poller sharing this caller's high-water-mark.
    pub fn poller(
        &self,
        identity: &str,
        partitions: impl IntoIterator<Item = String>,
    ) -> StalenessPoller {
        StalenessPoller::new(
            Arc::clone(&self.documents),
            Arc::clone(&self.watermarks),
            identity,
            partitions,
            &self.config,
        )
    }
}

/// Where a page's items came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    /// Fresh cache hit; no remote call was made.
    Cache,
    Remote,
    /// Remote load failed; the last snapshot is served as-is.
    Stale,
}

/// Feed state handed to the consumer after a page operation.
#[derive(Debug, Clone)]
pub struct FeedPage {
    /// Whole merged feed loaded so far.
    pub entry: Arc<CacheEntry>,
    /// Display names for every identity the items reference.
    pub names: BTreeMap<String, String>,
    pub has_more: bool,
    pub source: PageSource,
    /// Passive degradation indicators.
    pub issues: Vec<FeedIssue>,
}

impl FeedPage {
    pub fn items(&self) -> &[TimelineItem] {
        &self.entry.items
    }
}

/// Result of a guarded page operation.
#[derive(Debug, Clone)]
pub enum PageOutcome {
    Loaded(FeedPage),
    /// Another page operation of this session is in flight.
    Busy,
    /// `reset()` ran while this request was in flight; its result was dropped.
    Superseded,
}

impl PageOutcome {
    pub fn page(&self) -> Option<&FeedPage> {
        match self {
            Self::Loaded(page) => Some(page),
            Self::Busy | Self::Superseded => None,
        }
    }
}

/// Search hits plus the store-reported pagination state.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    pub has_more: bool,
}

/// Feed session of one caller over a fixed set of partitions.
pub struct FeedSession {
    session_id: String,
    identity: String,
    partition_names: BTreeMap<String, String>,
    partition_ids: BTreeSet<String>,
    key: FeedKey,
    services: FeedServices,
    page_lock: Mutex<()>,
    generation: AtomicU64,
}

impl FeedSession {
    /// `partitions` maps each authorized partition ID to its display name.
    pub fn new(
        identity: impl Into<String>,
        partitions: BTreeMap<String, String>,
        services: FeedServices,
    ) -> Self {
        let identity = identity.into();
        let partition_ids = partitions.keys().cloned().collect::<BTreeSet<_>>();
        let key = FeedKey::new(identity.clone(), partition_ids.iter().cloned());
        let session_id = Uuid::new_v4().to_string();
        info!(
            "event=session_open module=session status=ok session_id={} partitions={}",
            session_id,
            partition_ids.len()
        );
        Self {
            session_id,
            identity,
            partition_names: partitions,
            partition_ids,
            key,
            services,
            page_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn key(&self) -> &FeedKey {
        &self.key
    }

    /// Current request generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Returns the cached feed when fresh, otherwise loads the first page.
    pub async fn load_first_page(&self) -> PageOutcome {
        let Ok(_guard) = self.page_lock.try_lock() else {
            debug!(
                "event=load_first_page module=session status=busy session_id={}",
                self.session_id
            );
            return PageOutcome::Busy;
        };
        self.first_page_locked().await
    }

    /// Loads the page after the cached cursor and appends it to the feed.
    pub async fn load_next_page(&self) -> PageOutcome {
        let Ok(_guard) = self.page_lock.try_lock() else {
            debug!(
                "event=load_next_page module=session status=busy session_id={}",
                self.session_id
            );
            return PageOutcome::Busy;
        };

        let Some(entry) = self.services.cache.peek(&self.key).await else {
            return self.first_page_locked().await;
        };
        if !entry.cursor.has_more() {
            let names = self.names_from_cache(&entry.items).await;
            return PageOutcome::Loaded(FeedPage {
                has_more: false,
                entry,
                names,
                source: PageSource::Cache,
                issues: Vec::new(),
            });
        }

        let generation = self.generation();
        let page = self
            .services
            .loader
            .fetch_next_page(
                &self.partition_ids,
                self.services.config.page_size,
                Some(&entry.cursor),
            )
            .await;
        if self.all_partitions_failed(&page) {
            return self.serve_stale(entry, page.issues).await;
        }

        let LoadedPage {
            items: page_items,
            next_cursor,
            has_more,
            mut issues,
        } = page;
        let mut loaded = entry.items.clone();
        loaded.extend(page_items.iter().cloned());
        let settled = settled_alert_ids(&loaded, self.services.config.utc_offset_minutes);
        let known = entry
            .items
            .iter()
            .map(TimelineItem::id)
            .collect::<HashSet<_>>();
        let alerts = self
            .missing_submission_alerts(&loaded, &page_items, &next_cursor, &issues)
            .await;
        let mut incoming = page_items;
        incoming.extend(
            alerts
                .into_iter()
                .filter(|alert| !known.contains(alert.id())),
        );

        let names = self.services.names.resolve_batch(&referenced(&incoming)).await;
        if self.generation() != generation {
            return self.superseded("load_next_page");
        }
        let (entry, merge_issues) = self
            .services
            .cache
            .append(&self.key, &incoming, &settled, next_cursor)
            .await;
        if self.generation() != generation {
            self.services
                .cache
                .invalidate(&self.key, InvalidationReason::Explicit)
                .await;
            return self.superseded("load_next_page");
        }
        issues.extend(merge_issues);
        issues.extend(names.issues);
        self.advance_high_water_mark(&incoming);

        let mut all_names = self.names_from_cache(&entry.items).await;
        all_names.extend(names.names);
        info!(
            "event=load_next_page module=session status=ok session_id={} items={} has_more={} issues={}",
            self.session_id,
            entry.items.len(),
            has_more,
            issues.len()
        );
        PageOutcome::Loaded(FeedPage {
            entry,
            names: all_names,
            has_more,
            source: PageSource::Remote,
            issues,
        })
    }

    /// Drops the cached snapshot and reloads from the newest record.
    pub async fn refresh(&self) -> PageOutcome {
        let Ok(_guard) = self.page_lock.try_lock() else {
            return PageOutcome::Busy;
        };
        self.services
            .cache
            .invalidate(&self.key, InvalidationReason::Refresh)
            .await;
        self.first_page_locked().await
    }

    /// Opens the read-your-own-write window after the caller wrote a record.
    pub async fn record_local_write(&self) {
        self.services.cache.note_local_write(&self.key).await;
    }

    /// Supersedes in-flight requests and forces the next load to start over.
    pub async fn reset(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.services
            .cache
            .invalidate(&self.key, InvalidationReason::Explicit)
            .await;
        info!(
            "event=session_reset module=session status=ok session_id={} generation={}",
            self.session_id, generation
        );
    }

    /// Searches the loaded feed, including a stale snapshot.
    pub async fn search(&self, filter: &FeedFilter) -> SearchOutcome {
        let Some(entry) = self.services.cache.peek(&self.key).await else {
            return SearchOutcome::default();
        };
        let names = self
            .services
            .names
            .resolve_cached(&referenced(&entry.items))
            .await
            .into_iter()
            .collect::<HashMap<_, _>>();
        let ctx = SearchContext::new(
            &names,
            &self.partition_names,
            self.services.config.utc_offset_minutes,
        );
        SearchOutcome {
            hits: search(&entry.items, filter, &ctx),
            has_more: entry.cursor.has_more(),
        }
    }

    async fn first_page_locked(&self) -> PageOutcome {
        if let CacheLookup::Hit(entry) = self.services.cache.get(&self.key).await {
            let names = self.names_from_cache(&entry.items).await;
            self.advance_high_water_mark(&entry.items);
            return PageOutcome::Loaded(FeedPage {
                has_more: entry.cursor.has_more(),
                entry,
                names,
                source: PageSource::Cache,
                issues: Vec::new(),
            });
        }

        let generation = self.generation();
        let page = self
            .services
            .loader
            .fetch_next_page(&self.partition_ids, self.services.config.page_size, None)
            .await;
        if self.all_partitions_failed(&page) {
            if let Some(entry) = self.services.cache.peek(&self.key).await {
                return self.serve_stale(entry, page.issues).await;
            }
            // Nothing to fall back to; hand out an empty feed without caching it.
            let entry = Arc::new(CacheEntry {
                items: Vec::new(),
                cursor: page.next_cursor,
                fetched_at_ms: self.services.clock.now_ms(),
                ttl_ms: 0,
                invalidated: true,
            });
            return self.serve_stale(entry, page.issues).await;
        }

        let LoadedPage {
            items,
            next_cursor,
            has_more,
            mut issues,
        } = page;
        let alerts = self
            .missing_submission_alerts(&items, &items, &next_cursor, &issues)
            .await;
        let merged = merge(&items, &alerts);
        issues.extend(merged.issues);

        let names = self
            .services
            .names
            .resolve_batch(&referenced(&merged.items))
            .await;
        issues.extend(names.issues);
        if self.generation() != generation {
            return self.superseded("load_first_page");
        }

        let entry = self
            .services
            .cache
            .put(&self.key, merged.items, next_cursor)
            .await;
        if self.generation() != generation {
            self.services
                .cache
                .invalidate(&self.key, InvalidationReason::Explicit)
                .await;
            return self.superseded("load_first_page");
        }
        self.advance_high_water_mark(&entry.items);

        info!(
            "event=load_first_page module=session status=ok session_id={} items={} has_more={} issues={}",
            self.session_id,
            entry.items.len(),
            has_more,
            issues.len()
        );
        PageOutcome::Loaded(FeedPage {
            entry,
            names: names.names,
            has_more,
            source: PageSource::Remote,
            issues,
        })
    }

    async fn serve_stale(&self, entry: Arc<CacheEntry>, issues: Vec<FeedIssue>) -> PageOutcome {
        warn!(
            "event=serve_stale module=session status=degraded session_id={} items={} issues={}",
            self.session_id,
            entry.items.len(),
            issues.len()
        );
        let names = self.names_from_cache(&entry.items).await;
        PageOutcome::Loaded(FeedPage {
            has_more: entry.cursor.has_more(),
            entry,
            names,
            source: PageSource::Stale,
            issues,
        })
    }

    fn superseded(&self, operation: &str) -> PageOutcome {
        info!(
            "event={} module=session status=superseded session_id={}",
            operation, self.session_id
        );
        PageOutcome::Superseded
    }

    fn all_partitions_failed(&self, page: &LoadedPage) -> bool {
        if self.partition_ids.is_empty() || !page.items.is_empty() {
            return false;
        }
        let failed = page
            .issues
            .iter()
            .filter(|issue| matches!(issue, FeedIssue::TransientFetch { .. }))
            .count();
        failed == self.partition_ids.len()
    }

    /// Alerts for partitions whose posts of the day are all in `loaded`.
    ///
    /// `page` and `cursor` describe the load that just finished; partitions
    /// it reported as failed contribute no alerts.
    async fn missing_submission_alerts(
        &self,
        loaded: &[TimelineItem],
        page: &[TimelineItem],
        cursor: &PaginationCursor,
        issues: &[FeedIssue],
    ) -> Vec<TimelineItem> {
        let config = &self.services.config;
        if !config.missing_submission_alerts {
            return Vec::new();
        }
        let now_ms = self.services.clock.now_ms();
        let failed = issues
            .iter()
            .filter_map(|issue| match issue {
                FeedIssue::TransientFetch { partition_id, .. } => Some(partition_id.as_str()),
                _ => None,
            })
            .collect::<HashSet<_>>();
        let ready =
            partitions_loaded_through_day(cursor, page, &failed, now_ms, config.utc_offset_minutes);
        if ready.is_empty() {
            return Vec::new();
        }
        let rosters = self.fetch_rosters(&ready).await;
        compute_missing_submission_alerts(&rosters, loaded, now_ms, config)
    }

    async fn fetch_rosters(&self, partitions: &BTreeSet<String>) -> BTreeMap<String, Vec<String>> {
        let timeout = self.services.config.fetch_timeout();
        let documents = &self.services.documents;
        let results = stream::iter(partitions.iter().cloned())
            .map(|partition_id| async move {
                let members =
                    match tokio::time::timeout(timeout, documents.list_members(&partition_id)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(StoreError::Timeout(timeout)),
                    };
                (partition_id, members)
            })
            .buffer_unordered(self.services.config.max_concurrent_fetches.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut rosters = BTreeMap::new();
        for (partition_id, members) in results {
            match members {
                Ok(members) => {
                    rosters.insert(partition_id, members);
                }
                Err(err) => warn!(
                    "event=roster_fetch module=session status=error partition_id={} error={}",
                    partition_id,
                    sanitize_for_log(&err.to_string())
                ),
            }
        }
        rosters
    }

    async fn names_from_cache(&self, items: &[TimelineItem]) -> BTreeMap<String, String> {
        self.services.names.resolve_cached(&referenced(items)).await
    }

    fn advance_high_water_mark(&self, items: &[TimelineItem]) {
        let newest = items
            .iter()
            .filter(|item| !matches!(item, TimelineItem::Alert(_)))
            .filter_map(TimelineItem::timestamp_ms)
            .max();
        let Some(newest) = newest else {
            return;
        };
        if let Err(err) = self.services.watermarks.advance(&self.identity, newest) {
            warn!(
                "event=watermark_advance module=session status=error session_id={} error={}",
                self.session_id,
                sanitize_for_log(&err.to_string())
            );
        }
    }
}

fn referenced(items: &[TimelineItem]) -> BTreeSet<String> {
    items
        .iter()
        .flat_map(TimelineItem::referenced_identities)
        .map(str::to_string)
        .collect()
}

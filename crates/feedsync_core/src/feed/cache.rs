//! Process-wide feed cache.
//!
//! # Responsibility
//! - Hold the last merged feed snapshot per `(identity, partitions)` key
//!   with a time-to-live.
//! - Apply invalidation triggers: explicit invalidation, local-write grace
//!   windows and the persisted `forceRefresh` flag.
//!
//! # Invariants
//! - Entries are immutable `Arc` snapshots replaced wholesale under one
//!   lock; readers observe the old or the new state, never a partial merge.
//! - A hit requires `now - fetched_at_ms < ttl_ms` and `!invalidated`.
//! - The `forceRefresh` flag is consumed exactly once, by the next lookup.
//! - A grace window is dropped by the first lookup after it ends.

use crate::clock::Clock;
use crate::error::FeedIssue;
use crate::feed::merge::merge;
use crate::kv::{keys, KeyValueStore};
use crate::logging::sanitize_for_log;
use crate::model::cursor::PaginationCursor;
use crate::model::item::TimelineItem;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cache key: caller identity plus the sorted set of authorized partitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedKey {
    identity: String,
    partitions: Vec<String>,
}

impl FeedKey {
    pub fn new<I, S>(identity: impl Into<String>, partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let partitions = partitions
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect();
        Self {
            identity: identity.into(),
            partitions,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn partitions(&self) -> &[String] {
        &self.partitions
    }
}

/// Immutable cached feed snapshot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub items: Vec<TimelineItem>,
    /// Cursor positioned after the last loaded page.
    pub cursor: PaginationCursor,
    pub fetched_at_ms: i64,
    pub ttl_ms: i64,
    pub invalidated: bool,
}

impl CacheEntry {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        !self.invalidated && now_ms.saturating_sub(self.fetched_at_ms) < self.ttl_ms
    }
}

/// Why a lookup missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Absent,
    Expired,
    Invalidated,
    /// A local write happened within the grace window.
    GraceWindow,
    /// The persisted `forceRefresh` flag was consumed by this lookup.
    ForceRefresh,
}

impl MissReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Expired => "expired",
            Self::Invalidated => "invalidated",
            Self::GraceWindow => "grace_window",
            Self::ForceRefresh => "force_refresh",
        }
    }
}

/// Result of `FeedCache::get`.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(Arc<CacheEntry>),
    Miss(MissReason),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Trigger recorded with an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    LocalWrite,
    Refresh,
    ForceRefresh,
    Explicit,
}

impl InvalidationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalWrite => "local_write",
            Self::Refresh => "refresh",
            Self::ForceRefresh => "force_refresh",
            Self::Explicit => "explicit",
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<FeedKey, Arc<CacheEntry>>,
    grace_until_ms: HashMap<FeedKey, i64>,
}

/// Explicitly constructed, shareable feed cache.
pub struct FeedCache {
    state: RwLock<CacheState>,
    clock: Arc<dyn Clock>,
    kv: Arc<dyn KeyValueStore>,
    ttl_ms: i64,
    grace_ms: i64,
}

impl FeedCache {
    pub fn new(
        clock: Arc<dyn Clock>,
        kv: Arc<dyn KeyValueStore>,
        ttl_ms: i64,
        grace_ms: i64,
    ) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            clock,
            kv,
            ttl_ms,
            grace_ms,
        }
    }

    /// Looks up a fresh snapshot.
    pub async fn get(&self, key: &FeedKey) -> CacheLookup {
        let forced = self.consume_force_refresh().await;
        let now_ms = self.clock.now_ms();
        let mut state = self.state.write().await;
        let in_grace = match state.grace_until_ms.get(key).copied() {
            Some(until) if now_ms < until => true,
            Some(_) => {
                state.grace_until_ms.remove(key);
                false
            }
            None => false,
        };

        let lookup = if forced {
            CacheLookup::Miss(MissReason::ForceRefresh)
        } else if in_grace {
            CacheLookup::Miss(MissReason::GraceWindow)
        } else {
            match state.entries.get(key) {
                None => CacheLookup::Miss(MissReason::Absent),
                Some(entry) if entry.invalidated => CacheLookup::Miss(MissReason::Invalidated),
                Some(entry) if !entry.is_fresh(now_ms) => CacheLookup::Miss(MissReason::Expired),
                Some(entry) => CacheLookup::Hit(Arc::clone(entry)),
            }
        };

        match &lookup {
            CacheLookup::Hit(entry) => debug!(
                "event=cache_lookup module=cache status=hit identity={} items={}",
                key.identity,
                entry.items.len()
            ),
            CacheLookup::Miss(reason) => debug!(
                "event=cache_lookup module=cache status=miss identity={} reason={}",
                key.identity,
                reason.as_str()
            ),
        }
        lookup
    }

    /// Returns the stored snapshot regardless of freshness.
    ///
    /// Used to serve stale data while the remote store is unreachable.
    pub async fn peek(&self, key: &FeedKey) -> Option<Arc<CacheEntry>> {
        self.state.read().await.entries.get(key).cloned()
    }

    /// Replaces the snapshot for `key`.
    pub async fn put(
        &self,
        key: &FeedKey,
        items: Vec<TimelineItem>,
        cursor: PaginationCursor,
    ) -> Arc<CacheEntry> {
        let entry = Arc::new(CacheEntry {
            items,
            cursor,
            fetched_at_ms: self.clock.now_ms(),
            ttl_ms: self.ttl_ms,
            invalidated: false,
        });
        self.state
            .write()
            .await
            .entries
            .insert(key.clone(), Arc::clone(&entry));
        debug!(
            "event=cache_put module=cache status=ok identity={} items={}",
            key.identity,
            entry.items.len()
        );
        entry
    }

    /// Merges a further page into the snapshot for `key`, dropping cached
    /// items whose ID is in `retract`.
    ///
    /// The snapshot keeps its original `fetched_at_ms`; an absent entry is
    /// created as by `put`.
    pub async fn append(
        &self,
        key: &FeedKey,
        items: &[TimelineItem],
        retract: &HashSet<String>,
        cursor: PaginationCursor,
    ) -> (Arc<CacheEntry>, Vec<FeedIssue>) {
        let now_ms = self.clock.now_ms();
        let mut state = self.state.write().await;
        let (existing, fetched_at_ms, invalidated) = match state.entries.get(key) {
            Some(entry) => (
                entry
                    .items
                    .iter()
                    .filter(|item| !retract.contains(item.id()))
                    .cloned()
                    .collect::<Vec<_>>(),
                entry.fetched_at_ms,
                entry.invalidated,
            ),
            None => (Vec::new(), now_ms, false),
        };
        let incoming = items
            .iter()
            .filter(|item| !retract.contains(item.id()))
            .cloned()
            .collect::<Vec<_>>();
        let merged = merge(&existing, &incoming);
        let entry = Arc::new(CacheEntry {
            items: merged.items,
            cursor,
            fetched_at_ms,
            ttl_ms: self.ttl_ms,
            invalidated,
        });
        state.entries.insert(key.clone(), Arc::clone(&entry));
        debug!(
            "event=cache_append module=cache status=ok identity={} items={} duplicates={} retracted={}",
            key.identity,
            entry.items.len(),
            merged.issues.len(),
            retract.len()
        );
        (entry, merged.issues)
    }

    /// Marks the snapshot for `key` stale; its items stay readable via `peek`.
    pub async fn invalidate(&self, key: &FeedKey, reason: InvalidationReason) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.entries.get_mut(key) {
            *entry = Arc::new(stale_copy(entry));
        }
        info!(
            "event=cache_invalidate module=cache status=ok identity={} reason={}",
            key.identity,
            reason.as_str()
        );
    }

    pub async fn invalidate_all(&self, reason: InvalidationReason) {
        let mut state = self.state.write().await;
        let count = state.entries.len();
        for entry in state.entries.values_mut() {
            *entry = Arc::new(stale_copy(entry));
        }
        info!(
            "event=cache_invalidate_all module=cache status=ok entries={} reason={}",
            count,
            reason.as_str()
        );
    }

    /// Invalidates `key` and opens the read-your-own-write grace window.
    pub async fn note_local_write(&self, key: &FeedKey) {
        let until = self.clock.now_ms().saturating_add(self.grace_ms);
        self.state
            .write()
            .await
            .grace_until_ms
            .insert(key.clone(), until);
        self.invalidate(key, InvalidationReason::LocalWrite).await;
    }

    /// Drops every snapshot and grace window.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.grace_until_ms.clear();
        info!("event=cache_clear module=cache status=ok");
    }

    async fn consume_force_refresh(&self) -> bool {
        match self.kv.take(keys::FORCE_REFRESH) {
            Ok(Some(_)) => {
                self.invalidate_all(InvalidationReason::ForceRefresh).await;
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(
                    "event=force_refresh_read module=cache status=error error={}",
                    sanitize_for_log(&err.to_string())
                );
                false
            }
        }
    }
}

fn stale_copy(entry: &CacheEntry) -> CacheEntry {
    CacheEntry {
        invalidated: true,
        ..entry.clone()
    }
}

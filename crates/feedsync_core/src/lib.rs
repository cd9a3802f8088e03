//! Feed synchronization and caching engine.
//! Fetches, merges, caches and searches a multi-partition activity feed,
//! resolves author names in batches and detects new remote content.

pub mod clock;
pub mod config;
pub mod error;
pub mod feed;
pub mod kv;
pub mod logging;
pub mod model;
pub mod names;
pub mod search;
pub mod store;
pub mod sync;
pub mod timestamp;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, FeedConfig};
pub use error::{FeedIssue, StoreError, StoreResult};
pub use feed::{
    merge, CacheEntry, CacheLookup, FeedCache, FeedKey, FeedPage, FeedServices, FeedSession,
    InvalidationReason, LoadedPage, Merged, MissReason, PageOutcome, PageSource,
    PaginatedLoader, SearchOutcome,
};
pub use kv::{KeyValueStore, KvError, KvResult, MemoryKeyValueStore, SqliteKeyValueStore};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::cursor::{PaginationCursor, PartitionCursor, RecordRef};
pub use model::item::{
    Alert, AlertKind, ItemKind, MeetingSummary, Memo, Post, SummaryStatus, TimelineItem,
};
pub use model::record::{RecordKind, RemoteRecord};
pub use names::{DisplayNameResolver, NameResolution, NameSource};
pub use search::{parse_keywords, score, search, DateRange, FeedFilter, SearchContext, SearchHit};
pub use store::memory::{MemoryDocumentStore, MemoryProfileStore};
pub use store::{DocumentStore, PageQuery, Profile, ProfileStore, StorePage};
pub use sync::{HighWaterMarkStore, NewContentSignal, PollOutcome, StalenessPoller};
pub use timestamp::{normalize, RawTimestamp, ToMillis};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}

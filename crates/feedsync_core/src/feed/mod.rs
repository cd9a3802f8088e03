//! Feed assembly: loading, merging, caching and per-session orchestration.
//!
//! # Responsibility
//! - `loader` pages records out of every authorized partition.
//! - `merge` and `alerts` build the ID-unique timeline.
//! - `cache` keeps the last merged snapshot per caller.
//! - `session` drives the data flow for one caller and guards its cursor.

pub mod alerts;
pub mod cache;
pub mod loader;
pub mod merge;
pub mod session;

pub use cache::{CacheEntry, CacheLookup, FeedCache, FeedKey, InvalidationReason, MissReason};
pub use loader::{LoadedPage, PaginatedLoader};
pub use merge::{merge, Merged};
pub use session::{FeedPage, FeedServices, FeedSession, PageOutcome, PageSource, SearchOutcome};

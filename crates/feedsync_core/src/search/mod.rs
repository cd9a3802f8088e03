//! Keyword search and filtering over cached feed items.
//!
//! # Responsibility
//! - Score items against keywords with AND semantics and fixed field weights.
//! - Compose keyword, date-range and partition filters.
//!
//! # Invariants
//! - Search never fails; no match yields an empty result.
//! - Keywords are logged only as counts.

pub mod filter;
pub mod scoring;

pub use filter::{search, DateRange, FeedFilter, SearchContext, SearchHit};
pub use scoring::{parse_keywords, score};

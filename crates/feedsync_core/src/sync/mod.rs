//! Background staleness detection.
//!
//! # Responsibility
//! - Persist the per-identity high-water-mark.
//! - Poll for newer remote content and signal it without touching the feed
//!   cache.

pub mod poller;
pub mod watermark;

pub use poller::{NewContentSignal, PollOutcome, StalenessPoller};
pub use watermark::HighWaterMarkStore;

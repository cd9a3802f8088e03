//! Feed domain model.
//!
//! # Responsibility
//! - Define the timeline item union shown in the unified feed.
//! - Define the opaque remote record shape and its decoding into items.
//! - Define the resumable pagination cursor.
//!
//! # Invariants
//! - Within a merged sequence, item IDs are unique across all kinds.
//! - Timeline order is: known time descending, unknown time last, then
//!   `Post > MeetingSummary > Alert`, then ID ascending.

pub mod cursor;
pub mod item;
pub mod record;

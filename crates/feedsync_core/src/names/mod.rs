//! Display name resolution.
//!
//! # Responsibility
//! - Turn author identities into human-readable names for rendering and
//!   search, with a session-lifetime cache and batched remote lookups.

pub mod resolver;

pub use resolver::{DisplayNameResolver, NameResolution, NameSource};

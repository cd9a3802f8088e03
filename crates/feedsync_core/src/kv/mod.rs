//! Local persistent key-value storage.
//!
//! # Responsibility
//! - Define the small key-value contract the engine needs from local storage.
//! - Own the key naming scheme for engine-local state.
//!
//! # Invariants
//! - Per-identity keys are namespaced with the identity.
//! - `take` reads and removes a key in one step, so a presence flag is
//!   consumed exactly once.

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

pub mod schema;
mod sqlite;

pub use sqlite::SqliteKeyValueStore;

pub type KvResult<T> = Result<T, KvError>;

/// Local storage failure.
#[derive(Debug)]
pub enum KvError {
    Sqlite(rusqlite::Error),
    /// The file was written by a newer build.
    UnsupportedSchema { found: u32, supported: u32 },
    /// The file belongs to another application.
    ForeignFile { application_id: i32 },
    /// A previous holder of the storage lock panicked.
    Poisoned,
    /// Stored value could not be decoded.
    InvalidValue { key: String, message: String },
}

impl Display for KvError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchema { found, supported } => write!(
                f,
                "key-value schema version {found} is newer than supported {supported}"
            ),
            Self::ForeignFile { application_id } => write!(
                f,
                "not a key-value storage file (application_id={application_id:#x})"
            ),
            Self::Poisoned => write!(f, "local storage lock poisoned"),
            Self::InvalidValue { key, message } => {
                write!(f, "invalid value for `{key}`: {message}")
            }
        }
    }
}

impl Error for KvError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for KvError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Key names used by the engine.
pub mod keys {
    /// Presence-only flag set by other parts of the application after a write.
    pub const FORCE_REFRESH: &str = "forceRefresh";

    /// High-water-mark of the newest record shown to `identity`.
    pub fn last_viewed(identity: &str) -> String {
        format!("lastViewed:{identity}")
    }

    /// Last-known profile fields of the local caller.
    pub fn own_profile(identity: &str) -> String {
        format!("profile:{identity}")
    }
}

/// Synchronous local key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> KvResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> KvResult<()>;
    /// Returns whether the key existed.
    fn remove(&self, key: &str) -> KvResult<bool>;
    /// Reads and removes a key atomically.
    fn take(&self, key: &str) -> KvResult<Option<String>>;
}

/// Non-persistent key-value storage.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> KvResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| KvError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let mut entries = self.entries.lock().map_err(|_| KvError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> KvResult<bool> {
        let mut entries = self.entries.lock().map_err(|_| KvError::Poisoned)?;
        Ok(entries.remove(key).is_some())
    }

    fn take(&self, key: &str) -> KvResult<Option<String>> {
        let mut entries = self.entries.lock().map_err(|_| KvError::Poisoned)?;
        Ok(entries.remove(key))
    }
}

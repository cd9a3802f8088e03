//! Persisted high-water-mark per identity.
//!
//! # Responsibility
//! - Store the newest record time each identity has been shown under
//!   `lastViewed:<identity>`.
//!
//! # Invariants
//! - The stored value never moves backwards.

use crate::kv::{keys, KeyValueStore, KvError, KvResult};
use log::debug;
use std::sync::{Arc, Mutex};

/// High-water-mark store over local key-value storage.
pub struct HighWaterMarkStore {
    kv: Arc<dyn KeyValueStore>,
    write_guard: Mutex<()>,
}

impl HighWaterMarkStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_guard: Mutex::new(()),
        }
    }

    /// Returns the stored mark, `None` when never set.
    ///
    /// # Errors
    /// - `KvError::InvalidValue` when the stored text is not an integer.
    pub fn get(&self, identity: &str) -> KvResult<Option<i64>> {
        let key = keys::last_viewed(identity);
        match self.kv.get(&key)? {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|err| KvError::InvalidValue {
                    key,
                    message: err.to_string(),
                }),
        }
    }

    /// Raises the mark to `seen_ms` when it is newer; returns whether it moved.
    ///
    /// An unreadable stored value is overwritten.
    pub fn advance(&self, identity: &str, seen_ms: i64) -> KvResult<bool> {
        let _guard = self.write_guard.lock().map_err(|_| KvError::Poisoned)?;
        let current = match self.get(identity) {
            Ok(current) => current,
            Err(KvError::InvalidValue { .. }) => None,
            Err(err) => return Err(err),
        };
        if current.is_some_and(|mark| mark >= seen_ms) {
            return Ok(false);
        }
        self.kv
            .set(&keys::last_viewed(identity), &seen_ms.to_string())?;
        debug!(
            "event=watermark_advance module=sync status=ok identity={} previous={:?} current={}",
            identity, current, seen_ms
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::HighWaterMarkStore;
    use crate::kv::{keys, KeyValueStore, KvError, MemoryKeyValueStore};
    use std::sync::Arc;

    #[test]
    fn advance_is_monotonic() {
        let store = HighWaterMarkStore::new(Arc::new(MemoryKeyValueStore::new()));
        assert_eq!(store.get("alice").unwrap(), None);
        assert!(store.advance("alice", 100).unwrap());
        assert!(!store.advance("alice", 50).unwrap());
        assert!(!store.advance("alice", 100).unwrap());
        assert_eq!(store.get("alice").unwrap(), Some(100));
        assert_eq!(store.get("bob").unwrap(), None);
    }

    #[test]
    fn corrupt_value_is_reported_and_then_replaced() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(&keys::last_viewed("alice"), "soon").unwrap();
        let store = HighWaterMarkStore::new(kv);
        assert!(matches!(
            store.get("alice"),
            Err(KvError::InvalidValue { .. })
        ));
        assert!(store.advance("alice", 7).unwrap());
        assert_eq!(store.get("alice").unwrap(), Some(7));
    }
}

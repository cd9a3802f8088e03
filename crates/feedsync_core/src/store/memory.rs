//! In-process store implementations.
//!
//! # Responsibility
//! - Provide `DocumentStore` and `ProfileStore` backed by process memory for
//!   embedding, demos and tests.
//! - Expose call counters and failure injection to observe engine behavior.
//!
//! # Invariants
//! - Page ordering matches `model::item::compare_order`.

use crate::error::{StoreError, StoreResult};
use crate::model::record::RemoteRecord;
use crate::store::{DocumentStore, PageQuery, Profile, ProfileStore, StorePage};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Mutex, RwLock};

fn poisoned() -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".to_string())
}

fn record_order(left: &RemoteRecord, right: &RemoteRecord) -> Ordering {
    left.record_ref().order_cmp(&right.record_ref())
}

/// Memory-backed partitioned document store.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    records: RwLock<Vec<RemoteRecord>>,
    members: RwLock<HashMap<String, Vec<String>>>,
    failing: RwLock<HashSet<String>>,
    page_calls: AtomicUsize,
    latest_calls: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces (by ID) one record.
    pub fn insert(&self, record: RemoteRecord) -> StoreResult<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.retain(|existing| existing.id != record.id);
        records.push(record);
        Ok(())
    }

    pub fn insert_all(&self, records: impl IntoIterator<Item = RemoteRecord>) -> StoreResult<()> {
        for record in records {
            self.insert(record)?;
        }
        Ok(())
    }

    pub fn set_members(&self, partition_id: &str, members: Vec<String>) -> StoreResult<()> {
        self.members
            .write()
            .map_err(|_| poisoned())?
            .insert(partition_id.to_string(), members);
        Ok(())
    }

    /// Makes every call touching `partition_id` fail as unavailable.
    pub fn fail_partition(&self, partition_id: &str) -> StoreResult<()> {
        self.failing
            .write()
            .map_err(|_| poisoned())?
            .insert(partition_id.to_string());
        Ok(())
    }

    pub fn restore_partition(&self, partition_id: &str) -> StoreResult<()> {
        self.failing
            .write()
            .map_err(|_| poisoned())?
            .remove(partition_id);
        Ok(())
    }

    /// Number of `query_page` calls served so far.
    pub fn page_calls(&self) -> usize {
        self.page_calls.load(AtomicOrdering::SeqCst)
    }

    /// Number of `query_latest` calls served so far.
    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(AtomicOrdering::SeqCst)
    }

    fn ensure_available(&self, partition_id: &str) -> StoreResult<()> {
        if self
            .failing
            .read()
            .map_err(|_| poisoned())?
            .contains(partition_id)
        {
            return Err(StoreError::Unavailable(format!(
                "partition `{partition_id}` is unreachable"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn query_page(&self, query: &PageQuery) -> StoreResult<StorePage> {
        self.page_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.ensure_available(&query.partition_id)?;

        let mut matching = self
            .records
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .filter(|record| record.partition_id.as_deref() == Some(query.partition_id.as_str()))
            .filter(|record| {
                query.after.as_ref().map_or(true, |after| {
                    after.order_cmp(&record.record_ref()) == Ordering::Less
                })
            })
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(record_order);

        let has_more = matching.len() > query.limit;
        matching.truncate(query.limit);
        let resume_token = if has_more {
            matching.last().map(RemoteRecord::record_ref)
        } else {
            None
        };

        Ok(StorePage {
            records: matching,
            resume_token,
        })
    }

    async fn query_latest(&self, partition_ids: &[String]) -> StoreResult<Option<RemoteRecord>> {
        self.latest_calls.fetch_add(1, AtomicOrdering::SeqCst);
        for partition_id in partition_ids {
            self.ensure_available(partition_id)?;
        }

        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .iter()
            .filter(|record| {
                record
                    .partition_id
                    .as_ref()
                    .is_some_and(|id| partition_ids.contains(id))
            })
            .filter(|record| record.timestamp_ms().is_some())
            .min_by(|left, right| record_order(left, right))
            .cloned())
    }

    async fn list_members(&self, partition_id: &str) -> StoreResult<Vec<String>> {
        self.ensure_available(partition_id)?;
        Ok(self
            .members
            .read()
            .map_err(|_| poisoned())?
            .get(partition_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Memory-backed profile store that records every lookup.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, Profile>>,
    failing: RwLock<HashSet<String>>,
    lookups: Mutex<Vec<String>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: &str, profile: Profile) -> StoreResult<()> {
        self.profiles
            .write()
            .map_err(|_| poisoned())?
            .insert(identity.to_string(), profile);
        Ok(())
    }

    /// Makes lookups for `identity` fail as unavailable.
    pub fn fail_identity(&self, identity: &str) -> StoreResult<()> {
        self.failing
            .write()
            .map_err(|_| poisoned())?
            .insert(identity.to_string());
        Ok(())
    }

    /// Identities looked up so far, in call order.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.lock().map(|log| log.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get_profile(&self, identity: &str) -> StoreResult<Option<Profile>> {
        self.lookups
            .lock()
            .map_err(|_| poisoned())?
            .push(identity.to_string());

        if self.failing.read().map_err(|_| poisoned())?.contains(identity) {
            return Err(StoreError::Unavailable(format!(
                "profile `{identity}` is unreachable"
            )));
        }
        Ok(self
            .profiles
            .read()
            .map_err(|_| poisoned())?
            .get(identity)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryDocumentStore;
    use crate::model::record::{RecordKind, RemoteRecord};
    use crate::store::{DocumentStore, PageQuery};
    use crate::timestamp::RawTimestamp;
    use serde_json::json;

    fn post(id: &str, partition: &str, ms: i64) -> RemoteRecord {
        RemoteRecord {
            id: id.to_string(),
            partition_id: Some(partition.to_string()),
            kind: RecordKind::Post,
            timestamp: RawTimestamp::EpochMillis(ms),
            author_id: Some("alice".to_string()),
            body: json!({"message": id}),
        }
    }

    #[tokio::test]
    async fn query_page_resumes_after_reference() {
        let store = MemoryDocumentStore::new();
        store
            .insert_all([post("a", "g1", 3), post("b", "g1", 2), post("c", "g1", 1)])
            .unwrap();

        let first = store
            .query_page(&PageQuery {
                partition_id: "g1".to_string(),
                after: None,
                limit: 2,
            })
            .await
            .unwrap();
        let ids: Vec<_> = first.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!first.is_exhausted());

        let second = store
            .query_page(&PageQuery {
                partition_id: "g1".to_string(),
                after: first.resume_token.clone(),
                limit: 2,
            })
            .await
            .unwrap();
        assert_eq!(second.records.len(), 1);
        assert_eq!(second.records[0].id, "c");
        assert!(second.is_exhausted());
        assert_eq!(store.page_calls(), 2);
    }

    #[tokio::test]
    async fn query_latest_ignores_other_partitions() {
        let store = MemoryDocumentStore::new();
        store
            .insert_all([post("a", "g1", 3), post("b", "g2", 9)])
            .unwrap();
        let latest = store
            .query_latest(&["g1".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, "a");
    }
}

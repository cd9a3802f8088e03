//! Remote collaborator contracts.
//!
//! # Responsibility
//! - Define the async boundary to the partitioned document store and the
//!   profile store.
//! - Keep record shapes opaque beyond `id`, timestamp and author.
//!
//! # Invariants
//! - `query_page` returns records of one partition in timeline order,
//!   strictly after `PageQuery::after` when set.
//! - `StorePage::resume_token == None` means the partition is exhausted.

use crate::error::StoreResult;
use crate::model::cursor::RecordRef;
use crate::model::record::RemoteRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod memory;

/// One bounded, time-descending query against a single partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub partition_id: String,
    /// Resume strictly after this record; `None` starts at the newest.
    pub after: Option<RecordRef>,
    pub limit: usize,
}

/// Records returned by one partition query.
#[derive(Debug, Clone, Default)]
pub struct StorePage {
    pub records: Vec<RemoteRecord>,
    /// Position of the last returned record when more records may exist.
    pub resume_token: Option<RecordRef>,
}

impl StorePage {
    pub fn is_exhausted(&self) -> bool {
        self.resume_token.is_none()
    }
}

/// Partitioned document store holding posts and meeting summaries.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads one page of a partition in timeline order.
    async fn query_page(&self, query: &PageQuery) -> StoreResult<StorePage>;

    /// Returns the newest record with a known time across `partition_ids`.
    async fn query_latest(&self, partition_ids: &[String]) -> StoreResult<Option<RemoteRecord>>;

    /// Lists identities expected to submit posts in a partition.
    async fn list_members(&self, partition_id: &str) -> StoreResult<Vec<String>>;
}

/// Profile fields the engine can turn into a display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
}

impl Profile {
    /// Best human-readable name: display name, then username, then the
    /// local part of the email address.
    pub fn preferred_name(&self) -> Option<String> {
        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        };
        non_blank(&self.display_name)
            .or_else(|| non_blank(&self.username))
            .or_else(|| {
                non_blank(&self.email)
                    .and_then(|email| email.split('@').next().map(str::to_string))
                    .filter(|local| !local.is_empty())
            })
    }
}

/// Remote profile store.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Returns `Ok(None)` when no profile exists for `identity`.
    async fn get_profile(&self, identity: &str) -> StoreResult<Option<Profile>>;
}

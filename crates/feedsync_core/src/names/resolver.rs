//! Tiered display name resolver.
//!
//! # Responsibility
//! - Resolve identities through four tiers, first match wins: session
//!   cache, remote profile store, the caller's own persisted profile, and a
//!   placeholder.
//! - Answer cached reads with the same tiers, skipping the profile store.
//! - Batch lookups so only uncached identities reach the profile store.
//!
//! # Invariants
//! - Cached identities are never looked up again until `clear()`.
//! - Only names read from the remote profile store are cached; own-profile
//!   and placeholder names are recomputed so a later lookup can succeed.
//! - A failing lookup degrades that identity to a lower tier without failing
//!   the batch.

use crate::config::FeedConfig;
use crate::error::{FeedIssue, StoreError, StoreResult};
use crate::kv::{keys, KeyValueStore, KvError, KvResult};
use crate::logging::sanitize_for_log;
use crate::store::{Profile, ProfileStore};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Tier that produced a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameSource {
    SessionCache,
    RemoteProfile,
    OwnProfile,
    Placeholder,
}

/// Names for one batch plus the degradations hit while resolving it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameResolution {
    pub names: BTreeMap<String, String>,
    pub issues: Vec<FeedIssue>,
}

enum Lookup {
    Found(String),
    NotFound,
    Failed(StoreError),
}

/// Shared, explicitly constructed display name resolver.
pub struct DisplayNameResolver {
    profiles: Arc<dyn ProfileStore>,
    kv: Arc<dyn KeyValueStore>,
    own_identity: String,
    placeholder: String,
    concurrency: usize,
    timeout: std::time::Duration,
    cache: RwLock<HashMap<String, String>>,
}

impl DisplayNameResolver {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        kv: Arc<dyn KeyValueStore>,
        own_identity: impl Into<String>,
        config: &FeedConfig,
    ) -> Self {
        Self {
            profiles,
            kv,
            own_identity: own_identity.into(),
            placeholder: config.placeholder_name.clone(),
            concurrency: config.name_lookup_concurrency.max(1),
            timeout: config.fetch_timeout(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Resolves one identity.
    pub async fn resolve(&self, identity: &str) -> String {
        let resolution = self
            .resolve_batch(&BTreeSet::from([identity.to_string()]))
            .await;
        resolution
            .names
            .get(identity)
            .cloned()
            .unwrap_or_else(|| self.placeholder.clone())
    }

    /// Resolves every identity in `identities`.
    ///
    /// Issues one remote lookup per uncached identity and none for cached
    /// ones.
    pub async fn resolve_batch(&self, identities: &BTreeSet<String>) -> NameResolution {
        let mut resolution = NameResolution::default();
        let mut uncached = Vec::new();
        {
            let cache = self.cache.read().await;
            for identity in identities {
                match cache.get(identity) {
                    Some(name) => {
                        resolution.names.insert(identity.clone(), name.clone());
                    }
                    None => uncached.push(identity.clone()),
                }
            }
        }
        if uncached.is_empty() {
            debug!(
                "event=names_resolve module=names status=hit requested={}",
                identities.len()
            );
            return resolution;
        }

        let lookups = stream::iter(uncached)
            .map(|identity| async move {
                let lookup = self.lookup_remote(&identity).await;
                (identity, lookup)
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut fetched = Vec::new();
        let mut degraded = 0usize;
        for (identity, lookup) in lookups {
            let (name, source) = match lookup {
                Lookup::Found(name) => {
                    fetched.push((identity.clone(), name.clone()));
                    (name, NameSource::RemoteProfile)
                }
                Lookup::NotFound => {
                    resolution.issues.push(FeedIssue::ProfileNotFound {
                        identity: identity.clone(),
                    });
                    self.fallback_name(&identity)
                }
                Lookup::Failed(err) => {
                    warn!(
                        "event=profile_lookup module=names status=error identity={} error={}",
                        identity,
                        sanitize_for_log(&err.to_string())
                    );
                    self.fallback_name(&identity)
                }
            };
            if source != NameSource::RemoteProfile {
                degraded += 1;
            }
            resolution.names.insert(identity, name);
        }

        let fetched_count = fetched.len();
        if !fetched.is_empty() {
            let mut cache = self.cache.write().await;
            cache.extend(fetched);
        }
        info!(
            "event=names_resolve module=names status=ok requested={} fetched={} degraded={}",
            identities.len(),
            fetched_count,
            degraded
        );
        resolution
    }

    /// Names for `identities` without remote lookups.
    ///
    /// Applies the same tiers as `resolve_batch` minus the profile store, so
    /// cached reads agree with the names a remote load produced.
    pub async fn resolve_cached(&self, identities: &BTreeSet<String>) -> BTreeMap<String, String> {
        let cache = self.cache.read().await;
        identities
            .iter()
            .map(|identity| {
                let name = match cache.get(identity) {
                    Some(name) => name.clone(),
                    None => self.fallback_name(identity).0,
                };
                (identity.clone(), name)
            })
            .collect()
    }

    /// Persists the caller's own profile for offline name resolution.
    pub fn remember_own_profile(&self, profile: &Profile) -> KvResult<()> {
        let key = keys::own_profile(&self.own_identity);
        let encoded = serde_json::to_string(profile).map_err(|err| KvError::InvalidValue {
            key: key.clone(),
            message: err.to_string(),
        })?;
        self.kv.set(&key, &encoded)
    }

    /// Snapshot of the session name cache.
    pub async fn cached_names(&self) -> HashMap<String, String> {
        self.cache.read().await.clone()
    }

    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        let dropped = cache.len();
        cache.clear();
        info!(
            "event=names_clear module=names status=ok dropped={}",
            dropped
        );
    }

    async fn lookup_remote(&self, identity: &str) -> Lookup {
        let result: StoreResult<Option<Profile>> =
            match tokio::time::timeout(self.timeout, self.profiles.get_profile(identity)).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(self.timeout)),
            };
        match result {
            Ok(Some(profile)) => profile
                .preferred_name()
                .map_or(Lookup::NotFound, Lookup::Found),
            Ok(None) => Lookup::NotFound,
            Err(err) => Lookup::Failed(err),
        }
    }

    fn fallback_name(&self, identity: &str) -> (String, NameSource) {
        if identity == self.own_identity {
            if let Some(name) = self.own_profile_name() {
                return (name, NameSource::OwnProfile);
            }
        }
        (self.placeholder.clone(), NameSource::Placeholder)
    }

    fn own_profile_name(&self) -> Option<String> {
        let raw = match self.kv.get(&keys::own_profile(&self.own_identity)) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(
                    "event=own_profile_read module=names status=error error={}",
                    sanitize_for_log(&err.to_string())
                );
                return None;
            }
        };
        match serde_json::from_str::<Profile>(&raw) {
            Ok(profile) => profile.preferred_name(),
            Err(err) => {
                warn!(
                    "event=own_profile_decode module=names status=error error={}",
                    sanitize_for_log(&err.to_string())
                );
                None
            }
        }
    }
}

use feedsync_core::{
    DisplayNameResolver, FeedConfig, MemoryKeyValueStore, MemoryProfileStore, Profile,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn resolver(profiles: Arc<MemoryProfileStore>) -> DisplayNameResolver {
    DisplayNameResolver::new(
        profiles,
        Arc::new(MemoryKeyValueStore::new()),
        "me",
        &FeedConfig::default(),
    )
}

#[tokio::test]
async fn batch_only_looks_up_uncached_identities() {
    let profiles = Arc::new(MemoryProfileStore::new());
    profiles
        .insert(
            "a",
            Profile {
                display_name: Some("Aoi".to_string()),
                ..Profile::default()
            },
        )
        .unwrap();
    profiles
        .insert(
            "b",
            Profile {
                email: Some("bea@example.com".to_string()),
                ..Profile::default()
            },
        )
        .unwrap();
    let resolver = resolver(profiles.clone());
    assert_eq!(resolver.resolve("a").await, "Aoi");
    let before = profiles.lookup_count();

    let resolution = resolver
        .resolve_batch(&BTreeSet::from(["a".to_string(), "b".to_string()]))
        .await;

    assert_eq!(profiles.lookup_count() - before, 1);
    assert_eq!(profiles.lookups().last().map(String::as_str), Some("b"));
    assert_eq!(resolution.names["a"], "Aoi");
    assert_eq!(resolution.names["b"], "bea");
    assert!(resolution.issues.is_empty());
}

#[tokio::test]
async fn failing_lookup_degrades_without_failing_batch() {
    let profiles = Arc::new(MemoryProfileStore::new());
    profiles
        .insert(
            "ok",
            Profile {
                username: Some("okay".to_string()),
                ..Profile::default()
            },
        )
        .unwrap();
    profiles.fail_identity("down").unwrap();
    let resolver = resolver(profiles);

    let resolution = resolver
        .resolve_batch(&BTreeSet::from(["ok".to_string(), "down".to_string()]))
        .await;
    assert_eq!(resolution.names["ok"], "okay");
    assert_eq!(resolution.names["down"], "Unknown user");
    assert_eq!(resolver.cached_names().await.len(), 1);
}

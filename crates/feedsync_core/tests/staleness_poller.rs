use feedsync_core::{
    FeedConfig, HighWaterMarkStore, MemoryDocumentStore, MemoryKeyValueStore, PollOutcome,
    RawTimestamp, RecordKind, RemoteRecord, StalenessPoller,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;

const T0: i64 = 1_700_000_000_000;

fn post(id: &str, author: &str, ms: i64) -> RemoteRecord {
    RemoteRecord {
        id: id.to_string(),
        partition_id: Some("g1".to_string()),
        kind: RecordKind::Post,
        timestamp: RawTimestamp::EpochMillis(ms),
        author_id: Some(author.to_string()),
        body: Value::Null,
    }
}

fn setup(record: RemoteRecord) -> (Arc<StalenessPoller>, Arc<HighWaterMarkStore>) {
    let store = Arc::new(MemoryDocumentStore::new());
    store.insert(record).unwrap();
    let marks = Arc::new(HighWaterMarkStore::new(Arc::new(MemoryKeyValueStore::new())));
    marks.advance("me", T0).unwrap();
    let poller = StalenessPoller::new(
        store,
        marks.clone(),
        "me",
        vec!["g1".to_string()],
        &FeedConfig::default(),
    );
    (Arc::new(poller), marks)
}

#[tokio::test]
async fn own_record_advances_mark_without_signal() {
    let (poller, marks) = setup(post("mine", "me", T0 + 5_000));
    let mut receiver = poller.subscribe();

    assert_eq!(
        poller.poll_once().await,
        PollOutcome::SelfAuthored {
            mark_ms: T0 + 5_000
        }
    );
    assert_eq!(marks.get("me").unwrap(), Some(T0 + 5_000));
    assert!(matches!(receiver.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn foreign_record_raises_exactly_one_signal() {
    let (poller, marks) = setup(post("theirs", "other", T0 + 5_000));
    let mut receiver = poller.subscribe();

    assert!(matches!(poller.poll_once().await, PollOutcome::NewContent(_)));
    assert_eq!(poller.poll_once().await, PollOutcome::Pending);

    let signal = receiver.try_recv().unwrap();
    assert_eq!(signal.record_id, "theirs");
    assert_eq!(signal.high_water_mark_ms, T0);
    assert!(matches!(receiver.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(marks.get("me").unwrap(), Some(T0));
}

#[tokio::test]
async fn pending_signal_clears_once_mark_catches_up() {
    let (poller, marks) = setup(post("theirs", "other", T0 + 5_000));
    assert!(matches!(poller.poll_once().await, PollOutcome::NewContent(_)));

    marks.advance("me", T0 + 5_000).unwrap();
    assert_eq!(poller.poll_once().await, PollOutcome::UpToDate);
    assert!(poller.pending_signal().await.is_none());
}

#[tokio::test]
async fn failing_store_degrades_to_failed_outcome() {
    let store = Arc::new(MemoryDocumentStore::new());
    store.fail_partition("g1").unwrap();
    let marks = Arc::new(HighWaterMarkStore::new(Arc::new(MemoryKeyValueStore::new())));
    let poller = StalenessPoller::new(
        store,
        marks,
        "me",
        vec!["g1".to_string()],
        &FeedConfig::default(),
    );
    assert!(matches!(poller.poll_once().await, PollOutcome::Failed(_)));
}

#[tokio::test(start_paused = true)]
async fn spawned_poller_signals_and_stops_on_cancel() {
    let (poller, _) = setup(post("theirs", "other", T0 + 5_000));
    let mut receiver = poller.subscribe();
    let shutdown = CancellationToken::new();
    let handle = Arc::clone(&poller).spawn(shutdown.clone());

    let signal = receiver.recv().await.unwrap();
    assert_eq!(signal.record_id, "theirs");

    shutdown.cancel();
    handle.await.unwrap();
}

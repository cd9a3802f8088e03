//! Staleness poller.
//!
//! # Responsibility
//! - On a fixed interval, compare the newest remote record against the
//!   caller's high-water-mark and publish a "new content" signal.
//!
//! # Invariants
//! - No-op when the caller has no authorized partitions.
//! - Self-authored records advance the mark silently.
//! - At most one signal is pending; it clears on `acknowledge()` or once the
//!   mark reaches the signalled record.
//! - Never mutates the feed cache and never shares a lock with pagination.

use crate::config::FeedConfig;
use crate::error::StoreError;
use crate::kv::KvError;
use crate::logging::sanitize_for_log;
use crate::store::DocumentStore;
use crate::sync::watermark::HighWaterMarkStore;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// "New content available" notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContentSignal {
    pub identity: String,
    pub record_id: String,
    pub record_ms: i64,
    pub high_water_mark_ms: i64,
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    NoPartitions,
    NoRecords,
    /// Newest record is within tolerance of the mark.
    UpToDate,
    /// No mark existed; it was set to the newest record without signalling.
    Initialized { mark_ms: i64 },
    /// Newest record is the caller's own; the mark advanced silently.
    SelfAuthored { mark_ms: i64 },
    NewContent(NewContentSignal),
    /// A raised signal has not been acknowledged yet.
    Pending,
    Failed(String),
}

/// Interval-driven new content detector for one caller.
pub struct StalenessPoller {
    store: Arc<dyn DocumentStore>,
    watermarks: Arc<HighWaterMarkStore>,
    identity: String,
    partitions: Vec<String>,
    tolerance_ms: i64,
    interval: Duration,
    fetch_timeout: Duration,
    sender: broadcast::Sender<NewContentSignal>,
    pending: Mutex<Option<NewContentSignal>>,
}

impl StalenessPoller {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        watermarks: Arc<HighWaterMarkStore>,
        identity: impl Into<String>,
        partitions: impl IntoIterator<Item = String>,
        config: &FeedConfig,
    ) -> Self {
        let (sender, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            store,
            watermarks,
            identity: identity.into(),
            partitions: partitions.into_iter().collect(),
            tolerance_ms: config.poll_tolerance_ms,
            interval: config.poll_interval(),
            fetch_timeout: config.fetch_timeout(),
            sender,
            pending: Mutex::new(None),
        }
    }

    /// Receives every signal raised after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<NewContentSignal> {
        self.sender.subscribe()
    }

    /// Clears the pending signal so the next newer record can signal again.
    pub async fn acknowledge(&self) {
        if self.pending.lock().await.take().is_some() {
            debug!(
                "event=poll_ack module=poller status=ok identity={}",
                self.identity
            );
        }
    }

    pub async fn pending_signal(&self) -> Option<NewContentSignal> {
        self.pending.lock().await.clone()
    }

    /// Runs one comparison against the remote store.
    pub async fn poll_once(&self) -> PollOutcome {
        if self.partitions.is_empty() {
            return PollOutcome::NoPartitions;
        }

        let latest = match tokio::time::timeout(
            self.fetch_timeout,
            self.store.query_latest(&self.partitions),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.fetch_timeout)),
        };
        let record = match latest {
            Ok(Some(record)) => record,
            Ok(None) => return PollOutcome::NoRecords,
            Err(err) => return self.failed(err.to_string()),
        };
        let Some(record_ms) = record.timestamp_ms() else {
            return PollOutcome::NoRecords;
        };

        let mark = match self.watermarks.get(&self.identity) {
            Ok(mark) => mark,
            Err(KvError::InvalidValue { .. }) => None,
            Err(err) => return self.failed(err.to_string()),
        };
        let Some(mark_ms) = mark else {
            return match self.watermarks.advance(&self.identity, record_ms) {
                Ok(_) => {
                    info!(
                        "event=poll module=poller status=initialized identity={} mark_ms={}",
                        self.identity, record_ms
                    );
                    PollOutcome::Initialized { mark_ms: record_ms }
                }
                Err(err) => self.failed(err.to_string()),
            };
        };

        let mut pending = self.pending.lock().await;
        if let Some(signal) = pending.as_ref() {
            if mark_ms >= signal.record_ms {
                *pending = None;
            } else {
                return PollOutcome::Pending;
            }
        }

        if record_ms.saturating_sub(mark_ms) <= self.tolerance_ms {
            return PollOutcome::UpToDate;
        }

        if record.author_id.as_deref() == Some(self.identity.as_str()) {
            return match self.watermarks.advance(&self.identity, record_ms) {
                Ok(_) => {
                    debug!(
                        "event=poll module=poller status=self_authored identity={} mark_ms={}",
                        self.identity, record_ms
                    );
                    PollOutcome::SelfAuthored { mark_ms: record_ms }
                }
                Err(err) => self.failed(err.to_string()),
            };
        }

        let signal = NewContentSignal {
            identity: self.identity.clone(),
            record_id: record.id.clone(),
            record_ms,
            high_water_mark_ms: mark_ms,
        };
        *pending = Some(signal.clone());
        let receivers = self.sender.send(signal.clone()).unwrap_or(0);
        info!(
            "event=poll module=poller status=new_content identity={} lag_ms={} receivers={}",
            self.identity,
            record_ms.saturating_sub(mark_ms),
            receivers
        );
        PollOutcome::NewContent(signal)
    }

    /// Runs `poll_once` every configured interval until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "event=poller_start module=poller status=ok identity={} interval_ms={}",
                self.identity,
                self.interval.as_millis()
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.poll_once().await;
                    }
                }
            }
            info!(
                "event=poller_stop module=poller status=ok identity={}",
                self.identity
            );
        })
    }

    fn failed(&self, message: String) -> PollOutcome {
        let message = sanitize_for_log(&message);
        warn!(
            "event=poll module=poller status=error identity={} error={}",
            self.identity, message
        );
        PollOutcome::Failed(message)
    }
}

//! Fan-out of ranking snapshots to subscribed observers.
//!
//! Each poll gets a latest-value (`tokio::sync::watch`) channel, so a burst
//! of publishes coalesces into whatever the receiver sees next and a sender
//! never blocks on slow consumers. Each subscriber gets its own delivery
//! task reading from that channel; a failing or slow observer only affects
//! its own task.

use crate::error::CoreResult;
use crate::models::Snapshot;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Receiving end of live ranking updates. Implementations wrap whatever
/// transport actually carries the notification (websocket, change feed,
/// in-process channel).
#[async_trait]
pub trait RankingObserver: Send + Sync + 'static {
    async fn notify(&self, snapshot: &Snapshot) -> CoreResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: Uuid,
    poll_id: String,
}

pub struct RankingPublisher {
    channels: Mutex<HashMap<String, watch::Sender<Option<Snapshot>>>>,
    deliveries: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl RankingPublisher {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            deliveries: Mutex::new(HashMap::new()),
        }
    }

    fn with_channel<R>(
        &self,
        poll_id: &str,
        f: impl FnOnce(&watch::Sender<Option<Snapshot>>) -> R,
    ) -> R {
        let mut channels = self.channels.lock().expect("publisher channel map poisoned");
        let tx = channels
            .entry(poll_id.to_string())
            .or_insert_with(|| watch::channel(None).0);
        f(tx)
    }

    /// Publish a snapshot. Out-of-order publishes (version not above the
    /// current one) are dropped, so observers only ever see strictly
    /// increasing versions. Never blocks on observers.
    pub fn publish(&self, snapshot: Snapshot) {
        let poll_id = snapshot.poll_id.clone();
        let version = snapshot.version;
        let accepted = self.with_channel(&poll_id, |tx| {
            tx.send_if_modified(|current| match current {
                Some(existing) if existing.version >= version => false,
                _ => {
                    *current = Some(snapshot);
                    true
                }
            })
        });
        if accepted {
            debug!("published snapshot v{} for poll {}", version, poll_id);
        } else {
            debug!("dropped stale snapshot v{} for poll {}", version, poll_id);
        }
    }

    /// Most recently published snapshot for a poll, if any.
    pub fn latest(&self, poll_id: &str) -> Option<Snapshot> {
        let channels = self.channels.lock().expect("publisher channel map poisoned");
        channels.get(poll_id).and_then(|tx| tx.borrow().clone())
    }

    /// Number of live subscriptions across all polls.
    pub fn subscriber_count(&self) -> usize {
        self.deliveries
            .lock()
            .expect("publisher delivery map poisoned")
            .len()
    }

    /// Register an observer for a poll. The current snapshot, if one
    /// exists, is delivered immediately; afterwards the observer receives
    /// the latest snapshot after each change, skipping intermediates it was
    /// too slow for.
    pub fn subscribe<O: RankingObserver>(&self, poll_id: &str, observer: O) -> SubscriptionHandle {
        let id = Uuid::new_v4();
        let mut rx = self.with_channel(poll_id, |tx| tx.subscribe());
        let task_poll_id = poll_id.to_string();

        let task = tokio::spawn(async move {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                if let Some(snapshot) = snapshot {
                    if let Err(e) = observer.notify(&snapshot).await {
                        // Isolated: logged, next publish retries delivery.
                        warn!(
                            "observer {} failed on snapshot v{} for poll {}: {}",
                            id, snapshot.version, snapshot.poll_id, e
                        );
                    }
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
            debug!("delivery task for observer {} on poll {} ended", id, task_poll_id);
        });

        self.deliveries
            .lock()
            .expect("publisher delivery map poisoned")
            .insert(id, task);
        info!("observer {} subscribed to poll {}", id, poll_id);
        SubscriptionHandle {
            id,
            poll_id: poll_id.to_string(),
        }
    }

    /// Remove a poll's channel. Dropping the sender wakes every delivery
    /// task on the channel with a closed error, ending them; `latest`
    /// returns `None` afterwards. Publishing to the poll again would
    /// recreate the channel, so callers only release polls that can no
    /// longer change.
    pub fn drop_poll(&self, poll_id: &str) {
        let removed = self
            .channels
            .lock()
            .expect("publisher channel map poisoned")
            .remove(poll_id);
        if removed.is_some() {
            info!("released channel for poll {}", poll_id);
        }
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let task = self
            .deliveries
            .lock()
            .expect("publisher delivery map poisoned")
            .remove(&handle.id);
        if let Some(task) = task {
            task.abort();
            info!("observer {} unsubscribed from poll {}", handle.id, handle.poll_id);
        }
    }
}

impl Default for RankingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

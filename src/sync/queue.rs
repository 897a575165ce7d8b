//! Durable FIFO of mutations waiting for backend confirmation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::state::{self, KeyValueStore, StateError};

const QUEUE_KEY: &str = "sync/queue";
const FAILURES_KEY: &str = "sync/failures";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncItemType {
    Progress,
    ContentEvent,
}

/// One pending mutation. The payload is opaque to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub item_type: SyncItemType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

/// An item taken out of the active queue after it could not be delivered.
/// Kept until the user retries or dismisses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentFailure {
    pub item: SyncQueueItem,
    pub error: String,
    /// False when the backend rejected the item outright.
    pub retryable: bool,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<SyncQueueItem>,
    failures: Vec<PersistentFailure>,
}

/// Ordered, durable sync queue.
///
/// In-memory state is updated first and then written through to the
/// key-value store. A failed write leaves memory ahead of disk; the next
/// successful write carries the missed changes.
pub struct SyncQueue {
    kv: Arc<dyn KeyValueStore>,
    state: Mutex<QueueState>,
    /// Serializes write-through so an older copy never lands after a newer one.
    persist_lock: tokio::sync::Mutex<()>,
    enqueued: Notify,
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl SyncQueue {
    /// Load the queue and failure list from storage.
    pub async fn open(kv: Arc<dyn KeyValueStore>) -> Result<Self, StateError> {
        let items: VecDeque<SyncQueueItem> = state::load_json(kv.as_ref(), QUEUE_KEY)
            .await?
            .unwrap_or_default();
        let failures: Vec<PersistentFailure> = state::load_json(kv.as_ref(), FAILURES_KEY)
            .await?
            .unwrap_or_default();
        if !items.is_empty() || !failures.is_empty() {
            tracing::info!(
                pending = items.len(),
                failed = failures.len(),
                "Restored sync queue"
            );
        }
        Ok(Self {
            kv,
            state: Mutex::new(QueueState { items, failures }),
            persist_lock: tokio::sync::Mutex::new(()),
            enqueued: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Every mutation is a single push/remove, so a poisoned lock still
        // guards a valid queue.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a mutation and write the queue through.
    ///
    /// The item is queued in memory even if the write fails.
    pub async fn enqueue(
        &self,
        item_type: SyncItemType,
        payload: serde_json::Value,
    ) -> Result<SyncQueueItem, StateError> {
        let item = SyncQueueItem {
            id: Uuid::new_v4(),
            item_type,
            payload,
            created_at: Utc::now(),
            retry_count: 0,
        };
        self.lock().items.push_back(item.clone());
        tracing::debug!(id = %item.id, item_type = ?item.item_type, "Enqueued sync item");
        self.enqueued.notify_one();
        self.persist_items().await?;
        Ok(item)
    }

    /// Oldest pending item.
    pub fn front(&self) -> Option<SyncQueueItem> {
        self.lock().items.front().cloned()
    }

    /// Oldest pending item matching `pred`.
    pub fn first_where<F>(&self, pred: F) -> Option<SyncQueueItem>
    where
        F: Fn(&SyncQueueItem) -> bool,
    {
        self.lock().items.iter().find(|i| pred(i)).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Pending items in FIFO order.
    pub fn items(&self) -> Vec<SyncQueueItem> {
        self.lock().items.iter().cloned().collect()
    }

    pub fn failures(&self) -> Vec<PersistentFailure> {
        self.lock().failures.clone()
    }

    /// Remove a confirmed item. Returns false if it was not queued.
    pub async fn complete(&self, id: Uuid) -> Result<bool, StateError> {
        let removed = {
            let mut state = self.lock();
            match state.items.iter().position(|i| i.id == id) {
                Some(pos) => state.items.remove(pos).is_some(),
                None => false,
            }
        };
        if removed {
            self.persist_items().await?;
        }
        Ok(removed)
    }

    /// Bump an item's retry count in place. Returns the new count, or `None`
    /// if the item is no longer queued.
    pub async fn record_retry(&self, id: Uuid) -> Result<Option<u32>, StateError> {
        let count = {
            let mut state = self.lock();
            state.items.iter_mut().find(|i| i.id == id).map(|item| {
                item.retry_count = item.retry_count.saturating_add(1);
                item.retry_count
            })
        };
        if count.is_some() {
            self.persist_items().await?;
        }
        Ok(count)
    }

    /// Move an item from the active queue to the failure list.
    pub async fn fail(
        &self,
        id: Uuid,
        error: String,
        retryable: bool,
    ) -> Result<Option<PersistentFailure>, StateError> {
        let failure = {
            let mut state = self.lock();
            let pos = state.items.iter().position(|i| i.id == id);
            match pos.and_then(|p| state.items.remove(p)) {
                Some(item) => {
                    let failure = PersistentFailure {
                        item,
                        error,
                        retryable,
                        failed_at: Utc::now(),
                    };
                    state.failures.push(failure.clone());
                    Some(failure)
                }
                None => None,
            }
        };
        if failure.is_some() {
            self.persist_all().await?;
        }
        Ok(failure)
    }

    /// Put every persistent failure back at the tail of the queue with a
    /// fresh retry budget. Returns how many were requeued.
    pub async fn retry_failed(&self) -> Result<usize, StateError> {
        let count = {
            let mut state = self.lock();
            let failures = std::mem::take(&mut state.failures);
            let count = failures.len();
            for failure in failures {
                let mut item = failure.item;
                item.retry_count = 0;
                state.items.push_back(item);
            }
            count
        };
        if count > 0 {
            tracing::info!(count, "Requeued failed sync items");
            self.enqueued.notify_one();
            self.persist_all().await?;
        }
        Ok(count)
    }

    /// Acknowledge and drop a persistent failure.
    pub async fn dismiss_failure(&self, id: Uuid) -> Result<bool, StateError> {
        let removed = {
            let mut state = self.lock();
            let before = state.failures.len();
            state.failures.retain(|f| f.item.id != id);
            state.failures.len() != before
        };
        if removed {
            self.persist_failures().await?;
        }
        Ok(removed)
    }

    /// Drop every pending item and persistent failure matching `pred`.
    /// Returns how many were removed.
    pub async fn remove_where<F>(&self, pred: F) -> Result<usize, StateError>
    where
        F: Fn(&SyncQueueItem) -> bool,
    {
        let removed = {
            let mut state = self.lock();
            let before = state.items.len() + state.failures.len();
            state.items.retain(|i| !pred(i));
            state.failures.retain(|f| !pred(&f.item));
            before - state.items.len() - state.failures.len()
        };
        if removed > 0 {
            tracing::debug!(removed, "Removed sync items");
            self.persist_all().await?;
        }
        Ok(removed)
    }

    /// Resolves after the next enqueue (or requeue).
    pub async fn notified(&self) {
        self.enqueued.notified().await
    }

    async fn persist_items(&self) -> Result<(), StateError> {
        let _guard = self.persist_lock.lock().await;
        let items = self.items();
        state::save_json(self.kv.as_ref(), QUEUE_KEY, &items).await
    }

    async fn persist_failures(&self) -> Result<(), StateError> {
        let _guard = self.persist_lock.lock().await;
        let failures = self.failures();
        state::save_json(self.kv.as_ref(), FAILURES_KEY, &failures).await
    }

    async fn persist_all(&self) -> Result<(), StateError> {
        let _guard = self.persist_lock.lock().await;
        let (items, failures) = {
            let state = self.lock();
            (
                state.items.iter().cloned().collect::<Vec<_>>(),
                state.failures.clone(),
            )
        };
        state::save_json(self.kv.as_ref(), QUEUE_KEY, &items).await?;
        state::save_json(self.kv.as_ref(), FAILURES_KEY, &failures).await
    }
}

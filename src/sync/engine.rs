//! Drains the sync queue against the backend.
//!
//! One drain at a time. Items go out strictly in FIFO order; a retryable
//! failure is retried in place with backoff until its budget runs out, a
//! rejection fails immediately, and either way the item moves to the
//! failure list so the rest of the queue keeps flowing.
//!
//! The queue is shared by every learner on the device. An engine only sends
//! its own learner's PROGRESS items (plus items not tied to a learner) and
//! only reconciles snapshots returned for them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::backend::Backend;
use super::connectivity::ConnectivityMonitor;
use super::error::SyncError;
use super::queue::{SyncItemType, SyncQueue, SyncQueueItem};
use crate::content::{ContentEventPayload, ContentStore};
use crate::progress::{ProgressPayload, ProgressReason, ProgressSnapshot, ProgressStore};
use crate::retry::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Draining,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncConfig {
    pub retry: RetryConfig,
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub transmitted: usize,
    /// Items moved to the failure list during this pass.
    pub failed: Vec<Uuid>,
    /// Connectivity dropped before the queue emptied.
    pub interrupted: bool,
    /// The server snapshot changed local progress.
    pub reconciled: bool,
    /// Local writes that failed; the in-memory state still moved on.
    pub persistence_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Offline,
    Empty,
    /// Another drain holds the flag; this request was dropped.
    AlreadyDraining,
    Drained(DrainReport),
}

/// Clears the draining flag however the drain exits.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Attempt {
    Done,
    Failed,
    Retry,
    Interrupted,
}

pub struct SyncEngine {
    queue: Arc<SyncQueue>,
    backend: Arc<dyn Backend>,
    progress: Arc<ProgressStore>,
    content: Option<Arc<ContentStore>>,
    connectivity: ConnectivityMonitor,
    config: SyncConfig,
    draining: AtomicBool,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        queue: Arc<SyncQueue>,
        backend: Arc<dyn Backend>,
        progress: Arc<ProgressStore>,
        connectivity: ConnectivityMonitor,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue,
            backend,
            progress,
            content: None,
            connectivity,
            config,
            draining: AtomicBool::new(false),
        }
    }

    /// Let confirmed CONTENT_EVENT items flip their content back to SYNCED.
    pub fn with_content(mut self, content: Arc<ContentStore>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn state(&self) -> EngineState {
        if self.draining.load(Ordering::Acquire) {
            EngineState::Draining
        } else {
            EngineState::Idle
        }
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    /// Whether this engine sends `item`. PROGRESS items of other learners
    /// are left for their own engine.
    fn handles(&self, item: &SyncQueueItem) -> bool {
        match ProgressPayload::from_item(item) {
            Some(payload) => payload.learner_id == self.progress.learner_id(),
            None => true,
        }
    }

    fn next_item(&self) -> Option<SyncQueueItem> {
        self.queue.first_where(|item| self.handles(item))
    }

    /// Items this engine would send on the next drain.
    pub fn pending(&self) -> usize {
        self.queue
            .items()
            .iter()
            .filter(|item| self.handles(item))
            .count()
    }

    /// Transmit everything queued while the device stays online.
    ///
    /// Failures are reported through the returned report and the queue's
    /// failure list, never as an error.
    pub async fn drain(&self) -> DrainOutcome {
        if !self.connectivity.is_online() {
            return DrainOutcome::Offline;
        }
        if self.next_item().is_none() {
            return DrainOutcome::Empty;
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Drain already in progress, skipping");
            return DrainOutcome::AlreadyDraining;
        }
        let _guard = DrainGuard(&self.draining);

        tracing::info!(pending = self.pending(), "Draining sync queue");
        let mut report = DrainReport::default();
        let mut server_snapshot: Option<ProgressSnapshot> = None;

        loop {
            // The in-flight item always resolves; connectivity is only
            // checked between items.
            if !self.connectivity.is_online() {
                report.interrupted = true;
                break;
            }
            let Some(item) = self.next_item() else {
                break;
            };
            match self.attempt(&item, &mut report, &mut server_snapshot).await {
                Attempt::Done | Attempt::Failed | Attempt::Retry => {}
                Attempt::Interrupted => {
                    report.interrupted = true;
                    break;
                }
            }
        }

        if !report.interrupted {
            if let Some(snapshot) = server_snapshot {
                match self.progress.reconcile(&snapshot).await {
                    Ok(changed) => report.reconciled = changed,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to persist reconciled progress");
                        report.persistence_errors += 1;
                    }
                }
            }
        }

        tracing::info!(
            transmitted = report.transmitted,
            failed = report.failed.len(),
            remaining = self.pending(),
            interrupted = report.interrupted,
            "Drain finished"
        );
        DrainOutcome::Drained(report)
    }

    async fn attempt(
        &self,
        item: &SyncQueueItem,
        report: &mut DrainReport,
        server_snapshot: &mut Option<ProgressSnapshot>,
    ) -> Attempt {
        let err = match self.backend.submit(item).await {
            Ok(response) => {
                tracing::debug!(id = %item.id, item_type = ?item.item_type, "Sync item confirmed");
                report.transmitted += 1;
                if let Err(e) = self.queue.complete(item.id).await {
                    tracing::warn!(
                        id = %item.id,
                        error = %e,
                        "Failed to persist queue after confirm"
                    );
                    report.persistence_errors += 1;
                }
                if let Some(payload) = ProgressPayload::from_item(item) {
                    if payload.learner_id == self.progress.learner_id() {
                        if payload.reason == ProgressReason::Reset {
                            // Anything the server returned before the reset is stale.
                            *server_snapshot = response.snapshot;
                        } else if response.snapshot.is_some() {
                            *server_snapshot = response.snapshot;
                        }
                    }
                }
                if item.item_type == SyncItemType::ContentEvent {
                    self.confirm_content_event(item, report).await;
                }
                return Attempt::Done;
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            tracing::warn!(id = %item.id, error = %err, "Sync item rejected");
            self.fail(item, &err, false, report).await;
            return Attempt::Failed;
        }

        let retry_count = match self.queue.record_retry(item.id).await {
            Ok(Some(count)) => count,
            Ok(None) => return Attempt::Retry,
            Err(e) => {
                tracing::warn!(id = %item.id, error = %e, "Failed to persist retry count");
                report.persistence_errors += 1;
                item.retry_count.saturating_add(1)
            }
        };

        if self.config.retry.exhausted(retry_count) {
            tracing::warn!(
                id = %item.id,
                retries = retry_count,
                error = %err,
                "Retry budget exhausted, moving sync item to failures"
            );
            self.fail(item, &err, true, report).await;
            return Attempt::Failed;
        }

        let delay = self.config.retry.delay_for_retry(retry_count - 1);
        tracing::warn!(
            id = %item.id,
            attempt = retry_count,
            max_retries = self.config.retry.max_retries,
            delay_secs = delay.as_secs(),
            error = %err,
            "Retryable sync error, backing off"
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => Attempt::Retry,
            () = self.connectivity.wait_offline() => Attempt::Interrupted,
        }
    }

    async fn fail(
        &self,
        item: &SyncQueueItem,
        err: &SyncError,
        retryable: bool,
        report: &mut DrainReport,
    ) {
        if let Err(e) = self.queue.fail(item.id, err.to_string(), retryable).await {
            tracing::warn!(id = %item.id, error = %e, "Failed to persist sync failure");
            report.persistence_errors += 1;
        }
        report.failed.push(item.id);
    }

    async fn confirm_content_event(&self, item: &SyncQueueItem, report: &mut DrainReport) {
        let Some(content) = &self.content else {
            return;
        };
        let payload: ContentEventPayload = match serde_json::from_value(item.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(id = %item.id, error = %e, "Unreadable content event payload");
                return;
            }
        };
        if let Err(e) = content.mark_synced(payload.content_id).await {
            tracing::warn!(
                content = %payload.content_id,
                error = %e,
                "Failed to mark content synced"
            );
            report.persistence_errors += 1;
        }
    }

    /// Fetch the server's view of progress and merge it in.
    pub async fn pull(&self) -> Result<bool, SyncError> {
        let snapshot = self
            .backend
            .fetch_progress(self.progress.learner_id())
            .await?;
        Ok(self.progress.reconcile(&snapshot).await?)
    }

    /// Put every persistent failure back in the queue and drain.
    pub async fn retry_failed(&self) -> Result<DrainOutcome, SyncError> {
        self.queue.retry_failed().await?;
        Ok(self.drain().await)
    }

    /// Drain whenever the device comes online or something is enqueued,
    /// until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut connectivity = self.connectivity.subscribe();
        loop {
            if self.connectivity.is_online() && self.next_item().is_some() {
                self.drain().await;
            }
            tokio::select! {
                () = shutdown.cancelled() => break,
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = self.queue.notified() => {}
            }
        }
        tracing::debug!("Sync loop stopped");
    }
}

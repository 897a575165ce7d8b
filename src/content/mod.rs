//! Downloaded content packages, their storage footprint and the per-child
//! progress made against them while offline.

pub mod error;
pub mod quota;
pub mod source;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retry::{self, RetryAction, RetryConfig};
use crate::state::{self, KeyValueStore};
use crate::sync::{SyncItemType, SyncQueue};

pub use error::ContentError;
pub use quota::{FixedEstimator, FsStorageEstimator, QuotaGuard, StorageEstimate, StorageEstimator};
pub use source::PackageSource;

const RECORDS_KEY: &str = "content/records";

/// One file inside a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Relative path inside the package directory.
    pub path: String,
    pub url: String,
    /// Hex-encoded SHA-256 of the file.
    pub sha256: String,
    #[serde(default)]
    pub size_bytes: u64,
}

/// A published package. Immutable once the backend has published it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPackage {
    pub package_id: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub manifest: Vec<AssetRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentSyncStatus {
    Synced,
    Pending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineProgress {
    pub completed_items: BTreeSet<String>,
    pub points_earned: u64,
    pub time_spent_secs: u64,
}

impl OfflineProgress {
    /// Fold a delta in. Returns whether anything changed.
    pub fn merge(&mut self, delta: &OfflineProgressDelta) -> bool {
        let before = self.clone();
        self.completed_items
            .extend(delta.completed_items.iter().cloned());
        self.points_earned = self.points_earned.saturating_add(delta.points_earned);
        self.time_spent_secs = self.time_spent_secs.saturating_add(delta.time_spent_secs);
        *self != before
    }
}

/// Progress made against one package since the last update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineProgressDelta {
    pub package_id: String,
    #[serde(default)]
    pub completed_items: Vec<String>,
    #[serde(default)]
    pub points_earned: u64,
    #[serde(default)]
    pub time_spent_secs: u64,
}

/// A package downloaded for one child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedContent {
    pub content_id: Uuid,
    pub package_id: String,
    pub child_id: String,
    pub downloaded_at: DateTime<Utc>,
    pub sync_status: ContentSyncStatus,
    pub offline_progress: OfflineProgress,
    pub storage_bytes_used: u64,
    pub local_dir: PathBuf,
}

/// Body of a CONTENT_EVENT sync item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEventPayload {
    pub content_id: Uuid,
    pub package_id: String,
    pub child_id: String,
    pub delta: OfflineProgressDelta,
    /// Accumulated totals after the delta.
    pub offline_progress: OfflineProgress,
}

/// Owns the DownloadedContent records.
pub struct ContentStore {
    root: PathBuf,
    kv: Arc<dyn KeyValueStore>,
    queue: Arc<SyncQueue>,
    guard: QuotaGuard,
    retry: RetryConfig,
    records: Mutex<Vec<DownloadedContent>>,
    /// Serializes downloads, deletes and write-through.
    write_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("root", &self.root)
            .field("records", &self.records().len())
            .finish_non_exhaustive()
    }
}

impl ContentStore {
    /// Load the stored records. Assets live under `root/<content_id>/`.
    pub async fn open(
        root: impl Into<PathBuf>,
        kv: Arc<dyn KeyValueStore>,
        queue: Arc<SyncQueue>,
        guard: QuotaGuard,
        retry: RetryConfig,
    ) -> Result<Self, ContentError> {
        let records: Vec<DownloadedContent> = state::load_json(kv.as_ref(), RECORDS_KEY)
            .await?
            .unwrap_or_default();
        tracing::debug!(count = records.len(), "Loaded content records");
        Ok(Self {
            root: root.into(),
            kv,
            queue,
            guard,
            retry,
            records: Mutex::new(records),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DownloadedContent>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn records(&self) -> Vec<DownloadedContent> {
        self.lock().clone()
    }

    pub fn get(&self, content_id: Uuid) -> Option<DownloadedContent> {
        self.lock().iter().find(|r| r.content_id == content_id).cloned()
    }

    pub fn for_child(&self, child_id: &str) -> Vec<DownloadedContent> {
        self.lock()
            .iter()
            .filter(|r| r.child_id == child_id)
            .cloned()
            .collect()
    }

    /// Sum of `storage_bytes_used` across all records.
    pub fn used_bytes(&self) -> u64 {
        self.lock().iter().map(|r| r.storage_bytes_used).sum()
    }

    /// Download a package for a child from `source`.
    ///
    /// The quota check runs before anything is written. A failed asset fetch
    /// removes whatever was written and creates no record. Downloading a
    /// package the child already has returns the existing record.
    pub async fn download(
        &self,
        source: &dyn PackageSource,
        package_id: &str,
        child_id: &str,
    ) -> Result<DownloadedContent, ContentError> {
        let _guard = self.write_lock.lock().await;

        let existing = self
            .lock()
            .iter()
            .find(|r| r.package_id == package_id && r.child_id == child_id)
            .cloned();
        if let Some(existing) = existing {
            tracing::debug!(package = package_id, child = child_id, "Package already downloaded");
            return Ok(existing);
        }

        let package = source.package(package_id).await?;
        if let Err(e) = self
            .guard
            .check(package_id, package.size_bytes, self.used_bytes())
            .await
        {
            tracing::info!(package = package_id, error = %e, "Download rejected by quota guard");
            return Err(e);
        }

        let content_id = Uuid::new_v4();
        let local_dir = self.root.join(content_id.to_string());
        if let Err(e) = self.fetch_assets(source, &package, &local_dir).await {
            tracing::warn!(
                package = package_id,
                error = %e,
                "Asset fetch failed, discarding download"
            );
            if let Err(cleanup) = tokio::fs::remove_dir_all(&local_dir).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        dir = %local_dir.display(),
                        error = %cleanup,
                        "Failed to remove partial download"
                    );
                }
            }
            return Err(e);
        }

        let record = DownloadedContent {
            content_id,
            package_id: package.package_id.clone(),
            child_id: child_id.to_string(),
            downloaded_at: Utc::now(),
            sync_status: ContentSyncStatus::Synced,
            offline_progress: OfflineProgress::default(),
            storage_bytes_used: package.size_bytes,
            local_dir,
        };
        self.lock().push(record.clone());
        tracing::info!(
            package = package_id,
            child = child_id,
            content = %content_id,
            bytes = package.size_bytes,
            "Downloaded content package"
        );
        self.persist().await?;
        Ok(record)
    }

    async fn fetch_assets(
        &self,
        source: &dyn PackageSource,
        package: &ContentPackage,
        dir: &Path,
    ) -> Result<(), ContentError> {
        tokio::fs::create_dir_all(dir).await?;
        for asset in &package.manifest {
            let dest = source::asset_destination(dir, asset)?;
            retry::retry_with_backoff(
                &self.retry,
                |e: &ContentError| RetryAction::from_retryable(e.is_retryable()),
                || source.fetch_asset(asset, &dest),
            )
            .await
            .map_err(|e| {
                if e.is_retryable() {
                    ContentError::RetriesExhausted {
                        retries: self.retry.max_retries,
                        path: asset.path.clone(),
                        last_error: e.to_string(),
                    }
                } else {
                    e
                }
            })?;
        }
        Ok(())
    }

    /// Merge offline progress into the child's copy of `delta.package_id`,
    /// mark it pending and enqueue a CONTENT_EVENT.
    pub async fn update_offline_progress(
        &self,
        child_id: &str,
        delta: OfflineProgressDelta,
    ) -> Result<DownloadedContent, ContentError> {
        let _guard = self.write_lock.lock().await;
        let updated = {
            let mut records = self.lock();
            let record = records
                .iter_mut()
                .find(|r| r.child_id == child_id && r.package_id == delta.package_id)
                .ok_or_else(|| ContentError::NoContentForChild {
                    child_id: child_id.to_string(),
                    package_id: delta.package_id.clone(),
                })?;
            record.offline_progress.merge(&delta);
            record.sync_status = ContentSyncStatus::Pending;
            record.clone()
        };

        let payload = ContentEventPayload {
            content_id: updated.content_id,
            package_id: updated.package_id.clone(),
            child_id: updated.child_id.clone(),
            delta,
            offline_progress: updated.offline_progress.clone(),
        };
        let persisted = self.persist().await;
        let value = serde_json::to_value(&payload).map_err(|source| {
            ContentError::State(state::StateError::Serialization {
                key: RECORDS_KEY.to_string(),
                source,
            })
        })?;
        let enqueued = self.queue.enqueue(SyncItemType::ContentEvent, value).await;
        persisted?;
        enqueued?;
        Ok(updated)
    }

    /// Flip a record back to SYNCED once its events are confirmed. Stays
    /// PENDING while later events for it are still queued.
    pub async fn mark_synced(&self, content_id: Uuid) -> Result<bool, ContentError> {
        // Events are enqueued under the write lock, so scan under it too.
        let _guard = self.write_lock.lock().await;
        let still_queued = self.queue.items().iter().any(|item| {
            item.item_type == SyncItemType::ContentEvent
                && serde_json::from_value::<ContentEventPayload>(item.payload.clone())
                    .is_ok_and(|p| p.content_id == content_id)
        });
        if still_queued {
            return Ok(false);
        }

        let changed = {
            let mut records = self.lock();
            match records.iter_mut().find(|r| r.content_id == content_id) {
                Some(r) if r.sync_status == ContentSyncStatus::Pending => {
                    r.sync_status = ContentSyncStatus::Synced;
                    true
                }
                _ => false,
            }
        };
        if changed {
            tracing::debug!(content = %content_id, "Offline progress synced");
            self.persist().await?;
        }
        Ok(changed)
    }

    /// Remove a record and its files. Returns the removed record.
    pub async fn delete(&self, content_id: Uuid) -> Result<DownloadedContent, ContentError> {
        let _guard = self.write_lock.lock().await;
        let removed = {
            let mut records = self.lock();
            let pos = records
                .iter()
                .position(|r| r.content_id == content_id)
                .ok_or(ContentError::NotFound(content_id))?;
            records.remove(pos)
        };

        match tokio::fs::remove_dir_all(&removed.local_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    dir = %removed.local_dir.display(),
                    error = %e,
                    "Failed to remove content files"
                );
            }
        }
        tracing::info!(
            content = %content_id,
            package = %removed.package_id,
            freed = removed.storage_bytes_used,
            "Deleted content"
        );
        self.persist().await?;
        Ok(removed)
    }

    async fn persist(&self) -> Result<(), ContentError> {
        let records = self.records();
        state::save_json(self.kv.as_ref(), RECORDS_KEY, &records).await?;
        Ok(())
    }
}

//! Device storage estimation and the pre-download quota check.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::error::ContentError;

/// Approximate device storage figures, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEstimate {
    pub usage: u64,
    pub quota: u64,
}

/// Best-effort device storage estimate. Values may be stale.
#[async_trait]
pub trait StorageEstimator: Send + Sync {
    async fn estimate(&self) -> std::io::Result<StorageEstimate>;
}

/// Estimates from the filesystem holding `path`.
#[derive(Debug, Clone)]
pub struct FsStorageEstimator {
    path: PathBuf,
}

impl FsStorageEstimator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StorageEstimator for FsStorageEstimator {
    async fn estimate(&self) -> std::io::Result<StorageEstimate> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let quota = fs2::total_space(&path)?;
            let available = fs2::available_space(&path)?;
            Ok(StorageEstimate {
                usage: quota.saturating_sub(available),
                quota,
            })
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

/// Fixed, settable estimate.
#[derive(Debug)]
pub struct FixedEstimator {
    estimate: Mutex<StorageEstimate>,
}

impl FixedEstimator {
    pub fn new(usage: u64, quota: u64) -> Self {
        Self {
            estimate: Mutex::new(StorageEstimate { usage, quota }),
        }
    }

    pub fn set(&self, usage: u64, quota: u64) {
        *self.estimate.lock().unwrap_or_else(|e| e.into_inner()) = StorageEstimate { usage, quota };
    }
}

#[async_trait]
impl StorageEstimator for FixedEstimator {
    async fn estimate(&self) -> std::io::Result<StorageEstimate> {
        Ok(*self.estimate.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Rejects downloads that would overflow the device quota or the optional
/// content budget.
pub struct QuotaGuard {
    estimator: Arc<dyn StorageEstimator>,
    budget_bytes: Option<u64>,
}

impl std::fmt::Debug for QuotaGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaGuard")
            .field("budget_bytes", &self.budget_bytes)
            .finish_non_exhaustive()
    }
}

impl QuotaGuard {
    pub fn new(estimator: Arc<dyn StorageEstimator>, budget_bytes: Option<u64>) -> Self {
        Self {
            estimator,
            budget_bytes,
        }
    }

    /// Check that `requested` more bytes fit, given `tracked` bytes already
    /// held by downloaded content.
    ///
    /// The device estimate may lag behind what was just written, so the
    /// larger of it and `tracked` is used. An estimator failure leaves only
    /// the budget check in force.
    pub async fn check(
        &self,
        package_id: &str,
        requested: u64,
        tracked: u64,
    ) -> Result<(), ContentError> {
        if let Some(budget) = self.budget_bytes {
            if requested.saturating_add(tracked) > budget {
                return Err(ContentError::QuotaExceeded {
                    package_id: package_id.to_string(),
                    requested,
                    available: budget.saturating_sub(tracked),
                    quota: budget,
                });
            }
        }

        match self.estimator.estimate().await {
            Ok(estimate) => {
                let used = estimate.usage.max(tracked);
                if requested.saturating_add(used) > estimate.quota {
                    return Err(ContentError::QuotaExceeded {
                        package_id: package_id.to_string(),
                        requested,
                        available: estimate.quota.saturating_sub(used),
                        quota: estimate.quota,
                    });
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Storage estimate unavailable, skipping device quota check"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenEstimator;

    #[async_trait]
    impl StorageEstimator for BrokenEstimator {
        async fn estimate(&self) -> std::io::Result<StorageEstimate> {
            Err(std::io::Error::other("no statfs"))
        }
    }

    #[tokio::test]
    async fn test_accepts_exact_fit() {
        let guard = QuotaGuard::new(Arc::new(FixedEstimator::new(600, 1000)), None);
        assert!(guard.check("p", 400, 0).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_over_quota() {
        let guard = QuotaGuard::new(Arc::new(FixedEstimator::new(600, 1000)), None);
        let err = guard.check("p", 401, 0).await.unwrap_err();
        match err {
            ContentError::QuotaExceeded {
                available, quota, ..
            } => {
                assert_eq!(available, 400);
                assert_eq!(quota, 1000);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_tracked_usage_counts_when_estimate_is_stale() {
        let guard = QuotaGuard::new(Arc::new(FixedEstimator::new(100, 1000)), None);
        assert!(guard.check("p", 300, 800).await.is_err());
        assert!(guard.check("p", 200, 800).await.is_ok());
    }

    #[tokio::test]
    async fn test_budget_applies_on_top_of_device_quota() {
        let guard = QuotaGuard::new(Arc::new(FixedEstimator::new(0, u64::MAX)), Some(500));
        assert!(guard.check("p", 300, 100).await.is_ok());
        assert!(matches!(
            guard.check("p", 300, 300).await,
            Err(ContentError::QuotaExceeded { quota: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_estimator_failure_falls_back_to_budget() {
        let guard = QuotaGuard::new(Arc::new(BrokenEstimator), Some(100));
        assert!(guard.check("p", 50, 0).await.is_ok());
        assert!(guard.check("p", 150, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_fs_estimator_reports_consistent_figures() {
        let dir = tempfile::tempdir().unwrap();
        let estimate = FsStorageEstimator::new(dir.path()).estimate().await.unwrap();
        assert!(estimate.usage <= estimate.quota);
    }
}

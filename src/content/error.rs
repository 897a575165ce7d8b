use thiserror::Error;
use uuid::Uuid;

use crate::state::StateError;

/// Typed content errors enabling retry classification.
///
/// Quota rejections are raised before any state is touched. Fetch errors
/// separate transient transfer problems from permanent ones so the asset
/// retry loop can abort early.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error(
        "Package {package_id} needs {requested} bytes but only {available} of {quota} are free"
    )]
    QuotaExceeded {
        package_id: String,
        requested: u64,
        available: u64,
        quota: u64,
    },

    #[error("No downloaded content with id {0}")]
    NotFound(Uuid),

    #[error("Package {package_id} is not downloaded for child {child_id}")]
    NoContentForChild {
        child_id: String,
        package_id: String,
    },

    #[error("HTTP error {status} fetching {path}")]
    HttpStatus { status: u16, path: String },

    #[error("Transfer of {path} failed (bytes_so_far={bytes_written}): {source}")]
    Http {
        source: reqwest::Error,
        path: String,
        bytes_written: u64,
    },

    #[error("Checksum mismatch for {0}")]
    ChecksumMismatch(String),

    #[error("Invalid asset reference: {0}")]
    InvalidAsset(String),

    #[error("Malformed package description {path}: {source}")]
    Decode {
        path: String,
        source: reqwest::Error,
    },

    #[error("Giving up on {path} after {retries} retries: {last_error}")]
    RetriesExhausted {
        retries: u32,
        path: String,
        last_error: String,
    },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error(transparent)]
    State(#[from] StateError),
}

impl ContentError {
    /// Whether this error is transient and worth retrying.
    ///
    /// Checksum mismatches count as transient: they usually mean a truncated
    /// transfer.
    pub fn is_retryable(&self) -> bool {
        match self {
            ContentError::HttpStatus { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            ContentError::Http { .. } => true,
            ContentError::ChecksumMismatch(_) => true,
            ContentError::QuotaExceeded { .. }
            | ContentError::NotFound(_)
            | ContentError::NoContentForChild { .. }
            | ContentError::InvalidAsset(_)
            | ContentError::Decode { .. }
            | ContentError::RetriesExhausted { .. }
            | ContentError::Disk(_)
            | ContentError::State(_) => false,
        }
    }
}

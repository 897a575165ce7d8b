use thiserror::Error;

use crate::progress::ProgressError;
use crate::state::StateError;

/// Typed sync errors enabling retry classification.
///
/// `is_retryable()` separates transient failures (server errors, rate
/// limits, dropped connections) from rejections the backend will keep
/// returning no matter how often the item is resent.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("HTTP error {status} from {endpoint}")]
    HttpStatus { status: u16, endpoint: String },

    #[error("Request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        source: reqwest::Error,
    },

    #[error("Malformed response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        source: reqwest::Error,
    },

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("Backend rejected item: {0}")]
    Rejected(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Progress(#[from] ProgressError),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::HttpStatus { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            SyncError::Transport { .. } => true,
            SyncError::Decode { .. } => false,
            SyncError::InvalidUrl(_) => false,
            SyncError::Rejected(_) => false,
            SyncError::State(_) => false,
            SyncError::Progress(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16) -> SyncError {
        SyncError::HttpStatus {
            status,
            endpoint: "/sync/items".into(),
        }
    }

    #[test]
    fn test_validation_statuses_not_retryable() {
        for code in [400, 401, 403, 404, 409, 422] {
            assert!(!status(code).is_retryable(), "{code}");
        }
    }

    #[test]
    fn test_transient_statuses_retryable() {
        for code in [408, 429, 500, 502, 503] {
            assert!(status(code).is_retryable(), "{code}");
        }
    }

    #[test]
    fn test_rejected_not_retryable() {
        assert!(!SyncError::Rejected("unknown learner".into()).is_retryable());
    }

    #[test]
    fn test_transport_error_retryable() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = rt
            .block_on(reqwest::Client::new().get("http://127.0.0.1:1").send())
            .unwrap_err();
        let e = SyncError::Transport {
            endpoint: "http://127.0.0.1:1".into(),
            source: err,
        };
        assert!(e.is_retryable());
    }
}

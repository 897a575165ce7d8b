//! Backend contract and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use super::error::SyncError;
use super::queue::SyncQueueItem;
use crate::progress::ProgressSnapshot;

/// Reply to a submitted sync item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default = "default_accepted")]
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
    /// Post-merge server snapshot, returned for PROGRESS items.
    #[serde(default)]
    pub snapshot: Option<ProgressSnapshot>,
}

fn default_accepted() -> bool {
    true
}

impl SubmitResponse {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
            snapshot: None,
        }
    }

    pub fn with_snapshot(snapshot: ProgressSnapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            ..Self::accepted()
        }
    }
}

/// Remote service the sync engine talks to.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Deliver one queued item. The item id doubles as an idempotency key.
    async fn submit(&self, item: &SyncQueueItem) -> Result<SubmitResponse, SyncError>;

    /// Current server-side progress for a learner.
    async fn fetch_progress(&self, learner_id: &str) -> Result<ProgressSnapshot, SyncError>;
}

/// JSON-over-HTTP backend client.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, SyncError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("kidlingo-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| SyncError::Transport {
                endpoint: base_url.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Base URL with `segments` appended, each percent-encoded.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: RequestBuilder,
        endpoint: &Url,
    ) -> Result<T, SyncError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|source| SyncError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            });
        }

        response.json::<T>().await.map_err(|source| {
            // A body cut off mid-stream is a transport problem, not bad data.
            if source.is_decode() {
                SyncError::Decode {
                    endpoint: endpoint.to_string(),
                    source,
                }
            } else {
                SyncError::Transport {
                    endpoint: endpoint.to_string(),
                    source,
                }
            }
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn submit(&self, item: &SyncQueueItem) -> Result<SubmitResponse, SyncError> {
        let url = self.endpoint(&["sync", "items"]);
        let request = self
            .client
            .post(url.clone())
            .header("Idempotency-Key", item.id.to_string())
            .json(item);
        let response: SubmitResponse = self.send_json(request, &url).await?;
        if !response.accepted {
            return Err(SyncError::Rejected(
                response
                    .reason
                    .unwrap_or_else(|| "no reason given".to_string()),
            ));
        }
        tracing::debug!(id = %item.id, "Backend accepted sync item");
        Ok(response)
    }

    async fn fetch_progress(&self, learner_id: &str) -> Result<ProgressSnapshot, SyncError> {
        let url = self.endpoint(&["learners", learner_id, "progress"]);
        let request = self.client.get(url.clone());
        self.send_json(request, &url).await
    }
}

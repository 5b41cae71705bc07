use crate::{error::IngestError, models::Snapshot};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Where snapshots come from. The reconciler makes exactly one `fetch` per
/// cycle and never retries.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> std::result::Result<Snapshot, IngestError>;
}

/// Fetches snapshots with a single GET against the configured endpoint.
#[derive(Clone)]
pub struct HttpSnapshotSource {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpSnapshotSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self) -> std::result::Result<Snapshot, IngestError> {
        debug!(url = %self.url, "fetching snapshot");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Transport(format!(
                "{} returned status {status}",
                self.url
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(err))?;
        Snapshot::from_slice(&body)
    }
}

impl HttpSnapshotSource {
    fn transport_error(&self, err: reqwest::Error) -> IngestError {
        if err.is_timeout() {
            IngestError::Transport(format!(
                "request to {} timed out after {:?}",
                self.url, self.timeout
            ))
        } else {
            IngestError::Transport(format!("request to {} failed: {err}", self.url))
        }
    }
}

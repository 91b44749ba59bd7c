//! Network access for the interpreter binary.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, RunnerError};

/// Source of runtime binaries.
#[async_trait]
pub trait BinaryFetcher: Send + Sync {
    /// Download the bytes at `url`.
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

/// Fetches binaries over HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fetcher that reuses an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BinaryFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        debug!(url, "fetching runtime binary");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RunnerError::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RunnerError::fetch(url, format!("HTTP {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RunnerError::fetch(url, e))?;
        debug!(url, len = bytes.len(), "runtime binary downloaded");
        Ok(bytes)
    }
}

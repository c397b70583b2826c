//! Remote image download.
//!
//! The adapter talks to the network only through [`ImageFetcher`], which
//! keeps URL handling testable without a server. [`HttpFetcher`] is the
//! production implementation.
//!
//! No retries happen here. A failed download fails the job; retrying is the
//! job queue's business.

use crate::error::WorkerError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Downloads the bytes behind a URL.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, WorkerError>;
}

/// `reqwest`-backed fetcher.
///
/// No timeout unless built with [`HttpFetcher::with_timeout`]; a hanging
/// server hangs the job.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: Option<u64>,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, WorkerError> {
        Self::build(None)
    }

    pub fn with_timeout(secs: u64) -> Result<Self, WorkerError> {
        Self::build(Some(secs))
    }

    fn build(timeout_secs: Option<u64>) -> Result<Self, WorkerError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| WorkerError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, WorkerError> {
        info!("Downloading image from: {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            let reason = match (e.is_timeout(), self.timeout_secs) {
                (true, Some(secs)) => format!("timed out after {secs}s"),
                _ => e.to_string(),
            };
            WorkerError::Fetch {
                url: url.to_string(),
                reason,
            }
        })?;

        if !response.status().is_success() {
            return Err(WorkerError::Fetch {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let bytes = response.bytes().await.map_err(|e| WorkerError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        info!("Downloaded {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }
}

//! Transfer backends used by the download engine.

use crate::error::DownloadError;
use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Moves the bytes behind a URL into a local file
///
/// Implementations write to `dest` (truncating it) and return the number of
/// bytes written. Timeouts, retries and partial-file cleanup are handled by
/// the caller.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Download `url` into `dest`
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, DownloadError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// HTTP(S) transfer backed by a shared `reqwest` client
pub struct HttpTransfer {
    client: reqwest::Client,
}

impl HttpTransfer {
    /// Create a transfer using `client`
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Create a transfer with a default client
    pub fn with_default_client() -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("petfeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DownloadError::Request {
                url: String::new(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let request_error = |e: reqwest::Error| DownloadError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let write_error = |e: std::io::Error| DownloadError::Write {
            path: dest.to_path_buf(),
            reason: e.to_string(),
        };

        let mut response = self.client.get(url).send().await.map_err(request_error)?;
        if !response.status().is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await.map_err(write_error)?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(request_error)? {
            file.write_all(&chunk).await.map_err(write_error)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_error)?;
        file.sync_all().await.map_err(write_error)?;

        Ok(written)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

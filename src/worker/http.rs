//! HTTP client for streaming downloads to disk

use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::FetchConfig;
use crate::jobs::{FailureReason, HeadersMap};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("failed to write download: {0}")]
    Storage(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DownloadError>;

impl From<DownloadError> for FailureReason {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::HttpStatus(code) => FailureReason::HttpStatus(code),
            DownloadError::Storage(io) => FailureReason::Storage(io.to_string()),
            other => FailureReason::NetworkError(other.to_string()),
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("batchfetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl From<&FetchConfig> for HttpConfig {
    fn from(config: &FetchConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            user_agent: config.user_agent.clone(),
        }
    }
}

/// HTTP downloader shared by every fetch of every job.
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| DownloadError::RequestFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Single GET attempt, streaming the body into `dest`.
    ///
    /// Returns the number of bytes written. A partially written file is left
    /// in place on error; the caller owns cleanup.
    pub async fn download_to(&self, url: &str, headers: &HeadersMap, dest: &Path) -> Result<u64> {
        debug!(url, "Starting download");

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let mut response = request.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus(status.as_u16()));
        }

        let mut file = File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(e))? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(url, size = written, "Download completed");

        Ok(written)
    }

    fn classify(&self, err: reqwest::Error) -> DownloadError {
        if err.is_timeout() {
            DownloadError::Timeout(self.config.request_timeout)
        } else if err.is_redirect() {
            DownloadError::TooManyRedirects
        } else {
            DownloadError::RequestFailed(err.to_string())
        }
    }
}

//! Video Backend
//!
//! The side-channel source: one HTTP POST per chat request that returns a
//! rendered clip as raw bytes.
//!
//! # Wire Format
//!
//! ```text
//! POST {url}
//! accept: application/json
//! content-type: application/json
//!
//! {"text": "..."}
//! ```
//!
//! A 2xx answer carries the video bytes as the body. Anything else is a
//! [`VideoError`]; the relay logs it and carries on without a side channel.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Default video service URL
pub const DEFAULT_VIDEO_URL: &str = "http://ai.connected-in.co.kr:8000/";

/// Default time allowed for one video render
pub const DEFAULT_VIDEO_TIMEOUT: Duration = Duration::from_secs(60);

/// Video backend failures
#[derive(Debug, Error)]
pub enum VideoError {
    /// Could not reach the video service
    #[error("Video service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Video service answered with a non-success status
    #[error("Video service returned {status}: {reason}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Canonical reason phrase
        reason: String,
    },

    /// The render did not finish in time
    #[error("Video service timed out after {0:?}")]
    Timeout(Duration),

    /// The render task panicked or was cancelled
    #[error("Video task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Produces a video clip for a piece of text
#[async_trait]
pub trait VideoBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Render a clip for `text` and return the raw bytes
    async fn generate(&self, text: &str) -> Result<Bytes, VideoError>;
}

/// Video backend talking to an HTTP render service
#[derive(Clone, Debug)]
pub struct HttpVideoBackend {
    url: String,
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpVideoBackend {
    /// Create a backend for the service at `url`
    ///
    /// # Errors
    ///
    /// Returns [`VideoError::Transport`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, VideoError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            http_client,
            timeout,
        })
    }

    /// Service URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Per-request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl VideoBackend for HttpVideoBackend {
    fn name(&self) -> &str {
        "HTTP"
    }

    async fn generate(&self, text: &str) -> Result<Bytes, VideoError> {
        let response = self
            .http_client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VideoError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        tracing::debug!(bytes = bytes.len(), url = %self.url, "Video received");
        Ok(bytes)
    }
}

impl HttpVideoBackend {
    fn classify(&self, error: reqwest::Error) -> VideoError {
        if error.is_timeout() {
            VideoError::Timeout(self.timeout)
        } else {
            VideoError::Transport(error)
        }
    }
}

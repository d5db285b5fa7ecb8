//! Transport abstraction for claim calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::credentials::Credential;

/// Errors raised below the HTTP status layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to build client: {0}")]
    Build(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(Duration::ZERO)
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_builder() {
            TransportError::Build(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// One claim attempt.
#[derive(Debug, Clone, Copy)]
pub struct ClaimRequest<'a> {
    /// Worker issuing the attempt (0-based).
    pub worker_id: usize,
    /// 1-based attempt number within the worker.
    pub attempt: u64,
    /// Resource name being claimed.
    pub resource: &'a str,
    pub credential: &'a Credential,
    /// Relay to route through; `None` means direct.
    pub relay: Option<&'a Url>,
}

/// What the server said.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, in seconds.
    pub retry_after_secs: Option<f64>,
    /// Truncated body, for logging only.
    pub body: String,
}

impl ClaimResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            retry_after_secs: None,
            body: String::new(),
        }
    }

    pub fn with_retry_after(mut self, secs: f64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }
}

/// Issues claim calls. Implementations must be safe to share across workers.
#[async_trait]
pub trait ClaimTransport: Send + Sync {
    async fn claim(&self, request: &ClaimRequest<'_>) -> Result<ClaimResponse, TransportError>;
}

/// Opens a fresh transport for one race.
pub trait TransportFactory: Send + Sync {
    fn open(&self, max_connections: usize) -> Result<Arc<dyn ClaimTransport>, TransportError>;
}

/// Parse a `Retry-After` value given in (possibly fractional) seconds.
pub fn parse_retry_after(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
}

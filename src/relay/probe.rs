//! Relay probing.
//!
//! A relay is healthy if any probe endpoint answers HTTP 200 through it
//! within the timeout.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use url::Url;

use crate::claim::http::build_client;
use crate::claim::TransportError;

/// Sends one probe request through a relay.
#[async_trait]
pub trait RelayProber: Send + Sync {
    /// Returns the response time on HTTP 200.
    async fn probe(
        &self,
        relay: &Url,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Duration, TransportError>;
}

/// Probes relays with real HTTP requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpRelayProber;

#[async_trait]
impl RelayProber for HttpRelayProber {
    async fn probe(
        &self,
        relay: &Url,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Duration, TransportError> {
        let client = build_client(Some(relay), timeout, 1)?;
        let started = Instant::now();
        let response = client.get(endpoint).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::from(e)
            }
        })?;

        if response.status() == reqwest::StatusCode::OK {
            Ok(started.elapsed())
        } else {
            Err(TransportError::Request(format!(
                "probe returned status {}",
                response.status()
            )))
        }
    }
}

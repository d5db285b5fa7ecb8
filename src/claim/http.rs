//! reqwest-backed claim transport.
//!
//! # Responsibilities
//! - Build one connection pool per relay (lazily) plus one direct pool
//! - Issue `PUT {endpoint}` with the bearer credential
//! - Extract status and `Retry-After`

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Proxy};
use url::Url;

use crate::claim::transport::{
    parse_retry_after, ClaimRequest, ClaimResponse, ClaimTransport, TransportError,
    TransportFactory,
};
use crate::config::ClaimConfig;
use crate::observability::metrics;

const BODY_LOG_LIMIT: usize = 200;

/// Build a client routed through `relay` (or direct when `None`).
pub fn build_client(
    relay: Option<&Url>,
    timeout: Duration,
    max_idle_per_host: usize,
) -> Result<Client, TransportError> {
    let builder = Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(max_idle_per_host)
        .tcp_nodelay(true);
    let builder = match relay {
        Some(url) => builder.proxy(Proxy::all(url.as_str())?),
        None => builder.no_proxy(),
    };
    Ok(builder.build()?)
}

/// Creates a fresh [`HttpClaimTransport`] per race.
#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    claim: ClaimConfig,
    timeout: Duration,
}

impl HttpTransportFactory {
    pub fn new(claim: ClaimConfig, timeout: Duration) -> Self {
        Self { claim, timeout }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn open(&self, max_connections: usize) -> Result<Arc<dyn ClaimTransport>, TransportError> {
        let transport = HttpClaimTransport::new(self.claim.clone(), self.timeout, max_connections)?;
        Ok(Arc::new(transport))
    }
}

/// Claim transport owning the connection pools of one race.
#[derive(Debug)]
pub struct HttpClaimTransport {
    claim: ClaimConfig,
    timeout: Duration,
    max_connections: usize,
    direct: Client,
    relayed: DashMap<Url, Client>,
}

impl HttpClaimTransport {
    pub fn new(
        claim: ClaimConfig,
        timeout: Duration,
        max_connections: usize,
    ) -> Result<Self, TransportError> {
        let max_connections = max_connections.max(1);
        Ok(Self {
            direct: build_client(None, timeout, max_connections)?,
            claim,
            timeout,
            max_connections,
            relayed: DashMap::new(),
        })
    }

    fn client_for(&self, relay: Option<&Url>) -> Result<Client, TransportError> {
        let Some(url) = relay else {
            return Ok(self.direct.clone());
        };
        if let Some(client) = self.relayed.get(url) {
            return Ok(client.clone());
        }
        let client = build_client(Some(url), self.timeout, self.max_connections)?;
        Ok(self.relayed.entry(url.clone()).or_insert(client).clone())
    }
}

#[async_trait]
impl ClaimTransport for HttpClaimTransport {
    async fn claim(&self, request: &ClaimRequest<'_>) -> Result<ClaimResponse, TransportError> {
        let client = self.client_for(request.relay)?;
        let url = self.claim.url_for(request.resource);
        let started = Instant::now();

        let response = client
            .put(&url)
            .header(AUTHORIZATION, request.credential.bearer())
            .header(USER_AGENT, &self.claim.user_agent)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(self.timeout)
                } else {
                    TransportError::from(e)
                }
            })?;

        let status = response.status().as_u16();
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > BODY_LOG_LIMIT {
            let cut = (0..=BODY_LOG_LIMIT).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
            body.truncate(cut);
        }
        metrics::record_claim_latency(started.elapsed().as_secs_f64());

        tracing::debug!(
            worker = request.worker_id,
            attempt = request.attempt,
            status,
            via = request.relay.map(Url::as_str).unwrap_or("direct"),
            body = %body,
            "Claim response"
        );

        Ok(ClaimResponse {
            status,
            retry_after_secs,
            body,
        })
    }
}

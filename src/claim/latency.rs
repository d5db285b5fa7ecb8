//! Round-trip timing against the claim host.
//!
//! Issues read-only `GET` requests with a real credential so the numbers
//! reflect the path a claim takes. The results feed `race.lead_ms`.

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::Client;
use url::Url;

use crate::claim::http::build_client;
use crate::claim::transport::TransportError;
use crate::config::ClaimConfig;
use crate::credentials::Credential;

/// Timings gathered by one measurement run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyReport {
    /// Round trips that completed, in issue order.
    pub samples: Vec<Duration>,
    /// Status of each completed round trip.
    pub statuses: Vec<u16>,
    pub failures: usize,
    /// Time from the first request to the last response.
    pub wall: Duration,
}

impl LatencyReport {
    pub fn requests(&self) -> usize {
        self.samples.len() + self.failures
    }

    pub fn min(&self) -> Option<Duration> {
        self.samples.iter().min().copied()
    }

    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }

    pub fn mean(&self) -> Option<Duration> {
        let count = u32::try_from(self.samples.len()).ok().filter(|n| *n > 0)?;
        Some(self.samples.iter().sum::<Duration>() / count)
    }

    pub fn requests_per_sec(&self) -> f64 {
        if self.wall.is_zero() {
            return 0.0;
        }
        self.requests() as f64 / self.wall.as_secs_f64()
    }

    fn push(&mut self, result: Result<(u16, Duration), TransportError>, index: usize) {
        match result {
            Ok((status, elapsed)) => {
                tracing::info!(request = index + 1, ?elapsed, status, "Round trip");
                self.samples.push(elapsed);
                self.statuses.push(status);
            }
            Err(e) => {
                tracing::warn!(request = index + 1, error = %e, "Round trip failed");
                self.failures += 1;
            }
        }
    }
}

/// Times requests to `claim.latency_endpoint`.
#[derive(Debug, Clone)]
pub struct LatencyMeter {
    client: Client,
    url: Url,
    bearer: String,
    user_agent: String,
}

impl LatencyMeter {
    pub fn new(
        claim: &ClaimConfig,
        credential: &Credential,
        relay: Option<&Url>,
        timeout: Duration,
        max_connections: usize,
    ) -> Result<Self, TransportError> {
        let url = Url::parse(&claim.latency_endpoint)
            .map_err(|e| TransportError::Build(format!("{}: {}", claim.latency_endpoint, e)))?;
        Ok(Self {
            client: build_client(relay, timeout, max_connections.max(1))?,
            url,
            bearer: credential.bearer(),
            user_agent: claim.user_agent.clone(),
        })
    }

    async fn round_trip(&self) -> Result<(u16, Duration), TransportError> {
        let started = Instant::now();
        let response = self
            .client
            .get(self.url.clone())
            .header(AUTHORIZATION, &self.bearer)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?;
        let status = response.status().as_u16();
        response.bytes().await?;
        Ok((status, started.elapsed()))
    }

    /// `count` requests one after another, `pause` apart.
    pub async fn sequential(&self, count: usize, pause: Duration) -> LatencyReport {
        let mut report = LatencyReport::default();
        let started = Instant::now();
        for index in 0..count {
            if index > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            report.push(self.round_trip().await, index);
        }
        report.wall = started.elapsed();
        report
    }

    /// `count` requests at once over the shared pool.
    pub async fn concurrent(&self, count: usize) -> LatencyReport {
        let started = Instant::now();
        let results = join_all((0..count).map(|_| self.round_trip())).await;
        let mut report = LatencyReport::default();
        for (index, result) in results.into_iter().enumerate() {
            report.push(result, index);
        }
        report.wall = started.elapsed();
        report
    }
}

//! Clock offset estimation against network time sources.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use serde_json::Value;

use crate::clock::formats::parse_reported_time;
use crate::clock::TimeSyncError;
use crate::config::TimeSyncConfig;
use crate::observability::metrics;

/// Offsets beyond this are worth a warning.
const LARGE_OFFSET_SECS: f64 = 1.0;

/// Fetches the JSON body of a time service.
#[async_trait]
pub trait TimeSourceFetcher: Send + Sync {
    async fn fetch(&self, source: &str, timeout: Duration) -> Result<Value, TimeSyncError>;
}

/// Fetches time sources over HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct HttpTimeFetcher {
    client: Client,
}

impl HttpTimeFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimeSourceFetcher for HttpTimeFetcher {
    async fn fetch(&self, source: &str, timeout: Duration) -> Result<Value, TimeSyncError> {
        let response = self
            .client
            .get(source)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TimeSyncError::Timeout
                } else {
                    TimeSyncError::Request(e.to_string())
                }
            })?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(TimeSyncError::Status(response.status().as_u16()));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| TimeSyncError::Request(e.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SyncState {
    offset_secs: f64,
    last_sync: Option<Instant>,
}

/// Estimates how far the local clock is from true time.
pub struct TimeOracle {
    sources: Vec<String>,
    timeout: Duration,
    resync_after: Duration,
    fetcher: Arc<dyn TimeSourceFetcher>,
    state: ArcSwap<SyncState>,
}

impl std::fmt::Debug for TimeOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeOracle")
            .field("sources", &self.sources)
            .field("offset_secs", &self.offset())
            .finish()
    }
}

impl TimeOracle {
    pub fn from_config(config: &TimeSyncConfig) -> Self {
        Self::with_fetcher(config, Arc::new(HttpTimeFetcher::new()))
    }

    pub fn with_fetcher(config: &TimeSyncConfig, fetcher: Arc<dyn TimeSourceFetcher>) -> Self {
        Self {
            sources: config.sources.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            resync_after: Duration::from_secs(config.resync_after_secs),
            fetcher,
            state: ArcSwap::from_pointee(SyncState::default()),
        }
    }

    /// Current offset in seconds; add it to local time to get true time.
    pub fn offset(&self) -> f64 {
        self.state.load().offset_secs
    }

    pub fn last_synced(&self) -> Option<Instant> {
        self.state.load().last_sync
    }

    /// True if never synced or the last sync is older than the resync window.
    pub fn is_stale(&self) -> bool {
        match self.last_synced() {
            None => true,
            Some(at) => at.elapsed() > self.resync_after,
        }
    }

    /// Local time corrected by the current offset.
    pub fn corrected_now(&self) -> DateTime<Utc> {
        Utc::now() + offset_delta(self.offset())
    }

    pub async fn sync_if_stale(&self) -> f64 {
        if self.is_stale() {
            self.sync().await
        } else {
            self.offset()
        }
    }

    /// Query sources in order; the first parseable answer wins.
    /// Falls back to a zero offset when every source fails.
    pub async fn sync(&self) -> f64 {
        tracing::info!(sources = self.sources.len(), "Synchronizing clock with time sources");

        for source in &self.sources {
            match self.measure(source).await {
                Ok(offset) => {
                    self.store(offset);
                    if offset.abs() > LARGE_OFFSET_SECS {
                        tracing::warn!(
                            source = %source,
                            offset_secs = offset,
                            "System clock is off by more than a second, consider enabling NTP"
                        );
                    } else {
                        tracing::info!(source = %source, offset_secs = offset, "Clock synchronized");
                    }
                    return offset;
                }
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Time source failed");
                }
            }
        }

        tracing::warn!("All time sources failed, falling back to the local clock (offset 0)");
        self.store(0.0);
        0.0
    }

    async fn measure(&self, source: &str) -> Result<f64, TimeSyncError> {
        let started = Instant::now();
        let body = tokio::time::timeout(self.timeout, self.fetcher.fetch(source, self.timeout))
            .await
            .map_err(|_| TimeSyncError::Timeout)??;
        let one_way = started.elapsed().as_secs_f64() / 2.0;

        let reported = parse_reported_time(&body)?;
        let local_now = Utc::now();
        let skew = (reported - local_now)
            .num_microseconds()
            .map(|us| us as f64 / 1e6)
            .unwrap_or_else(|| (reported - local_now).num_milliseconds() as f64 / 1e3);
        Ok(skew - one_way)
    }

    fn store(&self, offset_secs: f64) {
        self.state.store(Arc::new(SyncState {
            offset_secs,
            last_sync: Some(Instant::now()),
        }));
        metrics::record_clock_offset(offset_secs);
    }
}

/// Convert a signed offset in seconds to a chrono delta.
pub fn offset_delta(offset_secs: f64) -> TimeDelta {
    TimeDelta::microseconds((offset_secs * 1e6).round() as i64)
}

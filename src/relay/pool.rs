//! Relay pool.
//!
//! # Responsibilities
//! - Select a relay per attempt (pinned or round-robin)
//! - Track bad relays and recover them on demand, one recovery pass at a time
//! - Probe every relay concurrently

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use futures_util::future::join_all;
use url::Url;

use crate::config::RelayConfig;
use crate::observability::metrics;
use crate::relay::probe::{HttpRelayProber, RelayProber};
use crate::relay::record::{RelayRecord, RelaySnapshot};

/// Aggregate relay statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayStats {
    pub total: usize,
    pub healthy: usize,
    pub bad: usize,
    pub average_response_time_secs: f64,
    pub rotation_enabled: bool,
}

/// Set of relays shared by all workers of a race.
pub struct RelayPool {
    records: Vec<Arc<RelayRecord>>,
    bad: DashSet<Url>,
    cursor: AtomicUsize,
    recovering: AtomicBool,
    rotation_enabled: bool,
    recovery_batch: usize,
    probe_endpoints: Vec<String>,
    probe_timeout: Duration,
    prober: Arc<dyn RelayProber>,
}

impl std::fmt::Debug for RelayPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPool")
            .field("relays", &self.records.len())
            .field("bad", &self.bad.len())
            .field("rotation_enabled", &self.rotation_enabled)
            .finish()
    }
}

impl RelayPool {
    /// Build a pool from configuration using HTTP probes.
    ///
    /// Returns an empty pool when relays are disabled.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::with_prober(config, Arc::new(HttpRelayProber))
    }

    pub fn with_prober(config: &RelayConfig, prober: Arc<dyn RelayProber>) -> Self {
        let mut records = Vec::new();
        if config.enabled {
            for address in &config.addresses {
                match Url::parse(address) {
                    Ok(url) if !records.iter().any(|r: &Arc<RelayRecord>| r.address == url) => {
                        records.push(Arc::new(RelayRecord::new(url)));
                    }
                    Ok(_) => tracing::warn!(relay = %address, "Ignoring duplicate relay address"),
                    Err(e) => tracing::warn!(relay = %address, error = %e, "Ignoring invalid relay address"),
                }
            }
        }
        tracing::info!(
            relays = records.len(),
            rotation = config.rotation_enabled,
            "Relay pool initialized"
        );

        Self {
            records,
            bad: DashSet::new(),
            cursor: AtomicUsize::new(0),
            recovering: AtomicBool::new(false),
            rotation_enabled: config.rotation_enabled,
            recovery_batch: config.recovery_batch,
            probe_endpoints: config.probe_endpoints.clone(),
            probe_timeout: Duration::from_secs(config.timeout_secs.max(1)),
            prober,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if `address` is currently excluded from selection.
    pub fn is_bad(&self, address: &Url) -> bool {
        self.bad.contains(address)
    }

    fn is_usable(&self, record: &RelayRecord) -> bool {
        record.is_healthy() && !self.bad.contains(&record.address)
    }

    fn usable(&self) -> Vec<Arc<RelayRecord>> {
        self.records
            .iter()
            .filter(|r| self.is_usable(r))
            .cloned()
            .collect()
    }

    fn find(&self, address: &Url) -> Option<&Arc<RelayRecord>> {
        self.records.iter().find(|r| &r.address == address)
    }

    /// Pick the relay for the next attempt. `None` means connect directly.
    pub async fn select(&self) -> Option<Url> {
        if self.records.is_empty() {
            return None;
        }

        if !self.rotation_enabled {
            let record = self.records.iter().find(|r| self.is_usable(r))?;
            record.touch();
            return Some(record.address.clone());
        }

        let mut usable = self.usable();
        if usable.is_empty() {
            let Some(_pass) = RecoveryPass::begin(&self.recovering) else {
                tracing::debug!("Relay recovery already running, connecting directly");
                return None;
            };
            self.recover().await;
            usable = self.usable();
        }
        if usable.is_empty() {
            tracing::warn!("No working relays available, connecting directly");
            return None;
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % usable.len();
        let record = &usable[index];
        record.touch();
        Some(record.address.clone())
    }

    /// Mark a relay unhealthy and exclude it from selection.
    pub fn mark_bad(&self, address: &Url) {
        let Some(record) = self.find(address) else {
            return;
        };
        let transitioned = record.mark_failure();
        self.bad.insert(address.clone());
        metrics::record_relay_health(address.as_str(), false);
        if transitioned {
            tracing::warn!(
                relay = %address,
                failures = record.consecutive_failures(),
                "Marked relay as bad"
            );
        }
    }

    /// Mark a relay healthy, optionally recording its response time.
    pub fn mark_good(&self, address: &Url, response_time: Option<Duration>) {
        let Some(record) = self.find(address) else {
            return;
        };
        record.mark_success(response_time);
        if self.bad.remove(address).is_some() {
            tracing::info!(relay = %address, "Relay recovered");
        }
        metrics::record_relay_health(address.as_str(), true);
    }

    /// Probe one relay against each endpoint until one answers 200.
    pub async fn test_relay(&self, address: &Url) -> bool {
        for endpoint in &self.probe_endpoints {
            match self.prober.probe(address, endpoint, self.probe_timeout).await {
                Ok(elapsed) => {
                    self.mark_good(address, Some(elapsed));
                    tracing::debug!(
                        relay = %address,
                        response_time = ?elapsed,
                        "Relay probe succeeded"
                    );
                    return true;
                }
                Err(e) => {
                    tracing::debug!(relay = %address, endpoint = %endpoint, error = %e, "Relay probe failed");
                }
            }
        }
        self.mark_bad(address);
        false
    }

    /// Probe every relay concurrently. Returns the number of working relays.
    pub async fn test_all(&self) -> usize {
        tracing::info!(relays = self.records.len(), "Testing all relays");
        let results = join_all(self.records.iter().map(|r| self.test_relay(&r.address))).await;
        let working = results.into_iter().filter(|ok| *ok).count();
        tracing::info!(working, total = self.records.len(), "Relay test completed");
        working
    }

    /// Re-probe up to `recovery_batch` bad relays.
    async fn recover(&self) {
        let candidates: Vec<Url> = self
            .records
            .iter()
            .filter(|r| !self.is_usable(r))
            .take(self.recovery_batch)
            .map(|r| r.address.clone())
            .collect();
        if candidates.is_empty() {
            return;
        }
        tracing::info!(candidates = candidates.len(), "Attempting to recover bad relays");
        join_all(candidates.iter().map(|url| self.test_relay(url))).await;
    }

    pub fn snapshots(&self) -> Vec<RelaySnapshot> {
        self.records.iter().map(|r| r.snapshot()).collect()
    }

    pub fn stats(&self) -> RelayStats {
        let snapshots = self.snapshots();
        let healthy: Vec<&RelaySnapshot> = snapshots.iter().filter(|s| s.healthy).collect();
        let timed: Vec<f64> = healthy
            .iter()
            .filter_map(|s| s.last_response_time_secs)
            .filter(|t| *t > 0.0)
            .collect();
        let average_response_time_secs = if timed.is_empty() {
            0.0
        } else {
            timed.iter().sum::<f64>() / timed.len() as f64
        };

        RelayStats {
            total: snapshots.len(),
            healthy: healthy.len(),
            bad: self.bad.len(),
            average_response_time_secs,
            rotation_enabled: self.rotation_enabled,
        }
    }
}

/// Held by the single caller running a recovery pass; released on drop, including cancellation.
struct RecoveryPass<'a>(&'a AtomicBool);

impl<'a> RecoveryPass<'a> {
    fn begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RecoveryPass<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

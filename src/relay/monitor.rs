//! Periodic relay health checking.
//!
//! # Responsibilities
//! - Re-probe every relay on a fixed interval
//! - Stop on shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::relay::pool::RelayPool;

pub struct RelayMonitor {
    pool: Arc<RelayPool>,
    interval: Duration,
}

impl RelayMonitor {
    /// A zero interval disables the monitor.
    pub fn new(pool: Arc<RelayPool>, interval: Duration) -> Self {
        Self { pool, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if self.interval.is_zero() || self.pool.is_empty() {
            tracing::info!("Relay health monitor disabled");
            return;
        }

        tracing::info!(interval_secs = self.interval.as_secs(), "Relay health monitor starting");

        // First check one interval from now; callers test relays up front if needed.
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.pool.test_all().await;
                    let stats = self.pool.stats();
                    tracing::info!(
                        healthy = stats.healthy,
                        total = stats.total,
                        avg_response_secs = stats.average_response_time_secs,
                        "Relay health check finished"
                    );
                }
                _ = shutdown.recv() => {
                    tracing::info!("Relay monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

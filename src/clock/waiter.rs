//! High-precision waiting on corrected time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::oracle::TimeOracle;

/// Error a tick callback may return; it is logged and ignored.
pub type TickError = Box<dyn std::error::Error + Send + Sync>;

/// Progress report handed to the tick callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    /// Seconds left until the target, by corrected time.
    pub remaining_secs: f64,
    pub now: DateTime<Utc>,
    pub target: DateTime<Utc>,
}

/// Sleep length for the given remaining time.
pub fn sleep_interval(remaining_secs: f64) -> Duration {
    if remaining_secs > 60.0 {
        Duration::from_secs_f64((remaining_secs - 60.0).min(10.0))
    } else if remaining_secs > 10.0 {
        Duration::from_secs_f64((remaining_secs - 10.0).min(1.0))
    } else if remaining_secs > 1.0 {
        Duration::from_millis(100)
    } else {
        Duration::from_millis(10)
    }
}

/// Suspends until a corrected-time instant.
#[derive(Debug, Clone)]
pub struct PrecisionWaiter {
    oracle: Arc<TimeOracle>,
}

impl PrecisionWaiter {
    pub fn new(oracle: Arc<TimeOracle>) -> Self {
        Self { oracle }
    }

    pub fn oracle(&self) -> &Arc<TimeOracle> {
        &self.oracle
    }

    /// Seconds from corrected now until `target`; negative once passed.
    pub fn remaining(&self, target: DateTime<Utc>) -> f64 {
        seconds_between(self.oracle.corrected_now(), target)
    }

    /// Wait until `target`, calling `on_tick` before every sleep.
    ///
    /// Re-syncs the oracle first if its offset is stale. Returns immediately
    /// when the target has already passed.
    pub async fn wait_until<F>(&self, target: DateTime<Utc>, mut on_tick: Option<F>)
    where
        F: FnMut(&Tick) -> Result<(), TickError>,
    {
        if self.remaining(target) <= 0.0 {
            tracing::debug!(target = %target, "Target already passed, not waiting");
            return;
        }

        self.oracle.sync_if_stale().await;
        tracing::info!(target = %target, offset_secs = self.oracle.offset(), "Waiting for target time");

        loop {
            let now = self.oracle.corrected_now();
            let remaining_secs = seconds_between(now, target);
            if remaining_secs <= 0.0 {
                tracing::info!(late_ms = (-remaining_secs * 1e3) as u64, "Target time reached");
                return;
            }

            if let Some(callback) = on_tick.as_mut() {
                let tick = Tick {
                    remaining_secs,
                    now,
                    target,
                };
                if let Err(e) = callback(&tick) {
                    tracing::warn!(error = %e, "Tick callback failed");
                }
            }

            tokio::time::sleep(sleep_interval(remaining_secs)).await;
        }
    }
}

fn seconds_between(now: DateTime<Utc>, target: DateTime<Utc>) -> f64 {
    (target - now)
        .num_microseconds()
        .map(|us| us as f64 / 1e6)
        .unwrap_or_else(|| (target - now).num_seconds() as f64)
}

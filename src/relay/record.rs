//! Relay record.
//!
//! # Responsibilities
//! - Represent a single relay address
//! - Track health, consecutive failures and timings

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use url::Url;

#[derive(Debug, Default, Clone, Copy)]
struct RelayTimings {
    last_used_at: Option<Instant>,
    last_checked_at: Option<Instant>,
    last_response_time: Option<Duration>,
}

/// A single relay. Toggled between healthy and unhealthy, never removed.
#[derive(Debug)]
pub struct RelayRecord {
    /// The relay URL.
    pub address: Url,
    healthy: AtomicBool,
    consecutive_failures: AtomicUsize,
    timings: Mutex<RelayTimings>,
}

/// Point-in-time copy of a record, for stats and logging.
#[derive(Debug, Clone, PartialEq)]
pub struct RelaySnapshot {
    pub address: Url,
    pub healthy: bool,
    pub consecutive_failures: usize,
    pub last_used_at: Option<Instant>,
    pub last_checked_at: Option<Instant>,
    pub last_response_time_secs: Option<f64>,
}

impl RelayRecord {
    /// New relays start healthy until a probe or request says otherwise.
    pub fn new(address: Url) -> Self {
        Self {
            address,
            healthy: AtomicBool::new(true),
            consecutive_failures: AtomicUsize::new(0),
            timings: Mutex::new(RelayTimings::default()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        self.timings.lock().expect("relay timings mutex poisoned").last_used_at = Some(Instant::now());
    }

    /// Report a successful probe or request. Returns true on an unhealthy → healthy transition.
    pub fn mark_success(&self, response_time: Option<Duration>) -> bool {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut timings = self.timings.lock().expect("relay timings mutex poisoned");
        timings.last_checked_at = Some(Instant::now());
        if response_time.is_some() {
            timings.last_response_time = response_time;
        }
        !self.healthy.swap(true, Ordering::Relaxed)
    }

    /// Report a failed probe or request. Returns true on a healthy → unhealthy transition.
    pub fn mark_failure(&self) -> bool {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.timings.lock().expect("relay timings mutex poisoned").last_checked_at = Some(Instant::now());
        self.healthy.swap(false, Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        let timings = *self.timings.lock().expect("relay timings mutex poisoned");
        RelaySnapshot {
            address: self.address.clone(),
            healthy: self.is_healthy(),
            consecutive_failures: self.consecutive_failures(),
            last_used_at: timings.last_used_at,
            last_checked_at: timings.last_checked_at,
            last_response_time_secs: timings.last_response_time.map(|d| d.as_secs_f64()),
        }
    }
}

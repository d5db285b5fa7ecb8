//! Per-credential rate-limit ledger.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::credentials::{Credential, Fingerprint};
use crate::observability::metrics;

/// Hard cap on a throttle window, whatever the configured ceiling.
const MAX_THROTTLE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Throttle state of one credential. Replaced, never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleRecord {
    /// Instant the server penalty is assumed to end.
    pub throttled_until: Instant,
    /// Instant the last throttle signal was observed.
    pub last_throttled_at: Instant,
}

/// Tracks throttle windows per credential and picks the least-penalized one.
#[derive(Debug)]
pub struct RateLimitLedger {
    records: DashMap<Fingerprint, ThrottleRecord>,
    ceiling: Duration,
}

impl RateLimitLedger {
    /// Create a ledger whose throttle windows never exceed `ceiling`.
    pub fn new(ceiling: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    pub fn is_throttled(&self, credential: &Credential) -> bool {
        self.is_throttled_at(credential, Instant::now())
    }

    pub fn is_throttled_at(&self, credential: &Credential, now: Instant) -> bool {
        self.records
            .get(credential.fingerprint())
            .is_some_and(|r| now < r.throttled_until)
    }

    /// Record a throttle signal; the window is capped at the ceiling.
    pub fn record_throttle(&self, credential: &Credential, retry_after: Duration) -> ThrottleRecord {
        self.record_throttle_at(credential, retry_after, Instant::now())
    }

    pub fn record_throttle_at(
        &self,
        credential: &Credential,
        retry_after: Duration,
        now: Instant,
    ) -> ThrottleRecord {
        let window = retry_after.min(self.ceiling).min(MAX_THROTTLE_WINDOW);
        let record = ThrottleRecord {
            throttled_until: now + window,
            last_throttled_at: now,
        };
        self.records.insert(credential.fingerprint().clone(), record);
        metrics::record_throttle();
        tracing::debug!(
            credential = %credential.fingerprint(),
            ?window,
            "Credential throttled"
        );
        record
    }

    /// Time left on the credential's throttle window, if any.
    pub fn remaining(&self, credential: &Credential) -> Option<Duration> {
        let now = Instant::now();
        self.records
            .get(credential.fingerprint())
            .and_then(|r| r.throttled_until.checked_duration_since(now))
            .filter(|d| !d.is_zero())
    }

    /// Number of credentials currently inside a throttle window.
    pub fn throttled_count(&self) -> usize {
        let now = Instant::now();
        self.records
            .iter()
            .filter(|r| now < r.value().throttled_until)
            .count()
    }

    pub fn pick_best<'a>(&self, candidates: &'a [Credential]) -> Option<&'a Credential> {
        self.pick_best_at(candidates, Instant::now())
    }

    /// Among non-throttled candidates prefer the least recently throttled
    /// (never-throttled first); if all are throttled, the one recovering soonest.
    /// Ties keep candidate order.
    pub fn pick_best_at<'a>(
        &self,
        candidates: &'a [Credential],
        now: Instant,
    ) -> Option<&'a Credential> {
        let states: Vec<(&Credential, Option<ThrottleRecord>)> = candidates
            .iter()
            .map(|c| (c, self.records.get(c.fingerprint()).map(|r| *r)))
            .collect();

        let available = states
            .iter()
            .filter(|(_, r)| r.map_or(true, |r| now >= r.throttled_until))
            .min_by_key(|(_, r)| r.map(|r| r.last_throttled_at));
        if let Some((credential, _)) = available {
            return Some(*credential);
        }

        states
            .iter()
            .filter_map(|(c, r)| r.map(|r| (*c, r.throttled_until)))
            .min_by_key(|(_, until)| *until)
            .map(|(c, _)| c)
    }
}

//! Response classification and per-class backoff.
//!
//! # Classes
//! - 200 Claimed: the race is won
//! - 400 Unavailable: name taken or invalid, normal delay
//! - 401 Unauthorized: credential invalid, keep looping at normal delay
//! - 403 Cooldown: identity cooldown, fixed longer delay
//! - 404 Ineligible: credential cannot claim, normal delay
//! - 429 RateLimited: throttle the credential, sleep min(retry_after, ceiling)
//! - anything else: normal delay
//! - transport failure: short fixed delay

use std::time::Duration;

use crate::claim::transport::ClaimResponse;
use crate::config::{RaceConfig, RateLimitConfig};

/// Classified result of one attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClaimOutcome {
    Claimed,
    Unavailable,
    Unauthorized,
    Cooldown,
    Ineligible,
    RateLimited { retry_after: Duration },
    Unexpected(u16),
    TransportFailed,
}

impl ClaimOutcome {
    /// Classify a server response. A 429 without `Retry-After` uses `default_retry_after`.
    pub fn classify(response: &ClaimResponse, default_retry_after: Duration) -> Self {
        match response.status {
            200 => ClaimOutcome::Claimed,
            400 => ClaimOutcome::Unavailable,
            401 => ClaimOutcome::Unauthorized,
            403 => ClaimOutcome::Cooldown,
            404 => ClaimOutcome::Ineligible,
            429 => ClaimOutcome::RateLimited {
                retry_after: response
                    .retry_after_secs
                    .map(saturating_secs)
                    .unwrap_or(default_retry_after),
            },
            other => ClaimOutcome::Unexpected(other),
        }
    }

    /// Metric/log label.
    pub fn label(&self) -> &'static str {
        match self {
            ClaimOutcome::Claimed => "claimed",
            ClaimOutcome::Unavailable => "unavailable",
            ClaimOutcome::Unauthorized => "unauthorized",
            ClaimOutcome::Cooldown => "cooldown",
            ClaimOutcome::Ineligible => "ineligible",
            ClaimOutcome::RateLimited { .. } => "rate_limited",
            ClaimOutcome::Unexpected(_) => "unexpected",
            ClaimOutcome::TransportFailed => "transport_error",
        }
    }
}

/// Seconds to a `Duration`, clamped to `[0, Duration::MAX]`. NaN maps to zero.
pub fn saturating_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Delay table applied between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub attempt_delay: Duration,
    pub error_delay: Duration,
    pub cooldown_delay: Duration,
    pub rate_limit_ceiling: Duration,
    pub default_retry_after: Duration,
}

impl BackoffPolicy {
    pub fn from_config(race: &RaceConfig, rate_limit: &RateLimitConfig) -> Self {
        Self {
            attempt_delay: Duration::from_millis(race.attempt_delay_ms),
            error_delay: Duration::from_millis(race.error_delay_ms),
            cooldown_delay: Duration::from_millis(race.cooldown_delay_ms),
            rate_limit_ceiling: saturating_secs(rate_limit.ceiling_secs),
            default_retry_after: saturating_secs(rate_limit.default_retry_after_secs),
        }
    }

    /// How long a worker sleeps after `outcome`. `Claimed` never sleeps.
    pub fn delay_for(&self, outcome: &ClaimOutcome) -> Duration {
        match outcome {
            ClaimOutcome::Claimed => Duration::ZERO,
            ClaimOutcome::Cooldown => self.cooldown_delay,
            ClaimOutcome::RateLimited { retry_after } => (*retry_after).min(self.rate_limit_ceiling),
            ClaimOutcome::TransportFailed => self.error_delay,
            ClaimOutcome::Unavailable
            | ClaimOutcome::Unauthorized
            | ClaimOutcome::Ineligible
            | ClaimOutcome::Unexpected(_) => self.attempt_delay,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RaceConfig::default(), &RateLimitConfig::default())
    }
}

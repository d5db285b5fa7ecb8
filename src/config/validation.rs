//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (workers > 0, durations > 0, finite second counts)
//! - Validate URLs (relays, probes, time sources, claim endpoint)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SniperConfig → Result<(), Vec<ValidationError>>
//! - Missing credentials are reported at race time, not here

use thiserror::Error;
use url::Url;

use crate::config::schema::SniperConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("{field} must be a finite number of seconds")]
    MustBeFinite { field: &'static str },

    #[error("claim endpoint must contain a {{name}} placeholder")]
    MissingNamePlaceholder,

    #[error("relays are enabled but no relay addresses are configured")]
    NoRelays,

    #[error("invalid URL in {field}: '{value}'")]
    InvalidUrl { field: &'static str, value: String },

    #[error("at least one time source is required")]
    NoTimeSources,
}

/// Validate a parsed configuration.
pub fn validate_config(config: &SniperConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let positive: [(&'static str, bool); 4] = [
        ("race.concurrent_workers", config.race.concurrent_workers > 0),
        ("race.race_duration_ms", config.race.race_duration_ms > 0),
        ("rate_limit.ceiling_secs", config.rate_limit.ceiling_secs > 0.0),
        ("notifications.queue_capacity", config.notifications.queue_capacity > 0),
    ];
    for (field, ok) in positive {
        if !ok {
            errors.push(ValidationError::MustBePositive { field });
        }
    }

    let seconds = [
        ("rate_limit.ceiling_secs", config.rate_limit.ceiling_secs),
        ("rate_limit.default_retry_after_secs", config.rate_limit.default_retry_after_secs),
    ];
    for (field, value) in seconds {
        if !value.is_finite() || value < 0.0 {
            errors.push(ValidationError::MustBeFinite { field });
        }
    }

    if !config.claim.endpoint.contains("{name}") {
        errors.push(ValidationError::MissingNamePlaceholder);
    } else if Url::parse(&config.claim.url_for("probe")).is_err() {
        errors.push(ValidationError::InvalidUrl {
            field: "claim.endpoint",
            value: config.claim.endpoint.clone(),
        });
    }

    check_urls(&mut errors, "claim.latency_endpoint", std::slice::from_ref(&config.claim.latency_endpoint));

    if config.relays.enabled && config.relays.addresses.is_empty() {
        errors.push(ValidationError::NoRelays);
    }
    check_urls(&mut errors, "relays.addresses", &config.relays.addresses);
    check_urls(&mut errors, "relays.probe_endpoints", &config.relays.probe_endpoints);

    if config.time_sync.sources.is_empty() {
        errors.push(ValidationError::NoTimeSources);
    }
    check_urls(&mut errors, "time_sync.sources", &config.time_sync.sources);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_urls(errors: &mut Vec<ValidationError>, field: &'static str, values: &[String]) {
    for value in values {
        if Url::parse(value).is_err() {
            errors.push(ValidationError::InvalidUrl {
                field,
                value: value.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&SniperConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = SniperConfig::default();
        config.race.concurrent_workers = 0;
        config.claim.endpoint = "https://example.com/name".into();
        config.relays.enabled = true;
        config.time_sync.sources.clear();

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::MustBePositive {
            field: "race.concurrent_workers"
        }));
        assert!(errors.contains(&ValidationError::MissingNamePlaceholder));
        assert!(errors.contains(&ValidationError::NoRelays));
        assert!(errors.contains(&ValidationError::NoTimeSources));
    }

    #[test]
    fn test_rejects_bad_relay_url() {
        let mut config = SniperConfig::default();
        config.relays.addresses = vec!["not a url".into()];
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::InvalidUrl {
                field: "relays.addresses",
                value: "not a url".into()
            }]
        );
    }

    #[test]
    fn test_rejects_non_finite_rate_limit_seconds() {
        let mut config = SniperConfig::default();
        config.rate_limit.ceiling_secs = f64::INFINITY;
        config.rate_limit.default_retry_after_secs = f64::NAN;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::MustBeFinite {
                    field: "rate_limit.ceiling_secs"
                },
                ValidationError::MustBeFinite {
                    field: "rate_limit.default_retry_after_secs"
                },
            ]
        );
    }

    #[test]
    fn test_missing_credentials_is_not_a_validation_error() {
        let config = SniperConfig::default();
        assert!(config.credentials.tokens.is_empty());
        assert!(validate_config(&config).is_ok());
    }
}

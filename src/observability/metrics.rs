//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sniper_claim_attempts_total` (counter): claim attempts by outcome class
//! - `sniper_claim_latency_seconds` (histogram): claim round-trip latency
//! - `sniper_relay_health` (gauge): 1=healthy, 0=unhealthy, per relay
//! - `sniper_clock_offset_seconds` (gauge): last measured clock offset
//! - `sniper_credential_throttled_total` (counter): 429s recorded in the ledger
//! - `sniper_races_total` (counter): settled races by outcome
//! - `sniper_notifications_dropped_total` (counter): events lost to a full queue
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on the given address.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_claim_attempt(class: &'static str) {
    counter!("sniper_claim_attempts_total", "class" => class).increment(1);
}

pub fn record_claim_latency(seconds: f64) {
    histogram!("sniper_claim_latency_seconds").record(seconds);
}

pub fn record_relay_health(relay: &str, healthy: bool) {
    gauge!("sniper_relay_health", "relay" => relay.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_clock_offset(offset_secs: f64) {
    gauge!("sniper_clock_offset_seconds").set(offset_secs);
}

pub fn record_throttle() {
    counter!("sniper_credential_throttled_total").increment(1);
}

pub fn record_race(success: bool) {
    let outcome = if success { "claimed" } else { "exhausted" };
    counter!("sniper_races_total", "outcome" => outcome).increment(1);
}

pub fn record_notification_dropped() {
    counter!("sniper_notifications_dropped_total").increment(1);
}

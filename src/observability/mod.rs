//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatcher, workers, relay pool, time oracle, notifier
//!     → logging.rs (tracing events inside the per-race span)
//!     → metrics.rs (attempt classes, latency, relay health, clock offset)
//!
//! Sinks:
//!     → stdout, pretty for terminals or JSON for log shippers
//!     → Prometheus scrape endpoint when metrics are enabled
//! ```
//!
//! # Design Decisions
//! - Every race span carries a `race_id` so interleaved worker logs group cleanly
//! - Recorder calls are no-ops until an exporter is installed

pub mod logging;
pub mod metrics;

//! Clock correction subsystem.
//!
//! # Data Flow
//! ```text
//! oracle.rs sync():
//!     for each source (ordered):
//!         fetch JSON (bounded timeout), measure round trip
//!         → formats.rs (detect schema by keys, parse to UTC)
//!         → offset = reported − local_now − rtt/2
//!         first parseable source wins
//!     all failed → offset = 0 (warning)
//!
//! waiter.rs wait_until(target):
//!     stale offset? → sync()
//!     loop: remaining = target − corrected_now
//!           ≤ 0 → return
//!           on_tick(remaining) → adaptive sleep → re-measure
//! ```
//!
//! # Design Decisions
//! - Offset math is independent of source schemas; new sources only add a format
//! - Sync failure degrades to the local clock, never aborts a race
//! - The waiter always re-measures after sleeping

pub mod formats;
pub mod oracle;
pub mod waiter;

use thiserror::Error;

pub use formats::{parse_reported_time, TimeFormat};
pub use oracle::{HttpTimeFetcher, TimeOracle, TimeSourceFetcher};
pub use waiter::{sleep_interval, PrecisionWaiter, Tick, TickError};

/// Errors from a single time source. Never fatal.
#[derive(Debug, Error)]
pub enum TimeSyncError {
    #[error("time source returned status {0}")]
    Status(u16),

    #[error("time source request failed: {0}")]
    Request(String),

    #[error("time source timed out")]
    Timeout,

    #[error("no known time fields in response")]
    UnknownSchema,

    #[error("unparseable time value '{value}': {reason}")]
    Parse { value: String, reason: String },
}

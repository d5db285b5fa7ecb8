//! Relay (proxy) management subsystem.
//!
//! # Data Flow
//! ```text
//! Configured addresses → record.rs (one RelayRecord each, never destroyed)
//!
//! Worker attempt:
//!     pool.rs select()
//!         rotation off → first healthy, non-bad relay
//!         rotation on  → healthy list, round-robin cursor
//!                      → empty? recovery pass (probe.rs, ≤ recovery_batch bad relays)
//!                      → still empty? None (direct connection)
//!     transport error via relay → mark_bad
//!
//! monitor.rs: every interval → pool.test_all() (probe.rs, concurrent)
//! ```
//!
//! # Design Decisions
//! - Health is eventually consistent: bad relays are excluded, then recovered
//! - A separate "bad" set keeps the hot path from scanning every record
//! - Probing goes through a trait so tests need no real proxies

pub mod monitor;
pub mod pool;
pub mod probe;
pub mod record;

pub use monitor::RelayMonitor;
pub use pool::{RelayPool, RelayStats};
pub use probe::{HttpRelayProber, RelayProber};
pub use record::{RelayRecord, RelaySnapshot};

//! Timed claim races.
//!
//! # Data Flow
//! ```text
//! ClaimDispatcher::snipe_at_time(target, name)
//!     → PrecisionWaiter (countdown notifications while armed)
//!     → N workers sharing one transport, relay pool and rate-limit ledger
//!     → first 200 settles the race, siblings wind down
//!     → RaceResult (+ result notification, race metric)
//! ```
//!
//! # Design Decisions
//! - Workers are assigned credentials round-robin and fall back to the least
//!   throttled credential while their own is throttled
//! - A hard deadline bounds every race regardless of outcome
//! - Shutdown abandons in-flight requests; a win only stops new ones

pub mod countdown;
pub mod dispatcher;
pub mod result;
mod worker;

pub use countdown::{drop_windows, format_remaining, CountdownSchedule, DEFAULT_WINDOW_OFFSETS};
pub use dispatcher::{ClaimDispatcher, RacePhase};
pub use result::{RaceError, RaceResult, WorkerReport};

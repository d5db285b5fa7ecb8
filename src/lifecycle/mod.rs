//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → every subscribed race stops its workers
//!            → relay monitor exits its loop
//!            → per-race transport dropped, notifier drained
//! ```
//!
//! # Design Decisions
//! - Shutdown is a broadcast plus a sticky flag; late subscribers check the flag first
//! - A race subscribes only for its own duration

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;

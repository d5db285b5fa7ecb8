//! Claim subsystem.
//!
//! # Data Flow
//! ```text
//! Race start:
//!     TransportFactory::open(concurrency) → Arc<dyn ClaimTransport> (one per race)
//!
//! Worker attempt:
//!     ClaimRequest (resource, credential, relay?)
//!     → transport.rs (PUT endpoint/{name}, Bearer credential, via relay)
//!     → ClaimResponse (status + Retry-After) | TransportError
//!     → outcome.rs (classify) → BackoffPolicy (delay before next attempt)
//! ```
//!
//! # Design Decisions
//! - Status codes carry all race signal; bodies are only logged
//! - The transport is opened per race and dropped when the race settles
//! - Transport is a trait so races can run against scripted fakes
//! - `latency.rs` times read-only requests over the same client setup

pub mod http;
pub mod latency;
pub mod outcome;
pub mod transport;

pub use http::{HttpClaimTransport, HttpTransportFactory};
pub use latency::{LatencyMeter, LatencyReport};
pub use outcome::{BackoffPolicy, ClaimOutcome};
pub use transport::{
    ClaimRequest, ClaimResponse, ClaimTransport, TransportError, TransportFactory,
};

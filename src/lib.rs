//! Drop sniper library.
//!
//! Races a fleet of concurrent claim workers against a resource that becomes
//! available at a known instant. Time is corrected against network sources,
//! traffic can be spread over relays, and credentials that hit rate limits are
//! rotated out until their penalty window expires.

pub mod claim;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod lifecycle;
pub mod notify;
pub mod observability;
pub mod race;
pub mod relay;

pub use config::schema::SniperConfig;
pub use lifecycle::Shutdown;
pub use race::{ClaimDispatcher, RaceResult};

//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! sniper.toml
//!     → loader.rs (read & deserialize)
//!     → validation.rs (collect every semantic error)
//!     → SniperConfig
//!     → sections cloned into the dispatcher, relay pool and time oracle
//! ```
//!
//! # Design Decisions
//! - Loaded once at startup; no reload while a race may be armed
//! - Every section has defaults, so an empty file is a valid config
//! - Syntax errors come from serde, range and URL errors from validation

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ClaimConfig, CredentialsConfig, LogFormat, NotificationConfig, ObservabilityConfig,
    RaceConfig, RateLimitConfig, RelayConfig, SniperConfig, TimeSyncConfig,
};

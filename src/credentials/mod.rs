//! Credentials and per-credential throttle tracking.
//!
//! # Data Flow
//! ```text
//! config tokens → Credential (secret + SHA-256 fingerprint)
//!
//! Worker attempt:
//!     ledger.is_throttled(home credential)?
//!         no  → use it
//!         yes → ledger.pick_best(all credentials)
//!     429 observed → ledger.record_throttle(credential, retry_after)
//! ```
//!
//! # Design Decisions
//! - The ledger is keyed by fingerprint; the raw secret never becomes a key
//! - Each throttle update replaces the record wholesale
//! - Throttle windows are capped at `rate_limit.ceiling_secs`

pub mod ledger;

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

pub use ledger::{RateLimitLedger, ThrottleRecord};

/// Stable, non-secret identifier for a credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque bearer secret identifying one account.
#[derive(Clone)]
pub struct Credential {
    secret: Arc<str>,
    fingerprint: Fingerprint,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        let secret: String = secret.into();
        let digest = Sha256::digest(secret.as_bytes());
        let fingerprint = Fingerprint(hex::encode(&digest[..8]));
        Self {
            secret: secret.into(),
            fingerprint,
        }
    }

    /// The raw secret, for the `Authorization` header only.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Value of the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.secret)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for Credential {}

/// Build credentials from configured tokens, skipping blanks.
pub fn from_tokens(tokens: &[String]) -> Vec<Credential> {
    tokens
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(Credential::new)
        .collect()
}

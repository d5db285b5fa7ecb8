//! Race results and errors.

use serde::Serialize;
use thiserror::Error;

use crate::claim::TransportError;

/// Reasons a race could not run. Rendered into a failed [`RaceResult`].
#[derive(Debug, Error)]
pub enum RaceError {
    #[error("a race is already in progress on this dispatcher")]
    AlreadyRacing,

    #[error("no credential configured")]
    NoCredentials,

    #[error("no target instants given")]
    NoTargets,

    #[error("transport unavailable: {0}")]
    Transport(#[from] TransportError),

    #[error("shutdown requested before the race started")]
    Shutdown,
}

/// What one worker did during a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub attempts: u64,
    /// This worker's success settled the race.
    pub won: bool,
    /// This worker saw a success after the race was already settled.
    pub late_success: bool,
}

/// Final, immutable outcome of a race.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaceResult {
    pub success: bool,
    pub resource_name: String,
    /// Sum of attempts across all workers.
    pub total_attempts: u64,
    pub elapsed_secs: f64,
    pub error_message: Option<String>,
    /// Attempts per worker, indexed by worker id.
    pub worker_attempts: Vec<u64>,
}

impl RaceResult {
    /// A result for a race that never started.
    pub fn failed(resource: &str, error: impl ToString) -> Self {
        Self {
            success: false,
            resource_name: resource.to_string(),
            total_attempts: 0,
            elapsed_secs: 0.0,
            error_message: Some(error.to_string()),
            worker_attempts: Vec::new(),
        }
    }

    pub(crate) fn from_reports(
        resource: &str,
        mut reports: Vec<WorkerReport>,
        elapsed_secs: f64,
        error_message: Option<String>,
    ) -> Self {
        reports.sort_by_key(|r| r.worker_id);
        let success = reports.iter().any(|r| r.won);
        Self {
            success,
            resource_name: resource.to_string(),
            total_attempts: reports.iter().map(|r| r.attempts).sum(),
            elapsed_secs,
            error_message: if success { None } else { error_message },
            worker_attempts: reports.iter().map(|r| r.attempts).collect(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        (self.elapsed_secs * 1000.0).round() as u64
    }
}

//! Sink that writes notifications to the log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::notify::{NotificationSink, NotifyError};

/// Logs every event through `tracing`. Used when no external sink is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify_status(&self, text: &str) -> Result<(), NotifyError> {
        tracing::info!(target: "drop_sniper::notify", "{}", text);
        Ok(())
    }

    async fn notify_countdown(
        &self,
        resource: &str,
        time_remaining: &str,
        target: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            target: "drop_sniper::notify",
            resource,
            drop_time = %target.format("%Y-%m-%d %H:%M:%S UTC"),
            "{} available in {}",
            resource,
            time_remaining
        );
        Ok(())
    }

    async fn notify_result(
        &self,
        resource: &str,
        success: bool,
        attempts: u64,
        elapsed_ms: Option<u64>,
        error: Option<&str>,
    ) -> Result<(), NotifyError> {
        if success {
            tracing::info!(target: "drop_sniper::notify", resource, attempts, elapsed_ms, "Claimed {}", resource);
        } else {
            tracing::warn!(
                target: "drop_sniper::notify",
                resource,
                attempts,
                elapsed_ms,
                error = error.unwrap_or("unknown"),
                "Failed to claim {}",
                resource
            );
        }
        Ok(())
    }
}

//! Notification boundary.
//!
//! # Data Flow
//! ```text
//! race / waiter (timing critical)
//!     → Notifier::status / countdown / result   (try_send, never blocks)
//!     → bounded mpsc queue
//!     → delivery task → NotificationSink (may be slow or fail)
//! ```
//!
//! # Design Decisions
//! - A full queue drops the event instead of stalling the caller
//! - Sink errors are logged by the delivery task and go no further
//! - Formatting and transport of messages belong to the sink

pub mod log_sink;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::observability::metrics;

pub use log_sink::LogSink;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Receives race events. Implemented outside the core.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_status(&self, text: &str) -> Result<(), NotifyError>;

    async fn notify_countdown(
        &self,
        resource: &str,
        time_remaining: &str,
        target: DateTime<Utc>,
    ) -> Result<(), NotifyError>;

    async fn notify_result(
        &self,
        resource: &str,
        success: bool,
        attempts: u64,
        elapsed_ms: Option<u64>,
        error: Option<&str>,
    ) -> Result<(), NotifyError>;
}

/// An event queued for delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    Status(String),
    Countdown {
        resource: String,
        time_remaining: String,
        target: DateTime<Utc>,
    },
    Result {
        resource: String,
        success: bool,
        attempts: u64,
        elapsed_ms: Option<u64>,
        error: Option<String>,
    },
}

impl NotificationEvent {
    async fn deliver(&self, sink: &dyn NotificationSink) -> Result<(), NotifyError> {
        match self {
            NotificationEvent::Status(text) => sink.notify_status(text).await,
            NotificationEvent::Countdown {
                resource,
                time_remaining,
                target,
            } => sink.notify_countdown(resource, time_remaining, *target).await,
            NotificationEvent::Result {
                resource,
                success,
                attempts,
                elapsed_ms,
                error,
            } => {
                sink.notify_result(resource, *success, *attempts, *elapsed_ms, error.as_deref())
                    .await
            }
        }
    }
}

/// Fire-and-forget handle onto the notification queue.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::Sender<NotificationEvent>>,
}

/// The delivery task; join it after every [`Notifier`] clone is dropped.
#[derive(Debug)]
pub struct NotifierTask {
    handle: JoinHandle<()>,
}

impl NotifierTask {
    /// Wait for the queue to drain.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Notification task ended abnormally");
        }
    }
}

impl Notifier {
    /// Start a delivery task for `sink` behind a queue of `capacity` events.
    pub fn spawn(sink: Arc<dyn NotificationSink>, capacity: usize) -> (Self, NotifierTask) {
        let (tx, mut rx) = mpsc::channel::<NotificationEvent>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = event.deliver(sink.as_ref()).await {
                    tracing::warn!(error = %e, "Notification delivery failed");
                }
            }
            tracing::debug!("Notification queue closed");
        });
        (Self { tx: Some(tx) }, NotifierTask { handle })
    }

    /// A notifier that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn status(&self, text: impl Into<String>) {
        self.push(NotificationEvent::Status(text.into()));
    }

    pub fn countdown(&self, resource: &str, time_remaining: impl Into<String>, target: DateTime<Utc>) {
        self.push(NotificationEvent::Countdown {
            resource: resource.to_string(),
            time_remaining: time_remaining.into(),
            target,
        });
    }

    pub fn result(
        &self,
        resource: &str,
        success: bool,
        attempts: u64,
        elapsed_ms: Option<u64>,
        error: Option<String>,
    ) {
        self.push(NotificationEvent::Result {
            resource: resource.to_string(),
            success,
            attempts,
            elapsed_ms,
            error,
        });
    }

    fn push(&self, event: NotificationEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                metrics::record_notification_dropped();
                tracing::warn!(?event, "Notification queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Notification queue closed, dropping event");
            }
        }
    }
}

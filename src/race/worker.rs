//! One claim worker.
//!
//! # Loop
//! ```text
//! stopped or past deadline? → exit
//! pick relay, pick credential
//! claim (abandoned on abort or deadline)
//! classify → ledger / relay health / metrics
//! success → settle the race (first one wins) and exit
//! sleep per outcome (capped at the deadline, cut short when the race settles)
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::time::Instant;
use url::Url;

use crate::claim::{BackoffPolicy, ClaimOutcome, ClaimRequest, ClaimTransport, TransportError};
use crate::credentials::{Credential, RateLimitLedger};
use crate::observability::metrics;
use crate::race::result::WorkerReport;
use crate::relay::RelayPool;

const PROGRESS_EVERY: u64 = 10;

/// Signal shared by every worker of one race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RaceSignal {
    Running,
    /// A worker claimed the resource. Siblings finish their current attempt and exit.
    Settled,
    /// Shutdown. In-flight attempts are abandoned.
    Aborted,
}

/// Settlement state of one race.
#[derive(Debug)]
pub(crate) struct RaceControl {
    settled: AtomicBool,
    settled_at: OnceLock<Instant>,
    signal: watch::Sender<RaceSignal>,
}

impl RaceControl {
    pub(crate) fn new() -> Self {
        let (signal, _) = watch::channel(RaceSignal::Running);
        Self {
            settled: AtomicBool::new(false),
            settled_at: OnceLock::new(),
            signal,
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<RaceSignal> {
        self.signal.subscribe()
    }

    /// Settle the race. Only the first caller gets `true`.
    pub(crate) fn settle(&self) -> bool {
        if self
            .settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let _ = self.settled_at.set(Instant::now());
        self.signal.send_if_modified(|signal| {
            if *signal == RaceSignal::Running {
                *signal = RaceSignal::Settled;
                true
            } else {
                false
            }
        });
        true
    }

    pub(crate) fn abort(&self) {
        self.signal.send_replace(RaceSignal::Aborted);
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    pub(crate) fn settled_at(&self) -> Option<Instant> {
        self.settled_at.get().copied()
    }
}

/// Everything a worker needs; cloned once per worker.
#[derive(Clone)]
pub(crate) struct Worker {
    pub id: usize,
    pub resource: Arc<str>,
    pub credentials: Arc<[Credential]>,
    /// Index of this worker's assigned credential.
    pub home: usize,
    pub transport: Arc<dyn ClaimTransport>,
    pub relays: Arc<RelayPool>,
    pub ledger: Arc<RateLimitLedger>,
    pub policy: BackoffPolicy,
    pub deadline: Instant,
    pub control: Arc<RaceControl>,
}

impl Worker {
    /// The assigned credential unless it is throttled, otherwise the least throttled one.
    fn credential(&self) -> &Credential {
        let home = &self.credentials[self.home];
        if self.ledger.is_throttled(home) {
            self.ledger.pick_best(&self.credentials).unwrap_or(home)
        } else {
            home
        }
    }

    pub(crate) async fn run(self) -> WorkerReport {
        let mut signal = self.control.subscribe();
        let mut report = WorkerReport {
            worker_id: self.id,
            attempts: 0,
            won: false,
            late_success: false,
        };
        tracing::debug!(worker = self.id, "Worker started");

        loop {
            if *signal.borrow() != RaceSignal::Running || Instant::now() >= self.deadline {
                break;
            }

            report.attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = wait_for(&mut signal, |s| s == RaceSignal::Aborted) => break,
                _ = tokio::time::sleep_until(self.deadline) => break,
                outcome = self.attempt(report.attempts) => outcome,
            };
            metrics::record_claim_attempt(outcome.label());

            match outcome {
                ClaimOutcome::Claimed => {
                    if self.control.settle() {
                        report.won = true;
                        tracing::info!(
                            worker = self.id,
                            attempts = report.attempts,
                            resource = %self.resource,
                            "Claim succeeded"
                        );
                    } else {
                        report.late_success = true;
                        tracing::debug!(worker = self.id, "Race already settled, discarding late success");
                    }
                    break;
                }
                ClaimOutcome::Unauthorized => {
                    tracing::warn!(worker = self.id, "Credential rejected (401)");
                }
                ClaimOutcome::Cooldown => {
                    tracing::warn!(worker = self.id, "Identity on cooldown (403)");
                }
                ClaimOutcome::Unexpected(status) => {
                    tracing::warn!(worker = self.id, status, "Unexpected claim status");
                }
                _ => {}
            }

            if report.attempts % PROGRESS_EVERY == 0 {
                tracing::info!(worker = self.id, attempts = report.attempts, "Worker progress");
            }

            let delay = self.policy.delay_for(&outcome).min(self.until_deadline());
            if !delay.is_zero() {
                tokio::select! {
                    _ = wait_for(&mut signal, |s| s != RaceSignal::Running) => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        tracing::debug!(worker = self.id, attempts = report.attempts, "Worker finished");
        report
    }

    fn until_deadline(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Issue one claim and fold its effects into the shared state.
    ///
    /// A panic while claiming or classifying counts as a transport failure; the worker keeps going.
    async fn attempt(&self, attempt: u64) -> ClaimOutcome {
        let relay = self.relays.select().await;
        let credential = self.credential();
        let request = ClaimRequest {
            worker_id: self.id,
            attempt,
            resource: &self.resource,
            credential,
            relay: relay.as_ref(),
        };

        let default_retry_after = self.policy.default_retry_after;
        let result = AssertUnwindSafe(async {
            let response = self.transport.claim(&request).await?;
            Ok::<_, TransportError>(ClaimOutcome::classify(&response, default_retry_after))
        })
        .catch_unwind()
        .await;
        match result {
            Ok(Ok(outcome)) => {
                self.relay_reached(relay.as_ref());
                if let ClaimOutcome::RateLimited { retry_after } = outcome {
                    let record = self.ledger.record_throttle(credential, retry_after);
                    tracing::warn!(
                        worker = self.id,
                        credential = %credential.fingerprint(),
                        ?retry_after,
                        throttled_for = ?record
                            .throttled_until
                            .saturating_duration_since(record.last_throttled_at),
                        "Rate limited"
                    );
                }
                outcome
            }
            Ok(Err(e)) => {
                tracing::warn!(worker = self.id, relay = ?relay.as_ref().map(Url::as_str), error = %e, "Claim request failed");
                if let Some(relay) = &relay {
                    self.relays.mark_bad(relay);
                }
                ClaimOutcome::TransportFailed
            }
            Err(_) => {
                tracing::error!(worker = self.id, attempt, "Claim transport panicked");
                ClaimOutcome::TransportFailed
            }
        }
    }

    fn relay_reached(&self, relay: Option<&Url>) {
        if let Some(relay) = relay {
            if self.relays.is_bad(relay) {
                self.relays.mark_good(relay, None);
            }
        }
    }
}

/// Resolve once `pred` holds for the current signal. A closed channel counts as aborted.
async fn wait_for(
    signal: &mut watch::Receiver<RaceSignal>,
    pred: impl Fn(RaceSignal) -> bool,
) {
    loop {
        let current = *signal.borrow_and_update();
        if pred(current) {
            return;
        }
        if signal.changed().await.is_err() {
            return;
        }
    }
}

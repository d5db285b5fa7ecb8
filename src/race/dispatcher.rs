//! Race dispatcher.
//!
//! Arms a race for a target instant, waits on corrected time, then runs the
//! worker fleet until the first success or the hard deadline.
//!
//! # Phases
//! ```text
//! Idle → Armed (waiting for target − lead) → Racing → Settled
//! ```
//! Only one race may be armed or running per dispatcher.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::claim::{BackoffPolicy, ClaimTransport, HttpTransportFactory, TransportFactory};
use crate::clock::{PrecisionWaiter, Tick, TickError, TimeOracle};
use crate::config::{RaceConfig, SniperConfig};
use crate::credentials::{self, Credential, RateLimitLedger};
use crate::lifecycle::Shutdown;
use crate::notify::Notifier;
use crate::observability::metrics;
use crate::race::countdown::{format_remaining, CountdownSchedule};
use crate::race::result::{RaceError, RaceResult};
use crate::race::worker::{RaceControl, Worker};
use crate::relay::RelayPool;

/// Per-second logging starts this close to the drop.
const CLOSE_RANGE_SECS: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RacePhase {
    Idle = 0,
    Armed = 1,
    Racing = 2,
    Settled = 3,
}

impl RacePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RacePhase::Armed,
            2 => RacePhase::Racing,
            3 => RacePhase::Settled,
            _ => RacePhase::Idle,
        }
    }

    fn is_active(&self) -> bool {
        matches!(self, RacePhase::Armed | RacePhase::Racing)
    }
}

/// Holds the dispatcher in an active phase; settles it on drop.
struct PhaseGuard<'a> {
    phase: &'a AtomicU8,
}

impl<'a> PhaseGuard<'a> {
    fn arm(phase: &'a AtomicU8) -> Result<Self, RaceError> {
        phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if RacePhase::from_u8(current).is_active() {
                    None
                } else {
                    Some(RacePhase::Armed as u8)
                }
            })
            .map_err(|_| RaceError::AlreadyRacing)?;
        Ok(Self { phase })
    }

    fn advance(&self, next: RacePhase) {
        self.phase.store(next as u8, Ordering::Release);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.phase.store(RacePhase::Settled as u8, Ordering::Release);
    }
}

/// Runs timed claim races for one resource at a time.
pub struct ClaimDispatcher {
    race: RaceConfig,
    policy: BackoffPolicy,
    countdown_intervals: Vec<u64>,
    credentials: Arc<[Credential]>,
    ledger: Arc<RateLimitLedger>,
    relays: Arc<RelayPool>,
    waiter: PrecisionWaiter,
    transports: Arc<dyn TransportFactory>,
    notifier: Notifier,
    shutdown: Shutdown,
    phase: AtomicU8,
}

impl std::fmt::Debug for ClaimDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimDispatcher")
            .field("phase", &self.phase())
            .field("workers", &self.race.concurrent_workers)
            .field("credentials", &self.credentials.len())
            .field("relays", &self.relays)
            .finish()
    }
}

impl ClaimDispatcher {
    /// Build a dispatcher with HTTP transports, relays and time sources from `config`.
    ///
    /// Notifications start disabled; attach a queue with [`with_notifier`](Self::with_notifier).
    pub fn from_config(config: &SniperConfig) -> Self {
        let timeout = Duration::from_secs(config.race.request_timeout_secs.max(1));
        let policy = BackoffPolicy::from_config(&config.race, &config.rate_limit);
        Self {
            race: config.race.clone(),
            policy,
            countdown_intervals: config.notifications.countdown_intervals_secs.clone(),
            credentials: credentials::from_tokens(&config.credentials.tokens).into(),
            ledger: Arc::new(RateLimitLedger::new(policy.rate_limit_ceiling)),
            relays: Arc::new(RelayPool::from_config(&config.relays)),
            waiter: PrecisionWaiter::new(Arc::new(TimeOracle::from_config(&config.time_sync))),
            transports: Arc::new(HttpTransportFactory::new(config.claim.clone(), timeout)),
            notifier: Notifier::disabled(),
            shutdown: Shutdown::new(),
            phase: AtomicU8::new(RacePhase::Idle as u8),
        }
    }

    pub fn with_transport(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = transports;
        self
    }

    pub fn with_relays(mut self, relays: Arc<RelayPool>) -> Self {
        self.relays = relays;
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<TimeOracle>) -> Self {
        self.waiter = PrecisionWaiter::new(oracle);
        self
    }

    pub fn with_credentials(mut self, credentials: Vec<Credential>) -> Self {
        self.credentials = credentials.into();
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn phase(&self) -> RacePhase {
        RacePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn relays(&self) -> &Arc<RelayPool> {
        &self.relays
    }

    pub fn oracle(&self) -> &Arc<TimeOracle> {
        self.waiter.oracle()
    }

    pub fn ledger(&self) -> &Arc<RateLimitLedger> {
        &self.ledger
    }

    /// Race for `resource` at `target` (corrected time).
    ///
    /// Never returns an error: every failure, including a rejected re-entrant
    /// call, is reported as an unsuccessful [`RaceResult`].
    pub async fn snipe_at_time(&self, target: DateTime<Utc>, resource: &str) -> RaceResult {
        let guard = match PhaseGuard::arm(&self.phase) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(resource, error = %e, "Snipe request rejected");
                return RaceResult::failed(resource, e);
            }
        };

        let race_id = Uuid::new_v4();
        let span = tracing::info_span!("race", %race_id, resource, target = %target);
        let result = match self.run_race(target, resource, &guard).instrument(span.clone()).await {
            Ok(result) => result,
            Err(e) => {
                span.in_scope(|| tracing::error!(error = %e, "Race could not run"));
                RaceResult::failed(resource, e)
            }
        };
        drop(guard);

        metrics::record_race(result.success);
        self.notifier.result(
            resource,
            result.success,
            result.total_attempts,
            Some(result.elapsed_ms()),
            result.error_message.clone(),
        );
        result
    }

    /// Try each target in order until one race succeeds.
    ///
    /// Attempts and elapsed time are summed across the windows tried.
    pub async fn snipe_with_fallback(&self, targets: &[DateTime<Utc>], resource: &str) -> RaceResult {
        if targets.is_empty() {
            return RaceResult::failed(resource, RaceError::NoTargets);
        }

        let pause = Duration::from_millis(self.race.fallback_pause_ms);
        let mut total_attempts = 0;
        let mut total_elapsed = 0.0;
        let mut last = None;

        for (index, target) in targets.iter().enumerate() {
            if index > 0 {
                if self.shutdown.is_triggered() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = self.shutdown.wait() => break,
                }
            }

            tracing::info!(window = index + 1, windows = targets.len(), target = %target, "Trying drop window");
            let result = self.snipe_at_time(*target, resource).await;
            total_attempts += result.total_attempts;
            total_elapsed += result.elapsed_secs;
            if result.success {
                return RaceResult {
                    total_attempts,
                    elapsed_secs: total_elapsed,
                    ..result
                };
            }
            last = Some(result);
        }

        let mut result = last.unwrap_or_else(|| RaceResult::failed(resource, RaceError::Shutdown));
        result.total_attempts = total_attempts;
        result.elapsed_secs = total_elapsed;
        result
    }

    async fn run_race(
        &self,
        target: DateTime<Utc>,
        resource: &str,
        guard: &PhaseGuard<'_>,
    ) -> Result<RaceResult, RaceError> {
        if self.credentials.is_empty() {
            return Err(RaceError::NoCredentials);
        }

        let start_at = target - TimeDelta::from_std(self.race.lead()).unwrap_or(TimeDelta::zero());
        tracing::info!(
            workers = self.race.concurrent_workers,
            credentials = self.credentials.len(),
            lead_ms = self.race.lead_ms,
            "Sniper armed"
        );
        self.notifier.status(format!(
            "Sniper armed for {} at {} ({} workers, {} credentials)",
            resource,
            target.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            self.race.concurrent_workers,
            self.credentials.len()
        ));

        self.wait_for_start(start_at, target, resource).await?;

        guard.advance(RacePhase::Racing);
        let transport = self.transports.open(self.race.concurrent_workers)?;
        Ok(self.run_workers(transport, resource).await)
    }

    async fn wait_for_start(
        &self,
        start_at: DateTime<Utc>,
        target: DateTime<Utc>,
        resource: &str,
    ) -> Result<(), RaceError> {
        let lead_secs = self.race.lead_ms as f64 / 1e3;
        let mut schedule = CountdownSchedule::new(&self.countdown_intervals);
        let mut last_logged = None;
        let notifier = &self.notifier;

        let on_tick = |tick: &Tick| -> Result<(), TickError> {
            let to_drop = tick.remaining_secs + lead_secs;
            if let Some(interval) = schedule.due(to_drop) {
                notifier.countdown(resource, format_remaining(interval), target);
            }
            if to_drop <= CLOSE_RANGE_SECS {
                let whole = to_drop.ceil() as u64;
                if last_logged != Some(whole) {
                    last_logged = Some(whole);
                    tracing::info!(seconds = whole, "Drop approaching");
                }
            }
            Ok(())
        };

        if self.shutdown.is_triggered() {
            return Err(RaceError::Shutdown);
        }
        tokio::select! {
            _ = self.waiter.wait_until(start_at, Some(on_tick)) => Ok(()),
            _ = self.shutdown.wait() => Err(RaceError::Shutdown),
        }
    }

    async fn run_workers(&self, transport: Arc<dyn ClaimTransport>, resource: &str) -> RaceResult {
        let control = Arc::new(RaceControl::new());
        let workers = self.race.concurrent_workers.max(1);
        let started = Instant::now();
        let deadline = started + self.race.race_duration();
        let name: Arc<str> = Arc::from(resource);

        tracing::info!(
            workers,
            duration_ms = self.race.race_duration_ms,
            relays = self.relays.len(),
            "Race started"
        );

        let mut tasks = JoinSet::new();
        for id in 0..workers {
            let worker = Worker {
                id,
                resource: name.clone(),
                credentials: self.credentials.clone(),
                home: id % self.credentials.len(),
                transport: transport.clone(),
                relays: self.relays.clone(),
                ledger: self.ledger.clone(),
                policy: self.policy,
                deadline,
                control: control.clone(),
            };
            tasks.spawn(worker.run().in_current_span());
        }

        let mut shutdown = self.shutdown.subscribe();
        let mut aborted = self.shutdown.is_triggered();
        if aborted {
            control.abort();
        }

        let mut reports = Vec::with_capacity(workers);
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(report)) => reports.push(report),
                    Some(Err(e)) => tracing::error!(error = %e, "Worker task failed"),
                    None => break,
                },
                _ = shutdown.recv(), if !aborted => {
                    aborted = true;
                    tracing::warn!("Shutdown requested, aborting race");
                    control.abort();
                }
            }
        }
        drop(transport);

        let elapsed = control
            .settled_at()
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(started);
        let error = if aborted && !control.is_settled() {
            "race aborted by shutdown".to_string()
        } else {
            format!("failed to claim {} within {:.1}s", resource, self.race.race_duration().as_secs_f64())
        };
        let result = RaceResult::from_reports(resource, reports, elapsed.as_secs_f64(), Some(error));

        if result.success {
            tracing::info!(
                attempts = result.total_attempts,
                elapsed_ms = result.elapsed_ms(),
                "Race won"
            );
        } else {
            tracing::warn!(
                attempts = result.total_attempts,
                elapsed_ms = result.elapsed_ms(),
                throttled_credentials = self.ledger.throttled_count(),
                "Race lost"
            );
        }
        result
    }
}

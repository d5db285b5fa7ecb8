//! End-to-end race scenarios against scripted transports.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use url::Url;

use drop_sniper::claim::{ClaimRequest, ClaimResponse, ClaimTransport, TransportError};
use drop_sniper::config::RelayConfig;
use drop_sniper::credentials::Credential;
use drop_sniper::notify::{NotificationSink, Notifier, NotifyError};
use drop_sniper::race::{ClaimDispatcher, RacePhase};
use drop_sniper::relay::{RelayPool, RelayProber};
use drop_sniper::{SniperConfig, Shutdown};

mod common;
use common::{offline_oracle, ScriptedFactory, ScriptedTransport, SharedFactory};

fn config(workers: usize, duration_ms: u64) -> SniperConfig {
    let mut config = SniperConfig::default();
    config.race.concurrent_workers = workers;
    config.race.race_duration_ms = duration_ms;
    config.race.lead_ms = 0;
    config.race.fallback_pause_ms = 10;
    config
}

fn dispatcher(config: &SniperConfig, factory: Arc<ScriptedFactory>, credentials: Vec<Credential>) -> ClaimDispatcher {
    ClaimDispatcher::from_config(config)
        .with_transport(factory)
        .with_oracle(offline_oracle())
        .with_credentials(credentials)
}

fn creds(n: usize) -> Vec<Credential> {
    (0..n).map(|i| Credential::new(format!("token-{}", i))).collect()
}

#[tokio::test]
async fn test_unavailable_name_runs_until_deadline() {
    let transport = ScriptedTransport::new(Duration::from_millis(2), |_| Ok(ClaimResponse::new(400)));
    let factory = ScriptedFactory::new(transport.clone());
    let sniper = dispatcher(&config(3, 300), factory.clone(), creds(2));

    let result = sniper.snipe_at_time(Utc::now(), "Notch").await;

    assert!(!result.success);
    assert!(result.total_attempts > 0);
    // An attempt cut off by the deadline may never reach the transport.
    let calls = transport.calls.load(Ordering::SeqCst);
    assert!(calls > 0 && calls <= result.total_attempts);
    assert_eq!(result.worker_attempts.len(), 3);
    assert!(
        (0.25..0.6).contains(&result.elapsed_secs),
        "elapsed {}",
        result.elapsed_secs
    );
    assert!(result.error_message.is_some());
    assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
    assert_eq!(sniper.phase(), RacePhase::Settled);
}

#[tokio::test]
async fn test_throttled_credential_rotates_to_healthy_one() {
    let throttled = Credential::new("token-a");
    let healthy = Credential::new("token-b");
    let throttled_fp = throttled.fingerprint().to_string();
    let healthy_fp = healthy.fingerprint().to_string();

    let healthy_calls = Arc::new(Mutex::new(0u32));
    let counter = healthy_calls.clone();
    let script_fp = throttled_fp.clone();
    let transport = ScriptedTransport::new(Duration::from_millis(5), move |request| {
        if request.credential.fingerprint().as_str() == script_fp {
            return Ok(ClaimResponse::new(429).with_retry_after(2.0));
        }
        let mut calls = counter.lock().unwrap();
        *calls += 1;
        Ok(ClaimResponse::new(if *calls >= 3 { 200 } else { 400 }))
    });
    let factory = ScriptedFactory::new(transport.clone());
    let sniper = dispatcher(&config(4, 5_000), factory, vec![throttled.clone(), healthy]);

    let result = sniper.snipe_at_time(Utc::now(), "Notch").await;

    assert!(result.success);
    assert!(result.elapsed_secs < 1.0, "elapsed {}", result.elapsed_secs);
    assert!(sniper.ledger().is_throttled(&throttled));
    // Throttled workers never retried their own credential.
    let throttled_calls = transport.calls_for_credential(&throttled_fp);
    assert!((1..=2).contains(&throttled_calls), "throttled calls {}", throttled_calls);
    assert!(transport.calls_for_credential(&healthy_fp) >= 3);
}

#[tokio::test]
async fn test_winning_attempt_is_counted_exactly() {
    let transport = ScriptedTransport::new(Duration::from_millis(1), |request| {
        if request.worker_id == 2 && request.attempt == 5 {
            Ok(ClaimResponse::new(200))
        } else {
            Ok(ClaimResponse::new(400))
        }
    });
    let sniper = dispatcher(&config(4, 5_000), ScriptedFactory::new(transport.clone()), creds(2));

    let result = sniper.snipe_at_time(Utc::now(), "Notch").await;

    assert!(result.success);
    assert_eq!(result.worker_attempts[2], 5);
    assert_eq!(result.total_attempts, result.worker_attempts.iter().sum::<u64>());
    assert_eq!(result.error_message, None);
    assert!(result.elapsed_secs < 1.0);
}

#[tokio::test]
async fn test_simultaneous_successes_settle_once() {
    let transport = ScriptedTransport::new(Duration::from_millis(20), |_| Ok(ClaimResponse::new(200)));
    let sniper = dispatcher(&config(2, 5_000), ScriptedFactory::new(transport), creds(1));

    let result = sniper.snipe_at_time(Utc::now(), "Notch").await;

    assert!(result.success);
    assert_eq!(result.worker_attempts, vec![1, 1]);
}

#[tokio::test]
async fn test_deadline_abandons_slow_requests() {
    let transport = ScriptedTransport::new(Duration::from_secs(5), |_| Ok(ClaimResponse::new(200)));
    let sniper = dispatcher(&config(2, 200), ScriptedFactory::new(transport), creds(1));

    let started = Instant::now();
    let result = sniper.snipe_at_time(Utc::now(), "Notch").await;

    assert!(!result.success);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_second_race_while_armed_is_rejected() {
    let transport = ScriptedTransport::new(Duration::ZERO, |_| Ok(ClaimResponse::new(200)));
    let sniper = Arc::new(dispatcher(&config(1, 1_000), ScriptedFactory::new(transport), creds(1)));

    let first = tokio::spawn({
        let sniper = sniper.clone();
        async move { sniper.snipe_at_time(Utc::now() + TimeDelta::milliseconds(300), "Notch").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sniper.phase(), RacePhase::Armed);

    let second = sniper.snipe_at_time(Utc::now(), "Jeb").await;
    assert!(!second.success);
    assert_eq!(second.total_attempts, 0);
    assert!(second.error_message.unwrap().contains("already in progress"));

    let first = first.await.unwrap();
    assert!(first.success);
    assert_eq!(sniper.phase(), RacePhase::Settled);
}

#[tokio::test]
async fn test_missing_credentials_fail_without_racing() {
    let transport = ScriptedTransport::new(Duration::ZERO, |_| Ok(ClaimResponse::new(200)));
    let factory = ScriptedFactory::new(transport.clone());
    let sniper = dispatcher(&config(4, 1_000), factory.clone(), Vec::new());

    let result = sniper.snipe_at_time(Utc::now(), "Notch").await;

    assert!(!result.success);
    assert_eq!(result.total_attempts, 0);
    assert_eq!(result.error_message.as_deref(), Some("no credential configured"));
    assert_eq!(factory.opened.load(Ordering::SeqCst), 0);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shutdown_aborts_running_race() {
    let transport = ScriptedTransport::new(Duration::from_millis(5), |_| Ok(ClaimResponse::new(400)));
    let shutdown = Shutdown::new();
    let sniper = Arc::new(
        dispatcher(&config(3, 10_000), ScriptedFactory::new(transport), creds(1)).with_shutdown(shutdown.clone()),
    );

    let race = tokio::spawn({
        let sniper = sniper.clone();
        async move { sniper.snipe_at_time(Utc::now(), "Notch").await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.trigger();

    let result = tokio::time::timeout(Duration::from_secs(1), race).await.unwrap().unwrap();
    assert!(!result.success);
    assert!(result.total_attempts > 0);
    assert_eq!(result.error_message.as_deref(), Some("race aborted by shutdown"));
}

#[tokio::test]
async fn test_shutdown_while_armed_never_races() {
    let transport = ScriptedTransport::new(Duration::ZERO, |_| Ok(ClaimResponse::new(200)));
    let factory = ScriptedFactory::new(transport);
    let shutdown = Shutdown::new();
    let sniper = Arc::new(
        dispatcher(&config(2, 1_000), factory.clone(), creds(1)).with_shutdown(shutdown.clone()),
    );

    let race = tokio::spawn({
        let sniper = sniper.clone();
        async move { sniper.snipe_at_time(Utc::now() + TimeDelta::seconds(30), "Notch").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.trigger();

    let result = tokio::time::timeout(Duration::from_secs(1), race).await.unwrap().unwrap();
    assert!(!result.success);
    assert!(result.error_message.unwrap().contains("shutdown"));
    assert_eq!(factory.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fallback_moves_to_next_window() {
    let opened_at = Instant::now();
    let transport = ScriptedTransport::new(Duration::from_millis(2), move |_| {
        if opened_at.elapsed() > Duration::from_millis(300) {
            Ok(ClaimResponse::new(200))
        } else {
            Ok(ClaimResponse::new(400))
        }
    });
    let factory = ScriptedFactory::new(transport);
    let sniper = dispatcher(&config(2, 200), factory.clone(), creds(1));

    let now = Utc::now();
    let targets: Vec<DateTime<Utc>> = vec![now, now + TimeDelta::milliseconds(100), now + TimeDelta::milliseconds(200)];
    let result = sniper.snipe_with_fallback(&targets, "Notch").await;

    assert!(result.success);
    assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
    assert!(result.total_attempts > result.worker_attempts.iter().sum::<u64>());
}

#[tokio::test]
async fn test_fallback_without_targets() {
    let transport = ScriptedTransport::new(Duration::ZERO, |_| Ok(ClaimResponse::new(200)));
    let sniper = dispatcher(&config(1, 100), ScriptedFactory::new(transport), creds(1));
    let result = sniper.snipe_with_fallback(&[], "Notch").await;
    assert!(!result.success);
    assert_eq!(result.error_message.as_deref(), Some("no target instants given"));
}

#[tokio::test]
async fn test_huge_retry_after_keeps_workers_racing() {
    let transport = ScriptedTransport::new(Duration::ZERO, |_| {
        Ok(ClaimResponse::new(429).with_retry_after(1e20))
    });
    let sniper = dispatcher(&config(2, 300), ScriptedFactory::new(transport.clone()), creds(2));

    let result = sniper.snipe_at_time(Utc::now(), "Notch").await;

    assert!(!result.success);
    assert_eq!(result.worker_attempts.len(), 2);
    assert!(result.total_attempts >= 2);
    assert!(transport.calls.load(Ordering::SeqCst) >= 2);
    assert!(
        (0.25..0.6).contains(&result.elapsed_secs),
        "elapsed {}",
        result.elapsed_secs
    );
}

#[tokio::test]
async fn test_panicking_transport_is_retried() {
    let transport = ScriptedTransport::new(Duration::ZERO, |request| {
        if request.attempt == 1 {
            panic!("connection pool corrupted");
        }
        Ok(ClaimResponse::new(200))
    });
    let sniper = dispatcher(&config(1, 2_000), ScriptedFactory::new(transport), creds(1));

    let result = sniper.snipe_at_time(Utc::now(), "Notch").await;

    assert!(result.success);
    assert_eq!(result.worker_attempts, vec![2]);
    assert_eq!(result.total_attempts, 2);
}

#[tokio::test]
async fn test_cooldown_slows_the_worker() {
    let transport = ScriptedTransport::new(Duration::ZERO, |_| Ok(ClaimResponse::new(403)));
    let mut cfg = config(1, 500);
    cfg.race.cooldown_delay_ms = 150;
    let sniper = dispatcher(&cfg, ScriptedFactory::new(transport), creds(1));

    let result = sniper.snipe_at_time(Utc::now(), "Notch").await;

    assert!(!result.success);
    // Attempts at roughly 0, 150, 300 and 450 ms.
    assert!((3..=4).contains(&result.total_attempts), "attempts {}", result.total_attempts);
}

#[tokio::test]
async fn test_rate_limit_sleep_is_capped_in_race() {
    let transport = ScriptedTransport::new(Duration::ZERO, |_| {
        Ok(ClaimResponse::new(429).with_retry_after(60.0))
    });
    let mut cfg = config(1, 600);
    cfg.rate_limit.ceiling_secs = 0.1;
    let sniper = dispatcher(&cfg, ScriptedFactory::new(transport), creds(1));

    let result = sniper.snipe_at_time(Utc::now(), "Notch").await;

    assert!(!result.success);
    // Uncapped, the worker would sleep through the whole race after one attempt.
    assert!((4..=7).contains(&result.total_attempts), "attempts {}", result.total_attempts);
}

/// Relay checker that never reaches anything.
struct Unreachable;

#[async_trait]
impl RelayProber for Unreachable {
    async fn probe(&self, _relay: &Url, _endpoint: &str, _timeout: Duration) -> Result<Duration, TransportError> {
        Err(TransportError::Connect("unreachable".into()))
    }
}

/// Worker 0 fails its first request through a relay at once; worker 1 answers slowly through it.
struct FlakyRelayTransport {
    seen: Mutex<Vec<(usize, u64, Option<String>)>>,
}

#[async_trait]
impl ClaimTransport for FlakyRelayTransport {
    async fn claim(&self, request: &ClaimRequest<'_>) -> Result<ClaimResponse, TransportError> {
        self.seen.lock().unwrap().push((
            request.worker_id,
            request.attempt,
            request.relay.map(|r| r.to_string()),
        ));
        if request.worker_id == 0 && request.attempt == 1 && request.relay.is_some() {
            return Err(TransportError::Connect("connection reset".into()));
        }
        if request.worker_id == 1 {
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        Ok(ClaimResponse::new(400))
    }
}

#[tokio::test]
async fn test_relay_failure_and_recovery_during_race() {
    const RELAY: &str = "http://10.0.9.1:8080/";
    let relay = Url::parse(RELAY).unwrap();
    let relay_config = RelayConfig {
        enabled: true,
        addresses: vec![RELAY.into()],
        rotation_enabled: false,
        ..RelayConfig::default()
    };
    let pool = Arc::new(RelayPool::with_prober(&relay_config, Arc::new(Unreachable)));
    let transport = Arc::new(FlakyRelayTransport {
        seen: Mutex::new(Vec::new()),
    });
    let sniper = Arc::new(
        ClaimDispatcher::from_config(&config(2, 400))
            .with_transport(Arc::new(SharedFactory(transport.clone())))
            .with_oracle(offline_oracle())
            .with_credentials(creds(2))
            .with_relays(pool.clone()),
    );

    let race = tokio::spawn({
        let sniper = sniper.clone();
        async move { sniper.snipe_at_time(Utc::now(), "Notch").await }
    });
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(pool.is_bad(&relay), "relay should be excluded after the failed request");

    let result = race.await.unwrap();
    assert!(!result.success);
    // Worker 1's request through the relay completed, so the relay is back.
    assert!(!pool.is_bad(&relay));
    assert_eq!(pool.stats().bad, 0);

    let seen = transport.seen.lock().unwrap().clone();
    assert!(seen.contains(&(0, 1, Some(RELAY.to_string()))));
    assert!(seen.contains(&(1, 1, Some(RELAY.to_string()))));
    // While excluded, worker 0 connected directly.
    assert!(seen.contains(&(0, 2, None)), "{:?}", seen);
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify_status(&self, _text: &str) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push("status".into());
        Ok(())
    }

    async fn notify_countdown(&self, _resource: &str, time_remaining: &str, _target: DateTime<Utc>) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(format!("countdown:{}", time_remaining));
        Ok(())
    }

    async fn notify_result(
        &self,
        resource: &str,
        success: bool,
        _attempts: u64,
        _elapsed_ms: Option<u64>,
        _error: Option<&str>,
    ) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(format!("result:{}:{}", resource, success));
        Ok(())
    }
}

#[tokio::test]
async fn test_race_emits_status_countdown_and_result() {
    let transport = ScriptedTransport::new(Duration::ZERO, |_| Ok(ClaimResponse::new(200)));
    let mut cfg = config(1, 1_000);
    cfg.notifications.countdown_intervals_secs = vec![1];
    let sink = Arc::new(RecordingSink::default());
    let (notifier, task) = Notifier::spawn(sink.clone(), 16);
    let sniper = dispatcher(&cfg, ScriptedFactory::new(transport), creds(1)).with_notifier(notifier);

    let result = sniper
        .snipe_at_time(Utc::now() + TimeDelta::milliseconds(1_500), "Notch")
        .await;
    assert!(result.success);

    drop(sniper);
    task.join().await;
    let events = sink.events.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("status"));
    assert!(events.contains(&"countdown:1 second(s)".to_string()), "{:?}", events);
    assert_eq!(events.last().map(String::as_str), Some("result:Notch:true"));
}

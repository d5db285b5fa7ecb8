//! drop-sniper
//!
//! # Architecture Overview
//!
//! ```text
//!   config (TOML) ──▶ ClaimDispatcher ──────────────────────────────┐
//!                        │                                           │
//!                        ├─ clock:  TimeOracle ─▶ PrecisionWaiter    │
//!                        ├─ relay:  RelayPool ◀── RelayMonitor       │
//!                        ├─ credentials: RateLimitLedger             │
//!                        └─ claim:  TransportFactory ─▶ N workers ───┼──▶ claim endpoint
//!                                                                    │
//!   notify: Notifier ─▶ queue ─▶ NotificationSink   ◀── race events ─┘
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use drop_sniper::claim::{LatencyMeter, LatencyReport};
use drop_sniper::config::{load_config, ConfigError, SniperConfig};
use drop_sniper::credentials;
use drop_sniper::lifecycle::{signals, Shutdown};
use drop_sniper::notify::{LogSink, Notifier};
use drop_sniper::observability::{logging, metrics};
use drop_sniper::race::{drop_windows, ClaimDispatcher, DEFAULT_WINDOW_OFFSETS};
use drop_sniper::relay::RelayMonitor;

#[derive(Parser)]
#[command(name = "drop-sniper")]
#[command(about = "Claim a resource the instant it drops", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "sniper.toml")]
    config: PathBuf,

    /// Extra bearer token (repeatable); appended to the configured ones
    #[arg(short, long = "token")]
    tokens: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Race for a name at the given instant (RFC 3339)
    Snipe {
        #[arg(long)]
        name: String,

        #[arg(long)]
        at: DateTime<Utc>,

        /// Also try the standard fallback windows after the drop instant
        #[arg(long)]
        windows: bool,
    },
    /// Measure the local clock offset and exit
    SyncTime,
    /// Probe every configured relay and print its health
    TestRelays,
    /// Time round trips to the claim host to help tune `race.lead_ms`
    SpeedTest {
        /// Sequential requests
        #[arg(long, default_value_t = 10)]
        count: usize,

        /// Size of an extra burst of simultaneous requests (0 skips it)
        #[arg(long, default_value_t = 0)]
        concurrent: usize,

        /// Pause between sequential requests, in milliseconds
        #[arg(long, default_value_t = 100)]
        pause_ms: u64,
    },
    /// Check the configuration file and list every problem found
    ValidateConfig,
}

fn load(path: &Path) -> Result<SniperConfig, ConfigError> {
    if !path.exists() && path == Path::new("sniper.toml") {
        return Ok(SniperConfig::default());
    }
    load_config(path)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::ValidateConfig) {
        return if validate(&cli.config) { ExitCode::SUCCESS } else { ExitCode::FAILURE };
    }

    let mut config = match load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: failed to load {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    config.credentials.tokens.extend(cli.tokens);

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("warning: logging already initialized: {}", e);
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "drop-sniper starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    match run(cli.command, config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "drop-sniper failed");
            ExitCode::FAILURE
        }
    }
}

/// Load `path` without falling back to defaults and report every problem.
fn validate(path: &Path) -> bool {
    match load_config(path) {
        Ok(config) => {
            println!("{}: configuration is valid", path.display());
            println!("  workers:      {}", config.race.concurrent_workers);
            println!("  lead:         {}ms", config.race.lead_ms);
            println!("  duration:     {}ms", config.race.race_duration_ms);
            println!("  credentials:  {}", config.credentials.tokens.len());
            println!(
                "  relays:       {}",
                if config.relays.enabled {
                    config.relays.addresses.len().to_string()
                } else {
                    "disabled".into()
                }
            );
            true
        }
        Err(ConfigError::Validation(errors)) => {
            println!("{}: {} problem(s) found", path.display(), errors.len());
            for error in &errors {
                println!("  - {}", error);
            }
            false
        }
        Err(e) => {
            eprintln!("error: failed to load {}: {}", path.display(), e);
            false
        }
    }
}

fn print_report(label: &str, report: &LatencyReport) {
    let ms = |d: Option<Duration>| d.map(|d| format!("{:.0}ms", d.as_secs_f64() * 1e3)).unwrap_or_else(|| "-".into());
    println!(
        "{}: {}/{} ok  min {}  avg {}  max {}",
        label,
        report.samples.len(),
        report.requests(),
        ms(report.min()),
        ms(report.mean()),
        ms(report.max())
    );
}

async fn run(command: Commands, config: SniperConfig) -> Result<bool, Box<dyn std::error::Error>> {
    let shutdown = Shutdown::new();
    tokio::spawn(signals::wait_for_signal(shutdown.clone()));

    let dispatcher = ClaimDispatcher::from_config(&config).with_shutdown(shutdown.clone());

    match command {
        Commands::SyncTime => {
            let offset = dispatcher.oracle().sync().await;
            println!("clock offset: {:+.3}s", offset);
            Ok(true)
        }
        Commands::TestRelays => {
            let relays = dispatcher.relays();
            if relays.is_empty() {
                println!("no relays configured");
                return Ok(true);
            }
            let working = relays.test_all().await;
            for snapshot in relays.snapshots() {
                println!(
                    "{:<40} {:<9} {}",
                    snapshot.address.as_str(),
                    if snapshot.healthy { "healthy" } else { "bad" },
                    snapshot
                        .last_response_time_secs
                        .map(|t| format!("{:.0}ms", t * 1e3))
                        .unwrap_or_else(|| "-".into())
                );
            }
            println!("{}/{} relays working", working, relays.len());
            Ok(working > 0)
        }
        Commands::SpeedTest {
            count,
            concurrent,
            pause_ms,
        } => {
            let credentials = credentials::from_tokens(&config.credentials.tokens);
            let Some(credential) = credentials.first() else {
                return Err("speed-test needs a credential (config or --token)".into());
            };
            let timeout = Duration::from_secs(config.race.request_timeout_secs.max(1));
            let meter = LatencyMeter::new(&config.claim, credential, None, timeout, concurrent.max(1))?;

            println!("timing {} request(s) to {}", count, config.claim.latency_endpoint);
            let sequential = meter.sequential(count, Duration::from_millis(pause_ms)).await;
            print_report("sequential", &sequential);

            if concurrent > 0 {
                println!("timing a burst of {} simultaneous request(s)", concurrent);
                let burst = meter.concurrent(concurrent).await;
                print_report("burst", &burst);
                println!("  throughput: {:.1} req/s", burst.requests_per_sec());
            }
            Ok(!sequential.samples.is_empty())
        }
        // Answered in `main` before logging starts.
        Commands::ValidateConfig => Ok(true),
        Commands::Snipe { name, at, windows } => {
            let (notifier, task) = if config.notifications.enabled {
                let (notifier, task) = Notifier::spawn(Arc::new(LogSink), config.notifications.queue_capacity);
                (notifier, Some(task))
            } else {
                (Notifier::disabled(), None)
            };
            let dispatcher = dispatcher.with_notifier(notifier);

            if !dispatcher.relays().is_empty() {
                dispatcher.relays().test_all().await;
                let monitor = RelayMonitor::new(
                    dispatcher.relays().clone(),
                    Duration::from_secs(config.relays.health_check_interval_secs),
                );
                tokio::spawn(monitor.run(shutdown.subscribe()));
            }

            let result = if windows {
                dispatcher
                    .snipe_with_fallback(&drop_windows(at, &DEFAULT_WINDOW_OFFSETS), &name)
                    .await
            } else {
                dispatcher.snipe_at_time(at, &name).await
            };
            println!("{}", serde_json::to_string_pretty(&result)?);

            shutdown.trigger();
            drop(dispatcher);
            if let Some(task) = task {
                task.join().await;
            }
            tracing::info!("Shutdown complete");
            Ok(result.success)
        }
    }
}

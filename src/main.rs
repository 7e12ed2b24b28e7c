//! rpc-resilience CLI
//!
//! Drives the resilience layer against real JSON-RPC endpoints.
//!
//! # Architecture Overview
//!
//! ```text
//!   config.toml ──▶ config::load_config ──▶ ResilienceConfig
//!                                               │
//!        ┌──────────────────┬───────────────────┼─────────────────────┐
//!        ▼                  ▼                   ▼                     ▼
//!   RateLimiter     FallbackEndpointManager   BatchExecutor     backoff::schedule
//!   (gate per key)   breaker per endpoint     chunked items
//!        │                  │                   │
//!        └────────▶  RetryExecutor ◀────────────┘
//!                           │
//!                           ▼
//!                   rpc::RpcProbe (eth_blockNumber)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use url::Url;

use rpc_resilience::config::{load_config, ResilienceConfig};
use rpc_resilience::lifecycle::{signals, Shutdown};
use rpc_resilience::observability::{logging, metrics};
use rpc_resilience::rate_limit::RateLimiter;
use rpc_resilience::resilience::backoff::{calculate_backoff_with, schedule};
use rpc_resilience::resilience::{execute_batch, BatchOptions, FallbackEndpointManager, RetryPolicy};
use rpc_resilience::rpc::RpcProbe;

const PROBE_KEY: &str = "probe";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "rpc-resilience", version, about = "Resilient JSON-RPC probing")]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the configured endpoints through the fallback manager.
    Probe {
        /// Number of probe rounds (0 runs until interrupted).
        #[arg(long, default_value_t = 1)]
        rounds: u32,

        /// Pause between rounds in milliseconds.
        #[arg(long, default_value_t = 1_000)]
        interval_ms: u64,
    },

    /// Query every configured endpoint once, as a batch.
    Batch,

    /// Print the backoff schedule of the configured retry policy.
    Backoff {
        /// Override max attempts.
        #[arg(long)]
        attempts: Option<u32>,

        /// Seed for the jittered sample.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Simulate requests against the rate limiter.
    Limits {
        /// Key to rate limit.
        #[arg(long, default_value = PROBE_KEY)]
        key: String,

        /// Number of requests to simulate.
        #[arg(long, default_value_t = 10)]
        requests: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ResilienceConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!("rpc-resilience v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let base_policy = RetryPolicy::from(&config.retry);

    match cli.command {
        Command::Probe {
            rounds,
            interval_ms,
        } => run_probe(&config, &base_policy, rounds, Duration::from_millis(interval_ms)).await?,
        Command::Batch => run_batch(&config, &base_policy).await?,
        Command::Backoff { attempts, seed } => print_backoff(&base_policy, attempts, seed),
        Command::Limits { key, requests } => simulate_limits(&config, &key, requests)?,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn request_timeout(policy: &RetryPolicy) -> Duration {
    policy.per_attempt_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT)
}

async fn run_probe(
    config: &ResilienceConfig,
    base: &RetryPolicy,
    rounds: u32,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = FallbackEndpointManager::from_config(&config.fallback, base)?;
    let probe = RpcProbe::new(request_timeout(manager.policy()))?;

    let shutdown = Arc::new(Shutdown::new());
    let limiter = Arc::new(RateLimiter::new(&config.rate_limit)?);
    let sweeper = limiter.spawn_sweeper(config.rate_limit.sweep_interval(), shutdown.subscribe());

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move { signals::shutdown_on_signal(&signal_shutdown).await });
    let mut stop = shutdown.subscribe();

    let mut round = 0u32;
    while rounds == 0 || round < rounds {
        round += 1;

        let gate = tokio::select! {
            gate = limiter.wait_for_allowance(PROBE_KEY, interval.max(Duration::from_secs(1))) => gate,
            _ = stop.recv() => break,
        };
        if let Err(e) = gate {
            tracing::warn!(round, error = %e, "Probe round skipped");
            continue;
        }

        let outcome = tokio::select! {
            outcome = manager.execute(|url: &Url| {
                let probe = probe.clone();
                let url = url.clone();
                async move { probe.block_number(&url).await }
            }) => outcome,
            _ = stop.recv() => break,
        };

        match outcome {
            Ok(block) => println!("round {round}: block {block}"),
            Err(e) => {
                println!("round {round}: failed ({} attempt(s)): {e}", e.attempts());
                if let Some(retry_after) = e.retry_after() {
                    println!("  retry after ~{}ms", retry_after.as_millis());
                }
            }
        }

        if rounds != 0 && round >= rounds {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.recv() => break,
        }
    }

    println!("{}", serde_json::to_string_pretty(&manager.health())?);

    shutdown.trigger();
    let _ = sweeper.await;
    Ok(())
}

async fn run_batch(
    config: &ResilienceConfig,
    base: &RetryPolicy,
) -> Result<(), Box<dyn std::error::Error>> {
    let endpoints = config
        .fallback
        .endpoints
        .iter()
        .map(|raw| Url::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let options = BatchOptions::from_config(&config.batch, base).with_progress(|done, total| {
        tracing::info!(done, total, "Batch progress");
    });
    let probe = RpcProbe::new(request_timeout(&options.retry))?;

    let report = execute_batch(
        endpoints,
        |url: Url| {
            let probe = probe.clone();
            async move { probe.block_number(&url).await }
        },
        options,
    )
    .await;

    for outcome in report.outcomes() {
        match &outcome.result {
            Ok(block) => println!("[{}] {}: block {}", outcome.index, outcome.item, block),
            Err(e) => println!("[{}] {}: {}", outcome.index, outcome.item, e),
        }
    }
    println!("{} succeeded, {} failed", report.succeeded(), report.failed());
    Ok(())
}

fn print_backoff(base: &RetryPolicy, attempts: Option<u32>, seed: u64) {
    let policy = match attempts {
        Some(n) => base.clone().with_max_attempts(n),
        None => base.clone(),
    };
    let mut rng = StdRng::seed_from_u64(seed);
    println!("attempt  bounded_ms  jittered_ms");
    for (i, bounded) in schedule(&policy).into_iter().enumerate() {
        let attempt = i as u32 + 1;
        let sample = calculate_backoff_with(attempt, &policy, &mut rng);
        println!(
            "{:>7}  {:>10}  {:>11}",
            attempt,
            bounded.as_millis(),
            sample.as_millis()
        );
    }
}

fn simulate_limits(
    config: &ResilienceConfig,
    key: &str,
    requests: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let limiter = RateLimiter::new(&config.rate_limit)?;
    for i in 1..=requests {
        let decision = limiter.is_allowed(key);
        let bucket = limiter.token_bucket(key);
        println!(
            "request {:>4}: window {} (remaining {}), bucket {} ({:.2} tokens)",
            i,
            if decision.allowed { "allowed" } else { "denied" },
            decision.remaining,
            if bucket.allowed { "allowed" } else { "denied" },
            bucket.tokens
        );
    }
    if let Some(status) = limiter.status(key) {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }
    Ok(())
}

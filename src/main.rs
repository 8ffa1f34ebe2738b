//! ByteStash workload driver
//!
//! Starts a stash from environment configuration, drives a mixed
//! put/get/remove workload through it and prints the resulting statistics.

use std::env;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use byte_stash::{ByteStash, StashConfig};

/// Main entry point for the workload driver.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Start the stash and its background crawlers
/// 4. Run the workload on blocking threads, or stop early on Ctrl+C
/// 5. Print statistics and stop the crawlers
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "byte_stash=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StashConfig::from_env();
    info!(
        "Configuration loaded: nodes={}, capacity={}, ttl={}s, queue_size={}",
        config.nodes, config.capacity, config.ttl_seconds, config.queue_size
    );

    let ops: u64 = env_or("BYTESTASH_WORKLOAD_OPS", 100_000);
    let threads: u64 = env_or("BYTESTASH_WORKLOAD_THREADS", 4).max(1);

    let stash = Arc::new(ByteStash::<u64>::start(&config).context("failed to start stash")?);

    let started = Instant::now();
    let workload = run_workload(Arc::clone(&stash), ops, threads);

    let completed = tokio::select! {
        result = workload => {
            result?;
            info!("Workload of {} ops finished in {:?}", ops, started.elapsed());
            true
        }
        _ = signal::ctrl_c() => {
            warn!("Received Ctrl+C, stopping early");
            false
        }
    };

    // Workload threads may still be running after Ctrl+C.
    if completed {
        stash
            .check_consistency()
            .context("shard state is inconsistent")?;
    }
    println!("{}", serde_json::to_string_pretty(&stash.stats())?);

    if !stash.shutdown().await {
        warn!("Background crawlers had to be aborted");
    }
    info!("Shutdown complete");
    Ok(())
}

/// Splits `ops` over `threads` blocking workers. Each op is a put, a get of an
/// earlier key or a remove of an earlier key, chosen by a cheap LCG.
async fn run_workload(stash: Arc<ByteStash<u64>>, ops: u64, threads: u64) -> anyhow::Result<()> {
    let per_thread = ops / threads;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let stash = Arc::clone(&stash);
            tokio::task::spawn_blocking(move || {
                let mut seed = t.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
                for i in 0..per_thread {
                    seed = seed
                        .wrapping_mul(6_364_136_223_846_793_005)
                        .wrapping_add(1_442_695_040_888_963_407);
                    let earlier = (seed >> 33) % (i + 1);
                    match (seed >> 61) % 3 {
                        0 => stash.put(&(t, i), i),
                        1 => {
                            stash.get(&(t, earlier));
                        }
                        _ => {
                            stash.remove(&(t, earlier));
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.context("workload thread panicked")?;
    }
    Ok(())
}

fn env_or(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

//! Clears every rate limit counter from the shared store.
//!
//! Takes no arguments. Connection settings come from `REDIS_HOST`,
//! `REDIS_PORT` and `REDIS_PASSWORD`. Exits 0 when every pattern was
//! cleared and 1 on any connection or deletion failure.

use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use turnstile::error::Result;
use turnstile::reset::{reset_counters_with, RESET_PREFIXES};
use turnstile::store::{CounterStore, RedisCounterStore, RedisStoreConfig};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Rate limit reset failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = RedisStoreConfig::from_env()?;
    println!("Connecting to Redis at {}:{}", config.host, config.port);

    let store = RedisCounterStore::connect(&config).await?;
    store.ping().await?;

    let mut total = 0;
    let result = reset_counters_with(&store, RESET_PREFIXES, |report| {
        println!(
            "{}: found {} keys, deleted {}",
            report.pattern, report.found, report.deleted
        );
        total += report.deleted;
    })
    .await;

    match result {
        Ok(()) => {
            println!("Reset complete: {} keys deleted", total);
            Ok(())
        }
        Err(e) => {
            println!("Reset aborted: {} keys deleted before the failure", total);
            Err(e)
        }
    }
}

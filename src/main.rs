use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use turnstile::config::{LoggingConfig, StoreBackend, StoreConfig, TurnstileConfig};
use turnstile::http::{router, HttpServer, IdentityExtractor};
use turnstile::ratelimit::PolicyRegistry;
use turnstile::store::{CounterStore, MemoryCounterStore, RedisCounterStore};

/// Rate limited API server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "TURNSTILE_CONFIG")]
    config: Option<String>,

    /// Override the listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }

    init_tracing(&config.logging);

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    let store = connect_store(&config.store).await?;
    let registry = PolicyRegistry::new(&config.policies, store, config.store.timeout());
    let identity =
        IdentityExtractor::new(config.server.trust_proxy, &config.server.tenant_header)?;

    let server = HttpServer::new(config.server.listen_addr, router(&registry, identity));

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Turnstile stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

async fn connect_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Redis => {
            let store = RedisCounterStore::connect(&config.redis).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory counter store; limits are not shared between instances");
            Ok(Arc::new(MemoryCounterStore::new()))
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

//! Fusion Exchange - cross-chain atomic swaps over hashed-timelock escrows
//!
//! The service fills signed cross-chain orders through a resolver contract,
//! deploys the matching destination escrow, and withdraws both escrows once
//! the maker reveals the secret.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod abi;
mod api;
mod chain;
mod config;
mod coordination;
mod cross_chain;
mod error;
mod escrow;
mod events;
mod metrics;
mod resolver;
mod state;
mod tx;
mod wire;

#[cfg(test)]
mod testing;

use chain::ChainManager;
use config::{ChainRegistry, Settings};
use coordination::ExchangeOrchestrator;
use cross_chain::OrderPolicy;
use ethers::signers::LocalWallet;
use metrics::MetricsServer;
use state::{InMemoryOrderStore, OrderStore, StateManager};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting Fusion Exchange v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    let store = init_store(&settings).await?;
    info!("Order store ready ({})", store.backend());

    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    let wallet = load_wallet(&settings)?;
    let chain_manager = Arc::new(ChainManager::new(&settings, wallet).await?);
    info!(
        "Chain connections initialized: {:?}",
        chain_manager.connected_chains()
    );

    let orchestrator = Arc::new(ExchangeOrchestrator::new(
        chain_manager.clone(),
        store.clone(),
        Arc::new(ChainRegistry::from_settings(&settings)),
        OrderPolicy::from_settings(&settings),
        settings.exchange.clone(),
    ));
    info!("Exchange orchestrator initialized");

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let orchestrator = orchestrator.clone();
        async move {
            if let Err(e) = api::run_server(config, orchestrator).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let chain_manager = chain_manager.clone();
        let store = store.clone();
        let interval = settings.exchange.health_check_interval_secs.max(1);
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let health = chain_manager.health_check().await;
                let mut healthy = true;
                for (chain_id, ok) in health {
                    if !ok {
                        healthy = false;
                        warn!("Chain {} health check failed", chain_id);
                    }
                }

                if let Err(e) = store.health_check().await {
                    healthy = false;
                    warn!("Order store health check failed: {}", e);
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("Fusion Exchange is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Fusion Exchange stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,fusion_exchange=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Postgres when a database URL is configured, in-memory otherwise
async fn init_store(settings: &Settings) -> Result<Arc<dyn OrderStore>> {
    if settings.database.url.is_empty() {
        warn!("No database URL configured - orders are kept in memory only");
        return Ok(Arc::new(InMemoryOrderStore::new()));
    }

    let manager = StateManager::new(&settings.database).await?;
    info!("Database connection established");

    manager.run_migrations().await?;
    info!("Database migrations complete");

    Ok(Arc::new(manager))
}

fn load_wallet(settings: &Settings) -> Result<LocalWallet> {
    let var = settings
        .wallet
        .private_key_env
        .as_deref()
        .unwrap_or("RESOLVER_PRIVATE_KEY");
    let key = std::env::var(var).with_context(|| format!("{} is not set", var))?;

    key.trim()
        .trim_start_matches("0x")
        .parse::<LocalWallet>()
        .with_context(|| format!("{} does not hold a valid private key", var))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//! HTLC Relayer - cross-chain atomic swap coordination
//!
//! Watches hash-time-locked escrow contracts across the configured chains
//! and drives each swap through claim or refund before its timeouts.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use htlc_relayer::chain::ChainManager;
use htlc_relayer::config::Settings;
use htlc_relayer::dispatch::ActionDispatcher;
use htlc_relayer::metrics::{self, MetricsServer};
use htlc_relayer::monitor::MonitoringService;
use htlc_relayer::store::{PgStateStore, StateStore};
use htlc_relayer::swap::SwapEngine;
use htlc_relayer::api;
use htlc_relayer::vault::SecretVault;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting HTLC Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Initialize state store
    let store: Arc<dyn StateStore> = Arc::new(PgStateStore::new(&settings.database).await?);
    info!("Database connection established");

    // Run migrations
    store.init().await?;
    info!("Database migrations complete");

    // Channels: watchers -> engine, engine -> dispatcher, dispatcher -> engine
    let (events_tx, events_rx) = mpsc::channel(10_000);
    let (actions_tx, actions_rx) = mpsc::channel(1_000);
    let (reports_tx, reports_rx) = mpsc::channel(1_000);

    // Secret vault (reloads preimages for in-flight swaps)
    let vault = Arc::new(SecretVault::load(store.clone()).await?);

    // Initialize chain manager (adapters + watchers for all enabled chains)
    let chain_manager = Arc::new(ChainManager::new(&settings, store.clone(), events_tx).await?);
    info!("Chain connections initialized");

    // Initialize swap engine
    let engine = Arc::new(
        SwapEngine::new(
            store.clone(),
            vault.clone(),
            chain_manager.clone(),
            actions_tx,
            settings.relayer.clone(),
        )
        .await?,
    );
    info!("Swap engine initialized");

    // Initialize dispatcher
    let dispatcher = Arc::new(ActionDispatcher::new(
        chain_manager.clone(),
        settings.relayer.clone(),
        reports_tx,
    ));

    // Initialize monitoring service
    let monitoring = Arc::new(MonitoringService::new(
        store.clone(),
        chain_manager.clone(),
        settings.monitoring.clone(),
    ));

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Start API server
    let api_handle = tokio::spawn({
        let settings = settings.clone();
        let engine = engine.clone();
        let store = store.clone();
        let chain_manager = chain_manager.clone();
        async move {
            if let Err(e) = api::run_server(settings.api, engine, store, chain_manager).await {
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

    // Start chain watchers
    let watcher_handle = tokio::spawn({
        let chain_manager = chain_manager.clone();
        async move {
            if let Err(e) = chain_manager.start_watchers().await {
                error!("Chain watcher error: {}", e);
            }
        }
    });

    // Start swap engine
    let engine_handle = tokio::spawn({
        let engine = engine.clone();
        async move {
            if let Err(e) = engine.run(events_rx, reports_rx).await {
                error!("Swap engine error: {}", e);
            }
        }
    });

    // Start dispatcher
    let dispatcher_handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher.run(actions_rx).await;
        }
    });

    // Start monitoring service
    let monitoring_handle = tokio::spawn({
        let monitoring = monitoring.clone();
        async move {
            if let Err(e) = monitoring.run().await {
                error!("Monitoring service error: {}", e);
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let chain_manager = chain_manager.clone();
        let store = store.clone();
        let interval = settings.relayer.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let health = chain_manager.health_check().await;
                for (chain_id, healthy) in health {
                    if !healthy {
                        warn!("Chain {} health check failed", chain_id);
                    }
                }

                if let Err(e) = store.health_check().await {
                    warn!("Store health check failed: {}", e);
                }

                metrics::record_health_check();
            }
        }
    });

    info!("HTLC Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    engine.stop().await;
    dispatcher.stop().await;
    monitoring.stop().await;
    chain_manager.stop().await;

    // Abort background tasks
    api_handle.abort();
    watcher_handle.abort();
    engine_handle.abort();
    dispatcher_handle.abort();
    monitoring_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("HTLC Relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,htlc_relayer=debug,sqlx=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

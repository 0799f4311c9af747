//! Chain module - adapters and event watchers for all configured chains
//!
//! This module provides:
//! - The `ChainAdapter` boundary (one implementation per chain family)
//! - The EVM adapter with multi-RPC failover, nonce and gas handling
//! - Per-chain event watchers with durable cursors

pub mod adapter;
pub mod evm;
pub mod gas;
pub mod nonce;
pub mod watcher;

pub use adapter::{ChainAdapter, EscrowCall, TxHandle, TxOutcome};
pub use evm::EvmAdapter;
pub use watcher::EventWatcher;

use crate::config::{ChainFamily, Settings};
use crate::error::{RelayerError, RelayerResult};
use crate::events::EscrowEvent;
use crate::store::StateStore;

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info};

/// Manages adapters and watchers for all configured chains
pub struct ChainManager {
    /// Adapters indexed by chain ID
    adapters: DashMap<u64, Arc<dyn ChainAdapter>>,
    /// Watchers, one per chain
    watchers: Vec<Arc<EventWatcher>>,
    /// Last observed head per chain, fed by the watchers
    heights: Arc<DashMap<u64, u64>>,
    /// Shutdown signal
    shutdown: Arc<RwLock<bool>>,
}

impl ChainManager {
    /// Create a chain manager with adapters for all enabled chains.
    pub async fn new(
        settings: &Settings,
        store: Arc<dyn StateStore>,
        events_tx: mpsc::Sender<EscrowEvent>,
    ) -> RelayerResult<Self> {
        let mut adapters: Vec<Arc<dyn ChainAdapter>> = Vec::new();

        for (name, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} (ID: {})",
                chain_config.name, chain_config.chain_id
            );

            let adapter: Arc<dyn ChainAdapter> = match chain_config.family {
                ChainFamily::Evm => Arc::new(
                    EvmAdapter::new(
                        chain_config.clone(),
                        &settings.wallet,
                        settings.relayer.confirmation_timeout_secs,
                    )
                    .await?,
                ),
            };
            adapters.push(adapter);

            info!("Chain {} initialized", name);
        }

        Self::from_adapters(
            adapters,
            store,
            events_tx,
            Duration::from_millis(settings.relayer.poll_interval_ms),
            settings.relayer.max_scan_batch,
        )
        .await
    }

    /// Build a chain manager from pre-constructed adapters. Lets tests plug
    /// in simulated chains behind the same trait.
    pub async fn from_adapters(
        adapters: Vec<Arc<dyn ChainAdapter>>,
        store: Arc<dyn StateStore>,
        events_tx: mpsc::Sender<EscrowEvent>,
        poll_interval: Duration,
        max_scan_batch: u64,
    ) -> RelayerResult<Self> {
        let adapter_map = DashMap::new();
        let heights = Arc::new(DashMap::new());
        let mut watchers = Vec::new();

        for adapter in adapters {
            let watcher = EventWatcher::new(
                adapter.clone(),
                store.clone(),
                events_tx.clone(),
                poll_interval,
                max_scan_batch,
                heights.clone(),
            )
            .await?;
            watchers.push(Arc::new(watcher));
            adapter_map.insert(adapter.chain_id(), adapter);
        }

        Ok(Self {
            adapters: adapter_map,
            watchers,
            heights,
            shutdown: Arc::new(RwLock::new(false)),
        })
    }

    /// Start all event watchers. Returns once every watcher loop has exited.
    pub async fn start_watchers(&self) -> RelayerResult<()> {
        let mut handles = Vec::new();

        for watcher in &self.watchers {
            let watcher = watcher.clone();
            let shutdown = self.shutdown.clone();

            let handle = tokio::spawn(async move {
                loop {
                    if *shutdown.read().await {
                        break;
                    }

                    if let Err(e) = watcher.run(shutdown.clone()).await {
                        error!("Watcher error for chain {}: {}", watcher.chain_id(), e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            });

            handles.push(handle);
        }

        futures::future::join_all(handles).await;
        Ok(())
    }

    /// Get adapter for a specific chain
    pub fn get_adapter(&self, chain_id: u64) -> RelayerResult<Arc<dyn ChainAdapter>> {
        self.adapters
            .get(&chain_id)
            .map(|a| a.clone())
            .ok_or(RelayerError::ChainNotFound { chain_id })
    }

    /// Last head observed by the chain's watcher
    pub fn last_height(&self, chain_id: u64) -> Option<u64> {
        self.heights.get(&chain_id).map(|h| *h)
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let adapters: Vec<(u64, Arc<dyn ChainAdapter>)> = self
            .adapters
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut results = Vec::new();

        for (chain_id, adapter) in adapters {
            let healthy = adapter.current_height().await.is_ok();
            results.push((chain_id, healthy));

            crate::metrics::record_chain_health(chain_id, healthy);
        }

        results
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<u64> {
        self.adapters.iter().map(|e| *e.key()).collect()
    }

    /// Stop all watchers
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Chain manager stopped");
    }
}

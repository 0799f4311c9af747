//! Monitoring service
//!
//! Read-only periodic scan over the state store. Raises operator alerts for
//! stuck or near-timeout swaps and for any order in the inconsistent state.
//! Never mutates anything.

use crate::chain::ChainManager;
use crate::config::MonitoringConfig;
use crate::error::RelayerResult;
use crate::store::StateStore;
use crate::swap::machine::SwapState;
use crate::swap::order::SwapOrder;

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

pub struct MonitoringService {
    store: Arc<dyn StateStore>,
    chains: Arc<ChainManager>,
    config: MonitoringConfig,
    shutdown: Arc<RwLock<bool>>,
}

impl MonitoringService {
    pub fn new(
        store: Arc<dyn StateStore>,
        chains: Arc<ChainManager>,
        config: MonitoringConfig,
    ) -> Self {
        Self {
            store,
            chains,
            config,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn run(&self) -> RelayerResult<()> {
        let mut scan = interval(Duration::from_secs(self.config.scan_interval_secs));

        info!("Monitoring service started");

        loop {
            if *self.shutdown.read().await {
                break;
            }

            scan.tick().await;

            match self.store.active_orders().await {
                Ok(orders) => {
                    for order in &orders {
                        self.check_order(order);
                    }
                }
                Err(e) => {
                    warn!("Monitoring scan failed to read store: {}", e);
                }
            }
        }

        info!("Monitoring service stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }

    /// Evaluate one order against the alert rules.
    fn check_order(&self, order: &SwapOrder) {
        let now = Utc::now();

        match order.state {
            SwapState::Inconsistent => {
                error!(
                    "ALERT: order {} is inconsistent and needs manual intervention \
                     (last error: {:?})",
                    order.id_hex(),
                    order.last_error
                );
                crate::metrics::record_alert("inconsistent");
                return;
            }

            SwapState::AwaitingFunding => {
                let age = (now - order.created_at).num_seconds();
                if age > self.config.funding_grace_secs as i64 {
                    warn!(
                        "ALERT: order {} awaiting funding for {}s (grace {}s)",
                        order.id_hex(),
                        age,
                        self.config.funding_grace_secs
                    );
                    crate::metrics::record_alert("funding_stalled");
                }
            }

            SwapState::RefundingDest | SwapState::RefundingSource => {
                let age = (now - order.updated_at).num_seconds();
                if age > self.config.refund_grace_secs as i64 {
                    warn!(
                        "ALERT: order {} stuck in {} for {}s",
                        order.id_hex(),
                        order.state,
                        age
                    );
                    crate::metrics::record_alert("refund_stalled");
                }
            }

            _ => {}
        }

        // Near-timeout warning for anything not yet settled
        if !order.state.is_halted() {
            self.check_timeout_margin(order);
        }

        if order.needs_attention {
            warn!("ALERT: order {} is flagged for attention", order.id_hex());
            crate::metrics::record_alert("needs_attention");
        }
    }

    fn check_timeout_margin(&self, order: &SwapOrder) {
        let margin = self.config.timeout_margin_blocks;

        if let Some(height) = self.chains.last_height(order.dest_chain) {
            if height + margin >= order.timeout_dest && height < order.timeout_dest {
                warn!(
                    "ALERT: order {} within {} blocks of dest timeout {} (height {})",
                    order.id_hex(),
                    margin,
                    order.timeout_dest,
                    height
                );
                crate::metrics::record_alert("near_timeout");
            }
        }

        if let Some(height) = self.chains.last_height(order.source_chain) {
            if height + margin >= order.timeout_source && height < order.timeout_source {
                warn!(
                    "ALERT: order {} within {} blocks of source timeout {} (height {})",
                    order.id_hex(),
                    margin,
                    order.timeout_source,
                    height
                );
                crate::metrics::record_alert("near_timeout");
            }
        }
    }
}

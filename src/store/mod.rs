//! Escrow state store
//!
//! Durable record of every swap order's lifecycle plus the per-chain scan
//! cursors. The swap engine is the single writer; the API, monitoring and
//! watchers only read (watchers own their cursor rows).

mod pg;

pub use pg::PgStateStore;

use crate::error::{RelayerError, RelayerResult};
use crate::events::OrderId;
use crate::swap::machine::SwapState;
use crate::swap::order::SwapOrder;
use crate::vault::Secret;

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Counts by state, for the status API and monitoring.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SwapStats {
    pub active: u64,
    pub completed: u64,
    pub refunded: u64,
    pub expired: u64,
    pub inconsistent: u64,
}

/// Persistence boundary for swap orders, cursors and vault secrets.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Prepare the backing storage (migrations for SQL backends).
    async fn init(&self) -> RelayerResult<()>;

    async fn health_check(&self) -> RelayerResult<()>;

    /// Insert or update an order record, keyed by order id.
    async fn upsert_order(&self, order: &SwapOrder) -> RelayerResult<()>;

    async fn get_order(&self, order_id: &OrderId) -> RelayerResult<Option<SwapOrder>>;

    /// All non-archived orders, terminal or not.
    async fn list_orders(&self, state: Option<SwapState>) -> RelayerResult<Vec<SwapOrder>>;

    /// Orders that still need engine attention after a restart: everything
    /// not archived and not terminal.
    async fn active_orders(&self) -> RelayerResult<Vec<SwapOrder>>;

    /// Mark a terminal order archived; it drops out of every listing.
    async fn archive_order(&self, order_id: &OrderId) -> RelayerResult<()>;

    /// Last scanned block for a chain, 0 if never scanned.
    async fn get_cursor(&self, chain_id: u64) -> RelayerResult<u64>;

    async fn save_cursor(&self, chain_id: u64, block: u64) -> RelayerResult<()>;

    async fn store_secret(&self, order_id: &OrderId, secret: &Secret) -> RelayerResult<()>;

    async fn load_secrets(&self) -> RelayerResult<Vec<(OrderId, Secret)>>;

    async fn erase_secret(&self, order_id: &OrderId) -> RelayerResult<()>;

    async fn stats(&self) -> RelayerResult<SwapStats>;
}

/// In-memory store for tests and local development. Same contract as the
/// PostgreSQL store, minus durability across processes.
pub struct MemoryStateStore {
    orders: RwLock<HashMap<OrderId, SwapOrder>>,
    archived: RwLock<HashMap<OrderId, SwapOrder>>,
    cursors: RwLock<HashMap<u64, u64>>,
    secrets: RwLock<HashMap<OrderId, Secret>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            archived: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
            secrets: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn init(&self) -> RelayerResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> RelayerResult<()> {
        Ok(())
    }

    async fn upsert_order(&self, order: &SwapOrder) -> RelayerResult<()> {
        self.orders
            .write()
            .await
            .insert(order.order_id, order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: &OrderId) -> RelayerResult<Option<SwapOrder>> {
        Ok(self.orders.read().await.get(order_id).cloned())
    }

    async fn list_orders(&self, state: Option<SwapState>) -> RelayerResult<Vec<SwapOrder>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| state.map_or(true, |s| o.state == s))
            .cloned()
            .collect())
    }

    async fn active_orders(&self) -> RelayerResult<Vec<SwapOrder>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| !o.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn archive_order(&self, order_id: &OrderId) -> RelayerResult<()> {
        let order = self.orders.write().await.remove(order_id).ok_or_else(|| {
            RelayerError::OrderNotFound {
                order_id: hex::encode(order_id),
            }
        })?;
        self.archived.write().await.insert(*order_id, order);
        Ok(())
    }

    async fn get_cursor(&self, chain_id: u64) -> RelayerResult<u64> {
        Ok(self.cursors.read().await.get(&chain_id).copied().unwrap_or(0))
    }

    async fn save_cursor(&self, chain_id: u64, block: u64) -> RelayerResult<()> {
        self.cursors.write().await.insert(chain_id, block);
        Ok(())
    }

    async fn store_secret(&self, order_id: &OrderId, secret: &Secret) -> RelayerResult<()> {
        self.secrets.write().await.insert(*order_id, *secret);
        Ok(())
    }

    async fn load_secrets(&self) -> RelayerResult<Vec<(OrderId, Secret)>> {
        Ok(self
            .secrets
            .read()
            .await
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect())
    }

    async fn erase_secret(&self, order_id: &OrderId) -> RelayerResult<()> {
        self.secrets.write().await.remove(order_id);
        Ok(())
    }

    async fn stats(&self) -> RelayerResult<SwapStats> {
        let mut stats = SwapStats::default();
        for order in self.orders.read().await.values() {
            match order.state {
                SwapState::Completed => stats.completed += 1,
                SwapState::RefundedBoth => stats.refunded += 1,
                SwapState::ExpiredUnfunded => stats.expired += 1,
                SwapState::Inconsistent => stats.inconsistent += 1,
                _ => stats.active += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::order::NewSwapOrder;
    use chrono::Utc;
    use ethers::types::U256;
    use tokio_test::block_on;

    fn sample_order(id: u8) -> SwapOrder {
        NewSwapOrder {
            order_id: [id; 32],
            source_chain: 1,
            dest_chain: 137,
            hashlock: [2u8; 32],
            source_escrow: "0xaaaa".to_string(),
            dest_escrow: "0xbbbb".to_string(),
            maker_amount: U256::from(100u64),
            taker_amount: U256::from(200u64),
            timeout_source: 600,
            timeout_dest: 500,
        }
        .into_order(Utc::now())
        .unwrap()
    }

    #[test]
    fn round_trips_orders_and_cursors() {
        block_on(async {
            let store = MemoryStateStore::new();
            let order = sample_order(1);

            store.upsert_order(&order).await.unwrap();
            let loaded = store.get_order(&order.order_id).await.unwrap().unwrap();
            assert_eq!(loaded.order_id, order.order_id);
            assert_eq!(loaded.state, SwapState::AwaitingFunding);

            assert_eq!(store.get_cursor(1).await.unwrap(), 0);
            store.save_cursor(1, 1234).await.unwrap();
            assert_eq!(store.get_cursor(1).await.unwrap(), 1234);
        });
    }

    #[test]
    fn archived_orders_drop_out_of_listings() {
        block_on(async {
            let store = MemoryStateStore::new();
            let mut order = sample_order(1);
            order.state = SwapState::Completed;
            store.upsert_order(&order).await.unwrap();
            store.upsert_order(&sample_order(2)).await.unwrap();

            assert_eq!(store.list_orders(None).await.unwrap().len(), 2);
            assert_eq!(store.active_orders().await.unwrap().len(), 1);

            store.archive_order(&order.order_id).await.unwrap();
            assert_eq!(store.list_orders(None).await.unwrap().len(), 1);
            assert!(store.get_order(&order.order_id).await.unwrap().is_none());
        });
    }
}

//! Secret vault
//!
//! Holds the hashlock preimages the coordinator is responsible for revealing.
//! A preimage is written once at order intake, verified against the order's
//! hashlock, and erased once the swap reaches a terminal state. Secrets are
//! never logged; `Secret`'s Debug impl is redacted.

use crate::error::{RelayerError, RelayerResult};
use crate::events::{keccak256, OrderId};
use crate::store::StateStore;

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// A hashlock preimage. Redacted in Debug output.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The keccak256 commitment this preimage opens.
    pub fn hashlock(&self) -> [u8; 32] {
        keccak256(&self.0)
    }

    pub fn from_hex(s: &str) -> RelayerResult<Self> {
        let raw = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| RelayerError::OrderRejected(format!("invalid secret hex: {}", e)))?;
        if raw.len() != 32 {
            return Err(RelayerError::OrderRejected(format!(
                "secret must be 32 bytes, got {}",
                raw.len()
            )));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

/// Write-once preimage storage, durable across restarts.
///
/// The in-memory map is the working set; every mutation is mirrored to the
/// state store so an in-flight swap can still be claimed after a crash.
pub struct SecretVault {
    secrets: DashMap<OrderId, Secret>,
    store: Arc<dyn StateStore>,
}

impl SecretVault {
    /// Create a vault, loading any persisted preimages for in-flight swaps.
    pub async fn load(store: Arc<dyn StateStore>) -> RelayerResult<Self> {
        let secrets = DashMap::new();
        for (order_id, secret) in store.load_secrets().await? {
            secrets.insert(order_id, secret);
        }
        debug!("Secret vault loaded {} preimages", secrets.len());
        Ok(Self { secrets, store })
    }

    /// Store a preimage for an order. Write-once: storing a second preimage
    /// for the same order is rejected.
    pub async fn store(
        &self,
        order_id: OrderId,
        secret: Secret,
        hashlock: &[u8; 32],
    ) -> RelayerResult<()> {
        if secret.hashlock() != *hashlock {
            return Err(RelayerError::OrderRejected(
                "secret preimage does not match order hashlock".to_string(),
            ));
        }
        if self.secrets.contains_key(&order_id) {
            return Err(RelayerError::OrderRejected(format!(
                "secret already stored for order {}",
                hex::encode(order_id)
            )));
        }

        self.store.store_secret(&order_id, &secret).await?;
        self.secrets.insert(order_id, secret);
        Ok(())
    }

    pub fn get(&self, order_id: &OrderId) -> Option<Secret> {
        self.secrets.get(order_id).map(|s| *s)
    }

    /// Record a preimage observed in an on-chain claim. No-op if the vault
    /// already holds one; a mismatching preimage is dropped.
    pub async fn observe(
        &self,
        order_id: OrderId,
        secret: Secret,
        hashlock: &[u8; 32],
    ) -> RelayerResult<()> {
        if self.secrets.contains_key(&order_id) {
            return Ok(());
        }
        if secret.hashlock() != *hashlock {
            debug!(
                "Observed preimage for order {} does not open its hashlock",
                hex::encode(order_id)
            );
            return Ok(());
        }
        self.store.store_secret(&order_id, &secret).await?;
        self.secrets.insert(order_id, secret);
        Ok(())
    }

    /// Erase the preimage for a terminal order, in memory and on disk.
    pub async fn erase(&self, order_id: &OrderId) -> RelayerResult<()> {
        self.secrets.remove(order_id);
        self.store.erase_secret(order_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;

    #[tokio::test]
    async fn store_is_write_once_and_checks_hashlock() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let vault = SecretVault::load(store).await.unwrap();

        let secret = Secret::new([3u8; 32]);
        let hashlock = secret.hashlock();
        let order_id = [1u8; 32];

        // Wrong hashlock rejected
        assert!(vault.store(order_id, secret, &[0u8; 32]).await.is_err());

        vault.store(order_id, secret, &hashlock).await.unwrap();
        assert_eq!(vault.get(&order_id), Some(secret));

        // Second write rejected
        assert!(vault.store(order_id, secret, &hashlock).await.is_err());

        vault.erase(&order_id).await.unwrap();
        assert!(vault.get(&order_id).is_none());
    }

    #[tokio::test]
    async fn survives_reload_from_store() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let secret = Secret::new([5u8; 32]);
        let order_id = [2u8; 32];

        {
            let vault = SecretVault::load(store.clone()).await.unwrap();
            vault
                .store(order_id, secret, &secret.hashlock())
                .await
                .unwrap();
        }

        let reloaded = SecretVault::load(store).await.unwrap();
        assert_eq!(reloaded.get(&order_id), Some(secret));
    }

    #[test]
    fn debug_is_redacted() {
        let secret = Secret::new([7u8; 32]);
        assert_eq!(format!("{:?}", secret), "Secret([redacted])");
    }
}

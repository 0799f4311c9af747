//! Local nonce tracking for reliable transaction submission
//!
//! The adapter allocates nonces locally so concurrent submissions on one
//! chain never race, and resubmission of an already-mined transaction is
//! rejected by the chain instead of double-spending. A sync against on-chain
//! state recovers from gaps after crashes or external wallet use.

use crate::error::{RelayerError, RelayerResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct NonceState {
    /// Next nonce to hand out; `None` until first sync.
    next: Option<u64>,
}

/// Per-chain nonce allocator for a single signing wallet.
pub struct NonceManager {
    chain_id: u64,
    wallet_address: Address,
    state: Mutex<NonceState>,
}

impl NonceManager {
    pub fn new(chain_id: u64, wallet_address: Address) -> Self {
        Self {
            chain_id,
            wallet_address,
            state: Mutex::new(NonceState { next: None }),
        }
    }

    /// Allocate the next nonce, syncing from the chain on first use.
    pub async fn next_nonce(&self, provider: &Provider<Http>) -> RelayerResult<u64> {
        let mut state = self.state.lock().await;

        let nonce = match state.next {
            Some(n) => n,
            None => {
                let on_chain = self.fetch_nonce(provider).await?;
                debug!(
                    "Initialized nonce for chain {}: {}",
                    self.chain_id, on_chain
                );
                on_chain
            }
        };

        state.next = Some(nonce + 1);
        Ok(nonce)
    }

    /// Hand a nonce back after a failed submission so it can be reused.
    pub async fn release(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        if state.next == Some(nonce + 1) {
            state.next = Some(nonce);
        }
    }

    /// Re-sync against on-chain state. Called after "nonce too low" errors.
    pub async fn sync(&self, provider: &Provider<Http>) -> RelayerResult<()> {
        let on_chain = self.fetch_nonce(provider).await?;
        let mut state = self.state.lock().await;

        if let Some(next) = state.next {
            if on_chain > next {
                warn!(
                    "Nonce gap on chain {}: local {}, on-chain {}",
                    self.chain_id, next, on_chain
                );
            }
        }
        state.next = Some(on_chain);
        Ok(())
    }

    async fn fetch_nonce(&self, provider: &Provider<Http>) -> RelayerResult<u64> {
        let nonce = provider
            .get_transaction_count(self.wallet_address, None)
            .await
            .map_err(|e| RelayerError::Nonce {
                chain_id: self.chain_id,
                message: e.to_string(),
            })?;

        Ok(nonce.as_u64())
    }
}

//! Chain adapter boundary
//!
//! One adapter per chain family. Everything above this trait speaks in
//! normalized escrow calls and events; RPC protocols, signing schemes and
//! finality models stay below it.

use crate::error::RelayerResult;
use crate::events::{EscrowEvent, OrderId};
use crate::vault::Secret;

use async_trait::async_trait;
use ethers::types::H256;

/// A normalized escrow method call.
#[derive(Debug, Clone)]
pub enum EscrowCall {
    /// `claim(bytes32 secret)` — releases the escrow and discloses the
    /// preimage on-chain.
    Claim {
        escrow: String,
        order_id: OrderId,
        secret: Secret,
    },
    /// `refund()` — returns funds to the depositor after the timeout.
    Refund { escrow: String, order_id: OrderId },
}

impl EscrowCall {
    pub fn escrow(&self) -> &str {
        match self {
            EscrowCall::Claim { escrow, .. } => escrow,
            EscrowCall::Refund { escrow, .. } => escrow,
        }
    }

    pub fn order_id(&self) -> &OrderId {
        match self {
            EscrowCall::Claim { order_id, .. } => order_id,
            EscrowCall::Refund { order_id, .. } => order_id,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            EscrowCall::Claim { .. } => "claim",
            EscrowCall::Refund { .. } => "refund",
        }
    }
}

/// Handle to a submitted transaction, for confirmation tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHandle {
    pub tx_hash: H256,
    pub chain_id: u64,
}

/// Outcome of waiting for a transaction to confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Confirmed { block: u64 },
    Reverted { reason: String },
    TimedOut,
}

/// Normalized transaction-submission and event-query surface for one chain.
///
/// Implementations must be idempotent under retry: resubmitting an
/// already-mined call must not double-spend. The EVM adapter relies on
/// per-wallet nonce tracking for this; other families use their native
/// sequence model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Blocks the watcher stays behind the head to ride out reorgs.
    fn confirmation_depth(&self) -> u64;

    /// Current chain head.
    async fn current_height(&self) -> RelayerResult<u64>;

    /// Sign and submit an escrow call. Logged with enough detail to
    /// reconstruct intent after a crash.
    async fn submit(&self, call: EscrowCall) -> RelayerResult<TxHandle>;

    /// Wait until the transaction has `min_confirmations`, reverts, or the
    /// adapter's confirmation window elapses.
    async fn wait_for_confirmation(
        &self,
        handle: &TxHandle,
        min_confirmations: u64,
    ) -> RelayerResult<TxOutcome>;

    /// Normalized escrow events in the inclusive block range.
    async fn escrow_events(&self, from_block: u64, to_block: u64)
        -> RelayerResult<Vec<EscrowEvent>>;
}

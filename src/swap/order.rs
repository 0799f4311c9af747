//! Swap order record and per-leg chain observations

use crate::error::{RelayerError, RelayerResult};
use crate::events::{EscrowEventKind, Leg, OrderId};
use crate::swap::machine::SwapState;
use crate::vault::Secret;

use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::Deserialize;

/// Read-only projection of one leg's observed on-chain status. Rebuilt from
/// watcher output; reconciled against chain state on restart, never the
/// source of truth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegView {
    pub funded_at: Option<u64>,
    pub claimed_at: Option<u64>,
    pub refunded_at: Option<u64>,
}

impl LegView {
    /// Record an observation. Returns `true` if the view changed. Duplicate
    /// delivery of the same event keeps the earliest confirmed height.
    pub fn record(&mut self, kind: &EscrowEventKind, block: u64) -> bool {
        let slot = match kind {
            EscrowEventKind::Funded { .. } => &mut self.funded_at,
            EscrowEventKind::Claimed { .. } => &mut self.claimed_at,
            EscrowEventKind::Refunded => &mut self.refunded_at,
        };
        match slot {
            Some(existing) if *existing <= block => false,
            _ => {
                *slot = Some(block);
                true
            }
        }
    }

    pub fn funded(&self) -> bool {
        self.funded_at.is_some()
    }

    pub fn claimed(&self) -> bool {
        self.claimed_at.is_some()
    }

    pub fn refunded(&self) -> bool {
        self.refunded_at.is_some()
    }

    /// Claim and refund are mutually exclusive on a correct contract.
    pub fn contradictory(&self) -> bool {
        self.claimed() && self.refunded()
    }

    /// A funded leg is settled once claimed or refunded; an unfunded leg has
    /// nothing to settle.
    pub fn refund_settled(&self) -> bool {
        !self.funded() || self.refunded()
    }
}

/// One atomic swap instance, keyed by the maker's signed order hash.
///
/// Identity fields (`order_id`, `hashlock`, chains, escrows, amounts,
/// timeouts) are immutable after creation; only the swap engine mutates the
/// rest, through the transition function.
#[derive(Debug, Clone)]
pub struct SwapOrder {
    pub order_id: OrderId,
    pub source_chain: u64,
    pub dest_chain: u64,
    pub hashlock: [u8; 32],
    /// Set at most once, when the preimage goes public. Owned by the vault
    /// until then.
    pub secret: Option<Secret>,
    pub source_escrow: String,
    pub dest_escrow: String,
    pub maker_amount: U256,
    pub taker_amount: U256,
    /// Absolute expiry height of the source leg. Strictly greater than
    /// `timeout_dest`.
    pub timeout_source: u64,
    /// Absolute expiry height of the destination leg.
    pub timeout_dest: u64,
    pub state: SwapState,
    pub source_leg: LegView,
    pub dest_leg: LegView,
    pub needs_attention: bool,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwapOrder {
    pub fn leg(&self, leg: Leg) -> &LegView {
        match leg {
            Leg::Source => &self.source_leg,
            Leg::Dest => &self.dest_leg,
        }
    }

    pub fn leg_mut(&mut self, leg: Leg) -> &mut LegView {
        match leg {
            Leg::Source => &mut self.source_leg,
            Leg::Dest => &mut self.dest_leg,
        }
    }

    /// Which leg a chain's events belong to, if the chain is part of this
    /// order at all.
    pub fn leg_for_chain(&self, chain_id: u64) -> Option<Leg> {
        if chain_id == self.source_chain {
            Some(Leg::Source)
        } else if chain_id == self.dest_chain {
            Some(Leg::Dest)
        } else {
            None
        }
    }

    pub fn chain_for_leg(&self, leg: Leg) -> u64 {
        match leg {
            Leg::Source => self.source_chain,
            Leg::Dest => self.dest_chain,
        }
    }

    pub fn escrow_for_leg(&self, leg: Leg) -> &str {
        match leg {
            Leg::Source => &self.source_escrow,
            Leg::Dest => &self.dest_escrow,
        }
    }

    pub fn both_funded(&self) -> bool {
        self.source_leg.funded() && self.dest_leg.funded()
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.order_id)
    }
}

/// Order intake payload. Validated before a `SwapOrder` is created and the
/// vault is seeded.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSwapOrder {
    pub order_id: OrderId,
    pub source_chain: u64,
    pub dest_chain: u64,
    pub hashlock: [u8; 32],
    pub source_escrow: String,
    pub dest_escrow: String,
    pub maker_amount: U256,
    pub taker_amount: U256,
    pub timeout_source: u64,
    pub timeout_dest: u64,
}

impl NewSwapOrder {
    /// Validate the order and build the initial `AwaitingFunding` record.
    /// Orders violating the timeout ordering never reach the state machine.
    pub fn into_order(self, now: DateTime<Utc>) -> RelayerResult<SwapOrder> {
        if self.timeout_source <= self.timeout_dest {
            return Err(RelayerError::OrderRejected(format!(
                "source timeout {} must be strictly greater than dest timeout {}",
                self.timeout_source, self.timeout_dest
            )));
        }
        if self.source_chain == self.dest_chain {
            return Err(RelayerError::OrderRejected(
                "source and destination chain must differ".to_string(),
            ));
        }
        if self.maker_amount.is_zero() || self.taker_amount.is_zero() {
            return Err(RelayerError::OrderRejected(
                "swap amounts must be non-zero".to_string(),
            ));
        }
        if self.source_escrow.is_empty() || self.dest_escrow.is_empty() {
            return Err(RelayerError::OrderRejected(
                "escrow addresses must be set".to_string(),
            ));
        }

        Ok(SwapOrder {
            order_id: self.order_id,
            source_chain: self.source_chain,
            dest_chain: self.dest_chain,
            hashlock: self.hashlock,
            secret: None,
            source_escrow: self.source_escrow,
            dest_escrow: self.dest_escrow,
            maker_amount: self.maker_amount,
            taker_amount: self.taker_amount,
            timeout_source: self.timeout_source,
            timeout_dest: self.timeout_dest,
            state: SwapState::AwaitingFunding,
            source_leg: LegView::default(),
            dest_leg: LegView::default(),
            needs_attention: false,
            last_error: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

//! Escrow event types and log normalization
//!
//! The watcher turns raw chain logs into the three lifecycle events an HTLC
//! escrow can emit: `Funded`, `Claimed` (carrying the revealed preimage) and
//! `Refunded`. Everything downstream of the watcher only ever sees these.

use crate::error::{RelayerError, RelayerResult};

use ethers::types::{Log, H256, U256};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// Order identifier, derived from the maker's signed order hash.
pub type OrderId = [u8; 32];

/// Which side of the swap an escrow sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leg {
    Source,
    Dest,
}

impl Leg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Leg::Source => "source",
            Leg::Dest => "dest",
        }
    }
}

/// What happened to an escrow leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowEventKind {
    Funded {
        hashlock: [u8; 32],
        amount: U256,
        timeout: u64,
    },
    Claimed {
        /// The preimage disclosed on-chain by the claim call.
        secret: [u8; 32],
    },
    Refunded,
}

impl EscrowEventKind {
    /// Event name for logging and metrics
    pub fn name(&self) -> &'static str {
        match self {
            EscrowEventKind::Funded { .. } => "funded",
            EscrowEventKind::Claimed { .. } => "claimed",
            EscrowEventKind::Refunded => "refunded",
        }
    }
}

/// A normalized escrow event, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowEvent {
    pub chain_id: u64,
    pub order_id: OrderId,
    pub kind: EscrowEventKind,
    pub block: u64,
    pub tx_hash: H256,
}

/// keccak256 convenience wrapper
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Event topic signatures (keccak256 of the canonical event signatures)
pub mod topics {
    use super::keccak256;
    use ethers::types::H256;
    use lazy_static::lazy_static;

    lazy_static! {
        pub static ref FUNDED: H256 =
            H256::from(keccak256(b"Funded(bytes32,bytes32,uint256,uint256)"));
        pub static ref CLAIMED: H256 = H256::from(keccak256(b"Claimed(bytes32,bytes32)"));
        pub static ref REFUNDED: H256 = H256::from(keccak256(b"Refunded(bytes32)"));
    }
}

/// Parses raw logs from an HTLC escrow contract into [`EscrowEvent`]s.
pub struct EventParser {
    chain_id: u64,
}

impl EventParser {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    /// Parse a log entry. Returns `Ok(None)` for log topics the escrow
    /// contract emits but the coordinator does not care about.
    pub fn parse_log(&self, log: &Log) -> RelayerResult<Option<EscrowEvent>> {
        let topic = match log.topics.first() {
            Some(t) => *t,
            None => return Ok(None),
        };

        let block = log
            .block_number
            .map(|b| b.as_u64())
            .ok_or_else(|| RelayerError::EventParsing("log missing block number".into()))?;
        let tx_hash = log.transaction_hash.unwrap_or_default();

        let order_id: OrderId = log
            .topics
            .get(1)
            .map(|t| t.0)
            .ok_or_else(|| RelayerError::EventParsing("log missing order id topic".into()))?;

        let kind = if topic == *topics::FUNDED {
            if log.data.len() < 96 {
                return Err(RelayerError::EventParsing(format!(
                    "Funded event data too short: {} bytes",
                    log.data.len()
                )));
            }
            let mut hashlock = [0u8; 32];
            hashlock.copy_from_slice(&log.data[0..32]);
            let amount = U256::from_big_endian(&log.data[32..64]);
            let timeout = U256::from_big_endian(&log.data[64..96]).as_u64();
            EscrowEventKind::Funded {
                hashlock,
                amount,
                timeout,
            }
        } else if topic == *topics::CLAIMED {
            if log.data.len() < 32 {
                return Err(RelayerError::EventParsing(format!(
                    "Claimed event data too short: {} bytes",
                    log.data.len()
                )));
            }
            let mut secret = [0u8; 32];
            secret.copy_from_slice(&log.data[0..32]);
            EscrowEventKind::Claimed { secret }
        } else if topic == *topics::REFUNDED {
            EscrowEventKind::Refunded
        } else {
            return Ok(None);
        };

        Ok(Some(EscrowEvent {
            chain_id: self.chain_id,
            order_id,
            kind,
            block,
            tx_hash,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;

    fn log_with(topic: H256, order_id: OrderId, data: Vec<u8>, block: u64) -> Log {
        Log {
            topics: vec![topic, H256::from(order_id)],
            data: Bytes::from(data),
            block_number: Some(block.into()),
            transaction_hash: Some(H256::random()),
            ..Default::default()
        }
    }

    #[test]
    fn parses_funded_event() {
        let order_id = [7u8; 32];
        let hashlock = [9u8; 32];
        let mut data = hashlock.to_vec();
        let mut amount = [0u8; 32];
        U256::from(1_000u64).to_big_endian(&mut amount);
        data.extend_from_slice(&amount);
        let mut timeout = [0u8; 32];
        U256::from(500u64).to_big_endian(&mut timeout);
        data.extend_from_slice(&timeout);

        let parser = EventParser::new(1);
        let event = parser
            .parse_log(&log_with(*topics::FUNDED, order_id, data, 100))
            .unwrap()
            .unwrap();

        assert_eq!(event.order_id, order_id);
        assert_eq!(event.block, 100);
        assert_eq!(
            event.kind,
            EscrowEventKind::Funded {
                hashlock,
                amount: U256::from(1_000u64),
                timeout: 500,
            }
        );
    }

    #[test]
    fn parses_claimed_event_with_secret() {
        let order_id = [1u8; 32];
        let secret = [0xabu8; 32];

        let parser = EventParser::new(1);
        let event = parser
            .parse_log(&log_with(*topics::CLAIMED, order_id, secret.to_vec(), 42))
            .unwrap()
            .unwrap();

        assert_eq!(event.kind, EscrowEventKind::Claimed { secret });
    }

    #[test]
    fn ignores_unknown_topics() {
        let parser = EventParser::new(1);
        let log = log_with(H256::random(), [0u8; 32], vec![], 10);
        assert!(parser.parse_log(&log).unwrap().is_none());
    }

    #[test]
    fn rejects_truncated_funded_data() {
        let parser = EventParser::new(1);
        let log = log_with(*topics::FUNDED, [0u8; 32], vec![0u8; 40], 10);
        assert!(parser.parse_log(&log).is_err());
    }
}

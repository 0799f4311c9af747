//! Error types for the relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Transaction reverted on chain {chain_id}: {reason}")]
    TxReverted { chain_id: u64, reason: String },

    #[error("Nonce error for chain {chain_id}: {message}")]
    Nonce { chain_id: u64, message: String },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Rate limited on chain {chain_id}")]
    RateLimited { chain_id: u64 },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Order {order_id} not found")]
    OrderNotFound { order_id: String },

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Invariant violation on order {order_id}: {message}")]
    InvariantViolation { order_id: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::ChainConnection { .. }
                | RelayerError::Timeout { .. }
                | RelayerError::RateLimited { .. }
                | RelayerError::Nonce { .. }
        )
    }

    /// Reverted transactions are reconciled against chain events, never
    /// blindly retried.
    pub fn is_reverted(&self) -> bool {
        matches!(self, RelayerError::TxReverted { .. })
    }

    /// Check if error should trigger an operator alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            RelayerError::InvariantViolation { .. } | RelayerError::Wallet(_)
        )
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;

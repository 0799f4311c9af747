//! Gas estimation for escrow calls

use crate::chain::adapter::EscrowCall;

use ethers::types::U256;

/// Gas price types
#[derive(Debug, Clone)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

/// Gas estimator for escrow transactions
pub struct GasEstimator {
    /// Buffer percentage for gas limit
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new() -> Self {
        Self {
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
        }
    }

    /// Fallback gas limit when on-chain estimation is unavailable. Claims
    /// write the preimage and transfer; refunds only transfer.
    pub fn fallback_gas_limit(&self, call: &EscrowCall) -> U256 {
        let base = match call {
            EscrowCall::Claim { .. } => U256::from(120_000u64),
            EscrowCall::Refund { .. } => U256::from(80_000u64),
        };
        self.buffer_limit(base)
    }

    /// Apply the safety buffer to an estimated gas limit.
    pub fn buffer_limit(&self, estimate: U256) -> U256 {
        estimate + estimate * self.gas_limit_buffer_percent / 100
    }

    /// Apply the price buffer to a quoted gas price.
    pub fn buffer_price(&self, price: GasPrice) -> GasPrice {
        match price {
            GasPrice::Legacy(p) => {
                GasPrice::Legacy(p + p * self.gas_price_buffer_percent / 100)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: max_fee_per_gas
                    + max_fee_per_gas * self.gas_price_buffer_percent / 100,
                max_priority_fee_per_gas: max_priority_fee_per_gas
                    + max_priority_fee_per_gas * self.gas_price_buffer_percent / 100,
            },
        }
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new()
    }
}

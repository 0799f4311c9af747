//! EVM chain adapter with multi-RPC failover
//!
//! Wraps a set of HTTP providers, a signing wallet and local nonce tracking
//! behind the `ChainAdapter` trait. RPC failures rotate to the next provider.

use crate::chain::adapter::{ChainAdapter, EscrowCall, TxHandle, TxOutcome};
use crate::chain::gas::{GasEstimator, GasPrice};
use crate::chain::nonce::NonceManager;
use crate::config::{ChainConfig, GasPriceStrategy, WalletConfig};
use crate::error::{RelayerError, RelayerResult};
use crate::events::{keccak256, EscrowEvent, EventParser};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// `ChainAdapter` implementation for EVM chains.
pub struct EvmAdapter {
    config: ChainConfig,
    providers: Vec<Provider<Http>>,
    current_provider: AtomicUsize,
    wallet: LocalWallet,
    nonce: NonceManager,
    gas: GasEstimator,
    parser: EventParser,
    /// How long `wait_for_confirmation` polls before giving up
    confirmation_timeout: Duration,
}

impl EvmAdapter {
    pub async fn new(
        config: ChainConfig,
        wallet_config: &WalletConfig,
        confirmation_timeout_secs: u64,
    ) -> RelayerResult<Self> {
        let mut providers = Vec::new();
        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if providers.is_empty() {
            return Err(RelayerError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        let wallet = load_wallet(wallet_config)?.with_chain_id(config.chain_id);
        let wallet_address = wallet.address();
        info!(
            "Chain {} adapter initialized with wallet {:?}",
            config.chain_id, wallet_address
        );

        Ok(Self {
            nonce: NonceManager::new(config.chain_id, wallet_address),
            parser: EventParser::new(config.chain_id),
            gas: GasEstimator::new(),
            confirmation_timeout: Duration::from_secs(confirmation_timeout_secs),
            config,
            providers,
            current_provider: AtomicUsize::new(0),
            wallet,
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    /// Switch to the next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    fn connection_error(&self, message: String) -> RelayerError {
        RelayerError::ChainConnection {
            chain_id: self.config.chain_id,
            message,
        }
    }

    /// ABI-encode an escrow call. `claim(bytes32)` carries the preimage;
    /// `refund()` takes no arguments.
    fn encode_call(call: &EscrowCall) -> Bytes {
        match call {
            EscrowCall::Claim { secret, .. } => {
                let selector = &keccak256(b"claim(bytes32)")[0..4];
                let mut data = selector.to_vec();
                data.extend_from_slice(secret.as_bytes());
                Bytes::from(data)
            }
            EscrowCall::Refund { .. } => {
                let selector = &keccak256(b"refund()")[0..4];
                Bytes::from(selector.to_vec())
            }
        }
    }

    /// Current gas price per the chain's configured strategy.
    async fn quote_gas_price(&self) -> RelayerResult<GasPrice> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy => {
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| RelayerError::GasEstimation(e.to_string()))?;
                Ok(GasPrice::Legacy(price))
            }
            GasPriceStrategy::Eip1559 => {
                let block = self
                    .http()
                    .get_block(BlockNumber::Latest)
                    .await
                    .map_err(|e| RelayerError::GasEstimation(e.to_string()))?
                    .ok_or_else(|| RelayerError::GasEstimation("No latest block".to_string()))?;

                let base_fee = block.base_fee_per_gas.ok_or_else(|| {
                    RelayerError::GasEstimation("No base fee in block".to_string())
                })?;

                let priority_fee = U256::from(2_000_000_000u64); // 2 gwei
                let max_fee = base_fee * 2 + priority_fee;

                // Cap at configured max
                let max_gwei =
                    U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64);
                let max_fee = std::cmp::min(max_fee, max_gwei);

                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                })
            }
        }
    }

    fn build_tx(
        &self,
        to: Address,
        data: Bytes,
        nonce: u64,
        gas_limit: U256,
        gas_price: &GasPrice,
    ) -> TypedTransaction {
        match gas_price {
            GasPrice::Legacy(price) => TypedTransaction::Legacy(
                TransactionRequest::new()
                    .to(to)
                    .data(data)
                    .nonce(nonce)
                    .gas(gas_limit)
                    .gas_price(*price),
            ),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => TypedTransaction::Eip1559(
                Eip1559TransactionRequest::new()
                    .to(to)
                    .data(data)
                    .nonce(nonce)
                    .gas(gas_limit)
                    .max_fee_per_gas(*max_fee_per_gas)
                    .max_priority_fee_per_gas(*max_priority_fee_per_gas),
            ),
        }
    }

    /// Map a send error onto the relayer taxonomy.
    fn classify_send_error(&self, message: String) -> RelayerError {
        if message.contains("nonce too low") {
            RelayerError::Nonce {
                chain_id: self.config.chain_id,
                message,
            }
        } else if message.contains("insufficient funds") {
            RelayerError::Wallet(message)
        } else if message.contains("execution reverted") || message.contains("revert") {
            RelayerError::TxReverted {
                chain_id: self.config.chain_id,
                reason: message,
            }
        } else {
            self.connection_error(message)
        }
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    fn confirmation_depth(&self) -> u64 {
        self.config
            .confirmation_depth
            .unwrap_or_else(|| recommended_confirmation_depth(self.config.chain_id))
    }

    async fn current_height(&self) -> RelayerResult<u64> {
        for _ in 0..self.providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed".to_string()))
    }

    async fn submit(&self, call: EscrowCall) -> RelayerResult<TxHandle> {
        let to: Address = call
            .escrow()
            .parse()
            .map_err(|e| RelayerError::Config(format!("Invalid escrow address: {}", e)))?;

        let data = Self::encode_call(&call);
        let nonce = self.nonce.next_nonce(self.http()).await?;

        // Estimate gas; fall back to the static limit if the node refuses
        // (a refusal on a doomed call surfaces as a revert at confirmation).
        let probe = TypedTransaction::Legacy(
            TransactionRequest::new()
                .from(self.wallet.address())
                .to(to)
                .data(data.clone()),
        );
        let gas_limit = match self.http().estimate_gas(&probe, None).await {
            Ok(estimate) => self.gas.buffer_limit(estimate),
            Err(e) => {
                debug!(
                    "Gas estimation failed on chain {} ({}), using fallback",
                    self.config.chain_id, e
                );
                self.gas.fallback_gas_limit(&call)
            }
        };

        let gas_price = self.gas.buffer_price(self.quote_gas_price().await?);
        let tx = self.build_tx(to, data, nonce, gas_limit, &gas_price);

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| RelayerError::Wallet(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);

        let result = timeout(SUBMIT_TIMEOUT, self.http().send_raw_transaction(raw)).await;

        match result {
            Ok(Ok(pending)) => {
                let tx_hash = pending.tx_hash();
                info!(
                    "Submitted {} for order {} on chain {} (escrow {}, nonce {}): {:?}",
                    call.method(),
                    hex::encode(call.order_id()),
                    self.config.chain_id,
                    call.escrow(),
                    nonce,
                    tx_hash
                );
                Ok(TxHandle {
                    tx_hash,
                    chain_id: self.config.chain_id,
                })
            }
            Ok(Err(e)) => {
                self.nonce.release(nonce).await;
                let err = self.classify_send_error(e.to_string());
                if matches!(err, RelayerError::Nonce { .. }) {
                    self.nonce.sync(self.http()).await?;
                }
                Err(err)
            }
            Err(_) => {
                self.nonce.release(nonce).await;
                Err(RelayerError::Timeout {
                    operation: format!("submit {} on chain {}", call.method(), self.config.chain_id),
                })
            }
        }
    }

    async fn wait_for_confirmation(
        &self,
        handle: &TxHandle,
        min_confirmations: u64,
    ) -> RelayerResult<TxOutcome> {
        let deadline = tokio::time::Instant::now() + self.confirmation_timeout;

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Ok(TxOutcome::TimedOut);
            }

            let receipt = self
                .http()
                .get_transaction_receipt(handle.tx_hash)
                .await
                .map_err(|e| self.connection_error(e.to_string()))?;

            if let Some(receipt) = receipt {
                if receipt.status == Some(0.into()) {
                    return Ok(TxOutcome::Reverted {
                        reason: "execution reverted".to_string(),
                    });
                }

                if let Some(block) = receipt.block_number {
                    let head = self.current_height().await?;
                    let confirmations = head.saturating_sub(block.as_u64());
                    if confirmations >= min_confirmations {
                        return Ok(TxOutcome::Confirmed {
                            block: block.as_u64(),
                        });
                    }
                    debug!(
                        "Tx {:?} has {}/{} confirmations on chain {}",
                        handle.tx_hash, confirmations, min_confirmations, self.config.chain_id
                    );
                }
            }

            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn escrow_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> RelayerResult<Vec<EscrowEvent>> {
        let contract_address: Address = self
            .config
            .escrow_address
            .parse()
            .map_err(|e| RelayerError::Config(format!("Invalid escrow address: {}", e)))?;

        let filter = Filter::new()
            .address(contract_address)
            .from_block(from_block)
            .to_block(to_block);

        let mut logs = None;
        for _ in 0..self.providers.len() {
            match self.http().get_logs(&filter).await {
                Ok(l) => {
                    logs = Some(l);
                    break;
                }
                Err(e) => {
                    warn!(
                        "Failed to get logs from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }
        let mut logs =
            logs.ok_or_else(|| self.connection_error("All providers failed to get logs".into()))?;

        // Apply in on-chain confirmation order
        logs.sort_by_key(|l| {
            (
                l.block_number.map(|b| b.as_u64()).unwrap_or(0),
                l.log_index.map(|i| i.as_u64()).unwrap_or(0),
            )
        });

        let mut events = Vec::new();
        for log in &logs {
            match self.parser.parse_log(log) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    warn!("Skipping malformed log on chain {}: {}", self.config.chain_id, e);
                }
            }
        }

        Ok(events)
    }
}

/// Load the signing wallet from the environment.
fn load_wallet(config: &WalletConfig) -> RelayerResult<LocalWallet> {
    let env_name = config
        .private_key_env
        .as_deref()
        .unwrap_or("RELAYER_PRIVATE_KEY");

    if let Ok(key) = std::env::var(env_name) {
        return key
            .parse::<LocalWallet>()
            .map_err(|e| RelayerError::Wallet(format!("Invalid private key: {}", e)));
    }

    if config.keystore_path.is_some() {
        // Encrypted keystore support needs a password prompt; deployments use
        // the env var for now.
        return Err(RelayerError::Wallet(
            "Keystore wallets are not supported yet; set the private key env var".to_string(),
        ));
    }

    Err(RelayerError::Wallet(format!(
        "No wallet configured. Set {} or configure a keystore",
        env_name
    )))
}

/// Recommended confirmation depths per chain, used when a config omits one.
pub fn recommended_confirmation_depth(chain_id: u64) -> u64 {
    match chain_id {
        // Ethereum mainnet
        1 => 32,
        // Ethereum testnets
        11155111 | 5 => 12,
        // Polygon
        137 => 128,
        // Arbitrum
        42161 | 421614 => 64,
        // Optimism
        10 | 11155420 => 64,
        // Base
        8453 | 84532 => 64,
        // Default conservative
        _ => 64,
    }
}

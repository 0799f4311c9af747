//! Configuration management for the relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub monitoring: MonitoringConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
    pub wallet: WalletConfig,
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
    /// Watcher polling cadence per chain
    pub poll_interval_ms: u64,
    /// Swap engine timer-tick cadence (timeout checks, action re-derivation)
    pub tick_interval_ms: u64,
    /// Upper bound on blocks fetched per watcher scan
    pub max_scan_batch: u64,
    /// Outstanding transactions allowed per chain
    pub max_concurrent_txs: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// How long the dispatcher waits for a submitted tx to confirm
    pub confirmation_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    /// Terminal orders are archived this long after their last update
    pub retention_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub scan_interval_secs: u64,
    /// Alert when an order sits in AwaitingFunding longer than this
    pub funding_grace_secs: u64,
    /// Alert when a live order is within this many blocks of a leg timeout
    pub timeout_margin_blocks: u64,
    /// Alert when a refund has been in flight longer than this
    pub refund_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub family: ChainFamily,
    pub rpc_urls: Vec<String>,
    pub escrow_address: String,
    /// Blocks behind the head the watcher stays to ride out reorgs. Falls
    /// back to a per-chain recommended depth when omitted.
    pub confirmation_depth: Option<u64>,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
    pub enabled: bool,
}

/// Chain families the adapter layer knows how to speak to. Additional
/// families plug in behind the `ChainAdapter` trait.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub keystore_path: Option<String>,
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    pub slack_webhook_url: Option<String>,
    pub pagerduty_key: Option<String>,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific path
    pub fn load_from(config_path: &PathBuf) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in &self.chains {
            if chain.enabled {
                if chain.rpc_urls.is_empty() {
                    anyhow::bail!("Chain {} has no RPC URLs configured", name);
                }
                if chain.escrow_address.is_empty() {
                    anyhow::bail!("Chain {} has no escrow address configured", name);
                }
            }
        }

        if self.relayer.max_retries == 0 {
            anyhow::bail!("relayer.max_retries must be at least 1");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

//! Configuration management for the Fusion Exchange
//!
//! Loads configuration from TOML files with environment variable substitution
//! and exposes the per-chain contract table as an injectable [`ChainRegistry`].

use crate::chain::{recommended_block_time, recommended_confirmations};
use crate::cross_chain::TimeLocks;
use crate::error::{ExchangeError, ExchangeResult};
use crate::wire::u256_dec;

use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub timelocks: TimeLocks,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub instance_id: String,
    /// Extra wait on top of the timelock and confirmation gates
    pub reveal_delay_floor_secs: u64,
    pub finality_poll_interval_ms: u64,
    /// Upper bound on waiting for both chains to reach the withdrawal window
    pub finality_timeout_secs: u64,
    pub confirmation_timeout_secs: u64,
    pub rpc_timeout_secs: u64,
    pub store_timeout_secs: u64,
    pub read_max_retries: u32,
    pub read_retry_delay_ms: u64,
    pub read_retry_max_delay_ms: u64,
    pub event_query_retries: u32,
    pub auction_duration_secs: u64,
    pub order_expiration_delay_secs: u64,
    pub health_check_interval_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            instance_id: "fusion-exchange-1".to_string(),
            reveal_delay_floor_secs: 5,
            finality_poll_interval_ms: 2_000,
            finality_timeout_secs: 900,
            confirmation_timeout_secs: 120,
            rpc_timeout_secs: 30,
            store_timeout_secs: 10,
            read_max_retries: 5,
            read_retry_delay_ms: 500,
            read_retry_max_delay_ms: 8_000,
            event_query_retries: 5,
            auction_duration_secs: 120,
            order_expiration_delay_secs: 12,
            health_check_interval_secs: 30,
        }
    }
}

impl ExchangeConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn finality_timeout(&self) -> Duration {
        Duration::from_secs(self.finality_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Empty selects the in-memory store
    #[serde(default)]
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
    pub rpc_urls: Vec<String>,
    pub explorer_url: Option<String>,
    /// Falls back to a per-chain recommendation when unset
    pub confirmation_blocks: Option<u64>,
    /// Expected seconds between blocks, same fallback
    #[serde(default)]
    pub block_time_secs: Option<u64>,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
    #[serde(with = "u256_dec")]
    pub safety_deposit_wei: U256,
    pub contracts: ContractAddresses,
    pub enabled: bool,
}

impl ChainConfig {
    /// Depth a deployment needs before its escrow is withdrawn
    pub fn confirmations(&self) -> u64 {
        self.confirmation_blocks
            .unwrap_or_else(|| recommended_confirmations(self.chain_id))
    }

    pub fn block_time_secs(&self) -> u64 {
        self.block_time_secs
            .unwrap_or_else(|| recommended_block_time(self.chain_id))
            .max(1)
    }
}

/// Protocol contracts deployed on one chain
#[derive(Debug, Clone, Deserialize)]
pub struct ContractAddresses {
    pub limit_order_protocol: Address,
    pub escrow_factory: Address,
    pub resolver: Address,
    /// Skips the factory read when set
    pub escrow_src_implementation: Option<Address>,
    pub escrow_dst_implementation: Option<Address>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
    Arbitrum,
    Optimism,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding the resolver owner's private key
    pub private_key_env: Option<String>,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("FUSION_EXCHANGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
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
        if self.enabled_chains().len() < 2 {
            anyhow::bail!("A cross-chain exchange needs at least two enabled chains");
        }

        for (name, chain) in self.enabled_chains() {
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.explorer_url.is_none() {
                tracing::warn!("Chain {} has no explorer URL - links will be omitted", name);
            }
        }

        self.timelocks
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid timelock ladder: {}", e))?;
        self.check_timing()?;

        Ok(())
    }

    /// Check every route can finish inside the timelock ladder.
    ///
    /// The destination escrow must be created while
    /// `dstDeployedAt + dstCancellation <= srcDeployedAt + srcCancellation`
    /// still holds, and each deployment must reach its confirmation depth
    /// before its cancellation window opens.
    fn check_timing(&self) -> Result<()> {
        let locks = &self.timelocks;
        let chains = self.enabled_chains();

        for (name, chain) in &chains {
            let block_time = chain.block_time_secs();
            if self.exchange.confirmation_timeout_secs < block_time {
                anyhow::bail!(
                    "confirmation_timeout_secs ({}) is shorter than one block on chain {} ({}s)",
                    self.exchange.confirmation_timeout_secs,
                    name,
                    block_time
                );
            }

            let finality = chain.confirmations() * block_time;
            let window = locks.src_cancellation.min(locks.dst_cancellation) as u64;
            if finality >= window {
                anyhow::bail!(
                    "Chain {} needs about {}s for {} confirmations, cancellation opens after {}s",
                    name,
                    finality,
                    chain.confirmations(),
                    window
                );
            }
        }

        for (src_name, src) in &chains {
            for (dst_name, dst) in &chains {
                if src.chain_id == dst.chain_id {
                    continue;
                }
                // one source receipt plus destination inclusion
                let fill_latency = src.block_time_secs() + dst.block_time_secs();
                if locks.dst_cancellation as u64 + fill_latency >= locks.src_cancellation as u64 {
                    anyhow::bail!(
                        "Route {} -> {}: dstCancellation {}s plus ~{}s fill latency reaches srcCancellation {}s",
                        src_name,
                        dst_name,
                        locks.dst_cancellation,
                        fill_latency,
                        locks.src_cancellation
                    );
                }
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }
}

/// Contract address table keyed by chain id
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: HashMap<u64, ChainConfig>,
}

impl ChainRegistry {
    pub fn new(chains: impl IntoIterator<Item = ChainConfig>) -> Self {
        Self {
            chains: chains.into_iter().map(|c| (c.chain_id, c)).collect(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.enabled_chains().into_iter().map(|(_, c)| c.clone()))
    }

    pub fn get(&self, chain_id: u64) -> ExchangeResult<&ChainConfig> {
        self.chains
            .get(&chain_id)
            .ok_or(ExchangeError::UnknownChainConfig { chain_id })
    }

    pub fn contracts(&self, chain_id: u64) -> ExchangeResult<&ContractAddresses> {
        Ok(&self.get(chain_id)?.contracts)
    }

    pub fn safety_deposit(&self, chain_id: u64) -> ExchangeResult<U256> {
        Ok(self.get(chain_id)?.safety_deposit_wei)
    }

    /// Explorer link for a transaction, if the chain has an explorer configured
    pub fn tx_link(&self, chain_id: u64, tx_hash: &B256) -> Option<String> {
        let base = self.chains.get(&chain_id)?.explorer_url.as_ref()?;
        Some(format!("{}/tx/{}", base.trim_end_matches('/'), tx_hash))
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.chains.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const SAMPLE: &str = r#"
[exchange]
instance_id = "test"
reveal_delay_floor_secs = 0

[database]
url = ""
max_connections = 5
min_connections = 1

[api]
host = "127.0.0.1"
port = 3000

[metrics]
enabled = false
port = 9090

[wallet]
private_key_env = "RESOLVER_PRIVATE_KEY"

[chains.sepolia]
chain_id = 11155111
name = "Sepolia"
rpc_urls = ["${FUSION_TEST_RPC}"]
explorer_url = "https://sepolia.etherscan.io"
confirmation_blocks = 3
gas_price_strategy = "eip1559"
max_gas_price_gwei = 100
safety_deposit_wei = "1000000000000000"
enabled = true

[chains.sepolia.contracts]
limit_order_protocol = "0x111111125421ca6dc452d289314280a0f8842a65"
escrow_factory = "0x00000000000000000000000000000000000000fa"
resolver = "0x00000000000000000000000000000000000000e1"

[chains.base_sepolia]
chain_id = 84532
name = "Base Sepolia"
rpc_urls = ["https://sepolia.base.org"]
explorer_url = "https://sepolia.basescan.org/"
confirmation_blocks = 3
gas_price_strategy = "optimism"
max_gas_price_gwei = 10
safety_deposit_wei = 1000000000000000
enabled = true

[chains.base_sepolia.contracts]
limit_order_protocol = "0x111111125421ca6dc452d289314280a0f8842a65"
escrow_factory = "0x00000000000000000000000000000000000000fb"
resolver = "0x00000000000000000000000000000000000000e2"
escrow_dst_implementation = "0x00000000000000000000000000000000000000d2"
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_from_file() {
        env::set_var("FUSION_TEST_RPC", "https://rpc.sepolia.org");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.exchange.instance_id, "test");
        assert_eq!(settings.exchange.order_expiration_delay_secs, 12);
        assert_eq!(settings.timelocks, TimeLocks::default());
        assert_eq!(settings.chains["sepolia"].rpc_urls[0], "https://rpc.sepolia.org");

        let registry = ChainRegistry::from_settings(&settings);
        assert_eq!(registry.chain_ids(), vec![84532, 11155111]);
        assert_eq!(
            registry.safety_deposit(84532).unwrap(),
            U256::from(1_000_000_000_000_000u64)
        );
        assert_eq!(
            registry.tx_link(84532, &B256::ZERO).unwrap(),
            format!("https://sepolia.basescan.org/tx/{}", B256::ZERO)
        );
        assert!(registry
            .contracts(84532)
            .unwrap()
            .escrow_dst_implementation
            .is_some());
    }

    #[test]
    fn test_unknown_chain_lookup() {
        let registry = ChainRegistry::default();
        assert!(matches!(
            registry.get(1),
            Err(ExchangeError::UnknownChainConfig { chain_id: 1 })
        ));
    }

    fn load_str(config: &str) -> Result<Settings> {
        env::set_var("FUSION_TEST_RPC", "https://rpc.sepolia.org");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.as_bytes()).unwrap();
        Settings::load_from(file.path())
    }

    #[test]
    fn test_default_sepolia_depth_outlasts_cancellation() {
        // 12 blocks of 12s run past the 101s destination cancellation
        let deep = SAMPLE.replacen("confirmation_blocks = 3\n", "", 1);
        let err = load_str(&deep).unwrap_err();
        assert!(err.to_string().contains("Chain sepolia needs about 144s"), "{err}");
    }

    #[test]
    fn test_route_without_fill_slack_rejected() {
        let tight = format!(
            "{SAMPLE}\n[timelocks]\nsrcWithdrawal = 10\nsrcPublicWithdrawal = 100\n\
             srcCancellation = 110\nsrcPublicCancellation = 120\ndstWithdrawal = 10\n\
             dstPublicWithdrawal = 90\ndstCancellation = 101\n"
        );
        let err = load_str(&tight).unwrap_err();
        assert!(err.to_string().contains("fill latency"), "{err}");
    }

    #[test]
    fn test_confirmation_timeout_covers_a_block() {
        let short = SAMPLE.replace(
            "reveal_delay_floor_secs = 0",
            "reveal_delay_floor_secs = 0\nconfirmation_timeout_secs = 5",
        );
        let err = load_str(&short).unwrap_err();
        assert!(err.to_string().contains("shorter than one block"), "{err}");
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let shipped = include_str!("../config/default.toml")
            .replace("${DATABASE_URL}", "")
            .replace("${SEPOLIA_RPC_URL}", "https://rpc.sepolia.org")
            .replace("${BASE_SEPOLIA_RPC_URL}", "https://sepolia.base.org")
            .replace("${SEPOLIA_LOP_ADDRESS}", "0x111111125421ca6dc452d289314280a0f8842a65")
            .replace("${BASE_SEPOLIA_LOP_ADDRESS}", "0x111111125421ca6dc452d289314280a0f8842a65")
            .replace("${SEPOLIA_ESCROW_FACTORY_ADDRESS}", "0x00000000000000000000000000000000000000fa")
            .replace("${BASE_SEPOLIA_ESCROW_FACTORY_ADDRESS}", "0x00000000000000000000000000000000000000fb")
            .replace("${SEPOLIA_RESOLVER_ADDRESS}", "0x00000000000000000000000000000000000000e1")
            .replace("${BASE_SEPOLIA_RESOLVER_ADDRESS}", "0x00000000000000000000000000000000000000e2");
        let settings = load_str(&shipped).unwrap();
        assert_eq!(settings.chains["sepolia"].confirmations(), 3);
    }

    #[test]
    fn test_single_chain_rejected() {
        let single = SAMPLE.split("[chains.base_sepolia]").next().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(single.as_bytes()).unwrap();
        assert!(Settings::load_from(file.path()).is_err());
    }
}

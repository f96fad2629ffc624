//! Chain provider with multi-RPC support and automatic failover

use crate::config::ChainConfig;
use crate::error::{ExchangeError, ExchangeResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Upper bound for a single RPC round trip
    rpc_timeout: Duration,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: ChainConfig, rpc_timeout: Duration) -> ExchangeResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(500));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(ExchangeError::ChainCall {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            rpc_timeout,
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    fn chain_error(&self, message: impl Into<String>) -> ExchangeError {
        ExchangeError::ChainCall {
            chain_id: self.config.chain_id,
            message: message.into(),
        }
    }

    /// Run an idempotent read against each provider in turn, bounded by the RPC timeout
    async fn read<T, F, Fut>(&self, operation: &str, f: F) -> ExchangeResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;
        for _ in 0..self.http_providers.len() {
            match timeout(self.rpc_timeout, f(self.http().clone())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!(
                        "{} failed on chain {}: {}",
                        operation, self.config.chain_id, e
                    );
                    last_error = Some(self.chain_error(format!("{operation}: {e}")));
                }
                Err(_) => {
                    warn!("{} timed out on chain {}", operation, self.config.chain_id);
                    last_error = Some(ExchangeError::Timeout {
                        operation: format!("{operation} on chain {}", self.config.chain_id),
                    });
                }
            }
            self.failover();
        }

        Err(last_error.unwrap_or_else(|| self.chain_error("All providers failed")))
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> ExchangeResult<u64> {
        self.read("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await
            .map(|b| b.as_u64())
    }

    /// Get a block header by number or hash
    pub async fn get_block(&self, id: BlockId) -> ExchangeResult<Block<H256>> {
        self.read("eth_getBlockByNumber", |p| async move { p.get_block(id).await })
            .await?
            .ok_or_else(|| self.chain_error(format!("block {id:?} not found")))
    }

    /// Read-only contract call
    pub async fn call(&self, tx: &TypedTransaction) -> ExchangeResult<Bytes> {
        self.read("eth_call", |p| async move { p.call(tx, None).await })
            .await
    }

    /// Get logs for a filter
    pub async fn get_logs(&self, filter: &Filter) -> ExchangeResult<Vec<Log>> {
        self.read("eth_getLogs", |p| async move { p.get_logs(filter).await })
            .await
    }

    /// Pending-inclusive transaction count of an account
    pub async fn transaction_count(&self, address: Address) -> ExchangeResult<u64> {
        self.read("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address, Some(BlockNumber::Pending.into()))
                .await
        })
        .await
        .map(|n| n.as_u64())
    }

    pub async fn get_balance(&self, address: Address) -> ExchangeResult<U256> {
        self.read("eth_getBalance", |p| async move { p.get_balance(address, None).await })
            .await
    }

    /// Estimate gas for a transaction
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> ExchangeResult<U256> {
        timeout(self.rpc_timeout, self.http().estimate_gas(tx, None))
            .await
            .map_err(|_| ExchangeError::Timeout {
                operation: format!("eth_estimateGas on chain {}", self.config.chain_id),
            })?
            .map_err(|e| self.chain_error(format!("gas estimation failed: {e}")))
    }

    /// Legacy `eth_gasPrice`
    pub async fn gas_price(&self) -> ExchangeResult<U256> {
        self.read("eth_gasPrice", |p| async move { p.get_gas_price().await })
            .await
    }

    /// Base fee of the latest block
    pub async fn base_fee(&self) -> ExchangeResult<U256> {
        self.get_block(BlockNumber::Latest.into())
            .await?
            .base_fee_per_gas
            .ok_or_else(|| self.chain_error("latest block has no base fee"))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }
}

/// Gas price types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

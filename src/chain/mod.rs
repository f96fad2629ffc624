//! Chain module - RPC access to every configured chain
//!
//! This module provides:
//! - The `ChainRpc` seam the exchange drives (calls, logs, submissions)
//! - Multi-RPC provider management with automatic failover
//! - Timelock and confirmation based finality gating
//! - Bounded retry for idempotent reads

pub mod client;
pub mod finality;
pub mod provider;
pub mod retry;

pub use client::RpcChainClient;
pub use finality::{
    recommended_block_time, recommended_confirmations, FinalityGate, RevealCheckpoint,
};
pub use provider::{ChainProvider, GasPrice};
pub use retry::RetryPolicy;

use crate::config::Settings;
use crate::error::{ExchangeError, ExchangeResult};
use crate::resolver::TransactionData;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::signers::LocalWallet;
use std::sync::Arc;
use tracing::{info, warn};

/// Log entry as returned by `eth_getLogs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub tx_hash: Option<B256>,
}

/// Confirmed submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedTransaction {
    pub tx_hash: B256,
    pub block_hash: B256,
    pub block_number: u64,
    pub block_timestamp: u64,
}

/// Head of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub number: u64,
    pub timestamp: u64,
}

/// Operations the exchange needs from a chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainRpc: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Confirmation depth required before a deployment counts as final
    fn confirmations(&self) -> u64;

    /// Read-only `eth_call` against the latest block
    async fn call(&self, to: Address, data: Bytes) -> ExchangeResult<Bytes>;

    /// Logs emitted by `address` with `topic0` in the block `block_hash`
    async fn get_logs(
        &self,
        block_hash: B256,
        address: Address,
        topic0: B256,
    ) -> ExchangeResult<Vec<ChainLog>>;

    /// Broadcast once and wait for the receipt. Never re-broadcasts.
    async fn send_transaction(&self, tx: TransactionData) -> ExchangeResult<SubmittedTransaction>;

    async fn latest_block(&self) -> ExchangeResult<BlockInfo>;

    async fn health_check(&self) -> bool;
}

/// Manages connections to all configured chains
#[derive(Default)]
pub struct ChainManager {
    /// Chain clients indexed by chain ID
    clients: DashMap<u64, Arc<dyn ChainRpc>>,
}

impl ChainManager {
    /// Connect to every enabled chain, signing with the resolver owner's key
    pub async fn new(settings: &Settings, wallet: LocalWallet) -> ExchangeResult<Self> {
        let manager = Self::default();

        for (name, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} (ID: {})",
                chain_config.name, chain_config.chain_id
            );

            match RpcChainClient::connect(chain_config.clone(), &settings.exchange, wallet.clone())
                .await
            {
                Ok(client) => {
                    manager.insert(Arc::new(client));
                    info!("Chain {} initialized successfully", chain_config.name);
                }
                Err(e) => {
                    warn!("Skipping chain {}: {}", name, e);
                }
            }
        }

        Ok(manager)
    }

    /// Build from pre-constructed clients
    pub fn from_clients(clients: impl IntoIterator<Item = Arc<dyn ChainRpc>>) -> Self {
        let manager = Self::default();
        for client in clients {
            manager.insert(client);
        }
        manager
    }

    pub fn insert(&self, client: Arc<dyn ChainRpc>) {
        self.clients.insert(client.chain_id(), client);
    }

    /// Get client for a specific chain
    pub fn get(&self, chain_id: u64) -> ExchangeResult<Arc<dyn ChainRpc>> {
        self.clients
            .get(&chain_id)
            .map(|c| c.clone())
            .ok_or(ExchangeError::UnknownChainConfig { chain_id })
    }

    /// Probe every chain concurrently
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let clients: Vec<(u64, Arc<dyn ChainRpc>)> = self
            .clients
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        let mut results = futures::future::join_all(clients.into_iter().map(
            |(chain_id, client)| async move {
                let healthy = client.health_check().await;
                crate::metrics::record_chain_health(chain_id, healthy);
                (chain_id, healthy)
            },
        ))
        .await;
        results.sort_unstable_by_key(|(id, _)| *id);
        results
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.clients.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }
}

pub(crate) mod convert {
    //! Conversions between the `ethers` and `alloy` primitive types

    use alloy_primitives::{Address, B256, U256};
    use ethers::types as eth;

    pub fn to_h160(address: Address) -> eth::H160 {
        eth::H160(address.0 .0)
    }

    pub fn from_h160(address: eth::H160) -> Address {
        Address::from(address.0)
    }

    pub fn to_h256(hash: B256) -> eth::H256 {
        eth::H256(hash.0)
    }

    pub fn from_h256(hash: eth::H256) -> B256 {
        B256::from(hash.0)
    }

    pub fn to_eth_u256(value: U256) -> eth::U256 {
        eth::U256(value.into_limbs())
    }

    pub fn from_eth_u256(value: eth::U256) -> U256 {
        U256::from_limbs(value.0)
    }
}

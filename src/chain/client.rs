//! JSON-RPC backed [`ChainRpc`] implementation

use super::convert::{from_h160, from_h256, to_h160, to_h256};
use super::{BlockInfo, ChainLog, ChainProvider, ChainRpc, SubmittedTransaction};
use crate::config::{ChainConfig, ExchangeConfig};
use crate::error::{ExchangeError, ExchangeResult};
use crate::resolver::TransactionData;
use crate::tx::TransactionSender;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{BlockNumber, Filter, Log, TransactionRequest};
use tracing::{info, warn};

/// One chain reached over HTTP RPC, signing with the resolver owner's key
pub struct RpcChainClient {
    provider: ChainProvider,
    sender: TransactionSender,
    confirmations: u64,
}

impl RpcChainClient {
    pub async fn connect(
        config: ChainConfig,
        exchange: &ExchangeConfig,
        wallet: LocalWallet,
    ) -> ExchangeResult<Self> {
        let chain_id = config.chain_id;
        let confirmations = config.confirmations();
        let sender = TransactionSender::new(
            &config,
            wallet,
            exchange.confirmation_timeout(),
            exchange.rpc_timeout(),
        );
        let provider = ChainProvider::new(config, exchange.rpc_timeout())?;

        match provider.get_block_number().await {
            Ok(block) => info!("Chain {} reachable at block {}", chain_id, block),
            Err(e) => warn!("Chain {} not reachable yet: {}", chain_id, e),
        }

        Ok(Self {
            provider,
            sender,
            confirmations,
        })
    }
}

fn to_chain_log(log: Log) -> ChainLog {
    ChainLog {
        address: from_h160(log.address),
        topics: log.topics.into_iter().map(from_h256).collect(),
        data: Bytes::from(log.data.to_vec()),
        block_hash: log.block_hash.map(from_h256),
        block_number: log.block_number.map(|n| n.as_u64()),
        tx_hash: log.transaction_hash.map(from_h256),
    }
}

#[async_trait]
impl ChainRpc for RpcChainClient {
    fn chain_id(&self) -> u64 {
        self.provider.chain_id()
    }

    fn confirmations(&self) -> u64 {
        self.confirmations
    }

    async fn call(&self, to: Address, data: Bytes) -> ExchangeResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(to_h160(to))
            .data(data.to_vec())
            .into();
        let output = self.provider.call(&tx).await?;
        Ok(Bytes::from(output.to_vec()))
    }

    async fn get_logs(
        &self,
        block_hash: B256,
        address: Address,
        topic0: B256,
    ) -> ExchangeResult<Vec<ChainLog>> {
        let filter = Filter::new()
            .at_block_hash(to_h256(block_hash))
            .address(to_h160(address))
            .topic0(to_h256(topic0));

        let logs = self.provider.get_logs(&filter).await?;
        Ok(logs.into_iter().map(to_chain_log).collect())
    }

    async fn send_transaction(&self, tx: TransactionData) -> ExchangeResult<SubmittedTransaction> {
        self.sender.send(&self.provider, &tx).await
    }

    async fn latest_block(&self) -> ExchangeResult<BlockInfo> {
        let block = self.provider.get_block(BlockNumber::Latest.into()).await?;
        let number = block.number.ok_or_else(|| ExchangeError::ChainCall {
            chain_id: self.chain_id(),
            message: "latest block has no number".to_string(),
        })?;

        Ok(BlockInfo {
            number: number.as_u64(),
            timestamp: block.timestamp.as_u64(),
        })
    }

    async fn health_check(&self) -> bool {
        self.provider.health_check().await
    }
}

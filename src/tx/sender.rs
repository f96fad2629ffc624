//! Transaction sender with at-most-once broadcast
//!
//! Fund-moving calls are broadcast exactly once. A rejected broadcast hands
//! its nonce back; a timed-out one leaves the outcome unknown, so local nonce
//! state is dropped and the error surfaces without a retry.

use super::gas::GasEstimator;
use super::nonce::NonceManager;
use crate::chain::convert::{from_h256, to_eth_u256, to_h160};
use crate::chain::{ChainProvider, GasPrice, SubmittedTransaction};
use crate::config::ChainConfig;
use crate::error::{ExchangeError, ExchangeResult};
use crate::resolver::TransactionData;

use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Blocks awaited after broadcast: the inclusion block only
const RECEIPT_CONFIRMATIONS: usize = 1;

/// Signs and submits transactions on one chain
pub struct TransactionSender {
    chain_id: u64,
    /// Wallet for signing, bound to `chain_id`
    wallet: LocalWallet,
    nonce_manager: NonceManager,
    gas_estimator: GasEstimator,
    /// Bound on the wait for the receipt
    confirmation_timeout: Duration,
    rpc_timeout: Duration,
}

impl TransactionSender {
    pub fn new(
        config: &ChainConfig,
        wallet: LocalWallet,
        confirmation_timeout: Duration,
        rpc_timeout: Duration,
    ) -> Self {
        let chain_id = config.chain_id;
        let wallet = wallet.with_chain_id(chain_id);
        info!(
            "Transaction sender for chain {} initialized with wallet: {:?}",
            chain_id,
            wallet.address()
        );

        Self {
            chain_id,
            nonce_manager: NonceManager::new(chain_id, wallet.address()),
            wallet,
            gas_estimator: GasEstimator::for_chain(config),
            confirmation_timeout,
            rpc_timeout,
        }
    }

    /// Get wallet address
    pub fn wallet_address(&self) -> Address {
        self.wallet.address()
    }

    /// Build, sign, broadcast once, and wait for the receipt.
    ///
    /// Returns at inclusion; confirmation depth is left to the finality gate.
    pub async fn send(
        &self,
        provider: &ChainProvider,
        call: &TransactionData,
    ) -> ExchangeResult<SubmittedTransaction> {
        let gas_price = self.gas_estimator.quote(provider).await?;
        let nonce = self.nonce_manager.next(provider).await?;

        let mut tx = self.build_tx(call, nonce, &gas_price);

        let estimate = match provider.estimate_gas(&tx).await {
            Ok(estimate) => estimate,
            Err(e) => {
                // Estimation fails when the call would revert
                self.nonce_manager.release(nonce).await;
                return Err(e);
            }
        };
        let gas_limit = self.gas_estimator.gas_limit(estimate);
        tx.set_gas(gas_limit);

        let needed = GasEstimator::required_funds(gas_limit, &gas_price, to_eth_u256(call.value));
        let balance = provider.get_balance(self.wallet.address()).await?;
        if balance < needed {
            self.nonce_manager.release(nonce).await;
            return Err(ExchangeError::Wallet(format!(
                "insufficient funds on chain {}: have {}, need {}",
                self.chain_id, balance, needed
            )));
        }

        let signature = match self.wallet.sign_transaction(&tx).await {
            Ok(sig) => sig,
            Err(e) => {
                self.nonce_manager.release(nonce).await;
                return Err(ExchangeError::Wallet(e.to_string()));
            }
        };
        let tx_hash = tx.hash(&signature);
        let raw = tx.rlp_signed(&signature);

        let pending = match timeout(self.rpc_timeout, provider.http().send_raw_transaction(raw)).await
        {
            Ok(Ok(pending)) => pending,
            Ok(Err(e)) => {
                error!(
                    "Broadcast of {:?} rejected on chain {}: {}",
                    tx_hash, self.chain_id, e
                );
                self.nonce_manager.release(nonce).await;
                return Err(ExchangeError::ChainCall {
                    chain_id: self.chain_id,
                    message: format!("broadcast rejected: {e}"),
                });
            }
            Err(_) => {
                warn!(
                    "Broadcast of {:?} timed out on chain {}; outcome unknown",
                    tx_hash, self.chain_id
                );
                self.nonce_manager.reset().await;
                return Err(ExchangeError::Timeout {
                    operation: format!("broadcast of {tx_hash:?} on chain {}", self.chain_id),
                });
            }
        };

        self.nonce_manager.mark_pending(nonce, tx_hash).await;
        info!(
            "Transaction sent on chain {}: {:?} (nonce {})",
            self.chain_id, tx_hash, nonce
        );

        let receipt = timeout(
            self.confirmation_timeout,
            pending.confirmations(RECEIPT_CONFIRMATIONS),
        )
        .await
        .map_err(|_| ExchangeError::Timeout {
            operation: format!("receipt of {tx_hash:?} on chain {}", self.chain_id),
        })?
        .map_err(|e| ExchangeError::ChainCall {
            chain_id: self.chain_id,
            message: format!("waiting for {tx_hash:?}: {e}"),
        })?
        .ok_or_else(|| ExchangeError::ChainCall {
            chain_id: self.chain_id,
            message: format!("transaction {tx_hash:?} dropped from mempool"),
        })?;

        self.nonce_manager.confirm(nonce).await;

        if receipt.status != Some(U64::from(1u64)) {
            return Err(ExchangeError::Reverted {
                chain_id: self.chain_id,
                tx_hash: format!("{tx_hash:?}"),
            });
        }

        let block_hash = receipt.block_hash.ok_or_else(|| ExchangeError::ChainCall {
            chain_id: self.chain_id,
            message: format!("receipt of {tx_hash:?} has no block hash"),
        })?;
        let block = provider.get_block(BlockId::Hash(block_hash)).await?;
        debug!(
            "Transaction {:?} mined in block {:?} on chain {}",
            tx_hash, block_hash, self.chain_id
        );

        Ok(SubmittedTransaction {
            tx_hash: from_h256(tx_hash),
            block_hash: from_h256(block_hash),
            block_number: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
            block_timestamp: block.timestamp.as_u64(),
        })
    }

    fn build_tx(&self, call: &TransactionData, nonce: u64, gas_price: &GasPrice) -> TypedTransaction {
        let to = to_h160(call.to);
        let data = Bytes::from(call.data.to_vec());
        let value = to_eth_u256(call.value);

        match gas_price {
            GasPrice::Legacy(price) => TransactionRequest::new()
                .from(self.wallet.address())
                .to(to)
                .data(data)
                .value(value)
                .nonce(nonce)
                .gas_price(*price)
                .chain_id(self.chain_id)
                .into(),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .from(self.wallet.address())
                .to(to)
                .data(data)
                .value(value)
                .nonce(nonce)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                .chain_id(self.chain_id)
                .into(),
        }
    }
}

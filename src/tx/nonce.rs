//! Nonce management for reliable transaction submission
//!
//! Handles:
//! - Local nonce tracking so sequential submissions never collide
//! - Releasing nonces of transactions that were never broadcast
//! - Resynchronising with the chain after an ambiguous broadcast

use crate::chain::ChainProvider;
use crate::error::ExchangeResult;

use ethers::types::{Address, H256};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Per-chain nonce state
#[derive(Default)]
struct NonceState {
    /// Next nonce to hand out, `None` until fetched from the chain
    current: Option<u64>,
    /// Broadcast transactions awaiting a receipt: nonce -> tx hash
    pending: BTreeMap<u64, H256>,
}

/// Tracks nonces of one account on one chain
pub struct NonceManager {
    chain_id: u64,
    wallet_address: Address,
    state: Mutex<NonceState>,
}

impl NonceManager {
    pub fn new(chain_id: u64, wallet_address: Address) -> Self {
        Self {
            chain_id,
            wallet_address,
            state: Mutex::new(NonceState::default()),
        }
    }

    /// Allocate the next nonce, fetching the on-chain count on first use
    pub async fn next(&self, provider: &ChainProvider) -> ExchangeResult<u64> {
        let mut state = self.state.lock().await;
        let nonce = match state.current {
            Some(nonce) => nonce,
            None => provider.transaction_count(self.wallet_address).await?,
        };
        state.current = Some(nonce + 1);

        debug!("Allocated nonce {} for chain {}", nonce, self.chain_id);
        Ok(nonce)
    }

    /// Mark a nonce as broadcast
    pub async fn mark_pending(&self, nonce: u64, tx_hash: H256) {
        self.state.lock().await.pending.insert(nonce, tx_hash);
    }

    /// Transaction mined
    pub async fn confirm(&self, nonce: u64) {
        self.state.lock().await.pending.remove(&nonce);
    }

    /// Hand a nonce back when its transaction never reached the network
    pub async fn release(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        state.pending.remove(&nonce);

        // Only the most recent allocation can be reused without a gap
        if state.current == Some(nonce + 1) {
            state.current = Some(nonce);
        }
    }

    /// Forget local state and refetch from the chain on the next allocation
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        if !state.pending.is_empty() {
            warn!(
                "Resetting nonce tracking on chain {} with {} pending transactions",
                self.chain_id,
                state.pending.len()
            );
        }
        *state = NonceState::default();
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    #[cfg(test)]
    async fn seed(&self, nonce: u64) {
        self.state.lock().await.current = Some(nonce);
    }
}

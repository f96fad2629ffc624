//! Finality gating before a secret is used on-chain
//!
//! Withdrawals are only valid once each escrow's private withdrawal window is
//! open by that chain's own block timestamps, and the deployment is buried
//! deep enough that a reorg cannot erase it. Confirmation depth differs per
//! network:
//! - Ethereum: Probabilistic (32 blocks for practical finality, ~6 min)
//! - Polygon: Probabilistic (128 blocks)
//! - Arbitrum / Optimism / Base: soft finality from the sequencer
//! - Avalanche: Instant finality (1 block)

use super::ChainRpc;
use crate::config::ExchangeConfig;
use crate::error::{ExchangeError, ExchangeResult};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// What one chain must reach before a withdrawal may be submitted there
#[derive(Clone)]
pub struct RevealCheckpoint {
    pub chain: Arc<dyn ChainRpc>,
    /// Block containing the escrow deployment
    pub deploy_block: u64,
    /// Chain timestamp at which the private withdrawal window opens
    pub not_before: u64,
    /// Chain timestamp at which the escrow becomes cancellable
    pub not_after: u64,
}

impl RevealCheckpoint {
    pub fn new(chain: Arc<dyn ChainRpc>, deploy_block: u64, not_before: u64, not_after: u64) -> Self {
        Self {
            chain,
            deploy_block,
            not_before,
            not_after,
        }
    }

    fn check_open(&self, timestamp: u64) -> ExchangeResult<()> {
        if timestamp >= self.not_after {
            return Err(ExchangeError::WindowClosed {
                chain_id: self.chain.chain_id(),
                deadline: self.not_after,
                now: timestamp,
            });
        }
        Ok(())
    }

    async fn is_ready(&self) -> ExchangeResult<bool> {
        let head = self.chain.latest_block().await?;
        self.check_open(head.timestamp)?;

        let depth = head.number.saturating_sub(self.deploy_block);
        let confirmed = depth >= self.chain.confirmations();
        let window_open = head.timestamp >= self.not_before;

        debug!(
            "Chain {}: {} / {} confirmations, timestamp {} (window {}..{})",
            self.chain.chain_id(),
            depth,
            self.chain.confirmations(),
            head.timestamp,
            self.not_before,
            self.not_after
        );
        Ok(confirmed && window_open)
    }

    /// Chain time left before cancellation opens
    async fn remaining(&self) -> ExchangeResult<Duration> {
        let head = self.chain.latest_block().await?;
        self.check_open(head.timestamp)?;
        Ok(Duration::from_secs(self.not_after - head.timestamp))
    }
}

/// Waits until every checkpoint is satisfied, failing once any window closes
pub struct FinalityGate {
    /// Minimum wait regardless of chain state
    floor_delay: Duration,
    poll_interval: Duration,
    max_wait: Duration,
}

impl FinalityGate {
    pub fn new(floor_delay: Duration, poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            floor_delay,
            poll_interval,
            max_wait,
        }
    }

    pub fn from_config(config: &ExchangeConfig) -> Self {
        Self::new(
            Duration::from_secs(config.reveal_delay_floor_secs),
            Duration::from_millis(config.finality_poll_interval_ms),
            config.finality_timeout(),
        )
    }

    /// Block until all checkpoints hold, polling each chain's head.
    ///
    /// The wait never outlasts the tightest remaining window, and a head past
    /// any checkpoint's `not_after` ends it with `WindowClosed`.
    pub async fn wait(&self, checkpoints: &[RevealCheckpoint]) -> ExchangeResult<()> {
        let mut max_wait = self.max_wait;
        for checkpoint in checkpoints {
            match checkpoint.remaining().await {
                Ok(remaining) => max_wait = max_wait.min(remaining),
                Err(e) if e.is_retryable() => warn!(
                    "Head lookup failed on chain {}: {}",
                    checkpoint.chain.chain_id(),
                    e
                ),
                Err(e) => return Err(e),
            }
        }
        let deadline = Instant::now() + max_wait;

        if !self.floor_delay.is_zero() {
            sleep(self.floor_delay).await;
        }

        loop {
            let mut waiting = Vec::new();
            for checkpoint in checkpoints {
                match checkpoint.is_ready().await {
                    Ok(true) => {}
                    Ok(false) => waiting.push(checkpoint.chain.chain_id()),
                    Err(e) if e.is_retryable() => {
                        warn!(
                            "Head lookup failed on chain {}: {}",
                            checkpoint.chain.chain_id(),
                            e
                        );
                        waiting.push(checkpoint.chain.chain_id());
                    }
                    Err(e) => return Err(e),
                }
            }

            if waiting.is_empty() {
                info!("Withdrawal windows open and deployments final");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ExchangeError::Timeout {
                    operation: format!("finality on chains {:?}", waiting),
                });
            }

            sleep(self.poll_interval).await;
        }
    }
}

/// Typical seconds between blocks
pub fn recommended_block_time(chain_id: u64) -> u64 {
    match chain_id {
        1 | 11155111 | 17000 => 12,
        137 | 80002 => 2,
        42161 | 421614 => 1,
        10 | 11155420 | 8453 | 84532 => 2,
        43114 | 43113 => 2,
        _ => 12,
    }
}

/// Get recommended confirmation blocks for a chain
pub fn recommended_confirmations(chain_id: u64) -> u64 {
    match chain_id {
        // Ethereum mainnet
        1 => 32,
        // Ethereum testnets
        11155111 | 17000 => 12,
        // Polygon mainnet
        137 => 128,
        // Polygon testnets
        80002 => 32,
        // Arbitrum
        42161 | 421614 => 64,
        // Optimism
        10 | 11155420 => 64,
        // Base
        8453 | 84532 => 64,
        // Avalanche (instant finality)
        43114 | 43113 => 1,
        // Default conservative
        _ => 64,
    }
}

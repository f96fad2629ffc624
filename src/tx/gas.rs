//! Fee quoting for resolver transactions
//!
//! Quotes follow the chain's configured strategy and never exceed its
//! `max_gas_price_gwei`, buffer included.

use crate::chain::{ChainProvider, GasPrice};
use crate::config::{ChainConfig, GasPriceStrategy};
use crate::error::ExchangeResult;

use ethers::types::U256;
use tracing::debug;

const GWEI: u64 = 1_000_000_000;
/// Tip on L1-style chains
const DEFAULT_PRIORITY_FEE: u64 = 2 * GWEI;
/// OP stack sequencers order by arrival, a nominal tip is enough
const OP_STACK_PRIORITY_FEE: u64 = 1_000_000;

/// Fee and gas-limit policy of one chain
#[derive(Debug, Clone)]
pub struct GasEstimator {
    strategy: GasPriceStrategy,
    max_fee_per_gas: U256,
    /// Percent added to the node's gas estimate
    limit_buffer_percent: u64,
    /// Percent added to quoted prices before the cap
    price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn for_chain(config: &ChainConfig) -> Self {
        Self {
            strategy: config.gas_price_strategy.clone(),
            max_fee_per_gas: U256::from(config.max_gas_price_gwei) * U256::from(GWEI),
            limit_buffer_percent: 20,
            price_buffer_percent: 10,
        }
    }

    /// Gas limit for a node estimate
    pub fn gas_limit(&self, estimate: U256) -> U256 {
        estimate + estimate * self.limit_buffer_percent / 100
    }

    /// Current fee quote for the chain's strategy
    pub async fn quote(&self, provider: &ChainProvider) -> ExchangeResult<GasPrice> {
        let quote = match self.strategy {
            // Arbitrum folds L1 data cost into its legacy price
            GasPriceStrategy::Legacy | GasPriceStrategy::Arbitrum => {
                self.legacy(provider.gas_price().await?)
            }
            GasPriceStrategy::Eip1559 | GasPriceStrategy::Optimism => {
                self.eip1559(provider.base_fee().await?)
            }
        };
        debug!("Fee quote for chain {}: {:?}", provider.chain_id(), quote);
        Ok(quote)
    }

    fn buffered(&self, value: U256) -> U256 {
        value + value * self.price_buffer_percent / 100
    }

    fn legacy(&self, price: U256) -> GasPrice {
        GasPrice::Legacy(self.buffered(price).min(self.max_fee_per_gas))
    }

    fn eip1559(&self, base_fee: U256) -> GasPrice {
        let tip = match self.strategy {
            GasPriceStrategy::Optimism => U256::from(OP_STACK_PRIORITY_FEE),
            _ => U256::from(DEFAULT_PRIORITY_FEE),
        };
        // Two base fees of headroom survive a run of full blocks
        let max_fee = self.buffered(base_fee * 2 + tip).min(self.max_fee_per_gas);

        GasPrice::Eip1559 {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: self.buffered(tip).min(max_fee),
        }
    }

    /// Balance the resolver owner needs: worst-case fee plus the attached value
    /// (the safety deposit on deployments)
    pub fn required_funds(gas_limit: U256, gas_price: &GasPrice, value: U256) -> U256 {
        let fee = match gas_price {
            GasPrice::Legacy(price) => gas_limit * *price,
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => gas_limit * *max_fee_per_gas,
        };
        fee + value
    }
}

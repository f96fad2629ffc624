//! Resolver call encoding
//!
//! Pure transforms from structured parameters to `(to, data, value)` triples
//! for the resolver contract. Nothing here touches the network.

use crate::abi::IResolver;
use crate::config::ChainRegistry;
use crate::cross_chain::{
    AmountMode, CompactSignature, CrossChainOrder, Immutables, OrderBuild, TakerTraits,
    TakerTraitsPayload,
};
use crate::error::ExchangeResult;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Call ready for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionData {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// Which escrow of the pair a call targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscrowSide {
    Src,
    Dst,
}

impl fmt::Display for EscrowSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscrowSide::Src => write!(f, "src"),
            EscrowSide::Dst => write!(f, "dst"),
        }
    }
}

/// Encodes resolver calls for one source/destination route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverCallBuilder {
    src_resolver: Address,
    dst_resolver: Address,
}

impl ResolverCallBuilder {
    pub fn new(src_resolver: Address, dst_resolver: Address) -> Self {
        Self {
            src_resolver,
            dst_resolver,
        }
    }

    pub fn for_route(registry: &ChainRegistry, src_chain: u64, dst_chain: u64) -> ExchangeResult<Self> {
        Ok(Self::new(
            registry.contracts(src_chain)?.resolver,
            registry.contracts(dst_chain)?.resolver,
        ))
    }

    pub fn resolver(&self, side: EscrowSide) -> Address {
        match side {
            EscrowSide::Src => self.src_resolver,
            EscrowSide::Dst => self.dst_resolver,
        }
    }

    /// Fill the order and deploy the source escrow.
    ///
    /// `value` is the source safety deposit carried by `immutables`.
    pub fn deploy_source(
        &self,
        order: &OrderBuild,
        immutables: &Immutables,
        signature: &[u8],
        taker_traits: &TakerTraitsPayload,
        fill_amount: U256,
    ) -> ExchangeResult<TransactionData> {
        let CompactSignature { r, vs } = CompactSignature::from_bytes(signature)?;

        let call = IResolver::deploySrcCall {
            immutables: immutables.build(),
            order: order.to_abi(),
            r,
            vs,
            amount: fill_amount,
            takerTraits: taker_traits.trait_,
            args: taker_traits.args.clone(),
        };

        Ok(TransactionData {
            to: self.src_resolver,
            data: call.abi_encode().into(),
            value: immutables.safety_deposit,
        })
    }

    /// Deploy the destination escrow.
    ///
    /// The destination escrow must expire before the source private
    /// cancellation, which the resolver checks against the timestamp passed here.
    pub fn deploy_destination(&self, dst_immutables: &Immutables) -> TransactionData {
        let src_cancellation = dst_immutables.time_locks.src_view().private_cancellation;

        let call = IResolver::deployDstCall {
            dstImmutables: dst_immutables.build(),
            srcCancellationTimestamp: U256::from(src_cancellation),
        };

        TransactionData {
            to: self.dst_resolver,
            data: call.abi_encode().into(),
            value: dst_immutables.safety_deposit,
        }
    }

    /// Release an escrow with the secret
    pub fn withdraw(
        &self,
        side: EscrowSide,
        escrow: Address,
        secret: B256,
        immutables: &Immutables,
    ) -> TransactionData {
        let call = IResolver::withdrawCall {
            escrow,
            secret,
            immutables: immutables.build(),
        };

        TransactionData {
            to: self.resolver(side),
            data: call.abi_encode().into(),
            value: U256::ZERO,
        }
    }

    /// Timelock-gated refund
    pub fn cancel(&self, side: EscrowSide, escrow: Address, immutables: &Immutables) -> TransactionData {
        let call = IResolver::cancelCall {
            escrow,
            immutables: immutables.build(),
        };

        TransactionData {
            to: self.resolver(side),
            data: call.abi_encode().into(),
            value: U256::ZERO,
        }
    }
}

/// Taker traits for a full fill: maker amount mode, threshold at the taking
/// amount, extension attached.
pub fn full_fill_traits(order: &CrossChainOrder) -> ExchangeResult<TakerTraitsPayload> {
    TakerTraits::default()
        .with_extension(order.extension())
        .with_amount_mode(AmountMode::Maker)
        .with_amount_threshold(order.taking_amount)
        .encode()
}

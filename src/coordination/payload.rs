//! Request and response bodies of the exchange endpoints
//!
//! Every `uint256` travels as a decimal string.

use crate::cross_chain::{DstComplement, ImmutablesData, OrderBuild, OrderPayload, TakerTraitsPayload};
use crate::state::{ExchangeStatus, TransactionLink};
use crate::wire::{opt_u256_dec, u256_dec};

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Route and amounts of the swap as the client sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapState {
    #[serde(alias = "fromChain")]
    pub src_chain_id: u64,
    #[serde(alias = "toChain")]
    pub dst_chain_id: u64,
    pub user_address: Address,
    pub src_token: Address,
    pub dst_token: Address,
    /// Base units
    #[serde(with = "u256_dec")]
    pub src_amount: U256,
    #[serde(with = "u256_dec")]
    pub dst_amount: U256,
}

/// Submit-fill request.
///
/// Only `order`, `swapState` and `signature` are required; the remaining
/// fields are client-side derivations, cross-checked when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillRequest {
    pub order: OrderPayload,
    pub swap_state: SwapState,
    pub signature: Bytes,
    #[serde(default)]
    pub immutables: Option<ImmutablesData>,
    #[serde(default)]
    pub hash_lock: Option<B256>,
    #[serde(default)]
    pub order_hash: Option<B256>,
    #[serde(default)]
    pub order_build: Option<OrderBuild>,
    #[serde(default)]
    pub taker_traits: Option<TakerTraitsPayload>,
    #[serde(default, with = "opt_u256_dec")]
    pub src_safety_deposit: Option<U256>,
}

/// Decoded `SrcEscrowCreated` as returned to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SrcEscrowEvent {
    pub immutables: ImmutablesData,
    pub complement: DstComplement,
    pub block_hash: B256,
    pub escrow_address: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillOutcome {
    pub order_id: Uuid,
    pub src_escrow_event: SrcEscrowEvent,
    pub dst_deployed_at: u64,
    pub dst_escrow_address: Address,
    pub dst_immutables_data: ImmutablesData,
    pub dst_immutables_hash: B256,
    pub src_immutables_hash: B256,
    pub src_immutables_data: ImmutablesData,
    pub transactions: Vec<TransactionLink>,
    pub status: ExchangeStatus,
    pub message: String,
}

/// Reveal-secret request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealRequest {
    pub order_id: Uuid,
    pub swap_state: SwapState,
    pub secret: B256,
    pub dst_immutables_data: ImmutablesData,
    pub src_immutables_data: ImmutablesData,
    #[serde(default)]
    pub src_immutables_hash: Option<B256>,
    #[serde(default)]
    pub dst_immutables_hash: Option<B256>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealOutcome {
    pub order_id: Uuid,
    pub src_escrow_address: Address,
    pub dst_escrow_address: Address,
    pub transactions: Vec<TransactionLink>,
    pub status: ExchangeStatus,
    pub message: String,
}

//! Escrow immutables and their deterministic hash

use super::{address_to_word, word_to_address, HashLock, TimeLocks};
use crate::abi::{DstImmutablesComplement, EscrowImmutables};
use crate::error::{ExchangeError, ExchangeResult};
use crate::wire::u256_dec;

use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

/// Parameter tuple an escrow is deployed with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Immutables {
    pub order_hash: B256,
    pub hash_lock: HashLock,
    pub maker: Address,
    pub taker: Address,
    pub token: Address,
    pub amount: U256,
    pub safety_deposit: U256,
    pub time_locks: TimeLocks,
}

/// Destination-side fields emitted by the factory with the source escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DstComplement {
    pub maker: Address,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub token: Address,
    #[serde(with = "u256_dec")]
    pub safety_deposit: U256,
    pub chain_id: u64,
}

/// Wire form of [`Immutables`], the shape the web client round-trips
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImmutablesData {
    pub order_hash: B256,
    pub hashlock: B256,
    pub maker: Address,
    pub taker: Address,
    pub token: Address,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    #[serde(with = "u256_dec")]
    pub safety_deposit: U256,
    #[serde(with = "u256_dec")]
    pub timelocks: U256,
}

impl Immutables {
    /// ABI tuple as the escrow contracts see it
    pub fn build(&self) -> EscrowImmutables {
        EscrowImmutables {
            orderHash: self.order_hash,
            hashlock: self.hash_lock.value(),
            maker: address_to_word(&self.maker),
            taker: address_to_word(&self.taker),
            token: address_to_word(&self.token),
            amount: self.amount,
            safetyDeposit: self.safety_deposit,
            timelocks: self.time_locks.encode(),
        }
    }

    pub fn from_build(raw: &EscrowImmutables) -> ExchangeResult<Self> {
        Ok(Self {
            order_hash: raw.orderHash,
            hash_lock: HashLock::new(raw.hashlock),
            maker: word_to_address(raw.maker)?,
            taker: word_to_address(raw.taker)?,
            token: word_to_address(raw.token)?,
            amount: raw.amount,
            safety_deposit: raw.safetyDeposit,
            time_locks: TimeLocks::decode(raw.timelocks),
        })
    }

    /// `keccak256(abi.encode(immutables))`, the escrow's CREATE2 salt
    pub fn hash(&self) -> B256 {
        keccak256(self.build().abi_encode())
    }

    pub fn with_deployed_at(mut self, deployed_at: u64) -> Self {
        self.time_locks = self.time_locks.with_deployed_at(deployed_at);
        self
    }

    /// Destination immutables: shares order hash, hash-lock and timelocks with
    /// the source side, takes maker/amount/token/deposit from the complement,
    /// and names the resolver's destination address as taker.
    pub fn to_destination(&self, complement: &DstComplement, resolver: Address) -> Self {
        Self {
            order_hash: self.order_hash,
            hash_lock: self.hash_lock,
            maker: complement.maker,
            taker: resolver,
            token: complement.token,
            amount: complement.amount,
            safety_deposit: complement.safety_deposit,
            time_locks: self.time_locks,
        }
    }

    pub fn to_data(&self) -> ImmutablesData {
        ImmutablesData {
            order_hash: self.order_hash,
            hashlock: self.hash_lock.value(),
            maker: self.maker,
            taker: self.taker,
            token: self.token,
            amount: self.amount,
            safety_deposit: self.safety_deposit,
            timelocks: self.time_locks.encode(),
        }
    }
}

impl From<&ImmutablesData> for Immutables {
    fn from(data: &ImmutablesData) -> Self {
        Self {
            order_hash: data.order_hash,
            hash_lock: HashLock::new(data.hashlock),
            maker: data.maker,
            taker: data.taker,
            token: data.token,
            amount: data.amount,
            safety_deposit: data.safety_deposit,
            time_locks: TimeLocks::decode(data.timelocks),
        }
    }
}

impl DstComplement {
    pub fn from_build(raw: &DstImmutablesComplement) -> ExchangeResult<Self> {
        if raw.chainId > U256::from(u64::MAX) {
            return Err(ExchangeError::Encoding(format!(
                "complement chain id {} out of range",
                raw.chainId
            )));
        }
        Ok(Self {
            maker: word_to_address(raw.maker)?,
            amount: raw.amount,
            token: word_to_address(raw.token)?,
            safety_deposit: raw.safetyDeposit,
            chain_id: raw.chainId.to::<u64>(),
        })
    }

    pub fn build(&self) -> DstImmutablesComplement {
        DstImmutablesComplement {
            maker: address_to_word(&self.maker),
            amount: self.amount,
            token: address_to_word(&self.token),
            safetyDeposit: self.safety_deposit,
            chainId: U256::from(self.chain_id),
        }
    }
}

//! Cross-chain order construction and its wire schema

use super::extension::{AuctionDetails, EscrowExtension, EscrowExtraData, Extension, Whitelist};
use super::{
    address_to_word, typed_data, DstComplement, HashLock, Immutables, MakerTraits, TimeLocks,
    TypedDataPayload,
};
use crate::abi::LimitOrderBuild;
use crate::config::{ChainRegistry, Settings};
use crate::error::{ExchangeError, ExchangeResult};
use crate::wire::u256_dec;

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use ethers::utils::{parse_units, ParseUnits};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const UINT_40_MAX: u64 = (1 << 40) - 1;

/// Built limit order, the `message` of the typed-data payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBuild {
    #[serde(with = "u256_dec")]
    pub salt: U256,
    pub maker: Address,
    pub receiver: Address,
    pub maker_asset: Address,
    pub taker_asset: Address,
    #[serde(with = "u256_dec")]
    pub making_amount: U256,
    #[serde(with = "u256_dec")]
    pub taking_amount: U256,
    #[serde(with = "u256_dec")]
    pub maker_traits: U256,
}

impl OrderBuild {
    /// ABI form passed to `deploySrc`
    pub fn to_abi(&self) -> LimitOrderBuild {
        LimitOrderBuild {
            salt: self.salt,
            maker: address_to_word(&self.maker),
            receiver: address_to_word(&self.receiver),
            makerAsset: address_to_word(&self.maker_asset),
            takerAsset: address_to_word(&self.taker_asset),
            makingAmount: self.making_amount,
            takingAmount: self.taking_amount,
            makerTraits: self.maker_traits,
        }
    }
}

/// Order as submitted by the web client: the built struct plus its extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub build: OrderBuild,
    pub extension: Bytes,
}

/// Commitment to the secret(s) unlocking the escrows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretCommitment {
    /// Pre-image of a single-fill lock
    Single(B256),
    /// Hashes of the per-part secrets of a multi-fill lock
    Multiple(Vec<B256>),
}

/// User-facing swap request
#[derive(Debug, Clone)]
pub struct SwapParams {
    pub maker: Address,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub src_token: Address,
    pub dst_token: Address,
    /// Human-readable amounts, scaled by the token decimals
    pub src_amount: String,
    pub dst_amount: String,
    pub src_decimals: u8,
    pub dst_decimals: u8,
    pub secret: SecretCommitment,
    pub allow_partial_fills: bool,
    pub allow_multiple_fills: bool,
}

/// Fixed policy embedded into every order
#[derive(Debug, Clone)]
pub struct OrderPolicy {
    pub time_locks: TimeLocks,
    pub auction_duration_secs: u64,
    pub expiration_delay_secs: u64,
}

impl OrderPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            time_locks: settings.timelocks,
            auction_duration_secs: settings.exchange.auction_duration_secs,
            expiration_delay_secs: settings.exchange.order_expiration_delay_secs,
        }
    }
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            time_locks: TimeLocks::default(),
            auction_duration_secs: 120,
            expiration_delay_secs: 12,
        }
    }
}

/// A maker's cross-chain intent with its escrow extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossChainOrder {
    pub src_chain_id: u64,
    pub salt: U256,
    pub maker: Address,
    pub receiver: Address,
    pub maker_asset: Address,
    pub taker_asset: Address,
    pub making_amount: U256,
    pub taking_amount: U256,
    pub maker_traits: MakerTraits,
    pub escrow: EscrowExtension,
}

impl CrossChainOrder {
    pub fn dst_chain_id(&self) -> u64 {
        self.escrow.extra.dst_chain_id
    }

    pub fn hash_lock(&self) -> HashLock {
        self.escrow.extra.hash_lock_info
    }

    pub fn time_locks(&self) -> TimeLocks {
        self.escrow.extra.time_locks
    }

    pub fn escrow_factory(&self) -> Address {
        self.escrow.escrow_factory
    }

    pub fn src_safety_deposit(&self) -> U256 {
        U256::from(self.escrow.extra.src_safety_deposit)
    }

    pub fn dst_safety_deposit(&self) -> U256 {
        U256::from(self.escrow.extra.dst_safety_deposit)
    }

    pub fn nonce(&self) -> u64 {
        self.maker_traits.nonce_or_epoch()
    }

    pub fn deadline(&self) -> u64 {
        self.maker_traits.expiration()
    }

    pub fn extension(&self) -> Extension {
        self.escrow.build()
    }

    pub fn build(&self) -> OrderBuild {
        OrderBuild {
            salt: self.salt,
            maker: self.maker,
            receiver: self.receiver,
            maker_asset: self.maker_asset,
            taker_asset: self.taker_asset,
            making_amount: self.making_amount,
            taking_amount: self.taking_amount,
            maker_traits: self.maker_traits.value(),
        }
    }

    pub fn to_payload(&self) -> OrderPayload {
        OrderPayload {
            build: self.build(),
            extension: self.extension().encode(),
        }
    }

    /// Typed-data payload bound to the source chain's limit-order protocol
    pub fn typed_data(&self, limit_order_protocol: Address) -> TypedDataPayload {
        TypedDataPayload::new(self.build(), self.src_chain_id, limit_order_protocol)
    }

    pub fn order_hash(&self, limit_order_protocol: Address) -> B256 {
        typed_data::order_hash(&self.build(), self.src_chain_id, limit_order_protocol)
    }

    /// Source escrow immutables for a fill of `amount` by `taker`.
    ///
    /// `deployedAt` stays zero; the factory stamps it on deployment.
    pub fn to_src_immutables(&self, order_hash: B256, taker: Address, amount: U256) -> Immutables {
        Immutables {
            order_hash,
            hash_lock: self.hash_lock(),
            maker: self.maker,
            taker,
            token: self.maker_asset,
            amount,
            safety_deposit: self.src_safety_deposit(),
            time_locks: self.time_locks(),
        }
    }

    /// Destination fields the factory emits with the source escrow
    pub fn dst_complement(&self) -> DstComplement {
        DstComplement {
            maker: if self.receiver == Address::ZERO {
                self.maker
            } else {
                self.receiver
            },
            amount: self.taking_amount,
            token: self.escrow.extra.dst_token,
            safety_deposit: self.dst_safety_deposit(),
            chain_id: self.dst_chain_id(),
        }
    }

    /// Rebuild from the submitted wire form, checking the salt commits to the
    /// extension and the traits announce it.
    pub fn from_payload(payload: &OrderPayload, src_chain_id: u64) -> ExchangeResult<Self> {
        let extension = Extension::decode(&payload.extension)?;
        let expected = U256::from_be_bytes(keccak256(&payload.extension).0) & low_160_mask();
        if payload.build.salt & low_160_mask() != expected {
            return Err(ExchangeError::InvalidPayload(
                "order salt does not commit to the supplied extension".to_string(),
            ));
        }

        let maker_traits = MakerTraits::new(payload.build.maker_traits);
        if !maker_traits.has_extension() || !maker_traits.has_post_interaction() {
            return Err(ExchangeError::InvalidPayload(
                "maker traits must enable the extension and post-interaction".to_string(),
            ));
        }

        let escrow = EscrowExtension::from_extension(&extension)
            .map_err(|e| ExchangeError::InvalidPayload(e.to_string()))?;

        Ok(Self {
            src_chain_id,
            salt: payload.build.salt,
            maker: payload.build.maker,
            receiver: payload.build.receiver,
            maker_asset: payload.build.maker_asset,
            taker_asset: payload.build.taker_asset,
            making_amount: payload.build.making_amount,
            taking_amount: payload.build.taking_amount,
            maker_traits,
            escrow,
        })
    }
}

fn low_160_mask() -> U256 {
    (U256::from(1u8) << 160) - U256::from(1u8)
}

/// Scale a human-readable amount into base units
pub fn parse_amount(raw: &str, decimals: u8) -> ExchangeResult<U256> {
    let parsed = parse_units(raw.trim(), decimals as u32)
        .map_err(|e| ExchangeError::InvalidAmount(format!("{raw:?}: {e}")))?;
    match parsed {
        ParseUnits::U256(value) if !value.is_zero() => Ok(U256::from_limbs(value.0)),
        _ => Err(ExchangeError::InvalidAmount(format!(
            "{raw:?} must be greater than zero"
        ))),
    }
}

/// Builds orders against an injected contract registry.
///
/// Salt and nonce come from a ChaCha-based CSPRNG, seeded from OS entropy
/// unless a fixed seed is supplied for reproducible output.
pub struct OrderBuilder {
    registry: Arc<ChainRegistry>,
    policy: OrderPolicy,
    rng: StdRng,
    start_time: Option<u64>,
}

impl OrderBuilder {
    pub fn new(registry: Arc<ChainRegistry>, policy: OrderPolicy) -> Self {
        Self {
            registry,
            policy,
            rng: StdRng::from_entropy(),
            start_time: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Pin the auction start instead of reading the wall clock
    pub fn with_start_time(mut self, start_time: u64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn build(&mut self, params: &SwapParams) -> ExchangeResult<CrossChainOrder> {
        self.policy.time_locks.validate()?;

        let hash_lock = match &params.secret {
            SecretCommitment::Single(secret) => {
                if params.allow_multiple_fills || params.allow_partial_fills {
                    return Err(ExchangeError::InvalidOrderPolicy(
                        "a single-fill hash-lock cannot back partial or multiple fills"
                            .to_string(),
                    ));
                }
                HashLock::for_single_fill(secret)
            }
            SecretCommitment::Multiple(hashes) => {
                if !params.allow_multiple_fills {
                    return Err(ExchangeError::InvalidOrderPolicy(
                        "a multi-fill hash-lock requires multiple fills to be allowed"
                            .to_string(),
                    ));
                }
                HashLock::for_multiple_fills(hashes)?
            }
        };

        let making_amount = parse_amount(&params.src_amount, params.src_decimals)?;
        let taking_amount = parse_amount(&params.dst_amount, params.dst_decimals)?;

        let src = self.registry.get(params.src_chain_id)?;
        let dst = self.registry.get(params.dst_chain_id)?;
        let src_deposit = deposit_u128(src.safety_deposit_wei, params.src_chain_id)?;
        let dst_deposit = deposit_u128(dst.safety_deposit_wei, params.dst_chain_id)?;

        let start_time = self
            .start_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp().max(0) as u64);
        let auction = AuctionDetails::flat(start_time, self.policy.auction_duration_secs)?;
        let whitelist = Whitelist::new(start_time, &[(src.contracts.resolver, 0)])?;

        let escrow = EscrowExtension {
            escrow_factory: src.contracts.escrow_factory,
            auction,
            whitelist,
            extra: EscrowExtraData {
                hash_lock_info: hash_lock,
                dst_chain_id: params.dst_chain_id,
                dst_token: params.dst_token,
                src_safety_deposit: src_deposit,
                dst_safety_deposit: dst_deposit,
                time_locks: self.policy.time_locks,
            },
        };

        let extension_hash = U256::from_be_bytes(escrow.build().keccak256().0);
        let random: u128 = self.rng.gen::<u128>() & ((1u128 << 96) - 1);
        let salt = (U256::from(random) << 160) | (extension_hash & low_160_mask());
        let nonce = self.rng.gen_range(0..=UINT_40_MAX);

        let expiration = escrow.auction.end_time() + self.policy.expiration_delay_secs;
        let maker_traits = MakerTraits::default()
            .with_partial_fills(params.allow_partial_fills)
            .with_multiple_fills(params.allow_multiple_fills)
            .with_post_interaction()
            .with_extension()
            .with_expiration(expiration)?
            .with_nonce(nonce)?;

        Ok(CrossChainOrder {
            src_chain_id: params.src_chain_id,
            salt,
            maker: params.maker,
            receiver: Address::ZERO,
            maker_asset: params.src_token,
            taker_asset: params.dst_token,
            making_amount,
            taking_amount,
            maker_traits,
            escrow,
        })
    }
}

fn deposit_u128(deposit: U256, chain_id: u64) -> ExchangeResult<u128> {
    if deposit > U256::from(u128::MAX) {
        return Err(ExchangeError::Config(format!(
            "safety deposit on chain {chain_id} exceeds 128 bits"
        )));
    }
    Ok(deposit.to::<u128>())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{ChainConfig, ContractAddresses, GasPriceStrategy};

    pub(crate) const SRC_CHAIN: u64 = 11155111;
    pub(crate) const DST_CHAIN: u64 = 84532;

    pub(crate) fn chain(chain_id: u64, tag: u8) -> ChainConfig {
        ChainConfig {
            chain_id,
            name: format!("chain-{chain_id}"),
            rpc_urls: vec!["http://localhost:8545".to_string()],
            explorer_url: Some(format!("https://explorer-{tag}.example")),
            confirmation_blocks: Some(1),
            block_time_secs: None,
            gas_price_strategy: GasPriceStrategy::Eip1559,
            max_gas_price_gwei: 100,
            safety_deposit_wei: U256::from(1_000_000_000_000_000u64),
            contracts: ContractAddresses {
                limit_order_protocol: Address::repeat_byte(0x10 + tag),
                escrow_factory: Address::repeat_byte(0x20 + tag),
                resolver: Address::repeat_byte(0x30 + tag),
                escrow_src_implementation: None,
                escrow_dst_implementation: None,
            },
            enabled: true,
        }
    }

    pub(crate) fn registry() -> Arc<ChainRegistry> {
        Arc::new(ChainRegistry::new([chain(SRC_CHAIN, 1), chain(DST_CHAIN, 2)]))
    }

    pub(crate) fn swap_params() -> SwapParams {
        SwapParams {
            maker: Address::repeat_byte(0x01),
            src_chain_id: SRC_CHAIN,
            dst_chain_id: DST_CHAIN,
            src_token: Address::repeat_byte(0x0a),
            dst_token: Address::repeat_byte(0x0b),
            src_amount: "100".to_string(),
            dst_amount: "100".to_string(),
            src_decimals: 18,
            dst_decimals: 18,
            secret: SecretCommitment::Single(B256::ZERO),
            allow_partial_fills: false,
            allow_multiple_fills: false,
        }
    }

    fn builder() -> OrderBuilder {
        OrderBuilder::new(registry(), OrderPolicy::default())
            .with_seed(7)
            .with_start_time(1_700_000_000)
    }

    #[test]
    fn test_build_is_deterministic_for_a_seed() {
        let a = builder().build(&swap_params()).unwrap();
        let b = builder().build(&swap_params()).unwrap();
        assert_eq!(a, b);

        let lop = registry().contracts(SRC_CHAIN).unwrap().limit_order_protocol;
        assert_eq!(
            serde_json::to_vec(&a.typed_data(lop)).unwrap(),
            serde_json::to_vec(&b.typed_data(lop)).unwrap()
        );

        let c = OrderBuilder::new(registry(), OrderPolicy::default())
            .with_seed(8)
            .with_start_time(1_700_000_000)
            .build(&swap_params())
            .unwrap();
        assert_ne!(a.salt, c.salt);
    }

    #[test]
    fn test_scenario_amounts_and_hash_lock() {
        let order = builder().build(&swap_params()).unwrap();
        let hundred = U256::from(100u64) * U256::from(10u64).pow(U256::from(18u64));

        assert_eq!(order.making_amount, hundred);
        assert_eq!(order.taking_amount, hundred);
        assert_eq!(order.hash_lock(), HashLock::for_single_fill(&B256::ZERO));
        assert_eq!(order.dst_chain_id(), DST_CHAIN);
        assert_eq!(order.escrow_factory(), Address::repeat_byte(0x21));
        assert_eq!(order.deadline(), 1_700_000_000 + 120 + 12);
        assert!(!order.maker_traits.is_multiple_fills_allowed());
        assert!(!order.maker_traits.is_partial_fill_allowed());
        assert!(order.escrow.whitelist.is_whitelisted(&Address::repeat_byte(0x31)));

        let complement = order.dst_complement();
        assert_eq!(complement.maker, order.maker);
        assert_eq!(complement.token, Address::repeat_byte(0x0b));
    }

    #[test]
    fn test_salt_commits_to_extension() {
        let order = builder().build(&swap_params()).unwrap();
        let payload = order.to_payload();
        assert_eq!(CrossChainOrder::from_payload(&payload, SRC_CHAIN).unwrap(), order);

        let mut tampered = payload.clone();
        tampered.build.salt ^= U256::from(1u8);
        assert!(matches!(
            CrossChainOrder::from_payload(&tampered, SRC_CHAIN),
            Err(ExchangeError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        let mut params = swap_params();
        params.src_amount = "0".to_string();
        assert!(matches!(
            builder().build(&params),
            Err(ExchangeError::InvalidAmount(_))
        ));

        params.src_amount = "-5".to_string();
        assert!(matches!(
            builder().build(&params),
            Err(ExchangeError::InvalidAmount(_))
        ));

        params.src_amount = "abc".to_string();
        assert!(matches!(
            builder().build(&params),
            Err(ExchangeError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_chain() {
        let mut params = swap_params();
        params.dst_chain_id = 1;
        assert!(matches!(
            builder().build(&params),
            Err(ExchangeError::UnknownChainConfig { chain_id: 1 })
        ));
    }

    #[test]
    fn test_multiple_fills_with_single_secret_rejected() {
        let mut params = swap_params();
        params.allow_multiple_fills = true;
        assert!(matches!(
            builder().build(&params),
            Err(ExchangeError::InvalidOrderPolicy(_))
        ));

        let mut params = swap_params();
        params.allow_partial_fills = true;
        assert!(builder().build(&params).is_err());
    }

    #[test]
    fn test_multi_fill_order() {
        let mut params = swap_params();
        params.allow_partial_fills = true;
        params.allow_multiple_fills = true;
        params.secret = SecretCommitment::Multiple(
            (0u8..4)
                .map(|i| HashLock::hash_secret(&B256::repeat_byte(i)))
                .collect(),
        );
        let order = builder().build(&params).unwrap();
        assert_eq!(order.hash_lock().parts_count(), 3);
        assert!(order.maker_traits.is_multiple_fills_allowed());

        params.allow_multiple_fills = false;
        assert!(builder().build(&params).is_err());
    }

    #[test]
    fn test_decimal_scaling() {
        assert_eq!(parse_amount("1.5", 6).unwrap(), U256::from(1_500_000u64));
        assert_eq!(parse_amount(" 42 ", 0).unwrap(), U256::from(42u64));
    }
}

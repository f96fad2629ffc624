//! Maker and taker trait words of the limit-order protocol

use super::Extension;
use crate::error::{ExchangeError, ExchangeResult};
use crate::wire::u256_dec;

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

const NO_PARTIAL_FILLS_FLAG: usize = 255;
const ALLOW_MULTIPLE_FILLS_FLAG: usize = 254;
const PRE_INTERACTION_CALL_FLAG: usize = 252;
const POST_INTERACTION_CALL_FLAG: usize = 251;
const HAS_EXTENSION_FLAG: usize = 249;

const ALLOWED_SENDER_BITS: usize = 80;
const EXPIRATION_OFFSET: usize = 80;
const NONCE_OFFSET: usize = 120;
const UINT_40_MAX: u64 = (1 << 40) - 1;

fn bit(index: usize) -> U256 {
    U256::from(1u8) << index
}

fn mask(width: usize) -> U256 {
    (U256::from(1u8) << width) - U256::from(1u8)
}

/// Packed maker policy flags and fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MakerTraits(U256);

impl MakerTraits {
    pub fn new(value: U256) -> Self {
        Self(value)
    }

    pub fn value(&self) -> U256 {
        self.0
    }

    fn set(mut self, index: usize, enabled: bool) -> Self {
        if enabled {
            self.0 |= bit(index);
        } else {
            self.0 &= !bit(index);
        }
        self
    }

    fn has(&self, index: usize) -> bool {
        self.0 & bit(index) != U256::ZERO
    }

    fn field(&self, offset: usize, width: usize) -> U256 {
        (self.0 >> offset) & mask(width)
    }

    fn with_field(mut self, offset: usize, width: usize, value: U256) -> Self {
        self.0 = (self.0 & !(mask(width) << offset)) | ((value & mask(width)) << offset);
        self
    }

    pub fn with_partial_fills(self, allowed: bool) -> Self {
        self.set(NO_PARTIAL_FILLS_FLAG, !allowed)
    }

    pub fn with_multiple_fills(self, allowed: bool) -> Self {
        self.set(ALLOW_MULTIPLE_FILLS_FLAG, allowed)
    }

    pub fn with_post_interaction(self) -> Self {
        self.set(POST_INTERACTION_CALL_FLAG, true)
    }

    pub fn with_extension(self) -> Self {
        self.set(HAS_EXTENSION_FLAG, true)
    }

    /// Expiration as a unix timestamp, `0` meaning none
    pub fn with_expiration(self, expiration: u64) -> ExchangeResult<Self> {
        if expiration > UINT_40_MAX {
            return Err(ExchangeError::InvalidOrderPolicy(format!(
                "expiration {expiration} exceeds uint40"
            )));
        }
        Ok(self.with_field(EXPIRATION_OFFSET, 40, U256::from(expiration)))
    }

    pub fn with_nonce(self, nonce: u64) -> ExchangeResult<Self> {
        if nonce > UINT_40_MAX {
            return Err(ExchangeError::InvalidOrderPolicy(format!(
                "nonce {nonce} exceeds uint40"
            )));
        }
        Ok(self.with_field(NONCE_OFFSET, 40, U256::from(nonce)))
    }

    /// Restrict filling to a sender identified by the low 80 bits of its address
    pub fn with_allowed_sender(self, sender: &Address) -> Self {
        let low = U256::from_be_slice(&sender.as_slice()[10..]);
        self.with_field(0, ALLOWED_SENDER_BITS, low)
    }

    pub fn is_partial_fill_allowed(&self) -> bool {
        !self.has(NO_PARTIAL_FILLS_FLAG)
    }

    pub fn is_multiple_fills_allowed(&self) -> bool {
        self.has(ALLOW_MULTIPLE_FILLS_FLAG)
    }

    pub fn has_post_interaction(&self) -> bool {
        self.has(POST_INTERACTION_CALL_FLAG)
    }

    pub fn has_pre_interaction(&self) -> bool {
        self.has(PRE_INTERACTION_CALL_FLAG)
    }

    pub fn has_extension(&self) -> bool {
        self.has(HAS_EXTENSION_FLAG)
    }

    pub fn expiration(&self) -> u64 {
        self.field(EXPIRATION_OFFSET, 40).to::<u64>()
    }

    pub fn nonce_or_epoch(&self) -> u64 {
        self.field(NONCE_OFFSET, 40).to::<u64>()
    }
}

const MAKER_AMOUNT_FLAG: usize = 255;
const ARGS_HAS_TARGET: usize = 251;
const ARGS_EXTENSION_LENGTH_OFFSET: usize = 224;
const ARGS_INTERACTION_LENGTH_OFFSET: usize = 200;
const AMOUNT_THRESHOLD_BITS: usize = 185;

/// How the fill amount passed with `deploySrc` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountMode {
    Taker,
    Maker,
}

/// Taker-side fill parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TakerTraits {
    maker_amount: bool,
    threshold: U256,
    receiver: Option<Address>,
    extension: Option<Extension>,
    interaction: Option<Bytes>,
}

/// Wire form sent by the web client: the trait word plus its args blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakerTraitsPayload {
    #[serde(rename = "trait", with = "u256_dec")]
    pub trait_: U256,
    pub args: Bytes,
}

impl TakerTraits {
    pub fn with_amount_mode(mut self, mode: AmountMode) -> Self {
        self.maker_amount = mode == AmountMode::Maker;
        self
    }

    pub fn with_amount_threshold(mut self, threshold: U256) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_receiver(mut self, receiver: Address) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn with_interaction(mut self, interaction: Bytes) -> Self {
        self.interaction = Some(interaction);
        self
    }

    /// Pack into the trait word and its `args` (target ++ extension ++ interaction)
    pub fn encode(&self) -> ExchangeResult<TakerTraitsPayload> {
        if self.threshold > mask(AMOUNT_THRESHOLD_BITS) {
            return Err(ExchangeError::InvalidAmount(format!(
                "threshold {} exceeds {AMOUNT_THRESHOLD_BITS} bits",
                self.threshold
            )));
        }

        let extension = self
            .extension
            .as_ref()
            .map(Extension::encode)
            .unwrap_or_default();
        let interaction = self.interaction.clone().unwrap_or_default();
        if extension.len() > (1 << 24) - 1 || interaction.len() > (1 << 24) - 1 {
            return Err(ExchangeError::Encoding(
                "taker args exceed uint24 length".to_string(),
            ));
        }

        let mut word = self.threshold;
        if self.maker_amount {
            word |= bit(MAKER_AMOUNT_FLAG);
        }
        if self.receiver.is_some() {
            word |= bit(ARGS_HAS_TARGET);
        }
        word |= U256::from(extension.len()) << ARGS_EXTENSION_LENGTH_OFFSET;
        word |= U256::from(interaction.len()) << ARGS_INTERACTION_LENGTH_OFFSET;

        let mut args = Vec::with_capacity(20 + extension.len() + interaction.len());
        if let Some(receiver) = &self.receiver {
            args.extend_from_slice(receiver.as_slice());
        }
        args.extend_from_slice(&extension);
        args.extend_from_slice(&interaction);

        Ok(TakerTraitsPayload {
            trait_: word,
            args: args.into(),
        })
    }
}

impl TakerTraitsPayload {
    /// Extension bytes embedded in `args`, located by the length field
    pub fn extension_bytes(&self) -> ExchangeResult<Bytes> {
        let offset = if self.trait_ & bit(ARGS_HAS_TARGET) != U256::ZERO {
            20
        } else {
            0
        };
        let len = ((self.trait_ >> ARGS_EXTENSION_LENGTH_OFFSET) & mask(24)).to::<usize>();
        self.args
            .get(offset..offset + len)
            .map(Bytes::copy_from_slice)
            .ok_or_else(|| {
                ExchangeError::InvalidPayload(format!(
                    "taker args of {} bytes cannot hold a {len} byte extension",
                    self.args.len()
                ))
            })
    }

    pub fn is_maker_amount(&self) -> bool {
        self.trait_ & bit(MAKER_AMOUNT_FLAG) != U256::ZERO
    }

    pub fn threshold(&self) -> U256 {
        self.trait_ & mask(AMOUNT_THRESHOLD_BITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maker_traits_single_fill_policy() {
        let traits = MakerTraits::default()
            .with_partial_fills(false)
            .with_multiple_fills(false)
            .with_post_interaction()
            .with_extension()
            .with_expiration(1_700_000_132)
            .unwrap()
            .with_nonce(42)
            .unwrap();

        assert!(!traits.is_partial_fill_allowed());
        assert!(!traits.is_multiple_fills_allowed());
        assert!(traits.has_post_interaction());
        assert!(traits.has_extension());
        assert!(!traits.has_pre_interaction());
        assert_eq!(traits.expiration(), 1_700_000_132);
        assert_eq!(traits.nonce_or_epoch(), 42);
        assert!(traits.value().bit(255));
        assert!(traits.value().bit(249));
    }

    #[test]
    fn test_maker_traits_field_bounds() {
        assert!(MakerTraits::default().with_nonce(1 << 40).is_err());
        let traits = MakerTraits::default()
            .with_nonce(7)
            .unwrap()
            .with_nonce(9)
            .unwrap();
        assert_eq!(traits.nonce_or_epoch(), 9);

        let sender = Address::repeat_byte(0x5a);
        let traits = traits.with_allowed_sender(&sender);
        assert_eq!(
            traits.value() & mask(80),
            U256::from_be_slice(&[0x5a; 10])
        );
    }

    #[test]
    fn test_taker_traits_carry_extension() {
        let extension = Extension {
            post_interaction: Bytes::from(vec![7u8; 40]),
            ..Default::default()
        };
        let encoded = TakerTraits::default()
            .with_amount_mode(AmountMode::Maker)
            .with_amount_threshold(U256::from(1000u64))
            .with_extension(extension.clone())
            .encode()
            .unwrap();

        assert!(encoded.is_maker_amount());
        assert_eq!(encoded.threshold(), U256::from(1000u64));
        assert_eq!(encoded.extension_bytes().unwrap(), extension.encode());
        assert_eq!(encoded.args.len(), 32 + 40);

        let json = serde_json::to_value(&encoded).unwrap();
        assert!(json["trait"].is_string());
    }

    #[test]
    fn test_taker_args_skip_receiver() {
        let extension = Extension {
            post_interaction: Bytes::from(vec![3u8; 8]),
            ..Default::default()
        };
        let encoded = TakerTraits::default()
            .with_receiver(Address::repeat_byte(0x44))
            .with_extension(extension.clone())
            .with_interaction(Bytes::from(vec![9u8; 4]))
            .encode()
            .unwrap();

        assert!(!encoded.is_maker_amount());
        assert_eq!(&encoded.args[..20], Address::repeat_byte(0x44).as_slice());
        assert_eq!(encoded.extension_bytes().unwrap(), extension.encode());
        assert_eq!(&encoded.args[encoded.args.len() - 4..], &[9u8; 4]);
    }

    #[test]
    fn test_taker_args_shorter_than_declared_rejected() {
        let payload = TakerTraitsPayload {
            trait_: U256::from(64u64) << ARGS_EXTENSION_LENGTH_OFFSET,
            args: Bytes::from(vec![0u8; 10]),
        };
        assert!(matches!(
            payload.extension_bytes(),
            Err(ExchangeError::InvalidPayload(_))
        ));
    }
}

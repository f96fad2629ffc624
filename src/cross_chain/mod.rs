//! Cross-chain order primitives
//!
//! Pure encoding of everything a swap commits to before it touches a chain:
//! hash-locks, timelocks, escrow immutables, the limit-order extension and
//! traits, and the order itself with its typed-data payload.

pub mod extension;
pub mod hashlock;
pub mod immutables;
pub mod order;
pub mod timelocks;
pub mod traits;
pub mod typed_data;

pub use extension::{
    AuctionDetails, AuctionPoint, EscrowExtension, EscrowExtraData, Extension, Whitelist,
    WhitelistEntry,
};
pub use hashlock::HashLock;
pub use immutables::{DstComplement, Immutables, ImmutablesData};
pub use order::{
    CrossChainOrder, OrderBuild, OrderBuilder, OrderPayload, OrderPolicy, SecretCommitment,
    SwapParams,
};
pub use timelocks::{TimeLockStage, TimeLocks};
pub use traits::{AmountMode, MakerTraits, TakerTraits, TakerTraitsPayload};
pub use typed_data::{CompactSignature, LocalOrderSigner, OrderSigner, TypedDataPayload};

use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::{Address, B256, U256};

/// Left-pad an address into a `uint256` word
pub fn address_to_word(address: &Address) -> U256 {
    U256::from_be_slice(address.as_slice())
}

/// Interpret a `uint256` word as an address, rejecting dirty high bits
pub fn word_to_address(word: U256) -> ExchangeResult<Address> {
    if word >> 160 != U256::ZERO {
        return Err(ExchangeError::Encoding(format!(
            "word {word:#x} does not fit in an address"
        )));
    }
    Ok(Address::from_word(B256::from(word.to_be_bytes::<32>())))
}

//! EIP-712 payload, order hash and signatures
//!
//! The domain is bound to the source chain's limit-order protocol contract,
//! which is the verifier of the maker's signature during `deploySrc`.

use super::OrderBuild;
use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{Eip712Domain, SolStruct};
use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::{Signature, H256};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

pub const DOMAIN_NAME: &str = "1inch Limit Order Protocol";
pub const DOMAIN_VERSION: &str = "4";
pub const PRIMARY_TYPE: &str = "Order";

mod eip712 {
    use alloy_sol_types::sol;

    sol! {
        #[derive(Debug, PartialEq, Eq)]
        struct Order {
            uint256 salt;
            address maker;
            address receiver;
            address makerAsset;
            address takerAsset;
            uint256 makingAmount;
            uint256 takingAmount;
            uint256 makerTraits;
        }
    }
}

impl From<&OrderBuild> for eip712::Order {
    fn from(build: &OrderBuild) -> Self {
        eip712::Order {
            salt: build.salt,
            maker: build.maker,
            receiver: build.receiver,
            makerAsset: build.maker_asset,
            takerAsset: build.taker_asset,
            makingAmount: build.making_amount,
            takingAmount: build.taking_amount,
            makerTraits: build.maker_traits,
        }
    }
}

pub fn order_domain(chain_id: u64, verifying_contract: Address) -> Eip712Domain {
    Eip712Domain::new(
        Some(Cow::Borrowed(DOMAIN_NAME)),
        Some(Cow::Borrowed(DOMAIN_VERSION)),
        Some(U256::from(chain_id)),
        Some(verifying_contract),
        None,
    )
}

/// Digest the limit-order protocol computes for this order
pub fn order_hash(build: &OrderBuild, chain_id: u64, verifying_contract: Address) -> B256 {
    eip712::Order::from(build).eip712_signing_hash(&order_domain(chain_id, verifying_contract))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainData {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

/// Payload handed to `eth_signTypedData_v4`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataPayload {
    pub domain: DomainData,
    pub types: serde_json::Value,
    pub primary_type: String,
    pub message: OrderBuild,
}

impl TypedDataPayload {
    pub fn new(message: OrderBuild, chain_id: u64, verifying_contract: Address) -> Self {
        let field = |name: &str, ty: &str| serde_json::json!({ "name": name, "type": ty });
        let types = serde_json::json!({
            "EIP712Domain": [
                field("name", "string"),
                field("version", "string"),
                field("chainId", "uint256"),
                field("verifyingContract", "address"),
            ],
            "Order": [
                field("salt", "uint256"),
                field("maker", "address"),
                field("receiver", "address"),
                field("makerAsset", "address"),
                field("takerAsset", "address"),
                field("makingAmount", "uint256"),
                field("takingAmount", "uint256"),
                field("makerTraits", "uint256"),
            ],
        });

        Self {
            domain: DomainData {
                name: DOMAIN_NAME.to_string(),
                version: DOMAIN_VERSION.to_string(),
                chain_id,
                verifying_contract,
            },
            types,
            primary_type: PRIMARY_TYPE.to_string(),
            message,
        }
    }

    /// Recompute the digest from the payload's own fields
    pub fn signing_hash(&self) -> ExchangeResult<B256> {
        if self.primary_type != PRIMARY_TYPE {
            return Err(ExchangeError::Encoding(format!(
                "unexpected primary type {:?}",
                self.primary_type
            )));
        }
        let domain = Eip712Domain::new(
            Some(Cow::Owned(self.domain.name.clone())),
            Some(Cow::Owned(self.domain.version.clone())),
            Some(U256::from(self.domain.chain_id)),
            Some(self.domain.verifying_contract),
            None,
        );
        Ok(eip712::Order::from(&self.message).eip712_signing_hash(&domain))
    }
}

/// Maker-side signing, delegated to a wallet
#[async_trait]
pub trait OrderSigner: Send + Sync {
    fn address(&self) -> Address;

    /// 65-byte `r ‖ s ‖ v` signature over the payload's digest
    async fn sign_typed_data(&self, payload: &TypedDataPayload) -> ExchangeResult<Bytes>;
}

/// Signer backed by a local private key
pub struct LocalOrderSigner {
    wallet: LocalWallet,
}

impl LocalOrderSigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }
}

#[async_trait]
impl OrderSigner for LocalOrderSigner {
    fn address(&self) -> Address {
        use ethers::signers::Signer;
        Address::from(self.wallet.address().0)
    }

    async fn sign_typed_data(&self, payload: &TypedDataPayload) -> ExchangeResult<Bytes> {
        let digest = payload.signing_hash()?;
        let signature = self
            .wallet
            .sign_hash(H256::from(digest.0))
            .map_err(|e| ExchangeError::Wallet(e.to_string()))?;
        Ok(Bytes::from(signature.to_vec()))
    }
}

/// EIP-2098 compact signature as taken by `deploySrc`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactSignature {
    pub r: B256,
    pub vs: B256,
}

impl CompactSignature {
    /// Split a 65-byte `r ‖ s ‖ v` signature, or pass a 64-byte compact one through
    pub fn from_bytes(signature: &[u8]) -> ExchangeResult<Self> {
        match signature.len() {
            64 => Ok(Self {
                r: B256::from_slice(&signature[..32]),
                vs: B256::from_slice(&signature[32..]),
            }),
            65 => {
                let v = signature[64];
                let y_parity = if v >= 27 { v - 27 } else { v };
                if y_parity > 1 {
                    return Err(ExchangeError::Signature(format!("invalid recovery id {v}")));
                }
                if signature[32] & 0x80 != 0 {
                    return Err(ExchangeError::Signature(
                        "signature s value is not in the lower half order".to_string(),
                    ));
                }
                let mut vs = [0u8; 32];
                vs.copy_from_slice(&signature[32..64]);
                vs[0] |= y_parity << 7;
                Ok(Self {
                    r: B256::from_slice(&signature[..32]),
                    vs: B256::from(vs),
                })
            }
            len => Err(ExchangeError::Signature(format!(
                "signature must be 64 or 65 bytes, got {len}"
            ))),
        }
    }

    pub fn y_parity(&self) -> u8 {
        self.vs[0] >> 7
    }

    /// Expand back into `r ‖ s ‖ v` with `v` in {27, 28}
    pub fn to_rsv(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(self.r.as_slice());
        out[32..64].copy_from_slice(self.vs.as_slice());
        out[32] &= 0x7f;
        out[64] = 27 + self.y_parity();
        out
    }
}

/// Address that produced `signature` over `digest`
pub fn recover_signer(signature: &[u8], digest: B256) -> ExchangeResult<Address> {
    let rsv = CompactSignature::from_bytes(signature)?.to_rsv();
    let signature = Signature::try_from(&rsv[..])
        .map_err(|e| ExchangeError::Signature(e.to_string()))?;
    let signer = signature
        .recover(H256::from(digest.0))
        .map_err(|e| ExchangeError::Signature(e.to_string()))?;
    Ok(Address::from(signer.0))
}

/// Fail unless `signature` over `digest` was produced by `maker`
pub fn verify_maker(signature: &[u8], digest: B256, maker: Address) -> ExchangeResult<()> {
    let signer = recover_signer(signature, digest)?;
    if signer != maker {
        return Err(ExchangeError::Signature(format!(
            "order signed by {signer}, expected maker {maker}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;

    fn build() -> OrderBuild {
        OrderBuild {
            salt: U256::from(12345u64),
            maker: Address::repeat_byte(0x01),
            receiver: Address::ZERO,
            maker_asset: Address::repeat_byte(0x0a),
            taker_asset: Address::repeat_byte(0x0b),
            making_amount: U256::from(100u64),
            taking_amount: U256::from(99u64),
            maker_traits: U256::from(1u8) << 249,
        }
    }

    fn wallet() -> LocalWallet {
        "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
            .parse()
            .unwrap()
    }

    #[test]
    fn test_order_type_hash() {
        let type_string = "Order(uint256 salt,address maker,address receiver,address makerAsset,address takerAsset,uint256 makingAmount,uint256 takingAmount,uint256 makerTraits)";
        assert_eq!(
            eip712::Order::from(&build()).eip712_type_hash(),
            keccak256(type_string)
        );
    }

    #[test]
    fn test_payload_hash_matches_order_hash() {
        let lop = Address::repeat_byte(0x11);
        let payload = TypedDataPayload::new(build(), 11155111, lop);
        assert_eq!(payload.signing_hash().unwrap(), order_hash(&build(), 11155111, lop));

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["primaryType"], "Order");
        assert_eq!(json["domain"]["name"], DOMAIN_NAME);
        assert_eq!(json["message"]["makingAmount"], "100");
    }

    #[test]
    fn test_domain_binds_chain_and_verifier() {
        let lop = Address::repeat_byte(0x11);
        let base = order_hash(&build(), 11155111, lop);
        assert_ne!(base, order_hash(&build(), 84532, lop));
        assert_ne!(base, order_hash(&build(), 11155111, Address::repeat_byte(0x12)));

        let mut payload = TypedDataPayload::new(build(), 11155111, lop);
        payload.primary_type = "Mail".to_string();
        assert!(payload.signing_hash().is_err());
    }

    #[tokio::test]
    async fn test_local_signer_round_trip() {
        let signer = LocalOrderSigner::new(wallet());
        let payload = TypedDataPayload::new(build(), 11155111, Address::repeat_byte(0x11));
        let signature = signer.sign_typed_data(&payload).await.unwrap();
        assert_eq!(signature.len(), 65);

        let digest = payload.signing_hash().unwrap();
        verify_maker(&signature, digest, signer.address()).unwrap();
        assert!(verify_maker(&signature, digest, Address::repeat_byte(0x01)).is_err());

        let compact = CompactSignature::from_bytes(&signature).unwrap();
        assert_eq!(compact.r.as_slice(), &signature[..32]);
        assert_eq!(compact.y_parity(), signature[64] - 27);
        assert_eq!(recover_signer(&compact.to_rsv(), digest).unwrap(), signer.address());

        let mut compact_bytes = compact.r.to_vec();
        compact_bytes.extend_from_slice(compact.vs.as_slice());
        assert_eq!(recover_signer(&compact_bytes, digest).unwrap(), signer.address());
    }

    #[test]
    fn test_malformed_signatures_rejected() {
        assert!(CompactSignature::from_bytes(&[0u8; 63]).is_err());
        let mut bad_v = [0u8; 65];
        bad_v[64] = 30;
        assert!(matches!(
            CompactSignature::from_bytes(&bad_v),
            Err(ExchangeError::Signature(_))
        ));
    }
}

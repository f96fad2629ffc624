//! Wire helpers shared by the HTTP payloads and persisted JSON.
//!
//! Every 256-bit integer crosses the wire as a decimal string.

use alloy_primitives::U256;

/// Parse a decimal or `0x`-prefixed hex string into a [`U256`]
pub fn parse_u256(input: &str) -> Result<U256, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty integer".to_string());
    }
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(input, 10),
    };
    parsed.map_err(|e| format!("invalid integer {input:?}: {e}"))
}

/// Serde adapter for `U256` as a decimal string
pub mod u256_dec {
    use alloy_primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Str(s) => super::parse_u256(&s).map_err(de::Error::custom),
            Raw::Num(n) => Ok(U256::from(n)),
        }
    }
}

/// Serde adapter for `Option<U256>` as an optional decimal string
pub mod opt_u256_dec {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => super::u256_dec::serialize(v, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<U256>, D::Error> {
        #[derive(Deserialize)]
        struct Wrap(#[serde(with = "super::u256_dec")] U256);

        Ok(Option::<Wrap>::deserialize(deserializer)?.map(|Wrap(v)| v))
    }
}

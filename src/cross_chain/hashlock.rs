//! Hash-lock commitments for single and multiple fills

use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::{keccak256, B256, U256};
use serde::{Deserialize, Serialize};

/// Commitment gating escrow withdrawal.
///
/// Single fill: `keccak256(secret)`. Multiple fills: Merkle root over indexed
/// secret hashes with `parts - 1` stored in the top 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashLock(B256);

impl HashLock {
    pub fn new(value: B256) -> Self {
        Self(value)
    }

    pub fn hash_secret(secret: &B256) -> B256 {
        keccak256(secret)
    }

    pub fn for_single_fill(secret: &B256) -> Self {
        Self(Self::hash_secret(secret))
    }

    /// Leaves are `keccak256(uint64 index ++ secretHash)`
    pub fn merkle_leaves(secret_hashes: &[B256]) -> Vec<B256> {
        secret_hashes
            .iter()
            .enumerate()
            .map(|(idx, hash)| {
                let mut packed = Vec::with_capacity(40);
                packed.extend_from_slice(&(idx as u64).to_be_bytes());
                packed.extend_from_slice(hash.as_slice());
                keccak256(packed)
            })
            .collect()
    }

    pub fn for_multiple_fills(secret_hashes: &[B256]) -> ExchangeResult<Self> {
        if secret_hashes.len() <= 2 {
            return Err(ExchangeError::InvalidOrderPolicy(format!(
                "multi-fill hash-lock needs more than two secrets, got {}",
                secret_hashes.len()
            )));
        }

        let root = merkle_root(&Self::merkle_leaves(secret_hashes));
        let parts = U256::from(secret_hashes.len() as u64 - 1) << 240usize;
        let low_mask = (U256::from(1u8) << 240usize) - U256::from(1u8);
        let value = (U256::from_be_bytes(root.0) & low_mask) | parts;
        Ok(Self(B256::from(value.to_be_bytes::<32>())))
    }

    /// Number of secret parts encoded in a multi-fill lock
    pub fn parts_count(&self) -> u64 {
        (U256::from_be_bytes(self.0 .0) >> 240usize).to::<u64>()
    }

    /// Check a revealed secret against a single-fill lock
    pub fn verify_secret(&self, secret: &B256) -> bool {
        Self::hash_secret(secret) == self.0
    }

    pub fn value(&self) -> B256 {
        self.0
    }
}

impl From<B256> for HashLock {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for HashLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hash_pair(a: &B256, b: &B256) -> B256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo.as_slice());
    buf[32..].copy_from_slice(hi.as_slice());
    keccak256(buf)
}

/// Root of a complete binary tree laid out as an array, leaves stored in
/// reverse order at the tail, internal nodes hashed as sorted pairs.
fn merkle_root(leaves: &[B256]) -> B256 {
    let len = 2 * leaves.len() - 1;
    let mut tree = vec![B256::ZERO; len];
    for (i, leaf) in leaves.iter().enumerate() {
        tree[len - 1 - i] = *leaf;
    }
    for i in (0..len - leaves.len()).rev() {
        tree[i] = hash_pair(&tree[2 * i + 1], &tree[2 * i + 2]);
    }
    tree[0]
}

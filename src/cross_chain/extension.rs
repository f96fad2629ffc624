//! Limit-order extension carrying the auction, whitelist and escrow parameters
//!
//! The extension is an offsets word (cumulative `uint32` end offsets, field
//! `i` at bits `32*i`) followed by the concatenated dynamic fields and any
//! trailing custom data.

use super::{address_to_word, word_to_address, HashLock, TimeLocks};
use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};

const FIELD_COUNT: usize = 8;
const UINT24_MAX: u32 = (1 << 24) - 1;

/// Size of the escrow parameters appended to the post-interaction
pub const ESCROW_EXTRA_DATA_LEN: usize = 160;

/// Dynamic fields of a limit-order extension
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extension {
    pub maker_asset_suffix: Bytes,
    pub taker_asset_suffix: Bytes,
    pub making_amount_data: Bytes,
    pub taking_amount_data: Bytes,
    pub predicate: Bytes,
    pub maker_permit: Bytes,
    pub pre_interaction: Bytes,
    pub post_interaction: Bytes,
    pub custom_data: Bytes,
}

impl Extension {
    fn fields(&self) -> [&Bytes; FIELD_COUNT] {
        [
            &self.maker_asset_suffix,
            &self.taker_asset_suffix,
            &self.making_amount_data,
            &self.taking_amount_data,
            &self.predicate,
            &self.maker_permit,
            &self.pre_interaction,
            &self.post_interaction,
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|f| f.is_empty()) && self.custom_data.is_empty()
    }

    pub fn encode(&self) -> Bytes {
        if self.is_empty() {
            return Bytes::new();
        }

        let mut offsets = U256::ZERO;
        let mut end = 0u32;
        let mut body = Vec::new();
        for (i, field) in self.fields().iter().enumerate() {
            end += field.len() as u32;
            offsets |= U256::from(end) << (32 * i);
            body.extend_from_slice(field);
        }

        let mut out = Vec::with_capacity(32 + body.len() + self.custom_data.len());
        out.extend_from_slice(&offsets.to_be_bytes::<32>());
        out.extend_from_slice(&body);
        out.extend_from_slice(&self.custom_data);
        out.into()
    }

    pub fn decode(data: &[u8]) -> ExchangeResult<Self> {
        if data.is_empty() {
            return Ok(Self::default());
        }
        if data.len() < 32 {
            return Err(ExchangeError::Encoding(format!(
                "extension of {} bytes is shorter than its offsets word",
                data.len()
            )));
        }

        let offsets = U256::from_be_slice(&data[..32]);
        let body = &data[32..];
        let mut fields: Vec<Bytes> = Vec::with_capacity(FIELD_COUNT);
        let mut start = 0usize;
        for i in 0..FIELD_COUNT {
            let end = ((offsets >> (32 * i)) & U256::from(u32::MAX)).to::<usize>();
            if end < start || end > body.len() {
                return Err(ExchangeError::Encoding(format!(
                    "extension field {i} spans {start}..{end} outside {} bytes",
                    body.len()
                )));
            }
            fields.push(Bytes::copy_from_slice(&body[start..end]));
            start = end;
        }

        let mut fields = fields.into_iter();
        let mut next = || fields.next().unwrap_or_default();
        Ok(Self {
            maker_asset_suffix: next(),
            taker_asset_suffix: next(),
            making_amount_data: next(),
            taking_amount_data: next(),
            predicate: next(),
            maker_permit: next(),
            pre_interaction: next(),
            post_interaction: next(),
            custom_data: Bytes::copy_from_slice(&body[start..]),
        })
    }

    /// Low 160 bits of this hash are committed to in the order salt
    pub fn keccak256(&self) -> B256 {
        keccak256(self.encode())
    }
}

/// One step of the rate-bump curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuctionPoint {
    pub coefficient: u32,
    pub delay: u16,
}

/// Dutch auction parameters read by the settlement amount getters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionDetails {
    pub gas_bump_estimate: u32,
    pub gas_price_estimate: u32,
    pub start_time: u32,
    pub duration: u32,
    pub initial_rate_bump: u32,
    pub points: Vec<AuctionPoint>,
}

impl AuctionDetails {
    const HEADER_LEN: usize = 17;
    const POINT_LEN: usize = 5;

    /// Flat auction starting at `start_time`
    pub fn flat(start_time: u64, duration: u64) -> ExchangeResult<Self> {
        let details = Self {
            gas_bump_estimate: 0,
            gas_price_estimate: 0,
            start_time: u32::try_from(start_time).map_err(|_| {
                ExchangeError::InvalidOrderPolicy(format!("auction start {start_time} overflows"))
            })?,
            duration: duration as u32,
            initial_rate_bump: 0,
            points: Vec::new(),
        };
        if duration > UINT24_MAX as u64 {
            return Err(ExchangeError::InvalidOrderPolicy(format!(
                "auction duration {duration}s exceeds uint24"
            )));
        }
        Ok(details)
    }

    pub fn end_time(&self) -> u64 {
        self.start_time as u64 + self.duration as u64
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.points.len() * Self::POINT_LEN);
        out.extend_from_slice(&uint24(self.gas_bump_estimate));
        out.extend_from_slice(&self.gas_price_estimate.to_be_bytes());
        out.extend_from_slice(&self.start_time.to_be_bytes());
        out.extend_from_slice(&uint24(self.duration));
        out.extend_from_slice(&uint24(self.initial_rate_bump));
        for point in &self.points {
            out.extend_from_slice(&uint24(point.coefficient));
            out.extend_from_slice(&point.delay.to_be_bytes());
        }
        out
    }

    pub fn decode(data: &[u8]) -> ExchangeResult<Self> {
        if data.len() < Self::HEADER_LEN || (data.len() - Self::HEADER_LEN) % Self::POINT_LEN != 0 {
            return Err(ExchangeError::Encoding(format!(
                "auction details of {} bytes are malformed",
                data.len()
            )));
        }
        let points = data[Self::HEADER_LEN..]
            .chunks_exact(Self::POINT_LEN)
            .map(|chunk| AuctionPoint {
                coefficient: read_uint24(&chunk[..3]),
                delay: u16::from_be_bytes([chunk[3], chunk[4]]),
            })
            .collect();

        Ok(Self {
            gas_bump_estimate: read_uint24(&data[0..3]),
            gas_price_estimate: u32::from_be_bytes([data[3], data[4], data[5], data[6]]),
            start_time: u32::from_be_bytes([data[7], data[8], data[9], data[10]]),
            duration: read_uint24(&data[11..14]),
            initial_rate_bump: read_uint24(&data[14..17]),
            points,
        })
    }
}

/// Whitelisted resolver, identified by the low 10 bytes of its address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhitelistEntry {
    pub address_half: [u8; 10],
    pub delay: u16,
}

impl WhitelistEntry {
    pub fn matches(&self, address: &Address) -> bool {
        address.as_slice()[10..] == self.address_half
    }
}

/// Settlement whitelist prefixed to the escrow extra data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Whitelist {
    pub resolving_start_time: u32,
    /// At most [`Whitelist::MAX_RESOLVERS`]
    pub entries: Vec<WhitelistEntry>,
}

impl Whitelist {
    /// The count shares the bitmap byte with three flag bits
    pub const MAX_RESOLVERS: usize = 31;

    /// Build from `(resolver, allow_from)` pairs.
    ///
    /// Entries are sorted by their opening time and stored as cumulative delays
    /// from `resolving_start_time`; earlier openings are clamped to it.
    pub fn new(resolving_start_time: u64, resolvers: &[(Address, u64)]) -> ExchangeResult<Self> {
        if resolvers.len() > Self::MAX_RESOLVERS {
            return Err(ExchangeError::InvalidOrderPolicy(format!(
                "whitelist holds at most {} resolvers, got {}",
                Self::MAX_RESOLVERS,
                resolvers.len()
            )));
        }
        let start = u32::try_from(resolving_start_time).map_err(|_| {
            ExchangeError::InvalidOrderPolicy(format!(
                "resolving start {resolving_start_time} overflows"
            ))
        })?;

        let mut sorted: Vec<(Address, u64)> = resolvers
            .iter()
            .map(|(addr, allow_from)| (*addr, (*allow_from).max(resolving_start_time)))
            .collect();
        sorted.sort_by_key(|(_, allow_from)| *allow_from);

        let mut elapsed = 0u64;
        let mut entries = Vec::with_capacity(sorted.len());
        for (address, allow_from) in sorted {
            let delay = allow_from - resolving_start_time - elapsed;
            elapsed += delay;
            let mut address_half = [0u8; 10];
            address_half.copy_from_slice(&address.as_slice()[10..]);
            entries.push(WhitelistEntry {
                address_half,
                delay: u16::try_from(delay).map_err(|_| {
                    ExchangeError::InvalidOrderPolicy(format!(
                        "whitelist delay {delay}s exceeds uint16"
                    ))
                })?,
            });
        }

        Ok(Self {
            resolving_start_time: start,
            entries,
        })
    }

    pub fn is_whitelisted(&self, address: &Address) -> bool {
        self.entries.iter().any(|e| e.matches(address))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.entries.len() * 12);
        out.extend_from_slice(&self.resolving_start_time.to_be_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.address_half);
            out.extend_from_slice(&entry.delay.to_be_bytes());
        }
        // Resolver count in the high five bits, no fee or receiver flags
        out.push((self.entries.len() as u8) << 3);
        out
    }

    /// Decode an exactly-sized whitelist, the bitmap being its last byte
    pub fn decode(data: &[u8]) -> ExchangeResult<Self> {
        let Some((&bitmap, head)) = data.split_last() else {
            return Err(ExchangeError::Encoding("whitelist data is empty".to_string()));
        };
        let count = (bitmap >> 3) as usize;
        if head.len() != 4 + count * 12 {
            return Err(ExchangeError::Encoding(format!(
                "whitelist of {count} resolvers cannot span {} bytes",
                data.len()
            )));
        }
        let resolving_start_time = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);

        let entries = head[4..]
            .chunks_exact(12)
            .map(|chunk| {
                let mut address_half = [0u8; 10];
                address_half.copy_from_slice(&chunk[..10]);
                WhitelistEntry {
                    address_half,
                    delay: u16::from_be_bytes([chunk[10], chunk[11]]),
                }
            })
            .collect();

        Ok(Self {
            resolving_start_time,
            entries,
        })
    }
}

/// Escrow parameters the factory reads from the order's post-interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscrowExtraData {
    pub hash_lock_info: HashLock,
    pub dst_chain_id: u64,
    pub dst_token: Address,
    pub src_safety_deposit: u128,
    pub dst_safety_deposit: u128,
    pub time_locks: TimeLocks,
}

impl EscrowExtraData {
    pub fn encode(&self) -> [u8; ESCROW_EXTRA_DATA_LEN] {
        let deposits =
            (U256::from(self.src_safety_deposit) << 128) | U256::from(self.dst_safety_deposit);
        let words = [
            U256::from_be_bytes(self.hash_lock_info.value().0),
            U256::from(self.dst_chain_id),
            address_to_word(&self.dst_token),
            deposits,
            self.time_locks.encode(),
        ];
        let mut out = [0u8; ESCROW_EXTRA_DATA_LEN];
        for (i, word) in words.iter().enumerate() {
            out[i * 32..(i + 1) * 32].copy_from_slice(&word.to_be_bytes::<32>());
        }
        out
    }

    pub fn decode(data: &[u8]) -> ExchangeResult<Self> {
        if data.len() != ESCROW_EXTRA_DATA_LEN {
            return Err(ExchangeError::Encoding(format!(
                "escrow extra data must be {ESCROW_EXTRA_DATA_LEN} bytes, got {}",
                data.len()
            )));
        }
        let word = |i: usize| U256::from_be_slice(&data[i * 32..(i + 1) * 32]);

        let chain_id = word(1);
        if chain_id > U256::from(u64::MAX) {
            return Err(ExchangeError::Encoding(format!(
                "destination chain id {chain_id} out of range"
            )));
        }
        let deposits = word(3);
        let low_mask = U256::from(u128::MAX);

        Ok(Self {
            hash_lock_info: HashLock::new(B256::from(word(0).to_be_bytes::<32>())),
            dst_chain_id: chain_id.to::<u64>(),
            dst_token: word_to_address(word(2))?,
            src_safety_deposit: (deposits >> 128usize).to::<u128>(),
            dst_safety_deposit: (deposits & low_mask).to::<u128>(),
            time_locks: TimeLocks::decode(word(4)),
        })
    }
}

/// Extension produced for a cross-chain order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowExtension {
    pub escrow_factory: Address,
    pub auction: AuctionDetails,
    pub whitelist: Whitelist,
    pub extra: EscrowExtraData,
}

impl EscrowExtension {
    pub fn build(&self) -> Extension {
        let mut amount_data = Vec::with_capacity(20 + 17 + self.auction.points.len() * 5);
        amount_data.extend_from_slice(self.escrow_factory.as_slice());
        amount_data.extend_from_slice(&self.auction.encode());
        let amount_data = Bytes::from(amount_data);

        let mut post = Vec::new();
        post.extend_from_slice(self.escrow_factory.as_slice());
        post.extend_from_slice(&self.whitelist.encode());
        post.extend_from_slice(&self.extra.encode());

        Extension {
            making_amount_data: amount_data.clone(),
            taking_amount_data: amount_data,
            post_interaction: post.into(),
            ..Default::default()
        }
    }

    pub fn from_extension(extension: &Extension) -> ExchangeResult<Self> {
        let post = &extension.post_interaction;
        if post.len() < 20 + ESCROW_EXTRA_DATA_LEN {
            return Err(ExchangeError::Encoding(format!(
                "post-interaction of {} bytes cannot hold escrow parameters",
                post.len()
            )));
        }
        let escrow_factory = Address::from_slice(&post[..20]);
        let extra_start = post.len() - ESCROW_EXTRA_DATA_LEN;
        let whitelist = Whitelist::decode(&post[20..extra_start])?;
        let extra = EscrowExtraData::decode(&post[extra_start..])?;

        let amount_data = &extension.making_amount_data;
        if amount_data.len() < 20 || amount_data[..20] != escrow_factory[..] {
            return Err(ExchangeError::Encoding(
                "amount getter does not target the escrow factory".to_string(),
            ));
        }
        let auction = AuctionDetails::decode(&amount_data[20..])?;

        Ok(Self {
            escrow_factory,
            auction,
            whitelist,
            extra,
        })
    }
}

fn uint24(value: u32) -> [u8; 3] {
    let bytes = value.to_be_bytes();
    [bytes[1], bytes[2], bytes[3]]
}

fn read_uint24(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}

//! Escrow factory client
//!
//! Reads implementation addresses from the factory, locates deployment events
//! by block hash, and derives escrow addresses off-chain the way the factory
//! deploys them: an EIP-1167 minimal proxy of the implementation, created with
//! CREATE2 salted by the immutables hash.

use crate::abi::IEscrowFactory;
use crate::chain::{ChainRpc, RetryPolicy};
use crate::config::ContractAddresses;
use crate::cross_chain::{DstComplement, Immutables};
use crate::error::{ExchangeError, ExchangeResult};
use crate::events::{EventParser, FactoryEvent};
use crate::resolver::EscrowSide;

use alloy_primitives::{keccak256, Address, Bytes, B256};
use alloy_sol_types::{SolCall, SolEvent};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const PROXY_PREFIX: [u8; 20] = [
    0x3d, 0x60, 0x2d, 0x80, 0x60, 0x0a, 0x3d, 0x39, 0x81, 0xf3, 0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d,
    0x3d, 0x36, 0x3d, 0x73,
];
const PROXY_SUFFIX: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

/// `keccak256` of the minimal-proxy init code for `implementation`
pub fn proxy_bytecode_hash(implementation: Address) -> B256 {
    let mut init_code = Vec::with_capacity(55);
    init_code.extend_from_slice(&PROXY_PREFIX);
    init_code.extend_from_slice(implementation.as_slice());
    init_code.extend_from_slice(&PROXY_SUFFIX);
    keccak256(init_code)
}

/// Address the factory deploys an escrow to
pub fn compute_escrow_address(factory: Address, immutables_hash: B256, implementation: Address) -> Address {
    factory.create2(immutables_hash, proxy_bytecode_hash(implementation))
}

/// Client for one chain's escrow factory
pub struct EscrowFactoryClient {
    rpc: Arc<dyn ChainRpc>,
    factory: Address,
    parser: EventParser,
    reads: RetryPolicy,
    event_queries: RetryPolicy,
    src_implementation: OnceCell<Address>,
    dst_implementation: OnceCell<Address>,
}

impl EscrowFactoryClient {
    pub fn new(rpc: Arc<dyn ChainRpc>, factory: Address) -> Self {
        let chain_id = rpc.chain_id();
        Self {
            rpc,
            factory,
            parser: EventParser::new(chain_id, factory),
            reads: RetryPolicy::default(),
            event_queries: RetryPolicy::default(),
            src_implementation: OnceCell::new(),
            dst_implementation: OnceCell::new(),
        }
    }

    /// Factory from the chain's contract table, with configured implementation overrides
    pub fn from_contracts(rpc: Arc<dyn ChainRpc>, contracts: &ContractAddresses) -> Self {
        let mut client = Self::new(rpc, contracts.escrow_factory);
        client.src_implementation = OnceCell::new_with(contracts.escrow_src_implementation);
        client.dst_implementation = OnceCell::new_with(contracts.escrow_dst_implementation);
        client
    }

    pub fn with_retry(mut self, reads: RetryPolicy, event_queries: RetryPolicy) -> Self {
        self.reads = reads;
        self.event_queries = event_queries;
        self
    }

    pub fn factory(&self) -> Address {
        self.factory
    }

    fn chain_id(&self) -> u64 {
        self.rpc.chain_id()
    }

    async fn read_address(&self, data: Vec<u8>, operation: &str) -> ExchangeResult<Address> {
        let data = Bytes::from(data);
        let output = self
            .reads
            .run(operation, || self.rpc.call(self.factory, data.clone()))
            .await?;

        if output.len() != 32 || output[..12].iter().any(|b| *b != 0) {
            return Err(ExchangeError::Encoding(format!(
                "{operation} on chain {} returned {} bytes that are not a padded address",
                self.chain_id(),
                output.len()
            )));
        }
        Ok(Address::from_slice(&output[12..]))
    }

    /// `ESCROW_SRC_IMPLEMENTATION()`, cached after the first read
    pub async fn get_source_implementation(&self) -> ExchangeResult<Address> {
        self.src_implementation
            .get_or_try_init(|| {
                self.read_address(
                    IEscrowFactory::ESCROW_SRC_IMPLEMENTATIONCall {}.abi_encode(),
                    "ESCROW_SRC_IMPLEMENTATION",
                )
            })
            .await
            .copied()
    }

    /// `ESCROW_DST_IMPLEMENTATION()`, cached after the first read
    pub async fn get_destination_implementation(&self) -> ExchangeResult<Address> {
        self.dst_implementation
            .get_or_try_init(|| {
                self.read_address(
                    IEscrowFactory::ESCROW_DST_IMPLEMENTATIONCall {}.abi_encode(),
                    "ESCROW_DST_IMPLEMENTATION",
                )
            })
            .await
            .copied()
    }

    async fn query_events(&self, block_hash: B256, topic0: B256) -> ExchangeResult<Vec<FactoryEvent>> {
        let logs = self.rpc.get_logs(block_hash, self.factory, topic0).await?;
        logs.iter()
            .map(|log| self.parser.parse_log(log))
            .filter(|event| !matches!(event, Ok(FactoryEvent::Unknown { .. })))
            .collect()
    }

    /// Source escrow deployment in `block_hash` belonging to `order_hash`.
    ///
    /// Zero matching logs is `EventNotFound` after the event-query retries;
    /// several orders settled in one block are told apart by order hash.
    pub async fn get_deployment_event(
        &self,
        block_hash: B256,
        order_hash: B256,
    ) -> ExchangeResult<(Immutables, DstComplement)> {
        let chain_id = self.chain_id();
        let not_found = || ExchangeError::EventNotFound {
            chain_id,
            block_hash: block_hash.to_string(),
        };

        self.event_queries
            .run("SrcEscrowCreated lookup", || async {
                let events = self
                    .query_events(block_hash, IEscrowFactory::SrcEscrowCreated::SIGNATURE_HASH)
                    .await?;

                let mut deployments: Vec<(Immutables, DstComplement)> = events
                    .into_iter()
                    .filter_map(|event| match event {
                        FactoryEvent::SrcEscrowCreated {
                            immutables,
                            complement,
                            ..
                        } => Some((immutables, complement)),
                        _ => None,
                    })
                    .collect();

                if deployments.len() > 1 {
                    warn!(
                        "{} source escrows created in block {} on chain {}, selecting by order hash",
                        deployments.len(),
                        block_hash,
                        chain_id
                    );
                    deployments.retain(|(immutables, _)| immutables.order_hash == order_hash);
                }

                match deployments.pop() {
                    Some((immutables, complement)) if immutables.order_hash == order_hash => {
                        debug!(
                            "Source escrow for order {} found in block {}",
                            order_hash, block_hash
                        );
                        Ok((immutables, complement))
                    }
                    Some((immutables, _)) => Err(ExchangeError::OrderHashMismatch {
                        expected: order_hash.to_string(),
                        computed: immutables.order_hash.to_string(),
                    }),
                    None => Err(not_found()),
                }
            })
            .await
    }

    /// Destination escrow deployment in `block_hash` with `hash_lock`
    pub async fn get_dst_deployment_event(
        &self,
        block_hash: B256,
        hash_lock: B256,
    ) -> ExchangeResult<Address> {
        let chain_id = self.chain_id();

        self.event_queries
            .run("DstEscrowCreated lookup", || async {
                let events = self
                    .query_events(block_hash, IEscrowFactory::DstEscrowCreated::SIGNATURE_HASH)
                    .await?;

                events
                    .into_iter()
                    .find_map(|event| match event {
                        FactoryEvent::DstEscrowCreated {
                            escrow,
                            hash_lock: lock,
                            ..
                        } if lock == hash_lock => Some(escrow),
                        _ => None,
                    })
                    .ok_or_else(|| ExchangeError::EventNotFound {
                        chain_id,
                        block_hash: block_hash.to_string(),
                    })
            })
            .await
    }

    /// Off-chain escrow address for deployed (timestamp-stamped) immutables
    pub async fn escrow_address(
        &self,
        side: EscrowSide,
        immutables: &Immutables,
    ) -> ExchangeResult<Address> {
        let implementation = match side {
            EscrowSide::Src => self.get_source_implementation().await?,
            EscrowSide::Dst => self.get_destination_implementation().await?,
        };
        let address = compute_escrow_address(self.factory, immutables.hash(), implementation);
        debug!(
            "{} escrow for order {} on chain {}: {}",
            side,
            immutables.order_hash,
            self.chain_id(),
            address
        );
        Ok(address)
    }

    /// `addressOfEscrowSrc/Dst` as computed by the factory itself
    pub async fn address_of_escrow(
        &self,
        side: EscrowSide,
        immutables: &Immutables,
    ) -> ExchangeResult<Address> {
        let data = match side {
            EscrowSide::Src => IEscrowFactory::addressOfEscrowSrcCall {
                immutables: immutables.build(),
            }
            .abi_encode(),
            EscrowSide::Dst => IEscrowFactory::addressOfEscrowDstCall {
                immutables: immutables.build(),
            }
            .abi_encode(),
        };
        self.read_address(data, "addressOfEscrow").await
    }

    /// Check the off-chain derivation against the factory
    pub async fn verify_escrow_address(
        &self,
        side: EscrowSide,
        immutables: &Immutables,
    ) -> ExchangeResult<Address> {
        let computed = self.escrow_address(side, immutables).await?;
        let on_chain = self.address_of_escrow(side, immutables).await?;
        if computed != on_chain {
            return Err(ExchangeError::Encoding(format!(
                "{side} escrow address derivation diverges on chain {}: computed {computed}, factory {on_chain}",
                self.chain_id()
            )));
        }
        info!("{} escrow address {} confirmed by factory", side, computed);
        Ok(computed)
    }
}

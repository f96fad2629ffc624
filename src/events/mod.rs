//! Escrow factory event types and parsing
//!
//! Decodes the deployment events emitted by the escrow factory.

use crate::abi::IEscrowFactory;
use crate::chain::ChainLog;
use crate::cross_chain::{word_to_address, DstComplement, Immutables};
use crate::error::{ExchangeError, ExchangeResult};

use alloy_primitives::{Address, B256};
use alloy_sol_types::SolEvent;

/// Events emitted by the escrow factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactoryEvent {
    /// Source escrow deployed during an order fill
    SrcEscrowCreated {
        chain_id: u64,
        immutables: Immutables,
        complement: DstComplement,
        block_number: u64,
        tx_hash: Option<B256>,
    },

    /// Destination escrow deployed by the resolver
    DstEscrowCreated {
        chain_id: u64,
        escrow: Address,
        hash_lock: B256,
        taker: Address,
        block_number: u64,
        tx_hash: Option<B256>,
    },

    /// Unknown event
    Unknown {
        chain_id: u64,
        topic: B256,
        block_number: u64,
        tx_hash: Option<B256>,
    },
}

impl FactoryEvent {
    pub fn chain_id(&self) -> u64 {
        match self {
            FactoryEvent::SrcEscrowCreated { chain_id, .. }
            | FactoryEvent::DstEscrowCreated { chain_id, .. }
            | FactoryEvent::Unknown { chain_id, .. } => *chain_id,
        }
    }

    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            FactoryEvent::SrcEscrowCreated { .. } => "src_escrow_created",
            FactoryEvent::DstEscrowCreated { .. } => "dst_escrow_created",
            FactoryEvent::Unknown { .. } => "unknown",
        }
    }
}

/// Event parser for one factory deployment
pub struct EventParser {
    chain_id: u64,
    factory: Address,
}

impl EventParser {
    pub fn new(chain_id: u64, factory: Address) -> Self {
        Self { chain_id, factory }
    }

    /// Parse a log entry into a FactoryEvent
    pub fn parse_log(&self, log: &ChainLog) -> ExchangeResult<FactoryEvent> {
        let block_number = log.block_number.unwrap_or(0);
        let tx_hash = log.tx_hash;
        let topic = log.topics.first().copied().unwrap_or_default();

        if log.address != self.factory {
            return Ok(FactoryEvent::Unknown {
                chain_id: self.chain_id,
                topic,
                block_number,
                tx_hash,
            });
        }

        if topic == IEscrowFactory::SrcEscrowCreated::SIGNATURE_HASH {
            let event = IEscrowFactory::SrcEscrowCreated::decode_raw_log(
                log.topics.iter().copied(),
                &log.data,
                true,
            )
            .map_err(|e| self.decode_error("SrcEscrowCreated", e))?;

            return Ok(FactoryEvent::SrcEscrowCreated {
                chain_id: self.chain_id,
                immutables: Immutables::from_build(&event.srcImmutables)?,
                complement: DstComplement::from_build(&event.dstImmutablesComplement)?,
                block_number,
                tx_hash,
            });
        }

        if topic == IEscrowFactory::DstEscrowCreated::SIGNATURE_HASH {
            let event = IEscrowFactory::DstEscrowCreated::decode_raw_log(
                log.topics.iter().copied(),
                &log.data,
                true,
            )
            .map_err(|e| self.decode_error("DstEscrowCreated", e))?;

            return Ok(FactoryEvent::DstEscrowCreated {
                chain_id: self.chain_id,
                escrow: event.escrow,
                hash_lock: event.hashlock,
                taker: word_to_address(event.taker)?,
                block_number,
                tx_hash,
            });
        }

        Ok(FactoryEvent::Unknown {
            chain_id: self.chain_id,
            topic,
            block_number,
            tx_hash,
        })
    }

    fn decode_error(&self, event: &str, e: alloy_sol_types::Error) -> ExchangeError {
        ExchangeError::Encoding(format!(
            "malformed {event} log on chain {}: {e}",
            self.chain_id
        ))
    }
}

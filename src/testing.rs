//! In-process chain emulating the escrow factory and resolver contracts.
//!
//! Chain time follows the tokio clock, so `start_paused` tests advance block
//! timestamps by sleeping.

use crate::abi::{IEscrowFactory, IResolver, LimitOrderBuild};
use crate::chain::{BlockInfo, ChainLog, ChainManager, ChainRpc, FinalityGate, SubmittedTransaction};
use crate::config::{ContractAddresses, ExchangeConfig};
use crate::coordination::{
    ExchangeOrchestrator, FillOutcome, FillRequest, RevealRequest, SwapState,
};
use crate::cross_chain::order::tests::{registry, swap_params, DST_CHAIN, SRC_CHAIN};
use crate::cross_chain::typed_data::order_hash;
use crate::cross_chain::{
    address_to_word, word_to_address, CrossChainOrder, DstComplement, EscrowExtension, Extension,
    Immutables, LocalOrderSigner, OrderBuild, OrderBuilder, OrderPolicy, OrderSigner, SwapParams,
    TakerTraitsPayload,
};
use crate::error::{ExchangeError, ExchangeResult};
use crate::escrow::compute_escrow_address;
use crate::resolver::{full_fill_traits, TransactionData};
use crate::state::InMemoryOrderStore;

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolEvent, SolValue};
use async_trait::async_trait;
use ethers::signers::LocalWallet;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const GENESIS_BLOCK: u64 = 1_000;

#[derive(Default)]
struct FakeState {
    mined: u64,
    logs: HashMap<B256, Vec<ChainLog>>,
    /// Event queries answered with an empty result before logs show up
    hidden_event_queries: u32,
    /// Actions whose next submission reverts
    reverting: HashSet<&'static str>,
    /// Actions whose next submission lands but reports a timeout
    timing_out: HashSet<&'static str>,
    /// Extra wait before the receipt of an action comes back
    receipt_delays: HashMap<&'static str, Duration>,
    /// `addressOfEscrow*` answers with an unrelated address
    misreport_addresses: bool,
    sent: Vec<&'static str>,
    withdrawn: HashSet<Address>,
}

pub struct FakeChain {
    chain_id: u64,
    contracts: ContractAddresses,
    src_implementation: Address,
    dst_implementation: Address,
    started: Instant,
    state: Mutex<FakeState>,
}

impl FakeChain {
    pub fn new(chain_id: u64, contracts: ContractAddresses) -> Self {
        Self {
            chain_id,
            contracts,
            src_implementation: Address::repeat_byte(0xe1),
            dst_implementation: Address::repeat_byte(0xe2),
            started: Instant::now(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Answer the next `n` event queries with no logs
    pub fn hide_event_queries(&self, n: u32) {
        self.lock().hidden_event_queries = n;
    }

    /// Make the next submission of `action` revert
    pub fn revert_next(&self, action: &'static str) {
        self.lock().reverting.insert(action);
    }

    /// Make the next submission of `action` land on-chain but time out for the caller
    pub fn time_out_next(&self, action: &'static str) {
        self.lock().timing_out.insert(action);
    }

    /// Hold back every receipt of `action` by `delay` after it is mined
    pub fn delay_receipts(&self, action: &'static str, delay: Duration) {
        self.lock().receipt_delays.insert(action, delay);
    }

    pub fn misreport_escrow_addresses(&self) {
        self.lock().misreport_addresses = true;
    }

    /// Actions submitted so far, in order
    pub fn sent(&self) -> Vec<&'static str> {
        self.lock().sent.clone()
    }

    pub fn is_withdrawn(&self, escrow: Address) -> bool {
        self.lock().withdrawn.contains(&escrow)
    }

    pub fn src_implementation(&self) -> Address {
        self.src_implementation
    }

    pub fn dst_implementation(&self) -> Address {
        self.dst_implementation
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn now(&self) -> u64 {
        GENESIS_TIMESTAMP + self.started.elapsed().as_secs()
    }

    fn head(&self, state: &FakeState) -> BlockInfo {
        BlockInfo {
            number: GENESIS_BLOCK + self.started.elapsed().as_secs() + state.mined,
            timestamp: self.now(),
        }
    }

    fn revert(&self, action: &str, reason: impl std::fmt::Display) -> ExchangeError {
        ExchangeError::Reverted {
            chain_id: self.chain_id,
            tx_hash: format!("{action}: {reason}"),
        }
    }

    fn escrow_of(&self, implementation: Address, immutables: &Immutables) -> Address {
        compute_escrow_address(self.contracts.escrow_factory, immutables.hash(), implementation)
    }

    fn deploy_src(&self, tx: &TransactionData, timestamp: u64) -> ExchangeResult<Vec<ChainLog>> {
        let call = IResolver::deploySrcCall::abi_decode(&tx.data, true)
            .map_err(|e| self.revert("deploySrc", e))?;
        let immutables = Immutables::from_build(&call.immutables)?;

        let build = order_build(&call.order)?;
        let expected = order_hash(&build, self.chain_id, self.contracts.limit_order_protocol);
        if immutables.order_hash != expected {
            return Err(self.revert("deploySrc", "order hash mismatch"));
        }
        if tx.value != immutables.safety_deposit {
            return Err(self.revert("deploySrc", "safety deposit not funded"));
        }

        let traits = TakerTraitsPayload {
            trait_: call.takerTraits,
            args: call.args.clone(),
        };
        let extension = Extension::decode(&traits.extension_bytes()?)?;
        let escrow = EscrowExtension::from_extension(&extension)?;
        if immutables.hash_lock != escrow.extra.hash_lock_info {
            return Err(self.revert("deploySrc", "hash-lock differs from extension"));
        }

        let complement = DstComplement {
            maker: if build.receiver == Address::ZERO {
                build.maker
            } else {
                build.receiver
            },
            amount: build.taking_amount,
            token: escrow.extra.dst_token,
            safety_deposit: U256::from(escrow.extra.dst_safety_deposit),
            chain_id: escrow.extra.dst_chain_id,
        };

        let event = IEscrowFactory::SrcEscrowCreated {
            srcImmutables: immutables.with_deployed_at(timestamp).build(),
            dstImmutablesComplement: complement.build(),
        };
        Ok(vec![self.log(
            IEscrowFactory::SrcEscrowCreated::SIGNATURE_HASH,
            event.encode_data(),
        )])
    }

    fn deploy_dst(&self, tx: &TransactionData, timestamp: u64) -> ExchangeResult<Vec<ChainLog>> {
        let call = IResolver::deployDstCall::abi_decode(&tx.data, true)
            .map_err(|e| self.revert("deployDst", e))?;
        let immutables = Immutables::from_build(&call.dstImmutables)?.with_deployed_at(timestamp);

        if tx.value != immutables.safety_deposit {
            return Err(self.revert("deployDst", "safety deposit not funded"));
        }
        if U256::from(immutables.time_locks.dst_view().private_cancellation)
            > call.srcCancellationTimestamp
        {
            return Err(self.revert("deployDst", "invalid creation time"));
        }

        let event = IEscrowFactory::DstEscrowCreated {
            escrow: self.escrow_of(self.dst_implementation, &immutables),
            hashlock: immutables.hash_lock.value(),
            taker: address_to_word(&immutables.taker),
        };
        Ok(vec![self.log(
            IEscrowFactory::DstEscrowCreated::SIGNATURE_HASH,
            event.encode_data(),
        )])
    }

    /// Which of this chain's escrows `escrow` is, checked against the immutables
    fn locate(&self, escrow: Address, immutables: &Immutables) -> Option<bool> {
        if escrow == self.escrow_of(self.src_implementation, immutables) {
            Some(true)
        } else if escrow == self.escrow_of(self.dst_implementation, immutables) {
            Some(false)
        } else {
            None
        }
    }

    fn withdraw(&self, tx: &TransactionData, timestamp: u64) -> ExchangeResult<Address> {
        let call = IResolver::withdrawCall::abi_decode(&tx.data, true)
            .map_err(|e| self.revert("withdraw", e))?;
        let immutables = Immutables::from_build(&call.immutables)?;

        let is_src = self
            .locate(call.escrow, &immutables)
            .ok_or_else(|| self.revert("withdraw", "invalid immutables"))?;
        if !immutables.hash_lock.verify_secret(&call.secret) {
            return Err(self.revert("withdraw", "invalid secret"));
        }
        let opens = if is_src {
            immutables.time_locks.src_view().private_withdrawal
        } else {
            immutables.time_locks.dst_view().private_withdrawal
        };
        let closes = if is_src {
            immutables.time_locks.src_view().private_cancellation
        } else {
            immutables.time_locks.dst_view().private_cancellation
        };
        if timestamp < opens || timestamp >= closes {
            return Err(self.revert("withdraw", "invalid time"));
        }
        Ok(call.escrow)
    }

    fn cancel(&self, tx: &TransactionData, timestamp: u64) -> ExchangeResult<()> {
        let call = IResolver::cancelCall::abi_decode(&tx.data, true)
            .map_err(|e| self.revert("cancel", e))?;
        let immutables = Immutables::from_build(&call.immutables)?;

        let is_src = self
            .locate(call.escrow, &immutables)
            .ok_or_else(|| self.revert("cancel", "invalid immutables"))?;
        let opens = if is_src {
            immutables.time_locks.src_view().private_cancellation
        } else {
            immutables.time_locks.dst_view().private_cancellation
        };
        if timestamp < opens {
            return Err(self.revert("cancel", "invalid time"));
        }
        Ok(())
    }

    fn log(&self, topic: B256, data: Vec<u8>) -> ChainLog {
        ChainLog {
            address: self.contracts.escrow_factory,
            topics: vec![topic],
            data: Bytes::from(data),
            block_hash: None,
            block_number: None,
            tx_hash: None,
        }
    }
}

fn order_build(raw: &LimitOrderBuild) -> ExchangeResult<OrderBuild> {
    Ok(OrderBuild {
        salt: raw.salt,
        maker: word_to_address(raw.maker)?,
        receiver: word_to_address(raw.receiver)?,
        maker_asset: word_to_address(raw.makerAsset)?,
        taker_asset: word_to_address(raw.takerAsset)?,
        making_amount: raw.makingAmount,
        taking_amount: raw.takingAmount,
        maker_traits: raw.makerTraits,
    })
}

#[async_trait]
impl ChainRpc for FakeChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn confirmations(&self) -> u64 {
        2
    }

    async fn call(&self, to: Address, data: Bytes) -> ExchangeResult<Bytes> {
        if to != self.contracts.escrow_factory || data.len() < 4 {
            return Err(ExchangeError::ChainCall {
                chain_id: self.chain_id,
                message: "execution reverted".to_string(),
            });
        }

        let selector: [u8; 4] = [data[0], data[1], data[2], data[3]];
        let address = if selector == IEscrowFactory::ESCROW_SRC_IMPLEMENTATIONCall::SELECTOR {
            self.src_implementation
        } else if selector == IEscrowFactory::ESCROW_DST_IMPLEMENTATIONCall::SELECTOR {
            self.dst_implementation
        } else if selector == IEscrowFactory::addressOfEscrowSrcCall::SELECTOR {
            let call = IEscrowFactory::addressOfEscrowSrcCall::abi_decode(&data, true)
                .map_err(|e| ExchangeError::Encoding(e.to_string()))?;
            self.escrow_of(self.src_implementation, &Immutables::from_build(&call.immutables)?)
        } else if selector == IEscrowFactory::addressOfEscrowDstCall::SELECTOR {
            let call = IEscrowFactory::addressOfEscrowDstCall::abi_decode(&data, true)
                .map_err(|e| ExchangeError::Encoding(e.to_string()))?;
            self.escrow_of(self.dst_implementation, &Immutables::from_build(&call.immutables)?)
        } else {
            return Err(ExchangeError::ChainCall {
                chain_id: self.chain_id,
                message: "unknown selector".to_string(),
            });
        };
        let address = if self.lock().misreport_addresses
            && selector != IEscrowFactory::ESCROW_SRC_IMPLEMENTATIONCall::SELECTOR
            && selector != IEscrowFactory::ESCROW_DST_IMPLEMENTATIONCall::SELECTOR
        {
            Address::repeat_byte(0xbd)
        } else {
            address
        };
        Ok(Bytes::from(address.abi_encode()))
    }

    async fn get_logs(
        &self,
        block_hash: B256,
        address: Address,
        topic0: B256,
    ) -> ExchangeResult<Vec<ChainLog>> {
        let mut state = self.lock();
        if state.hidden_event_queries > 0 {
            state.hidden_event_queries -= 1;
            return Ok(Vec::new());
        }
        Ok(state
            .logs
            .get(&block_hash)
            .map(|logs| {
                logs.iter()
                    .filter(|log| log.address == address && log.topics.first() == Some(&topic0))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn send_transaction(&self, tx: TransactionData) -> ExchangeResult<SubmittedTransaction> {
        if tx.data.len() < 4 {
            return Err(self.revert("fallback", "empty calldata"));
        }
        let selector: [u8; 4] = [tx.data[0], tx.data[1], tx.data[2], tx.data[3]];
        let action = if selector == IResolver::deploySrcCall::SELECTOR {
            "deploySrc"
        } else if selector == IResolver::deployDstCall::SELECTOR {
            "deployDst"
        } else if selector == IResolver::withdrawCall::SELECTOR {
            "withdraw"
        } else if selector == IResolver::cancelCall::SELECTOR {
            "cancel"
        } else {
            return Err(self.revert("fallback", "unknown selector"));
        };

        if tx.to != self.contracts.resolver {
            return Err(self.revert(action, "not the resolver"));
        }
        let timing_out = {
            let mut state = self.lock();
            if state.reverting.remove(action) {
                return Err(self.revert(action, "scripted revert"));
            }
            state.timing_out.remove(action)
        };

        let timestamp = self.now();
        let mut logs = Vec::new();
        let mut withdrawn = None;
        match action {
            "deploySrc" => logs = self.deploy_src(&tx, timestamp)?,
            "deployDst" => logs = self.deploy_dst(&tx, timestamp)?,
            "withdraw" => withdrawn = Some(self.withdraw(&tx, timestamp)?),
            _ => self.cancel(&tx, timestamp)?,
        }

        let (delay, block, block_hash, tx_hash) = {
        let mut state = self.lock();
        let delay = state.receipt_delays.get(action).copied();
        state.mined += 1;
        let block = self.head(&state);
        let block_hash = keccak256((self.chain_id, block.number).abi_encode());
        let tx_hash = keccak256([block_hash.as_slice(), &tx.data].concat());

        for log in &mut logs {
            log.block_hash = Some(block_hash);
            log.block_number = Some(block.number);
            log.tx_hash = Some(tx_hash);
        }
        state.logs.insert(block_hash, logs);
        state.sent.push(action);
        if let Some(escrow) = withdrawn {
            state.withdrawn.insert(escrow);
        }
        drop(state);
        (delay, block, block_hash, tx_hash)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if timing_out {
            return Err(ExchangeError::Timeout {
                operation: format!("receipt of {tx_hash} on chain {}", self.chain_id),
            });
        }

        Ok(SubmittedTransaction {
            tx_hash,
            block_hash,
            block_number: block.number,
            block_timestamp: block.timestamp,
        })
    }

    async fn latest_block(&self) -> ExchangeResult<BlockInfo> {
        Ok(self.head(&self.lock()))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Orchestrator wired to a fake source and destination chain
pub struct Harness {
    pub orchestrator: ExchangeOrchestrator,
    pub store: Arc<InMemoryOrderStore>,
    pub src: Arc<FakeChain>,
    pub dst: Arc<FakeChain>,
}

pub fn harness() -> Harness {
    harness_with(FinalityGate::new(
        Duration::from_secs(1),
        Duration::from_secs(1),
        Duration::from_secs(300),
    ))
}

pub fn harness_with(finality: FinalityGate) -> Harness {
    let registry = registry();
    let src = Arc::new(FakeChain::new(
        SRC_CHAIN,
        registry.contracts(SRC_CHAIN).unwrap().clone(),
    ));
    let dst = Arc::new(FakeChain::new(
        DST_CHAIN,
        registry.contracts(DST_CHAIN).unwrap().clone(),
    ));
    let chains = ChainManager::from_clients([
        src.clone() as Arc<dyn ChainRpc>,
        dst.clone() as Arc<dyn ChainRpc>,
    ]);
    let store = Arc::new(InMemoryOrderStore::new());
    let config = ExchangeConfig {
        read_retry_delay_ms: 100,
        read_retry_max_delay_ms: 400,
        ..Default::default()
    };

    let orchestrator = ExchangeOrchestrator::new(
        Arc::new(chains),
        store.clone(),
        registry,
        OrderPolicy::default(),
        config,
    )
    .with_finality(finality);

    Harness {
        orchestrator,
        store,
        src,
        dst,
    }
}

const MAKER_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

pub fn signer() -> LocalOrderSigner {
    LocalOrderSigner::new(MAKER_KEY.parse::<LocalWallet>().unwrap())
}

pub fn params(signer: &LocalOrderSigner) -> SwapParams {
    SwapParams {
        maker: signer.address(),
        ..swap_params()
    }
}

/// Fill request exactly as the web client would post it
pub async fn fill_request(signer: &LocalOrderSigner) -> (FillRequest, CrossChainOrder) {
    let order = OrderBuilder::new(registry(), OrderPolicy::default())
        .with_seed(11)
        .build(&params(signer))
        .unwrap();
    let lop = registry().contracts(SRC_CHAIN).unwrap().limit_order_protocol;
    let signature = signer.sign_typed_data(&order.typed_data(lop)).await.unwrap();

    let request = FillRequest {
        order: order.to_payload(),
        swap_state: SwapState {
            src_chain_id: SRC_CHAIN,
            dst_chain_id: DST_CHAIN,
            user_address: order.maker,
            src_token: order.maker_asset,
            dst_token: order.taker_asset,
            src_amount: order.making_amount,
            dst_amount: order.taking_amount,
        },
        signature,
        immutables: None,
        hash_lock: Some(order.hash_lock().value()),
        order_hash: Some(order.order_hash(lop)),
        order_build: Some(order.build()),
        taker_traits: Some(full_fill_traits(&order).unwrap()),
        src_safety_deposit: Some(order.src_safety_deposit()),
    };
    (request, order)
}

pub fn reveal_request(fill: &FillOutcome, state: &SwapState, secret: B256) -> RevealRequest {
    RevealRequest {
        order_id: fill.order_id,
        swap_state: state.clone(),
        secret,
        dst_immutables_data: fill.dst_immutables_data.clone(),
        src_immutables_data: fill.src_immutables_data.clone(),
        src_immutables_hash: Some(fill.src_immutables_hash),
        dst_immutables_hash: Some(fill.dst_immutables_hash),
    }
}

//! Exchange orchestration: fill, deploy, reveal, withdraw

use super::payload::{
    FillOutcome, FillRequest, RevealOutcome, RevealRequest, SrcEscrowEvent, SwapState,
};
use crate::chain::{ChainManager, ChainRpc, FinalityGate, RetryPolicy, RevealCheckpoint, SubmittedTransaction};
use crate::config::{ChainRegistry, ExchangeConfig};
use crate::cross_chain::typed_data::verify_maker;
use crate::cross_chain::{
    CrossChainOrder, DstComplement, Immutables, ImmutablesData, OrderBuilder, OrderPolicy,
    OrderSigner, SecretCommitment, SwapParams,
};
use crate::error::{ExchangeError, ExchangeResult};
use crate::escrow::EscrowFactoryClient;
use crate::resolver::{full_fill_traits, EscrowSide, ResolverCallBuilder, TransactionData};
use crate::state::{ExchangeOrder, ExchangeStatus, OrderStore, Phase};

use alloy_primitives::{Address, B256};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything the fill needs, checked before anything touches a chain
struct ValidatedFill {
    order: CrossChainOrder,
    order_hash: B256,
    src_immutables: Immutables,
    deploy_src: TransactionData,
}

/// Drives exchange orders through their lifecycle.
///
/// Each order runs as one sequential pipeline; distinct orders share nothing
/// but the store, which serializes writes per order through its version.
pub struct ExchangeOrchestrator {
    /// Chain clients for every connected chain
    chains: Arc<ChainManager>,
    /// Persisted order records
    store: Arc<dyn OrderStore>,
    /// Contract address table
    registry: Arc<ChainRegistry>,
    /// Policy for orders built by `execute_swap`
    policy: OrderPolicy,
    finality: FinalityGate,
    /// Factory clients, kept per chain so implementation reads stay cached
    factories: DashMap<u64, Arc<EscrowFactoryClient>>,
    config: ExchangeConfig,
}

impl ExchangeOrchestrator {
    pub fn new(
        chains: Arc<ChainManager>,
        store: Arc<dyn OrderStore>,
        registry: Arc<ChainRegistry>,
        policy: OrderPolicy,
        config: ExchangeConfig,
    ) -> Self {
        Self {
            chains,
            store,
            registry,
            policy,
            finality: FinalityGate::from_config(&config),
            factories: DashMap::new(),
            config,
        }
    }

    pub fn with_finality(mut self, finality: FinalityGate) -> Self {
        self.finality = finality;
        self
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    fn factory(&self, chain_id: u64) -> ExchangeResult<Arc<EscrowFactoryClient>> {
        if let Some(factory) = self.factories.get(&chain_id) {
            return Ok(factory.clone());
        }

        let client = EscrowFactoryClient::from_contracts(
            self.chains.get(chain_id)?,
            self.registry.contracts(chain_id)?,
        )
        .with_retry(
            RetryPolicy::reads(&self.config),
            RetryPolicy::event_queries(&self.config),
        );

        Ok(self
            .factories
            .entry(chain_id)
            .or_insert_with(|| Arc::new(client))
            .clone())
    }

    /// Store calls get the configured timeout; they are never retried here
    async fn with_store_timeout<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = ExchangeResult<T>>,
    ) -> ExchangeResult<T> {
        tokio::time::timeout(self.config.store_timeout(), fut)
            .await
            .map_err(|_| ExchangeError::Timeout {
                operation: format!("store {operation}"),
            })?
    }

    async fn save(&self, order: &mut ExchangeOrder) -> ExchangeResult<()> {
        let store = self.store.clone();
        let mut next = order.clone();
        self.with_store_timeout("update", async move {
            store.update(&mut next).await.map(|_| next)
        })
        .await
        .map(|saved| *order = saved)
    }

    /// Mark the order FAILED in `phase` and hand the error back
    async fn fail(&self, order: &mut ExchangeOrder, phase: Phase, err: ExchangeError) -> ExchangeError {
        error!(
            order_id = %order.id,
            phase = %phase,
            "Exchange failed: {}",
            err
        );
        crate::metrics::record_order_failed(phase);

        match order.fail(phase, &err) {
            Ok(()) => {
                if let Err(store_err) = self.save(order).await {
                    error!(
                        order_id = %order.id,
                        "Failed to persist failure of phase {}: {}",
                        phase, store_err
                    );
                }
            }
            Err(transition_err) => warn!(order_id = %order.id, "{}", transition_err),
        }
        err
    }

    /// Submit once and count it
    async fn submit(
        &self,
        chain: &Arc<dyn ChainRpc>,
        action: &str,
        tx: TransactionData,
    ) -> ExchangeResult<SubmittedTransaction> {
        let submitted = chain.send_transaction(tx).await?;
        crate::metrics::record_tx_submitted(chain.chain_id(), action);
        info!(
            chain_id = chain.chain_id(),
            tx_hash = %submitted.tx_hash,
            "{} confirmed in block {}",
            action,
            submitted.block_number
        );
        Ok(submitted)
    }

    fn check_route(&self, state: &SwapState, order: &ExchangeOrder) -> ExchangeResult<()> {
        if state.src_chain_id != order.src_chain_id || state.dst_chain_id != order.dst_chain_id {
            return Err(ExchangeError::InvalidPayload(format!(
                "route {} -> {} does not match order {} ({} -> {})",
                state.src_chain_id,
                state.dst_chain_id,
                order.id,
                order.src_chain_id,
                order.dst_chain_id
            )));
        }
        Ok(())
    }

    /// Rebuild the order from its wire form and cross-check every client-side derivation
    fn validate_fill(&self, request: &FillRequest) -> ExchangeResult<ValidatedFill> {
        let state = &request.swap_state;
        let src = self.registry.get(state.src_chain_id)?;
        self.registry.get(state.dst_chain_id)?;

        let order = CrossChainOrder::from_payload(&request.order, state.src_chain_id)?;
        if order.dst_chain_id() != state.dst_chain_id {
            return Err(ExchangeError::InvalidPayload(format!(
                "order targets chain {}, swap state names {}",
                order.dst_chain_id(),
                state.dst_chain_id
            )));
        }
        if order.maker != state.user_address {
            return Err(ExchangeError::InvalidPayload(format!(
                "order maker {} is not the requesting user {}",
                order.maker, state.user_address
            )));
        }
        if order.making_amount != state.src_amount || order.taking_amount != state.dst_amount {
            return Err(ExchangeError::InvalidAmount(
                "order amounts differ from the swap state".to_string(),
            ));
        }
        if order.escrow_factory() != src.contracts.escrow_factory {
            return Err(ExchangeError::InvalidPayload(format!(
                "order names escrow factory {}, chain {} uses {}",
                order.escrow_factory(),
                state.src_chain_id,
                src.contracts.escrow_factory
            )));
        }
        if order.maker_traits.is_multiple_fills_allowed() || order.maker_traits.is_partial_fill_allowed() {
            return Err(ExchangeError::InvalidOrderPolicy(
                "only single full fills are resolved".to_string(),
            ));
        }

        let hash_lock = order.hash_lock().value();
        if request.hash_lock.is_some_and(|h| h != hash_lock) {
            return Err(ExchangeError::InvalidPayload(
                "hash-lock differs from the order extension".to_string(),
            ));
        }
        if request.src_safety_deposit.is_some_and(|d| d != order.src_safety_deposit()) {
            return Err(ExchangeError::InvalidPayload(
                "source safety deposit differs from the order extension".to_string(),
            ));
        }
        if request.order_build.as_ref().is_some_and(|b| *b != order.build()) {
            return Err(ExchangeError::InvalidPayload(
                "order build differs from the order payload".to_string(),
            ));
        }

        let order_hash = order.order_hash(src.contracts.limit_order_protocol);
        if let Some(claimed) = request.order_hash {
            if claimed != order_hash {
                return Err(ExchangeError::OrderHashMismatch {
                    expected: claimed.to_string(),
                    computed: order_hash.to_string(),
                });
            }
        }
        verify_maker(&request.signature, order_hash, order.maker)?;

        let fill_amount = order.making_amount;
        let src_immutables = order.to_src_immutables(order_hash, src.contracts.resolver, fill_amount);
        if let Some(claimed) = &request.immutables {
            let claimed_hash = Immutables::from(claimed).hash();
            if claimed_hash != src_immutables.hash() {
                return Err(ExchangeError::ImmutablesHashMismatch {
                    expected: claimed_hash.to_string(),
                    computed: src_immutables.hash().to_string(),
                });
            }
        }

        let traits = full_fill_traits(&order)?;
        if request.taker_traits.as_ref().is_some_and(|t| *t != traits) {
            return Err(ExchangeError::InvalidPayload(
                "taker traits differ from a full maker-amount fill".to_string(),
            ));
        }

        let calls = ResolverCallBuilder::for_route(&self.registry, state.src_chain_id, state.dst_chain_id)?;
        let deploy_src = calls.deploy_source(
            &order.build(),
            &src_immutables,
            &request.signature,
            &traits,
            fill_amount,
        )?;

        Ok(ValidatedFill {
            order,
            order_hash,
            src_immutables,
            deploy_src,
        })
    }

    /// Fill the order, observe the source escrow, deploy the destination escrow.
    ///
    /// Leaves the order in PENDING_SECRET with both escrows deployed.
    pub async fn submit_fill(&self, request: FillRequest) -> ExchangeResult<FillOutcome> {
        let started = Instant::now();
        let validated = match self.validate_fill(&request) {
            Ok(validated) => validated,
            Err(e) => {
                warn!("Rejected fill request: {}", e);
                crate::metrics::record_order_failed(Phase::Validate);
                return Err(e);
            }
        };
        crate::metrics::record_phase_latency(Phase::Validate, started.elapsed());

        let state = &request.swap_state;
        let mut order = ExchangeOrder::new(
            validated.order_hash,
            state.user_address,
            state.src_chain_id,
            state.dst_chain_id,
            state.src_token,
            state.dst_token,
            state.src_amount,
            state.dst_amount,
        );
        order.src_immutables = Some(validated.src_immutables.to_data());
        order.message = Some("Filling order".to_string());

        let store = self.store.clone();
        let created = order.clone();
        self.with_store_timeout("create", async move { store.create(&created).await })
            .await?;
        crate::metrics::record_order_created();
        info!(
            order_id = %order.id,
            order_hash = %order.order_hash,
            "Exchange order created: {} -> {}",
            order.src_chain_id,
            order.dst_chain_id
        );

        let src_chain = match self.chains.get(order.src_chain_id) {
            Ok(chain) => chain,
            Err(e) => return Err(self.fail(&mut order, Phase::Fill, e).await),
        };
        let dst_chain = match self.chains.get(order.dst_chain_id) {
            Ok(chain) => chain,
            Err(e) => return Err(self.fail(&mut order, Phase::Fill, e).await),
        };

        // Phase 1: fill and deploy the source escrow
        let started = Instant::now();
        let fill = match self.submit(&src_chain, "deploy_src", validated.deploy_src.clone()).await {
            Ok(fill) => fill,
            Err(e) => return Err(self.fail(&mut order, Phase::Fill, e).await),
        };
        order.order_fill_tx = Some(fill.tx_hash);
        order.src_deploy_block = Some(fill.block_number);
        order.message = Some("Order filled".to_string());
        self.save(&mut order).await?;
        crate::metrics::record_phase_latency(Phase::Fill, started.elapsed());

        // Phase 2: observe the source escrow and derive the destination side
        let started = Instant::now();
        let (src_immutables, complement, src_escrow) = match self
            .observe_source(&order, fill.block_hash, &validated)
            .await
        {
            Ok(found) => found,
            Err(e) => return Err(self.fail(&mut order, Phase::SrcEventQuery, e).await),
        };
        order.src_immutables = Some(src_immutables.to_data());
        order.src_deployed_at = Some(src_immutables.time_locks.deployed_at as u64);
        order.message = Some("Source escrow deployed".to_string());
        if let Err(e) = order.transition(ExchangeStatus::PendingSecret) {
            return Err(self.fail(&mut order, Phase::SrcEventQuery, e).await);
        }
        self.save(&mut order).await?;
        crate::metrics::record_phase_latency(Phase::SrcEventQuery, started.elapsed());

        // Phase 3: deploy the destination escrow
        let started = Instant::now();
        let dst_resolver = match self.registry.contracts(order.dst_chain_id) {
            Ok(contracts) => contracts.resolver,
            Err(e) => return Err(self.fail(&mut order, Phase::DstDeploy, e).await),
        };
        let dst_immutables = src_immutables.to_destination(&complement, dst_resolver);
        let (dst_deploy, dst_immutables, dst_escrow) =
            match self.deploy_destination(&order, &dst_chain, dst_immutables).await {
                Ok(deployed) => deployed,
                Err(e) => return Err(self.fail(&mut order, Phase::DstDeploy, e).await),
            };
        order.dst_deploy_tx = Some(dst_deploy.tx_hash);
        order.dst_deploy_block = Some(dst_deploy.block_number);
        order.dst_deployed_at = Some(dst_deploy.block_timestamp);
        order.dst_immutables = Some(dst_immutables.to_data());
        order.metadata = serde_json::json!({
            "srcEscrow": src_escrow,
            "dstEscrow": dst_escrow,
        });
        let message = "Destination escrow deployed, waiting for secret".to_string();
        order.message = Some(message.clone());
        self.save(&mut order).await?;
        crate::metrics::record_phase_latency(Phase::DstDeploy, started.elapsed());

        info!(
            order_id = %order.id,
            "Both escrows deployed: src {} dst {}",
            src_escrow,
            dst_escrow
        );

        Ok(FillOutcome {
            order_id: order.id,
            src_escrow_event: SrcEscrowEvent {
                immutables: src_immutables.to_data(),
                complement,
                block_hash: fill.block_hash,
                escrow_address: src_escrow,
            },
            dst_deployed_at: dst_deploy.block_timestamp,
            dst_escrow_address: dst_escrow,
            dst_immutables_data: dst_immutables.to_data(),
            dst_immutables_hash: dst_immutables.hash(),
            src_immutables_hash: src_immutables.hash(),
            src_immutables_data: src_immutables.to_data(),
            transactions: order.transactions(&self.registry),
            status: order.status,
            message,
        })
    }

    /// Deployment event at the fill block, checked against what was submitted
    async fn observe_source(
        &self,
        order: &ExchangeOrder,
        block_hash: B256,
        validated: &ValidatedFill,
    ) -> ExchangeResult<(Immutables, DstComplement, Address)> {
        let factory = self.factory(order.src_chain_id)?;
        let (immutables, complement) = factory
            .get_deployment_event(block_hash, validated.order_hash)
            .await?;

        let expected = validated
            .src_immutables
            .with_deployed_at(immutables.time_locks.deployed_at as u64);
        if immutables != expected {
            return Err(ExchangeError::ImmutablesHashMismatch {
                expected: expected.hash().to_string(),
                computed: immutables.hash().to_string(),
            });
        }
        if complement != validated.order.dst_complement() {
            return Err(ExchangeError::InvalidPayload(
                "factory emitted a destination complement that differs from the order".to_string(),
            ));
        }

        let escrow = factory.verify_escrow_address(EscrowSide::Src, &immutables).await?;
        debug!(order_id = %order.id, "Source escrow at {}", escrow);
        Ok((immutables, complement, escrow))
    }

    async fn deploy_destination(
        &self,
        order: &ExchangeOrder,
        dst_chain: &Arc<dyn ChainRpc>,
        dst_immutables: Immutables,
    ) -> ExchangeResult<(SubmittedTransaction, Immutables, Address)> {
        let calls = ResolverCallBuilder::for_route(&self.registry, order.src_chain_id, order.dst_chain_id)?;

        // The factory only creates escrows that cancel before the source side does
        let src_cancellation = dst_immutables.time_locks.src_view().private_cancellation;
        let latest_creation =
            src_cancellation.saturating_sub(dst_immutables.time_locks.dst_cancellation as u64);
        let head = dst_chain.latest_block().await?;
        let inclusion = head.timestamp + self.registry.get(order.dst_chain_id)?.block_time_secs();
        if inclusion > latest_creation {
            return Err(ExchangeError::WindowClosed {
                chain_id: order.dst_chain_id,
                deadline: latest_creation,
                now: head.timestamp,
            });
        }

        let deployed = self
            .submit(dst_chain, "deploy_dst", calls.deploy_destination(&dst_immutables))
            .await?;
        let dst_immutables = dst_immutables.with_deployed_at(deployed.block_timestamp);

        let factory = self.factory(order.dst_chain_id)?;
        let emitted = factory
            .get_dst_deployment_event(deployed.block_hash, dst_immutables.hash_lock.value())
            .await?;
        let computed = factory.escrow_address(EscrowSide::Dst, &dst_immutables).await?;
        if emitted != computed {
            return Err(ExchangeError::Encoding(format!(
                "destination escrow emitted at {emitted}, derived {computed}"
            )));
        }

        Ok((deployed, dst_immutables, computed))
    }

    /// Check the secret, wait for finality on both chains, withdraw both escrows.
    ///
    /// Destination first: that withdrawal publishes the secret, after which
    /// the source side is claimable.
    pub async fn reveal_secret(&self, request: RevealRequest) -> ExchangeResult<RevealOutcome> {
        let mut order = self.load(request.order_id).await?;
        self.check_route(&request.swap_state, &order)?;

        if order.status != ExchangeStatus::PendingSecret || order.dst_deploy_tx.is_none() {
            return Err(ExchangeError::InvalidStateTransition {
                from: order.status.to_string(),
                to: ExchangeStatus::PendingWithdraw.to_string(),
            });
        }

        let (src_immutables, dst_immutables) = stored_immutables(&order)?;
        check_immutables(&src_immutables, &request.src_immutables_data, request.src_immutables_hash)?;
        check_immutables(&dst_immutables, &request.dst_immutables_data, request.dst_immutables_hash)?;

        if !src_immutables.hash_lock.verify_secret(&request.secret) {
            return Err(ExchangeError::HashLockMismatch {
                expected: src_immutables.hash_lock.value().to_string(),
            });
        }

        order.secret = Some(request.secret);
        order.message = Some("Secret received, waiting for finality".to_string());
        order.transition(ExchangeStatus::PendingWithdraw)?;
        self.save(&mut order).await?;
        info!(order_id = %order.id, "Secret accepted");

        // Phase 4: both withdrawal windows open and both deployments final
        let started = Instant::now();
        if let Err(e) = self.wait_for_finality(&order, &src_immutables, &dst_immutables).await {
            return Err(self.fail(&mut order, Phase::RevealWait, e).await);
        }
        crate::metrics::record_phase_latency(Phase::RevealWait, started.elapsed());

        let calls = ResolverCallBuilder::for_route(&self.registry, order.src_chain_id, order.dst_chain_id)?;

        // Phase 5a: destination withdrawal publishes the secret
        let started = Instant::now();
        let dst_escrow = match self
            .withdraw(&calls, EscrowSide::Dst, order.dst_chain_id, request.secret, &dst_immutables)
            .await
        {
            Ok((escrow, submitted)) => {
                order.dst_withdraw_tx = Some(submitted.tx_hash);
                escrow
            }
            Err(e) => return Err(self.fail(&mut order, Phase::DstWithdraw, e).await),
        };
        order.message = Some("Destination escrow withdrawn".to_string());
        self.save(&mut order).await?;
        crate::metrics::record_phase_latency(Phase::DstWithdraw, started.elapsed());

        // Phase 5b: source withdrawal with the now-public secret
        let started = Instant::now();
        let src_escrow = match self
            .withdraw(&calls, EscrowSide::Src, order.src_chain_id, request.secret, &src_immutables)
            .await
        {
            Ok((escrow, submitted)) => {
                order.src_withdraw_tx = Some(submitted.tx_hash);
                escrow
            }
            Err(e) => return Err(self.fail(&mut order, Phase::SrcWithdraw, e).await),
        };
        crate::metrics::record_phase_latency(Phase::SrcWithdraw, started.elapsed());

        let message = "Exchange completed".to_string();
        order.message = Some(message.clone());
        order.transition(ExchangeStatus::Completed)?;
        self.save(&mut order).await?;
        crate::metrics::record_order_completed();
        info!(order_id = %order.id, "Exchange completed");

        Ok(RevealOutcome {
            order_id: order.id,
            src_escrow_address: src_escrow,
            dst_escrow_address: dst_escrow,
            transactions: order.transactions(&self.registry),
            status: order.status,
            message,
        })
    }

    async fn wait_for_finality(
        &self,
        order: &ExchangeOrder,
        src_immutables: &Immutables,
        dst_immutables: &Immutables,
    ) -> ExchangeResult<()> {
        let missing = |what: &str| ExchangeError::Internal(format!("order {} has no {what}", order.id));

        let checkpoints = [
            RevealCheckpoint::new(
                self.chains.get(order.src_chain_id)?,
                order.src_deploy_block.ok_or_else(|| missing("source deploy block"))?,
                src_immutables.time_locks.src_view().private_withdrawal,
                src_immutables.time_locks.src_view().private_cancellation,
            ),
            RevealCheckpoint::new(
                self.chains.get(order.dst_chain_id)?,
                order.dst_deploy_block.ok_or_else(|| missing("destination deploy block"))?,
                dst_immutables.time_locks.dst_view().private_withdrawal,
                dst_immutables.time_locks.dst_view().private_cancellation,
            ),
        ];

        info!(order_id = %order.id, "Waiting for withdrawal windows on both chains");
        self.finality.wait(&checkpoints).await
    }

    async fn withdraw(
        &self,
        calls: &ResolverCallBuilder,
        side: EscrowSide,
        chain_id: u64,
        secret: B256,
        immutables: &Immutables,
    ) -> ExchangeResult<(Address, SubmittedTransaction)> {
        let escrow = self.factory(chain_id)?.escrow_address(side, immutables).await?;
        let chain = self.chains.get(chain_id)?;
        let action = match side {
            EscrowSide::Src => "withdraw_src",
            EscrowSide::Dst => "withdraw_dst",
        };
        let submitted = self
            .submit(&chain, action, calls.withdraw(side, escrow, secret, immutables))
            .await?;
        Ok((escrow, submitted))
    }

    /// Operator escape hatch: submit a timelock-gated `cancel` on one side.
    ///
    /// Never invoked automatically. A live order moves to FAILED; the
    /// escrow itself rejects the call while its cancellation window is closed.
    pub async fn cancel(&self, order_id: Uuid, side: EscrowSide) -> ExchangeResult<ExchangeOrder> {
        let mut order = self.load(order_id).await?;
        if order.status == ExchangeStatus::Completed {
            return Err(ExchangeError::InvalidStateTransition {
                from: order.status.to_string(),
                to: "CANCELLED".to_string(),
            });
        }

        let (chain_id, immutables) = match side {
            EscrowSide::Src => (order.src_chain_id, order.src_immutables.as_ref()),
            EscrowSide::Dst => (order.dst_chain_id, order.dst_immutables.as_ref()),
        };
        let deployed = match side {
            EscrowSide::Src => order.order_fill_tx.is_some(),
            EscrowSide::Dst => order.dst_deploy_tx.is_some(),
        };
        let immutables = match immutables {
            Some(data) if deployed => Immutables::from(data),
            _ => {
                return Err(ExchangeError::InvalidPayload(format!(
                    "order {} has no deployed {} escrow",
                    order.id, side
                )))
            }
        };

        warn!(order_id = %order.id, "Operator cancelling {} escrow", side);
        let result = async {
            let calls =
                ResolverCallBuilder::for_route(&self.registry, order.src_chain_id, order.dst_chain_id)?;
            let escrow = self.factory(chain_id)?.escrow_address(side, &immutables).await?;
            let chain = self.chains.get(chain_id)?;
            let action = match side {
                EscrowSide::Src => "cancel_src",
                EscrowSide::Dst => "cancel_dst",
            };
            self.submit(&chain, action, calls.cancel(side, escrow, &immutables)).await
        }
        .await;

        let submitted = match result {
            Ok(submitted) => submitted,
            Err(e) => {
                error!(order_id = %order.id, phase = %Phase::Cancel, "Cancel failed: {}", e);
                order.error = Some(format!("[{}] {} cancel: {}", e.class(), side, e));
                self.save(&mut order).await?;
                return Err(e);
            }
        };

        match side {
            EscrowSide::Src => order.src_cancel_tx = Some(submitted.tx_hash),
            EscrowSide::Dst => order.dst_cancel_tx = Some(submitted.tx_hash),
        }
        if !order.status.is_terminal() {
            let reason = ExchangeError::Internal(format!("{side} escrow cancelled by operator"));
            order.fail(Phase::Cancel, &reason)?;
            crate::metrics::record_order_failed(Phase::Cancel);
        }
        order.message = Some(format!("{} escrow cancelled", side));
        self.save(&mut order).await?;
        Ok(order)
    }

    /// Build, sign and run a whole swap for a maker key held by this process
    pub async fn execute_swap(
        &self,
        params: &SwapParams,
        signer: &dyn OrderSigner,
    ) -> ExchangeResult<RevealOutcome> {
        let secret = match &params.secret {
            SecretCommitment::Single(secret) => *secret,
            SecretCommitment::Multiple(_) => {
                return Err(ExchangeError::InvalidOrderPolicy(
                    "only single-secret swaps can be driven end to end".to_string(),
                ))
            }
        };
        if signer.address() != params.maker {
            return Err(ExchangeError::Signature(format!(
                "signer {} is not the maker {}",
                signer.address(),
                params.maker
            )));
        }

        let order = OrderBuilder::new(self.registry.clone(), self.policy.clone()).build(params)?;
        let lop = self.registry.contracts(params.src_chain_id)?.limit_order_protocol;
        let signature = signer.sign_typed_data(&order.typed_data(lop)).await?;

        let swap_state = SwapState {
            src_chain_id: params.src_chain_id,
            dst_chain_id: params.dst_chain_id,
            user_address: params.maker,
            src_token: params.src_token,
            dst_token: params.dst_token,
            src_amount: order.making_amount,
            dst_amount: order.taking_amount,
        };

        let filled = self
            .submit_fill(FillRequest {
                order: order.to_payload(),
                swap_state: swap_state.clone(),
                signature,
                immutables: None,
                hash_lock: Some(order.hash_lock().value()),
                order_hash: Some(order.order_hash(lop)),
                order_build: Some(order.build()),
                taker_traits: None,
                src_safety_deposit: Some(order.src_safety_deposit()),
            })
            .await?;

        self.reveal_secret(RevealRequest {
            order_id: filled.order_id,
            swap_state,
            secret,
            dst_immutables_data: filled.dst_immutables_data,
            src_immutables_data: filled.src_immutables_data,
            src_immutables_hash: Some(filled.src_immutables_hash),
            dst_immutables_hash: Some(filled.dst_immutables_hash),
        })
        .await
    }

    async fn load(&self, id: Uuid) -> ExchangeResult<ExchangeOrder> {
        let store = self.store.clone();
        self.with_store_timeout("get", async move { store.get(id).await })
            .await?
            .ok_or_else(|| ExchangeError::OrderNotFound { id: id.to_string() })
    }

    pub async fn get_order(&self, id: Uuid) -> ExchangeResult<ExchangeOrder> {
        self.load(id).await
    }

    /// Remove a finished order on the user's request; live orders are kept
    pub async fn delete_order(&self, id: Uuid) -> ExchangeResult<()> {
        let order = self.load(id).await?;
        if !order.status.is_terminal() {
            return Err(ExchangeError::InvalidStateTransition {
                from: order.status.to_string(),
                to: "DELETED".to_string(),
            });
        }

        let store = self.store.clone();
        let deleted = self
            .with_store_timeout("delete", async move { store.delete(id).await })
            .await?;
        if !deleted {
            return Err(ExchangeError::OrderNotFound { id: id.to_string() });
        }
        info!(order_id = %id, "Exchange order deleted");
        Ok(())
    }

    /// Store and every chain reachable
    pub async fn ready(&self) -> ExchangeResult<Vec<(u64, bool)>> {
        let store = self.store.clone();
        self.with_store_timeout("health_check", async move { store.health_check().await })
            .await?;
        Ok(self.chains.health_check().await)
    }
}

fn stored_immutables(order: &ExchangeOrder) -> ExchangeResult<(Immutables, Immutables)> {
    match (&order.src_immutables, &order.dst_immutables) {
        (Some(src), Some(dst)) => Ok((Immutables::from(src), Immutables::from(dst))),
        _ => Err(ExchangeError::Internal(format!(
            "order {} is missing escrow immutables",
            order.id
        ))),
    }
}

/// The stored immutables are authoritative; the client copy must agree
fn check_immutables(
    stored: &Immutables,
    claimed: &ImmutablesData,
    claimed_hash: Option<B256>,
) -> ExchangeResult<()> {
    let computed = stored.hash();
    let claimed_hash = claimed_hash.unwrap_or_else(|| Immutables::from(claimed).hash());
    if claimed_hash != computed || Immutables::from(claimed).hash() != computed {
        return Err(ExchangeError::ImmutablesHashMismatch {
            expected: claimed_hash.to_string(),
            computed: computed.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cross_chain::order::tests::{registry, DST_CHAIN, SRC_CHAIN};
    use crate::cross_chain::{HashLock, LocalOrderSigner};
    use crate::testing::{fill_request, harness, harness_with, params, reveal_request, signer};

    use alloy_primitives::U256;
    use ethers::signers::LocalWallet;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_swap_runs_to_completion() {
        let h = harness();
        let signer = signer();

        let outcome = h
            .orchestrator
            .execute_swap(&params(&signer), &signer)
            .await
            .unwrap();
        assert_eq!(outcome.status, ExchangeStatus::Completed);
        assert_eq!(outcome.transactions.len(), 4);

        assert_eq!(h.src.sent(), vec!["deploySrc", "withdraw"]);
        assert_eq!(h.dst.sent(), vec!["deployDst", "withdraw"]);
        assert!(h.src.is_withdrawn(outcome.src_escrow_address));
        assert!(h.dst.is_withdrawn(outcome.dst_escrow_address));

        let order = h.orchestrator.get_order(outcome.order_id).await.unwrap();
        assert_eq!(order.status, ExchangeStatus::Completed);
        assert_eq!(order.secret, Some(B256::ZERO));
        assert!(order.completed_at.is_some());
        assert!(order.src_withdraw_tx.is_some() && order.dst_withdraw_tx.is_some());
        assert_eq!(order.version, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_derives_destination_immutables() {
        let h = harness();
        let signer = signer();
        let (request, order) = fill_request(&signer).await;

        let fill = h.orchestrator.submit_fill(request).await.unwrap();
        assert_eq!(fill.status, ExchangeStatus::PendingSecret);

        let hundred = U256::from(100u64) * U256::from(10u64).pow(U256::from(18u64));
        let src = &fill.src_escrow_event.immutables;
        assert_eq!(src.amount, hundred);
        assert_eq!(src.hashlock, HashLock::hash_secret(&B256::ZERO));
        assert_eq!(src.taker, Address::repeat_byte(0x31));

        let dst = &fill.dst_immutables_data;
        assert_eq!(dst.taker, Address::repeat_byte(0x32));
        assert_eq!(dst.order_hash, src.order_hash);
        assert_eq!(dst.hashlock, src.hashlock);
        assert_eq!(dst.amount, order.taking_amount);
        assert_eq!(dst.token, order.taker_asset);
        assert_eq!(Immutables::from(dst).time_locks.deployed_at as u64, fill.dst_deployed_at);
        assert_eq!(Immutables::from(dst).hash(), fill.dst_immutables_hash);

        let stored = h.store.get(fill.order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExchangeStatus::PendingSecret);
        assert_eq!(stored.dst_immutables.as_ref(), Some(dst));
        assert!(stored.secret.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_deployment_log_is_retried() {
        let h = harness();
        let (request, _) = fill_request(&signer()).await;
        h.src.hide_event_queries(2);

        let fill = h.orchestrator.submit_fill(request).await.unwrap();
        assert_eq!(fill.status, ExchangeStatus::PendingSecret);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_deployment_log_fails_order() {
        let h = harness();
        let (request, _) = fill_request(&signer()).await;
        h.src.hide_event_queries(u32::MAX);

        let err = h.orchestrator.submit_fill(request).await.unwrap_err();
        assert!(matches!(err, ExchangeError::EventNotFound { .. }));

        let stored = h
            .store
            .query(&Default::default())
            .await
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(stored.status, ExchangeStatus::Failed);
        assert_eq!(stored.failed_phase, Some(Phase::SrcEventQuery));
        assert!(stored.order_fill_tx.is_some());
        assert!(h.dst.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_fill_is_recorded() {
        let h = harness();
        let (request, _) = fill_request(&signer()).await;
        h.src.revert_next("deploySrc");

        let err = h.orchestrator.submit_fill(request).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Reverted { .. }));

        let stored = h.store.query(&Default::default()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].failed_phase, Some(Phase::Fill));
        assert!(stored[0].order_fill_tx.is_none());
        assert!(stored[0].error.as_deref().unwrap().starts_with("[chain_call]"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dst_failure_leaves_cancel_path() {
        let h = harness();
        let (request, _) = fill_request(&signer()).await;
        h.dst.revert_next("deployDst");

        let err = h.orchestrator.submit_fill(request).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Reverted { .. }));

        let order = h.store.query(&Default::default()).await.unwrap().pop().unwrap();
        assert_eq!(order.status, ExchangeStatus::Failed);
        assert_eq!(order.failed_phase, Some(Phase::DstDeploy));
        assert!(order.src_immutables.is_some());
        // never cancelled automatically
        assert_eq!(h.src.sent(), vec!["deploySrc"]);

        assert!(h.orchestrator.cancel(order.id, EscrowSide::Dst).await.is_err());

        // source cancellation window not open yet
        let early = h.orchestrator.cancel(order.id, EscrowSide::Src).await;
        assert!(matches!(early, Err(ExchangeError::Reverted { .. })));

        tokio::time::sleep(Duration::from_secs(200)).await;
        let cancelled = h.orchestrator.cancel(order.id, EscrowSide::Src).await.unwrap();
        assert!(cancelled.src_cancel_tx.is_some());
        assert_eq!(cancelled.status, ExchangeStatus::Failed);
        assert_eq!(h.src.sent(), vec!["deploySrc", "cancel"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_secret_is_rejected_without_state_change() {
        let h = harness();
        let (request, _) = fill_request(&signer()).await;
        let state = request.swap_state.clone();
        let fill = h.orchestrator.submit_fill(request).await.unwrap();

        let err = h
            .orchestrator
            .reveal_secret(reveal_request(&fill, &state, B256::repeat_byte(0x01)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::HashLockMismatch { .. }));
        assert_eq!(
            h.orchestrator.get_order(fill.order_id).await.unwrap().status,
            ExchangeStatus::PendingSecret
        );

        let done = h
            .orchestrator
            .reveal_secret(reveal_request(&fill, &state, B256::ZERO))
            .await
            .unwrap();
        assert_eq!(done.status, ExchangeStatus::Completed);

        let again = h
            .orchestrator
            .reveal_secret(reveal_request(&fill, &state, B256::ZERO))
            .await;
        assert!(matches!(again, Err(ExchangeError::InvalidStateTransition { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tampered_immutables_are_rejected() {
        let h = harness();
        let (request, _) = fill_request(&signer()).await;
        let state = request.swap_state.clone();
        let fill = h.orchestrator.submit_fill(request).await.unwrap();

        let mut reveal = reveal_request(&fill, &state, B256::ZERO);
        reveal.dst_immutables_data.taker = Address::repeat_byte(0x66);
        reveal.dst_immutables_hash = None;

        assert!(matches!(
            h.orchestrator.reveal_secret(reveal).await,
            Err(ExchangeError::ImmutablesHashMismatch { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdrawals_wait_for_the_window() {
        let h = harness();
        let (request, _) = fill_request(&signer()).await;
        let state = request.swap_state.clone();
        let fill = h.orchestrator.submit_fill(request).await.unwrap();

        let started = tokio::time::Instant::now();
        h.orchestrator
            .reveal_secret(reveal_request(&fill, &state, B256::ZERO))
            .await
            .unwrap();

        // dst private withdrawal opens 10s after its deployment
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_signature_is_rejected_before_any_record() {
        let h = harness();
        let (mut request, _) = fill_request(&signer()).await;
        let other = LocalOrderSigner::new(LocalWallet::new(&mut rand::thread_rng()));
        let order = CrossChainOrder::from_payload(&request.order, SRC_CHAIN).unwrap();
        let lop = registry().contracts(SRC_CHAIN).unwrap().limit_order_protocol;
        request.signature = other.sign_typed_data(&order.typed_data(lop)).await.unwrap();

        assert!(matches!(
            h.orchestrator.submit_fill(request).await,
            Err(ExchangeError::Signature(_))
        ));
        assert_eq!(h.store.len(), 0);
        assert!(h.src.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_claimed_order_hash_must_match() {
        let h = harness();
        let (mut request, _) = fill_request(&signer()).await;
        request.order_hash = Some(B256::repeat_byte(0x99));

        assert!(matches!(
            h.orchestrator.submit_fill(request).await,
            Err(ExchangeError::OrderHashMismatch { .. })
        ));
    }

    async fn only_order(h: &crate::testing::Harness) -> ExchangeOrder {
        let mut orders = h.store.query(&Default::default()).await.unwrap();
        assert_eq!(orders.len(), 1);
        orders.pop().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fill_receipt_skips_late_destination_deploy() {
        let h = harness();
        let (request, _) = fill_request(&signer()).await;
        // twelve 12s blocks: the destination could no longer cancel before the source
        h.src.delay_receipts("deploySrc", Duration::from_secs(144));

        let err = h.orchestrator.submit_fill(request).await.unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::WindowClosed {
                chain_id: DST_CHAIN,
                ..
            }
        ));

        let order = only_order(&h).await;
        assert_eq!(order.status, ExchangeStatus::Failed);
        assert_eq!(order.failed_phase, Some(Phase::DstDeploy));
        assert!(order.error.as_deref().unwrap().starts_with("[timelock]"));
        assert_eq!(h.src.sent(), vec!["deploySrc"]);
        assert!(h.dst.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_block_fill_receipt_fits_the_window() {
        let h = harness();
        let (request, _) = fill_request(&signer()).await;
        h.src.delay_receipts("deploySrc", Duration::from_secs(12));

        let fill = h.orchestrator.submit_fill(request).await.unwrap();
        assert_eq!(fill.status, ExchangeStatus::PendingSecret);
        assert_eq!(h.dst.sent(), vec!["deployDst"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secret_is_not_revealed_after_source_cancellation_opens() {
        let h = harness_with(FinalityGate::new(
            Duration::from_secs(200),
            Duration::from_secs(1),
            Duration::from_secs(900),
        ));
        let (request, _) = fill_request(&signer()).await;
        let state = request.swap_state.clone();
        let fill = h.orchestrator.submit_fill(request).await.unwrap();

        let err = h
            .orchestrator
            .reveal_secret(reveal_request(&fill, &state, B256::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::WindowClosed { .. }));

        let order = h.orchestrator.get_order(fill.order_id).await.unwrap();
        assert_eq!(order.status, ExchangeStatus::Failed);
        assert_eq!(order.failed_phase, Some(Phase::RevealWait));
        // no withdrawal carried the secret on-chain
        assert_eq!(h.src.sent(), vec!["deploySrc"]);
        assert_eq!(h.dst.sent(), vec!["deployDst"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_fill_is_not_resubmitted() {
        let h = harness();
        let (request, _) = fill_request(&signer()).await;
        h.src.time_out_next("deploySrc");

        let err = h.orchestrator.submit_fill(request).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Timeout { .. }));

        let order = only_order(&h).await;
        assert_eq!(order.status, ExchangeStatus::Failed);
        assert_eq!(order.failed_phase, Some(Phase::Fill));
        assert_eq!(h.src.sent(), vec!["deploySrc"]);
        assert!(h.dst.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_withdrawal_is_not_resubmitted() {
        let h = harness();
        let (request, _) = fill_request(&signer()).await;
        let state = request.swap_state.clone();
        let fill = h.orchestrator.submit_fill(request).await.unwrap();
        h.dst.time_out_next("withdraw");

        let err = h
            .orchestrator
            .reveal_secret(reveal_request(&fill, &state, B256::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Timeout { .. }));

        let order = h.orchestrator.get_order(fill.order_id).await.unwrap();
        assert_eq!(order.status, ExchangeStatus::Failed);
        assert_eq!(order.failed_phase, Some(Phase::DstWithdraw));
        assert_eq!(h.dst.sent(), vec!["deployDst", "withdraw"]);
        assert_eq!(h.src.sent(), vec!["deploySrc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_escrow_address_is_confirmed_by_factory() {
        let h = harness();
        let (request, _) = fill_request(&signer()).await;
        h.src.misreport_escrow_addresses();

        let err = h.orchestrator.submit_fill(request).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Encoding(_)));

        let order = only_order(&h).await;
        assert_eq!(order.failed_phase, Some(Phase::SrcEventQuery));
        assert!(h.dst.sent().is_empty());
    }
}

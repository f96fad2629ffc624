//! Persisted exchange order record and its status machine

use crate::config::ChainRegistry;
use crate::cross_chain::ImmutablesData;
use crate::error::{ExchangeError, ExchangeResult};
use crate::wire::u256_dec;

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of an exchange order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeStatus {
    Created,
    PendingSecret,
    PendingWithdraw,
    Completed,
    Failed,
}

impl ExchangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeStatus::Created => "CREATED",
            ExchangeStatus::PendingSecret => "PENDING_SECRET",
            ExchangeStatus::PendingWithdraw => "PENDING_WITHDRAW",
            ExchangeStatus::Completed => "COMPLETED",
            ExchangeStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeStatus::Completed | ExchangeStatus::Failed)
    }

    /// Strictly forward, one step at a time; FAILED from any non-terminal status
    pub fn can_transition_to(&self, next: ExchangeStatus) -> bool {
        use ExchangeStatus::*;
        match (self, next) {
            (Created, PendingSecret) | (PendingSecret, PendingWithdraw) | (PendingWithdraw, Completed) => {
                true
            }
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeStatus {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(ExchangeStatus::Created),
            "PENDING_SECRET" => Ok(ExchangeStatus::PendingSecret),
            "PENDING_WITHDRAW" => Ok(ExchangeStatus::PendingWithdraw),
            "COMPLETED" => Ok(ExchangeStatus::Completed),
            "FAILED" => Ok(ExchangeStatus::Failed),
            other => Err(ExchangeError::Internal(format!("unknown status {other:?}"))),
        }
    }
}

/// Step of the exchange pipeline, recorded when an order fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Validate,
    Fill,
    SrcEventQuery,
    DstDeploy,
    RevealWait,
    DstWithdraw,
    SrcWithdraw,
    Cancel,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Validate => "validate",
            Phase::Fill => "fill",
            Phase::SrcEventQuery => "src_event_query",
            Phase::DstDeploy => "dst_deploy",
            Phase::RevealWait => "reveal_wait",
            Phase::DstWithdraw => "dst_withdraw",
            Phase::SrcWithdraw => "src_withdraw",
            Phase::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Phase::Validate,
            Phase::Fill,
            Phase::SrcEventQuery,
            Phase::DstDeploy,
            Phase::RevealWait,
            Phase::DstWithdraw,
            Phase::SrcWithdraw,
            Phase::Cancel,
        ]
        .into_iter()
        .find(|p| p.as_str() == s)
        .ok_or_else(|| ExchangeError::Internal(format!("unknown phase {s:?}")))
    }
}

/// Explorer-linked transaction for client display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLink {
    pub tx_hash: B256,
    pub tx_link: Option<String>,
    pub description: String,
}

/// End-to-end progress of one swap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeOrder {
    pub id: Uuid,
    pub status: ExchangeStatus,
    pub order_hash: B256,
    pub user_address: Address,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub src_token: Address,
    pub dst_token: Address,
    #[serde(with = "u256_dec")]
    pub src_amount: U256,
    #[serde(with = "u256_dec")]
    pub dst_amount: U256,

    pub order_fill_tx: Option<B256>,
    pub dst_deploy_tx: Option<B256>,
    pub dst_withdraw_tx: Option<B256>,
    pub src_withdraw_tx: Option<B256>,
    pub src_cancel_tx: Option<B256>,
    pub dst_cancel_tx: Option<B256>,

    pub src_deploy_block: Option<u64>,
    pub dst_deploy_block: Option<u64>,
    pub src_deployed_at: Option<u64>,
    pub dst_deployed_at: Option<u64>,
    pub src_immutables: Option<ImmutablesData>,
    pub dst_immutables: Option<ImmutablesData>,

    /// Populated only once revealed
    pub secret: Option<B256>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub failed_phase: Option<Phase>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    /// Optimistic-lock counter, bumped by every stored update
    pub version: i64,
    pub metadata: serde_json::Value,
}

impl ExchangeOrder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_hash: B256,
        user_address: Address,
        src_chain_id: u64,
        dst_chain_id: u64,
        src_token: Address,
        dst_token: Address,
        src_amount: U256,
        dst_amount: U256,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: ExchangeStatus::Created,
            order_hash,
            user_address,
            src_chain_id,
            dst_chain_id,
            src_token,
            dst_token,
            src_amount,
            dst_amount,
            order_fill_tx: None,
            dst_deploy_tx: None,
            dst_withdraw_tx: None,
            src_withdraw_tx: None,
            src_cancel_tx: None,
            dst_cancel_tx: None,
            src_deploy_block: None,
            dst_deploy_block: None,
            src_deployed_at: None,
            dst_deployed_at: None,
            src_immutables: None,
            dst_immutables: None,
            secret: None,
            message: None,
            error: None,
            failed_phase: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
            version: 0,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    /// Move to `next`, rejecting skips, regressions and exits from terminal states
    pub fn transition(&mut self, next: ExchangeStatus) -> ExchangeResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ExchangeError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        match next {
            ExchangeStatus::Completed => self.completed_at = Some(now),
            ExchangeStatus::Failed => self.failed_at = Some(now),
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    /// Record the failure and the phase it happened in
    pub fn fail(&mut self, phase: Phase, error: &ExchangeError) -> ExchangeResult<()> {
        self.transition(ExchangeStatus::Failed)?;
        self.failed_phase = Some(phase);
        self.error = Some(format!("[{}] {}", error.class(), error));
        self.message = Some(format!("Exchange failed during {phase}"));
        Ok(())
    }

    /// Every submitted transaction with its explorer link, in submission order
    pub fn transactions(&self, registry: &ChainRegistry) -> Vec<TransactionLink> {
        let steps = [
            (self.order_fill_tx, self.src_chain_id, "Order filled, source escrow deployed"),
            (self.dst_deploy_tx, self.dst_chain_id, "Destination escrow deployed"),
            (self.dst_withdraw_tx, self.dst_chain_id, "Destination escrow withdrawn"),
            (self.src_withdraw_tx, self.src_chain_id, "Source escrow withdrawn"),
            (self.dst_cancel_tx, self.dst_chain_id, "Destination escrow cancelled"),
            (self.src_cancel_tx, self.src_chain_id, "Source escrow cancelled"),
        ];

        steps
            .into_iter()
            .filter_map(|(tx, chain_id, description)| {
                tx.map(|tx_hash| TransactionLink {
                    tx_hash,
                    tx_link: registry.tx_link(chain_id, &tx_hash),
                    description: description.to_string(),
                })
            })
            .collect()
    }
}

/// Filter for listing stored orders
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderQuery {
    pub status: Option<ExchangeStatus>,
    pub user_address: Option<Address>,
    /// Matches either side of the swap
    pub chain_id: Option<u64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl OrderQuery {
    pub fn matches(&self, order: &ExchangeOrder) -> bool {
        self.status.map_or(true, |s| order.status == s)
            && self.user_address.map_or(true, |a| order.user_address == a)
            && self
                .chain_id
                .map_or(true, |c| order.src_chain_id == c || order.dst_chain_id == c)
            && self.created_after.map_or(true, |t| order.created_at >= t)
            && self.created_before.map_or(true, |t| order.created_at < t)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

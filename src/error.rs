//! Error types for the fusion exchange

use thiserror::Error;

/// Main error type for the exchange
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No contract addresses registered for chain {chain_id}")]
    UnknownChainConfig { chain_id: u64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Order policy violation: {0}")]
    InvalidOrderPolicy(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Secret does not match hash-lock {expected}")]
    HashLockMismatch { expected: String },

    #[error("Immutables hash mismatch: expected {expected}, computed {computed}")]
    ImmutablesHashMismatch { expected: String, computed: String },

    #[error("Order hash mismatch: expected {expected}, computed {computed}")]
    OrderHashMismatch { expected: String, computed: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain call error on chain {chain_id}: {message}")]
    ChainCall { chain_id: u64, message: String },

    #[error("Transaction {tx_hash} reverted on chain {chain_id}")]
    Reverted { chain_id: u64, tx_hash: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Timelock deadline {deadline} passed on chain {chain_id} (chain time {now})")]
    WindowClosed { chain_id: u64, deadline: u64, now: u64 },

    #[error("Escrow creation event not found on chain {chain_id} in block {block_hash}")]
    EventNotFound { chain_id: u64, block_hash: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Exchange order {id} not found")]
    OrderNotFound { id: String },

    #[error("Exchange order {id} was modified concurrently")]
    ConcurrentUpdate { id: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExchangeError {
    /// Check if error is retryable.
    ///
    /// Only consulted for idempotent reads; fund-moving submissions are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::ChainCall { .. }
                | ExchangeError::Timeout { .. }
                | ExchangeError::EventNotFound { .. }
        )
    }

    /// Stable short class name, used in persisted messages and metric labels
    pub fn class(&self) -> &'static str {
        match self {
            ExchangeError::Config(_) | ExchangeError::UnknownChainConfig { .. } => "config",
            ExchangeError::InvalidAmount(_)
            | ExchangeError::InvalidOrderPolicy(_)
            | ExchangeError::InvalidPayload(_)
            | ExchangeError::HashLockMismatch { .. }
            | ExchangeError::ImmutablesHashMismatch { .. }
            | ExchangeError::OrderHashMismatch { .. } => "validation",
            ExchangeError::Encoding(_) | ExchangeError::Signature(_) => "encoding",
            ExchangeError::ChainCall { .. }
            | ExchangeError::Reverted { .. }
            | ExchangeError::Timeout { .. } => "chain_call",
            ExchangeError::EventNotFound { .. } => "event_not_found",
            ExchangeError::InvalidStateTransition { .. }
            | ExchangeError::OrderNotFound { .. }
            | ExchangeError::ConcurrentUpdate { .. } => "lifecycle",
            ExchangeError::WindowClosed { .. } => "timelock",
            ExchangeError::Database(_) => "database",
            ExchangeError::Wallet(_) => "wallet",
            ExchangeError::Internal(_) => "internal",
        }
    }
}

/// Result type for exchange operations
pub type ExchangeResult<T> = Result<T, ExchangeError>;

//! Exchange order persistence
//!
//! Handles:
//! - The exchange order record and its status machine
//! - Optimistic-versioned updates
//! - PostgreSQL and in-memory backends behind one trait

mod manager;
mod memory;
pub mod record;

pub use manager::StateManager;
pub use memory::InMemoryOrderStore;
pub use record::{ExchangeOrder, ExchangeStatus, OrderQuery, Phase, TransactionLink};

use crate::error::ExchangeResult;

use async_trait::async_trait;
use uuid::Uuid;

/// Storage for exchange orders.
///
/// `update` succeeds only when the stored version equals `order.version`;
/// on success the order carries the bumped version and refreshed `updated_at`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create(&self, order: &ExchangeOrder) -> ExchangeResult<()>;

    async fn update(&self, order: &mut ExchangeOrder) -> ExchangeResult<()>;

    async fn get(&self, id: Uuid) -> ExchangeResult<Option<ExchangeOrder>>;

    async fn query(&self, query: &OrderQuery) -> ExchangeResult<Vec<ExchangeOrder>>;

    async fn delete(&self, id: Uuid) -> ExchangeResult<bool>;

    async fn health_check(&self) -> ExchangeResult<()>;

    /// Backend name for logs and metrics
    fn backend(&self) -> &'static str;
}

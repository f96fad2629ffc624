//! In-memory order store for local runs and tests

use super::{ExchangeOrder, OrderQuery, OrderStore};
use crate::error::{ExchangeError, ExchangeResult};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<Uuid, ExchangeOrder>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: &ExchangeOrder) -> ExchangeResult<()> {
        match self.orders.entry(order.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ExchangeError::Internal(format!(
                "exchange order {} already exists",
                order.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(order.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, order: &mut ExchangeOrder) -> ExchangeResult<()> {
        let mut stored = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| ExchangeError::OrderNotFound {
                id: order.id.to_string(),
            })?;

        if stored.version != order.version {
            return Err(ExchangeError::ConcurrentUpdate {
                id: order.id.to_string(),
            });
        }

        order.version += 1;
        order.updated_at = Utc::now();
        *stored = order.clone();
        Ok(())
    }

    async fn get(&self, id: Uuid) -> ExchangeResult<Option<ExchangeOrder>> {
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn query(&self, query: &OrderQuery) -> ExchangeResult<Vec<ExchangeOrder>> {
        let mut matched: Vec<ExchangeOrder> = self
            .orders
            .iter()
            .filter(|o| query.matches(o.value()))
            .map(|o| o.value().clone())
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .collect())
    }

    async fn delete(&self, id: Uuid) -> ExchangeResult<bool> {
        Ok(self.orders.remove(&id).is_some())
    }

    async fn health_check(&self) -> ExchangeResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

//! PostgreSQL state manager

use super::{ExchangeOrder, OrderQuery, OrderStore};
use crate::config::DatabaseConfig;
use crate::error::{ExchangeError, ExchangeResult};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info};
use uuid::Uuid;

/// State manager for PostgreSQL persistence.
///
/// Filterable fields live in their own columns; the full record is kept as
/// JSONB next to them so new fields need no migration.
pub struct StateManager {
    pool: PgPool,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig) -> ExchangeResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> ExchangeResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exchange_orders (
                id UUID PRIMARY KEY,
                status VARCHAR(20) NOT NULL,
                order_hash BYTEA NOT NULL,
                user_address BYTEA NOT NULL,
                src_chain_id BIGINT NOT NULL,
                dst_chain_id BIGINT NOT NULL,
                version BIGINT NOT NULL DEFAULT 0,
                record JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_exchange_orders_status
            ON exchange_orders(status, created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_exchange_orders_user
            ON exchange_orders(user_address)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_exchange_orders_order_hash
            ON exchange_orders(order_hash)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations completed");
        Ok(())
    }

    fn decode_row(row: &PgRow) -> ExchangeResult<ExchangeOrder> {
        let record: serde_json::Value = row.try_get("record")?;
        let mut order = decode_record(record)?;
        // the column is authoritative; the JSON copy is written in the same statement
        order.version = row.try_get("version")?;
        Ok(order)
    }
}

fn encode_record(order: &ExchangeOrder) -> ExchangeResult<serde_json::Value> {
    serde_json::to_value(order)
        .map_err(|e| ExchangeError::Internal(format!("failed to encode order {}: {e}", order.id)))
}

fn decode_record(record: serde_json::Value) -> ExchangeResult<ExchangeOrder> {
    serde_json::from_value(record)
        .map_err(|e| ExchangeError::Internal(format!("corrupt exchange order record: {e}")))
}

#[async_trait]
impl OrderStore for StateManager {
    async fn create(&self, order: &ExchangeOrder) -> ExchangeResult<()> {
        sqlx::query(
            r#"
            INSERT INTO exchange_orders
                (id, status, order_hash, user_address, src_chain_id, dst_chain_id,
                 version, record, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.order_hash.as_slice())
        .bind(order.user_address.as_slice())
        .bind(order.src_chain_id as i64)
        .bind(order.dst_chain_id as i64)
        .bind(order.version)
        .bind(encode_record(order)?)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Stored exchange order {}", order.id);
        Ok(())
    }

    async fn update(&self, order: &mut ExchangeOrder) -> ExchangeResult<()> {
        let mut next = order.clone();
        next.version += 1;
        next.updated_at = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE exchange_orders
            SET status = $3, version = $4, record = $5, updated_at = $6
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(order.id)
        .bind(order.version)
        .bind(next.status.as_str())
        .bind(next.version)
        .bind(encode_record(&next)?)
        .bind(next.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM exchange_orders WHERE id = $1")
                .bind(order.id)
                .fetch_optional(&self.pool)
                .await?
                .is_some();

            let id = order.id.to_string();
            return Err(if exists {
                ExchangeError::ConcurrentUpdate { id }
            } else {
                ExchangeError::OrderNotFound { id }
            });
        }

        debug!(
            "Updated exchange order {} to {} (version {})",
            next.id, next.status, next.version
        );
        *order = next;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> ExchangeResult<Option<ExchangeOrder>> {
        let row = sqlx::query("SELECT version, record FROM exchange_orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::decode_row).transpose()
    }

    async fn query(&self, query: &OrderQuery) -> ExchangeResult<Vec<ExchangeOrder>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT version, record FROM exchange_orders WHERE TRUE");

        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(user) = query.user_address {
            builder.push(" AND user_address = ").push_bind(user.to_vec());
        }
        if let Some(chain_id) = query.chain_id {
            builder
                .push(" AND (src_chain_id = ")
                .push_bind(chain_id as i64)
                .push(" OR dst_chain_id = ")
                .push_bind(chain_id as i64)
                .push(")");
        }
        if let Some(after) = query.created_after {
            builder.push(" AND created_at >= ").push_bind(after);
        }
        if let Some(before) = query.created_before {
            builder.push(" AND created_at < ").push_bind(before);
        }

        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(query.limit())
            .push(" OFFSET ")
            .push_bind(query.offset());

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::decode_row).collect()
    }

    async fn delete(&self, id: Uuid) -> ExchangeResult<bool> {
        let result = sqlx::query("DELETE FROM exchange_orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> ExchangeResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

//! PostgreSQL state store

use crate::config::DatabaseConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::events::OrderId;
use crate::store::{StateStore, SwapStats};
use crate::swap::machine::SwapState;
use crate::swap::order::{LegView, SwapOrder};
use crate::vault::Secret;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::U256;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

/// State store backed by PostgreSQL
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub async fn new(config: &DatabaseConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await
            .map_err(RelayerError::Database)?;

        Ok(Self { pool })
    }

    fn row_to_order(row: &PgRow) -> RelayerResult<SwapOrder> {
        let order_id = bytea_to_array(row.get("order_id"))?;
        let hashlock = bytea_to_array(row.get("hashlock"))?;

        let secret: Option<Vec<u8>> = row.get("secret");
        let secret = match secret {
            Some(raw) => Some(Secret::new(bytea_to_array(raw)?)),
            None => None,
        };

        let state_str: String = row.get("state");
        let state = SwapState::parse(&state_str)
            .ok_or_else(|| RelayerError::Internal(format!("unknown swap state: {}", state_str)))?;

        let maker_amount: String = row.get("maker_amount");
        let taker_amount: String = row.get("taker_amount");

        Ok(SwapOrder {
            order_id,
            source_chain: row.get::<i64, _>("source_chain") as u64,
            dest_chain: row.get::<i64, _>("dest_chain") as u64,
            hashlock,
            secret,
            source_escrow: row.get("source_escrow"),
            dest_escrow: row.get("dest_escrow"),
            maker_amount: U256::from_dec_str(&maker_amount)
                .map_err(|e| RelayerError::Internal(format!("bad maker amount: {}", e)))?,
            taker_amount: U256::from_dec_str(&taker_amount)
                .map_err(|e| RelayerError::Internal(format!("bad taker amount: {}", e)))?,
            timeout_source: row.get::<i64, _>("timeout_source") as u64,
            timeout_dest: row.get::<i64, _>("timeout_dest") as u64,
            state,
            source_leg: LegView {
                funded_at: row.get::<Option<i64>, _>("src_funded_at").map(|v| v as u64),
                claimed_at: row.get::<Option<i64>, _>("src_claimed_at").map(|v| v as u64),
                refunded_at: row
                    .get::<Option<i64>, _>("src_refunded_at")
                    .map(|v| v as u64),
            },
            dest_leg: LegView {
                funded_at: row.get::<Option<i64>, _>("dst_funded_at").map(|v| v as u64),
                claimed_at: row.get::<Option<i64>, _>("dst_claimed_at").map(|v| v as u64),
                refunded_at: row
                    .get::<Option<i64>, _>("dst_refunded_at")
                    .map(|v| v as u64),
            },
            needs_attention: row.get("needs_attention"),
            last_error: row.get("last_error"),
            retry_count: row.get::<i32, _>("retry_count") as u32,
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        })
    }
}

fn bytea_to_array(raw: Vec<u8>) -> RelayerResult<[u8; 32]> {
    if raw.len() != 32 {
        return Err(RelayerError::Internal(format!(
            "expected 32-byte value, got {}",
            raw.len()
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&raw);
    Ok(out)
}

const ORDER_COLUMNS: &str = "order_id, source_chain, dest_chain, hashlock, secret, \
     source_escrow, dest_escrow, maker_amount, taker_amount, \
     timeout_source, timeout_dest, state, \
     src_funded_at, src_claimed_at, src_refunded_at, \
     dst_funded_at, dst_claimed_at, dst_refunded_at, \
     needs_attention, last_error, retry_count, created_at, updated_at";

#[async_trait]
impl StateStore for PgStateStore {
    async fn init(&self) -> RelayerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swap_orders (
                order_id BYTEA PRIMARY KEY,
                source_chain BIGINT NOT NULL,
                dest_chain BIGINT NOT NULL,
                hashlock BYTEA NOT NULL,
                secret BYTEA,
                source_escrow VARCHAR(128) NOT NULL,
                dest_escrow VARCHAR(128) NOT NULL,
                maker_amount VARCHAR(80) NOT NULL,
                taker_amount VARCHAR(80) NOT NULL,
                timeout_source BIGINT NOT NULL,
                timeout_dest BIGINT NOT NULL,
                state VARCHAR(24) NOT NULL,
                src_funded_at BIGINT,
                src_claimed_at BIGINT,
                src_refunded_at BIGINT,
                dst_funded_at BIGINT,
                dst_claimed_at BIGINT,
                dst_refunded_at BIGINT,
                needs_attention BOOLEAN NOT NULL DEFAULT FALSE,
                last_error TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                archived_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swap_orders_state
            ON swap_orders (state) WHERE archived_at IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chain_cursors (
                chain_id BIGINT PRIMARY KEY,
                last_scanned_block BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vault_secrets (
                order_id BYTEA PRIMARY KEY,
                secret BYTEA NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(RelayerError::Database)?;
        Ok(())
    }

    async fn upsert_order(&self, order: &SwapOrder) -> RelayerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO swap_orders (
                order_id, source_chain, dest_chain, hashlock, secret,
                source_escrow, dest_escrow, maker_amount, taker_amount,
                timeout_source, timeout_dest, state,
                src_funded_at, src_claimed_at, src_refunded_at,
                dst_funded_at, dst_claimed_at, dst_refunded_at,
                needs_attention, last_error, retry_count, created_at, updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23)
            ON CONFLICT (order_id) DO UPDATE SET
                secret = $5,
                state = $12,
                src_funded_at = $13, src_claimed_at = $14, src_refunded_at = $15,
                dst_funded_at = $16, dst_claimed_at = $17, dst_refunded_at = $18,
                needs_attention = $19, last_error = $20, retry_count = $21,
                updated_at = $23
            "#,
        )
        .bind(&order.order_id[..])
        .bind(order.source_chain as i64)
        .bind(order.dest_chain as i64)
        .bind(&order.hashlock[..])
        .bind(order.secret.as_ref().map(|s| s.as_bytes().to_vec()))
        .bind(&order.source_escrow)
        .bind(&order.dest_escrow)
        .bind(order.maker_amount.to_string())
        .bind(order.taker_amount.to_string())
        .bind(order.timeout_source as i64)
        .bind(order.timeout_dest as i64)
        .bind(order.state.as_str())
        .bind(order.source_leg.funded_at.map(|v| v as i64))
        .bind(order.source_leg.claimed_at.map(|v| v as i64))
        .bind(order.source_leg.refunded_at.map(|v| v as i64))
        .bind(order.dest_leg.funded_at.map(|v| v as i64))
        .bind(order.dest_leg.claimed_at.map(|v| v as i64))
        .bind(order.dest_leg.refunded_at.map(|v| v as i64))
        .bind(order.needs_attention)
        .bind(&order.last_error)
        .bind(order.retry_count as i32)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Persisted order {} in state {}", order.id_hex(), order.state);
        Ok(())
    }

    async fn get_order(&self, order_id: &OrderId) -> RelayerResult<Option<SwapOrder>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM swap_orders WHERE order_id = $1 AND archived_at IS NULL",
            ORDER_COLUMNS
        ))
        .bind(&order_id[..])
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_order(&r)).transpose()
    }

    async fn list_orders(&self, state: Option<SwapState>) -> RelayerResult<Vec<SwapOrder>> {
        let rows = match state {
            Some(state) => {
                sqlx::query(&format!(
                    "SELECT {} FROM swap_orders WHERE archived_at IS NULL AND state = $1 \
                     ORDER BY created_at",
                    ORDER_COLUMNS
                ))
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM swap_orders WHERE archived_at IS NULL ORDER BY created_at",
                    ORDER_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::row_to_order).collect()
    }

    async fn active_orders(&self) -> RelayerResult<Vec<SwapOrder>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM swap_orders \
             WHERE archived_at IS NULL \
               AND state NOT IN ('completed', 'refunded_both', 'expired_unfunded') \
             ORDER BY created_at",
            ORDER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_order).collect()
    }

    async fn archive_order(&self, order_id: &OrderId) -> RelayerResult<()> {
        let result = sqlx::query(
            "UPDATE swap_orders SET archived_at = NOW() WHERE order_id = $1 AND archived_at IS NULL",
        )
        .bind(&order_id[..])
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RelayerError::OrderNotFound {
                order_id: hex::encode(order_id),
            });
        }
        Ok(())
    }

    async fn get_cursor(&self, chain_id: u64) -> RelayerResult<u64> {
        let row =
            sqlx::query("SELECT last_scanned_block FROM chain_cursors WHERE chain_id = $1")
                .bind(chain_id as i64)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row
            .map(|r| r.get::<i64, _>("last_scanned_block") as u64)
            .unwrap_or(0))
    }

    async fn save_cursor(&self, chain_id: u64, block: u64) -> RelayerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chain_cursors (chain_id, last_scanned_block, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (chain_id)
            DO UPDATE SET last_scanned_block = $2, updated_at = NOW()
            "#,
        )
        .bind(chain_id as i64)
        .bind(block as i64)
        .execute(&self.pool)
        .await?;

        debug!("Saved cursor for chain {}: block {}", chain_id, block);
        Ok(())
    }

    async fn store_secret(&self, order_id: &OrderId, secret: &Secret) -> RelayerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO vault_secrets (order_id, secret)
            VALUES ($1, $2)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(&order_id[..])
        .bind(secret.as_bytes().to_vec())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_secrets(&self) -> RelayerResult<Vec<(OrderId, Secret)>> {
        let rows = sqlx::query("SELECT order_id, secret FROM vault_secrets")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let order_id = bytea_to_array(row.get("order_id"))?;
                let secret = Secret::new(bytea_to_array(row.get("secret"))?);
                Ok((order_id, secret))
            })
            .collect()
    }

    async fn erase_secret(&self, order_id: &OrderId) -> RelayerResult<()> {
        sqlx::query("DELETE FROM vault_secrets WHERE order_id = $1")
            .bind(&order_id[..])
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn stats(&self) -> RelayerResult<SwapStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE state NOT IN
                    ('completed', 'refunded_both', 'expired_unfunded', 'inconsistent')) as active,
                COUNT(*) FILTER (WHERE state = 'completed') as completed,
                COUNT(*) FILTER (WHERE state = 'refunded_both') as refunded,
                COUNT(*) FILTER (WHERE state = 'expired_unfunded') as expired,
                COUNT(*) FILTER (WHERE state = 'inconsistent') as inconsistent
            FROM swap_orders
            WHERE archived_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(SwapStats {
            active: row.get::<i64, _>("active") as u64,
            completed: row.get::<i64, _>("completed") as u64,
            refunded: row.get::<i64, _>("refunded") as u64,
            expired: row.get::<i64, _>("expired") as u64,
            inconsistent: row.get::<i64, _>("inconsistent") as u64,
        })
    }
}

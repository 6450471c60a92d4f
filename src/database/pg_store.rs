//! PostgreSQL implementation of [`DurableStore`].
//!
//! Only critical columns are ever selected; wallet material and presentation
//! columns never leave the database through this layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::{DurableResult, DurableStore};
use crate::models::{AccountSettings, ConversationState, SettingsUpdate};

const SETTINGS_COLUMNS: &str = "account_id, buy_gas_price, buy_slippage, sell_gas_price, \
     sell_slippage, auto_buy_enabled, auto_buy_amount, auto_buy_gas_price, auto_buy_slippage, \
     buy_amounts, sell_percentages, fast_mode";

#[derive(Debug, Clone)]
pub struct PgDurableStore {
    pool: PgPool,
}

impl PgDurableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn load_settings(&self, account_id: i64) -> DurableResult<Option<AccountSettings>> {
        let sql = format!("SELECT {SETTINGS_COLUMNS} FROM account_settings WHERE account_id = $1");
        let settings = sqlx::query_as::<_, AccountSettings>(&sql)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(settings)
    }

    async fn update_settings(
        &self,
        account_id: i64,
        update: &SettingsUpdate,
    ) -> DurableResult<Option<AccountSettings>> {
        let sql = format!(
            r#"
            UPDATE account_settings
            SET
                buy_gas_price = COALESCE($2, buy_gas_price),
                buy_slippage = COALESCE($3, buy_slippage),
                sell_gas_price = COALESCE($4, sell_gas_price),
                sell_slippage = COALESCE($5, sell_slippage),
                auto_buy_enabled = COALESCE($6, auto_buy_enabled),
                auto_buy_amount = COALESCE($7, auto_buy_amount),
                auto_buy_gas_price = COALESCE($8, auto_buy_gas_price),
                auto_buy_slippage = COALESCE($9, auto_buy_slippage),
                buy_amounts = COALESCE($10, buy_amounts),
                sell_percentages = COALESCE($11, sell_percentages),
                fast_mode = COALESCE($12, fast_mode),
                updated_at = NOW()
            WHERE account_id = $1
            RETURNING {SETTINGS_COLUMNS}
            "#
        );

        let updated = sqlx::query_as::<_, AccountSettings>(&sql)
            .bind(account_id)
            .bind(update.buy_gas_price)
            .bind(update.buy_slippage)
            .bind(update.sell_gas_price)
            .bind(update.sell_slippage)
            .bind(update.auto_buy_enabled)
            .bind(update.auto_buy_amount)
            .bind(update.auto_buy_gas_price)
            .bind(update.auto_buy_slippage)
            .bind(update.buy_amounts.as_deref())
            .bind(update.sell_percentages.as_deref())
            .bind(update.fast_mode)
            .fetch_optional(&self.pool)
            .await?;

        debug!(
            account_id = account_id,
            found = updated.is_some(),
            "Durable settings update executed"
        );

        Ok(updated)
    }

    async fn recently_active_accounts(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> DurableResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT account_id
            FROM account_settings
            WHERE last_active_at >= $1
            ORDER BY last_active_at DESC
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn upsert_conversation_state(&self, state: &ConversationState) -> DurableResult<()> {
        sqlx::query(
            r#"
            INSERT INTO conversation_states (account_id, state_tag, payload, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account_id) DO UPDATE
            SET state_tag = EXCLUDED.state_tag,
                payload = EXCLUDED.payload,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(state.account_id)
        .bind(&state.state_tag)
        .bind(&state.payload)
        .bind(state.created_at)
        .bind(state.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_conversation_state(
        &self,
        account_id: i64,
    ) -> DurableResult<Option<ConversationState>> {
        let state = sqlx::query_as::<_, ConversationState>(
            r#"
            SELECT account_id, state_tag, payload, created_at, expires_at
            FROM conversation_states
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    async fn delete_conversation_state(&self, account_id: i64) -> DurableResult<bool> {
        let result = sqlx::query("DELETE FROM conversation_states WHERE account_id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired_conversation_states(&self, now: DateTime<Utc>) -> DurableResult<u64> {
        let result = sqlx::query("DELETE FROM conversation_states WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

//! # Durable Store
//!
//! The relational source of truth for account settings and conversation
//! state. The [`DurableStore`] trait carries exactly the query shapes the
//! cache layer needs so an alternate store can be substituted in tests.
//! There is no circuit breaker in front of it: if it is unreachable the
//! current call fails.

pub mod connection;
pub mod pg_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AccountSettings, ConversationState, SettingsUpdate};

pub use connection::{create_pool, health_check, MIGRATOR};
pub use pg_store::PgDurableStore;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DurableStoreError {
    #[error("query failed: {0}")]
    Query(String),

    #[error("connection unavailable: {0}")]
    Connection(String),

    #[error("stored row could not be decoded: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for DurableStoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DurableStoreError::Connection(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DurableStoreError::Decode(err.to_string())
            }
            other => DurableStoreError::Query(other.to_string()),
        }
    }
}

pub type DurableResult<T> = Result<T, DurableStoreError>;

#[async_trait]
pub trait DurableStore: Send + Sync + std::fmt::Debug {
    /// `SELECT <critical columns> ... WHERE account_id = $1`
    async fn load_settings(&self, account_id: i64) -> DurableResult<Option<AccountSettings>>;

    /// `UPDATE ... WHERE account_id = $1`, returning the updated row or
    /// `None` if the account does not exist
    async fn update_settings(
        &self,
        account_id: i64,
        update: &SettingsUpdate,
    ) -> DurableResult<Option<AccountSettings>>;

    /// Accounts active since `since`, most recent first
    async fn recently_active_accounts(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> DurableResult<Vec<i64>>;

    async fn upsert_conversation_state(&self, state: &ConversationState) -> DurableResult<()>;

    async fn load_conversation_state(
        &self,
        account_id: i64,
    ) -> DurableResult<Option<ConversationState>>;

    async fn delete_conversation_state(&self, account_id: i64) -> DurableResult<bool>;

    /// `DELETE ... WHERE expires_at < $1`, returning the number of rows removed
    async fn delete_expired_conversation_states(&self, now: DateTime<Utc>) -> DurableResult<u64>;
}

//! # Conversation State Store
//!
//! Short-lived, per-account progress through multi-step flows. The durable
//! store holds the row; the cache holds a copy whose TTL equals the row's
//! remaining lifetime. Expiry is judged against the injected [`Clock`], so an
//! expired state is absent on read whether or not the sweep has run.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::CacheStore;
use crate::constants::CacheNamespace;
use crate::database::DurableStore;
use crate::error::{Result, SettingsError};
use crate::models::ConversationState;
use crate::utils::Clock;

#[derive(Debug, Clone)]
pub struct ConversationStateStore {
    store: Arc<dyn DurableStore>,
    cache: CacheStore,
    clock: Arc<dyn Clock>,
}

impl ConversationStateStore {
    pub fn new(store: Arc<dyn DurableStore>, cache: CacheStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cache,
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Replace the account's state. `ttl_minutes` must be positive.
    pub async fn set_state(
        &self,
        account_id: i64,
        state_tag: &str,
        payload: serde_json::Value,
        ttl_minutes: u32,
    ) -> Result<()> {
        if ttl_minutes == 0 {
            return Err(SettingsError::Validation(
                "conversation state TTL must be at least one minute".to_string(),
            ));
        }
        if state_tag.trim().is_empty() {
            return Err(SettingsError::Validation(
                "conversation state tag must not be empty".to_string(),
            ));
        }

        let state = ConversationState::new(
            account_id,
            state_tag,
            payload,
            self.clock.now(),
            ChronoDuration::minutes(i64::from(ttl_minutes)),
        );
        self.store.upsert_conversation_state(&state).await?;
        // Overwrite rather than delete, so a read that loaded the previous row
        // cannot re-populate it afterwards
        let ttl = Duration::from_secs(u64::from(ttl_minutes) * 60);
        self.cache
            .set(CacheNamespace::Conversation, &account_id.to_string(), &state, Some(ttl))
            .await;

        debug!(
            account_id = account_id,
            state_tag = state_tag,
            expires_at = %state.expires_at,
            "💬 Conversation state set"
        );
        Ok(())
    }

    /// Current state, `None` if absent or expired. An expired state found on
    /// read is cleared immediately.
    pub async fn get_state(&self, account_id: i64) -> Result<Option<ConversationState>> {
        let key = account_id.to_string();
        let now = self.clock.now();

        let state = match self
            .cache
            .get::<ConversationState>(CacheNamespace::Conversation, &key)
            .await
        {
            Some(cached) => Some(cached),
            None => {
                let loaded = self.store.load_conversation_state(account_id).await?;
                if let Some(state) = &loaded {
                    if let Some(remaining) = state.remaining_at(now) {
                        self.cache
                            .populate(CacheNamespace::Conversation, &key, state, Some(remaining))
                            .await;
                    }
                }
                loaded
            }
        };

        match state {
            Some(state) if state.is_expired_at(now) => {
                debug!(
                    account_id = account_id,
                    state_tag = %state.state_tag,
                    expired_at = %state.expires_at,
                    "Conversation state expired on read"
                );
                self.clear_state(account_id).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Remove the state from the durable store and the cache. Returns whether
    /// a row existed.
    pub async fn clear_state(&self, account_id: i64) -> Result<bool> {
        let existed = self.store.delete_conversation_state(account_id).await?;
        self.cache
            .delete(CacheNamespace::Conversation, &account_id.to_string())
            .await;
        Ok(existed)
    }

    /// Bulk-delete rows whose expiry has passed. Cached copies expire on
    /// their own TTL.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let removed = self.store.delete_expired_conversation_states(now).await?;
        if removed > 0 {
            info!(removed = removed, "🧹 Swept expired conversation states");
        }
        Ok(removed)
    }
}

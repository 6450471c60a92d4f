use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::oneshot;

use crate::database::{DurableResult, DurableStore, DurableStoreError};
use crate::models::{AccountSettings, ConversationState, SettingsUpdate};

#[derive(Debug, Default)]
struct Tables {
    settings: HashMap<i64, AccountSettings>,
    last_active: HashMap<i64, DateTime<Utc>>,
    conversation_states: HashMap<i64, ConversationState>,
}

/// A load paused after reading its row, see
/// [`InMemoryDurableStore::hold_next_load`]
#[derive(Debug)]
pub struct HeldLoad {
    loaded: Option<oneshot::Receiver<()>>,
    release: oneshot::Sender<()>,
}

impl HeldLoad {
    /// Wait until the held load has read its row
    pub async fn loaded(&mut self) {
        if let Some(loaded) = self.loaded.take() {
            let _ = loaded.await;
        }
    }

    /// Let the held load return the row it read
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

/// In-memory durable store with an outage switch
#[derive(Debug, Default)]
pub struct InMemoryDurableStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
    settings_loads: AtomicU64,
    held_load: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) an account, active now
    pub fn insert_settings(&self, settings: AccountSettings) {
        self.insert_settings_active_at(settings, Utc::now());
    }

    pub fn insert_settings_active_at(&self, settings: AccountSettings, last_active: DateTime<Utc>) {
        let mut tables = self.tables.lock();
        tables.last_active.insert(settings.account_id, last_active);
        tables.settings.insert(settings.account_id, settings);
    }

    /// Change a row behind the cache's back
    pub fn overwrite_settings(&self, settings: AccountSettings) {
        self.tables.lock().settings.insert(settings.account_id, settings);
    }

    pub fn settings(&self, account_id: i64) -> Option<AccountSettings> {
        self.tables.lock().settings.get(&account_id).cloned()
    }

    pub fn conversation_row(&self, account_id: i64) -> Option<ConversationState> {
        self.tables.lock().conversation_states.get(&account_id).cloned()
    }

    pub fn conversation_row_count(&self) -> usize {
        self.tables.lock().conversation_states.len()
    }

    /// Every subsequent call fails with `DurableStoreError::Connection`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `load_settings` calls that reached the store
    pub fn settings_load_count(&self) -> u64 {
        self.settings_loads.load(Ordering::SeqCst)
    }

    /// Pause the next `load_settings` or `load_conversation_state` call
    /// between reading its row and returning it
    pub fn hold_next_load(&self) -> HeldLoad {
        let (loaded_tx, loaded_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.held_load.lock() = Some((loaded_tx, release_rx));
        HeldLoad {
            loaded: Some(loaded_rx),
            release: release_tx,
        }
    }

    async fn pause_if_held(&self) {
        let held = self.held_load.lock().take();
        if let Some((loaded, release)) = held {
            let _ = loaded.send(());
            let _ = release.await;
        }
    }

    fn check(&self) -> DurableResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DurableStoreError::Connection("pool timed out".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn load_settings(&self, account_id: i64) -> DurableResult<Option<AccountSettings>> {
        self.check()?;
        self.settings_loads.fetch_add(1, Ordering::SeqCst);
        let row = self.settings(account_id);
        self.pause_if_held().await;
        Ok(row)
    }

    async fn update_settings(
        &self,
        account_id: i64,
        update: &SettingsUpdate,
    ) -> DurableResult<Option<AccountSettings>> {
        self.check()?;
        let mut tables = self.tables.lock();
        let Some(settings) = tables.settings.get_mut(&account_id) else {
            return Ok(None);
        };
        settings.apply(update);
        Ok(Some(settings.clone()))
    }

    async fn recently_active_accounts(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> DurableResult<Vec<i64>> {
        self.check()?;
        let tables = self.tables.lock();
        let mut active: Vec<(i64, DateTime<Utc>)> = tables
            .last_active
            .iter()
            .filter(|(_, at)| **at >= since)
            .map(|(id, at)| (*id, *at))
            .collect();
        active.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(active
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(id, _)| id)
            .collect())
    }

    async fn upsert_conversation_state(&self, state: &ConversationState) -> DurableResult<()> {
        self.check()?;
        self.tables
            .lock()
            .conversation_states
            .insert(state.account_id, state.clone());
        Ok(())
    }

    async fn load_conversation_state(
        &self,
        account_id: i64,
    ) -> DurableResult<Option<ConversationState>> {
        self.check()?;
        let row = self.conversation_row(account_id);
        self.pause_if_held().await;
        Ok(row)
    }

    async fn delete_conversation_state(&self, account_id: i64) -> DurableResult<bool> {
        self.check()?;
        Ok(self
            .tables
            .lock()
            .conversation_states
            .remove(&account_id)
            .is_some())
    }

    async fn delete_expired_conversation_states(&self, now: DateTime<Utc>) -> DurableResult<u64> {
        self.check()?;
        let mut tables = self.tables.lock();
        let before = tables.conversation_states.len();
        tables.conversation_states.retain(|_, state| state.expires_at >= now);
        Ok((before - tables.conversation_states.len()) as u64)
    }
}

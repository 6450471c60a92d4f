//! # Critical Settings Cache
//!
//! Persistent, field-complete mirror of the trading-critical settings. The
//! cache entry for an account equals the durable row at all times except for
//! the duration of a single [`CriticalSettingsCache::write_through`] call.
//!
//! Mutations go through `write_through` only. Durable store failures are
//! hard errors; cache failures degrade the call and are logged.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStore;
use crate::constants::CacheNamespace;
use crate::database::DurableStore;
use crate::error::Result;
use crate::models::{AccountSettings, FieldMismatch, SettingsUpdate};

/// Outcome of a field-by-field integrity check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IntegrityReport {
    /// Every critical field matched
    Consistent,
    /// Cached fields differed and were overwritten from the durable store
    Repaired { mismatches: Vec<FieldMismatch> },
    /// No usable cache entry (evicted or malformed); re-populated
    Missing,
    /// The account has no durable record
    NoRecord { stale_entry_removed: bool },
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        matches!(
            self,
            IntegrityReport::Consistent
                | IntegrityReport::NoRecord {
                    stale_entry_removed: false
                }
        )
    }
}

#[derive(Debug, Clone)]
pub struct CriticalSettingsCache {
    store: Arc<dyn DurableStore>,
    cache: CacheStore,
}

impl CriticalSettingsCache {
    pub fn new(store: Arc<dyn DurableStore>, cache: CacheStore) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    fn key(account_id: i64) -> String {
        account_id.to_string()
    }

    async fn load_durable(&self, account_id: i64) -> Result<Option<AccountSettings>> {
        Ok(self.store.load_settings(account_id).await?)
    }

    /// Load the full record and cache it unless an entry already exists.
    /// Idempotent. Returns `false` if the account has no record.
    ///
    /// An existing entry is left alone: it may come from a write-through that
    /// landed after this load. Stale entries are the integrity sampler's job.
    pub async fn pre_warm(&self, account_id: i64) -> Result<bool> {
        match self.load_durable(account_id).await? {
            Some(settings) => {
                self.cache
                    .populate(CacheNamespace::Settings, &Self::key(account_id), &settings, None)
                    .await;
                debug!(account_id = account_id, "🔥 Settings pre-warmed");
                Ok(true)
            }
            None => {
                self.cache
                    .delete(CacheNamespace::Settings, &Self::key(account_id))
                    .await;
                Ok(false)
            }
        }
    }

    /// Whole record or nothing. A miss loads from the durable store and
    /// caches the result.
    pub async fn read(&self, account_id: i64) -> Result<Option<AccountSettings>> {
        let key = Self::key(account_id);

        if let Some(cached) = self
            .cache
            .get::<AccountSettings>(CacheNamespace::Settings, &key)
            .await
        {
            if cached.account_id == account_id {
                return Ok(Some(cached));
            }
            warn!(
                account_id = account_id,
                cached_account_id = cached.account_id,
                "Cache entry belongs to a different account, discarding"
            );
            self.cache.delete(CacheNamespace::Settings, &key).await;
        }

        self.cache
            .get_or_load(CacheNamespace::Settings, &key, None, || {
                self.load_durable(account_id)
            })
            .await
    }

    /// The only mutation path.
    ///
    /// 1. update the durable store scoped to the account
    /// 2. merge the update into the cached entry (read-merge-write)
    /// 3. invalidate derived caches
    ///
    /// Returns `Ok(false)` if the account does not exist. If the cache write
    /// fails after the durable write succeeded, the entry is reloaded from the
    /// durable store into the degraded-mode cache before returning.
    pub async fn write_through(&self, account_id: i64, update: &SettingsUpdate) -> Result<bool> {
        update.validate()?;
        let key = Self::key(account_id);

        let Some(durable) = self.store.update_settings(account_id, update).await? else {
            warn!(account_id = account_id, "Settings update for unknown account");
            return Ok(false);
        };

        let merged = match self
            .cache
            .get::<AccountSettings>(CacheNamespace::Settings, &key)
            .await
        {
            Some(mut cached) if cached.account_id == account_id => {
                cached.apply(update);
                let drift = cached.diff(&durable);
                if drift.is_empty() {
                    cached
                } else {
                    error!(
                        account_id = account_id,
                        fields = ?drift,
                        "⚠️ Cached settings had drifted before write-through, writing durable row"
                    );
                    durable.clone()
                }
            }
            _ => durable.clone(),
        };

        let write = self
            .cache
            .set(CacheNamespace::Settings, &key, &merged, None)
            .await;

        if write.is_failed() {
            error!(
                account_id = account_id,
                fields = ?update.changed_fields(),
                "🚨 CORRECTNESS RISK: durable write succeeded but cache write failed, reloading from durable store"
            );
            // The merged value is already held locally; the reload only narrows
            // the window if the durable row moved again meanwhile
            if let Err(e) = self.emergency_refresh(account_id).await {
                error!(account_id = account_id, error = %e, "Reload after failed cache write also failed");
            }
        }

        self.invalidate_derived(account_id).await;

        info!(
            account_id = account_id,
            fields = ?update.changed_fields(),
            cache_write = ?write,
            "✅ Settings written through"
        );
        Ok(true)
    }

    /// Field-by-field comparison of cache against the durable store.
    /// Returns `true` iff every critical field matched.
    pub async fn validate_integrity(&self, account_id: i64) -> Result<bool> {
        Ok(self.check_integrity(account_id).await?.is_consistent())
    }

    /// Like [`validate_integrity`](Self::validate_integrity), with the details
    pub async fn check_integrity(&self, account_id: i64) -> Result<IntegrityReport> {
        let key = Self::key(account_id);
        let durable = self.load_durable(account_id).await?;
        let cached = self
            .cache
            .get::<AccountSettings>(CacheNamespace::Settings, &key)
            .await;

        let Some(durable) = durable else {
            let stale_entry_removed = cached.is_some();
            if stale_entry_removed {
                warn!(account_id = account_id, "Cached settings for account without record, removing");
                self.invalidate(account_id).await;
            }
            return Ok(IntegrityReport::NoRecord { stale_entry_removed });
        };

        let Some(cached) = cached else {
            warn!(account_id = account_id, "Integrity check found no usable cache entry, repopulating");
            self.cache
                .set(CacheNamespace::Settings, &key, &durable, None)
                .await;
            self.invalidate_derived(account_id).await;
            return Ok(IntegrityReport::Missing);
        };

        let mut mismatches = cached.diff(&durable);
        if cached.account_id != account_id {
            mismatches.push(FieldMismatch {
                field: "account_id",
                cached: cached.account_id.to_string(),
                durable: account_id.to_string(),
            });
        }

        if mismatches.is_empty() {
            return Ok(IntegrityReport::Consistent);
        }

        for mismatch in &mismatches {
            error!(
                account_id = account_id,
                field = mismatch.field,
                cached = %mismatch.cached,
                durable = %mismatch.durable,
                "🚨 INTEGRITY VIOLATION: cached setting differs from durable store"
            );
        }

        self.cache
            .set(CacheNamespace::Settings, &key, &durable, None)
            .await;
        self.invalidate_derived(account_id).await;

        Ok(IntegrityReport::Repaired { mismatches })
    }

    /// Unconditional reload from the durable store. Returns `false` if the
    /// account has no record.
    pub async fn emergency_refresh(&self, account_id: i64) -> Result<bool> {
        warn!(account_id = account_id, "🚑 Emergency settings refresh");
        let key = Self::key(account_id);
        let refreshed = match self.load_durable(account_id).await? {
            Some(settings) => {
                self.cache
                    .set(CacheNamespace::Settings, &key, &settings, None)
                    .await;
                true
            }
            None => {
                self.cache.delete(CacheNamespace::Settings, &key).await;
                false
            }
        };
        self.invalidate_derived(account_id).await;
        Ok(refreshed)
    }

    /// Drop the persistent entry and everything derived from it, e.g. when the
    /// account is deleted
    pub async fn invalidate(&self, account_id: i64) {
        self.cache
            .delete(CacheNamespace::Settings, &Self::key(account_id))
            .await;
        self.invalidate_derived(account_id).await;
    }

    async fn invalidate_derived(&self, account_id: i64) {
        let key = Self::key(account_id);
        for namespace in CacheNamespace::derived_from_settings() {
            self.cache.delete(*namespace, &key).await;
        }
    }
}

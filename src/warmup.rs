//! # Warmup and Integrity Sampling
//!
//! Pre-populates the critical settings cache for recently active accounts
//! and periodically validates a rotating window of them against the durable
//! store. Neither runs on the request path.

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::WarmupConfig;
use crate::database::DurableStore;
use crate::error::Result;
use crate::settings::{CriticalSettingsCache, IntegrityReport};
use crate::utils::Clock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupReport {
    pub attempted: usize,
    pub warmed: usize,
    /// Listed as active but without a settings record
    pub missing: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegritySampleReport {
    pub checked: usize,
    pub consistent: usize,
    pub repaired: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct WarmupService {
    settings: Arc<CriticalSettingsCache>,
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    config: WarmupConfig,
    sample_cursor: Mutex<usize>,
}

impl WarmupService {
    pub fn new(
        settings: Arc<CriticalSettingsCache>,
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        config: WarmupConfig,
    ) -> Self {
        Self {
            settings,
            store,
            clock,
            config,
            sample_cursor: Mutex::new(0),
        }
    }

    pub fn config(&self) -> &WarmupConfig {
        &self.config
    }

    async fn active_accounts(&self) -> Result<Vec<i64>> {
        let since = self.clock.now() - self.config.lookback();
        Ok(self
            .store
            .recently_active_accounts(since, i64::from(self.config.max_accounts))
            .await?)
    }

    /// Pre-warm every account active within the lookback window, in batches
    /// with bounded concurrency. Per-account failures are counted, not
    /// propagated; only the account listing itself can fail the call.
    pub async fn warm_recently_active(&self) -> Result<WarmupReport> {
        let accounts = self.active_accounts().await?;
        let mut report = WarmupReport {
            attempted: accounts.len(),
            ..WarmupReport::default()
        };

        info!(
            accounts = accounts.len(),
            lookback_hours = self.config.lookback_hours,
            "🔥 Starting settings warmup"
        );

        let batch_delay = self.config.batch_delay();
        for (index, batch) in accounts.chunks(self.config.batch_size.max(1)).enumerate() {
            if index > 0 && !batch_delay.is_zero() {
                tokio::time::sleep(batch_delay).await;
            }

            let results: Vec<(i64, Result<bool>)> = stream::iter(batch.iter().copied())
                .map(|account_id| async move { (account_id, self.settings.pre_warm(account_id).await) })
                .buffer_unordered(self.config.max_concurrency.max(1))
                .collect()
                .await;

            for (account_id, result) in results {
                match result {
                    Ok(true) => report.warmed += 1,
                    Ok(false) => report.missing += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!(account_id = account_id, error = %e, "Warmup failed for account");
                    }
                }
            }

            debug!(batch = index, warmed = report.warmed, "Warmup batch complete");
        }

        info!(
            attempted = report.attempted,
            warmed = report.warmed,
            missing = report.missing,
            failed = report.failed,
            "✅ Settings warmup complete"
        );
        Ok(report)
    }

    /// Validate the next window of active accounts. The window advances on
    /// every call and wraps around the active list.
    pub async fn sample_integrity(&self) -> Result<IntegritySampleReport> {
        let accounts = self.active_accounts().await?;
        if accounts.is_empty() {
            return Ok(IntegritySampleReport::default());
        }

        let window = self.config.integrity_sample_size.min(accounts.len());
        let start = {
            let mut cursor = self.sample_cursor.lock();
            let start = *cursor % accounts.len();
            *cursor = (start + window) % accounts.len();
            start
        };
        let sample: Vec<i64> = accounts.iter().copied().cycle().skip(start).take(window).collect();

        let results: Vec<(i64, Result<IntegrityReport>)> = stream::iter(sample)
            .map(|account_id| async move {
                (account_id, self.settings.check_integrity(account_id).await)
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut report = IntegritySampleReport::default();
        for (account_id, result) in results {
            report.checked += 1;
            match result {
                Ok(outcome) if outcome.is_consistent() => report.consistent += 1,
                Ok(_) => report.repaired += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(account_id = account_id, error = %e, "Integrity sample failed for account");
                }
            }
        }

        if report.repaired > 0 {
            warn!(
                checked = report.checked,
                repaired = report.repaired,
                "⚠️ Integrity sampler repaired cache entries"
            );
        } else {
            debug!(checked = report.checked, "Integrity sample consistent");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::config::SettingsCoreConfig;
    use crate::resilience::FallbackManager;
    use crate::test_helpers::{sample_settings, InMemoryCacheBackend, InMemoryDurableStore};
    use crate::utils::ManualClock;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<InMemoryDurableStore>,
        backend: Arc<InMemoryCacheBackend>,
        clock: ManualClock,
        warmup: WarmupService,
    }

    fn fixture(sample_size: usize) -> Fixture {
        let mut config = SettingsCoreConfig::for_test();
        config.warmup.integrity_sample_size = sample_size;
        config.warmup.batch_size = 2;
        let store = Arc::new(InMemoryDurableStore::new());
        let backend = Arc::new(InMemoryCacheBackend::new());
        let fallback = Arc::new(FallbackManager::new(
            &config.fallback,
            config.cache.operation_timeout(),
        ));
        let cache = CacheStore::new(backend.clone(), fallback, "t", config.cache.operation_timeout());
        let settings = Arc::new(CriticalSettingsCache::new(store.clone(), cache));
        let clock = ManualClock::starting_now();
        let warmup = WarmupService::new(
            settings,
            store.clone(),
            Arc::new(clock.clone()),
            config.warmup.clone(),
        );
        Fixture {
            store,
            backend,
            clock,
            warmup,
        }
    }

    #[tokio::test]
    async fn test_warms_recently_active_only() {
        let f = fixture(5);
        let now = f.clock.now();
        for id in 1..=5 {
            f.store
                .insert_settings_active_at(sample_settings(id), now - ChronoDuration::minutes(id));
        }
        f.store
            .insert_settings_active_at(sample_settings(99), now - ChronoDuration::days(30));

        let report = f.warmup.warm_recently_active().await.unwrap();
        assert_eq!(report.attempted, 5);
        assert_eq!(report.warmed, 5);
        assert_eq!(report.failed, 0);
        for id in 1..=5 {
            assert!(f.backend.raw(&format!("t:settings:{id}")).is_some());
        }
        assert!(f.backend.raw("t:settings:99").is_none());
    }

    #[tokio::test]
    async fn test_warmup_surfaces_listing_failure() {
        let f = fixture(5);
        f.store.set_unavailable(true);
        assert!(f.warmup.warm_recently_active().await.is_err());
    }

    #[tokio::test]
    async fn test_integrity_sample_repairs_and_rotates() {
        let f = fixture(2);
        let now = f.clock.now();
        for id in 1..=3 {
            f.store
                .insert_settings_active_at(sample_settings(id), now - ChronoDuration::minutes(id));
        }
        f.warmup.warm_recently_active().await.unwrap();

        // account 1 is most recent, so it is first in the window
        let mut changed = sample_settings(1);
        changed.buy_slippage = Some(dec!(3));
        f.store.overwrite_settings(changed);

        let first = f.warmup.sample_integrity().await.unwrap();
        assert_eq!(first.checked, 2);
        assert_eq!(first.repaired, 1);
        assert_eq!(first.consistent, 1);

        // window [3, 1]: both consistent now
        let second = f.warmup.sample_integrity().await.unwrap();
        assert_eq!(second.checked, 2);
        assert_eq!(second.consistent, 2);
    }

    #[tokio::test]
    async fn test_integrity_sample_with_no_active_accounts() {
        let f = fixture(2);
        assert_eq!(
            f.warmup.sample_integrity().await.unwrap(),
            IntegritySampleReport::default()
        );
    }
}

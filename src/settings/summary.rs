//! Pre-rendered settings summary.
//!
//! Derived from the critical settings and cached with a short TTL. Every
//! settings mutation drops the entry best-effort; if that delete is lost the
//! summary is stale for at most one TTL. Transactions never read it.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use super::CriticalSettingsCache;
use crate::cache::CacheStore;
use crate::constants::CacheNamespace;
use crate::error::{Result, SettingsError};
use crate::models::AccountSettings;
use crate::resolver::{TransactionCategory, TransactionParams};

#[derive(Debug, Clone)]
pub struct SettingsSummaryCache {
    settings: Arc<CriticalSettingsCache>,
    cache: CacheStore,
    ttl: Duration,
}

impl SettingsSummaryCache {
    pub fn new(settings: Arc<CriticalSettingsCache>, cache: CacheStore, ttl: Duration) -> Self {
        Self {
            settings,
            cache,
            ttl,
        }
    }

    /// Rendered summary, `None` if the account has no record
    pub async fn summary(&self, account_id: i64) -> Result<Option<String>> {
        self.cache
            .get_or_load(
                CacheNamespace::SettingsSummary,
                &account_id.to_string(),
                Some(self.ttl),
                || async move {
                    Ok::<_, SettingsError>(
                        self.settings
                            .read(account_id)
                            .await?
                            .map(|settings| render_summary(&settings)),
                    )
                },
            )
            .await
    }
}

fn join(values: &[rust_decimal::Decimal], suffix: &str) -> String {
    values
        .iter()
        .map(|v| format!("{}{suffix}", v.normalize()))
        .collect::<Vec<_>>()
        .join(" / ")
}

/// Human-readable summary with defaults applied
pub fn render_summary(settings: &AccountSettings) -> String {
    let mut out = String::new();

    if let Some(TransactionParams::Buy(buy)) =
        TransactionParams::from_settings(settings, TransactionCategory::Buy)
    {
        let _ = writeln!(
            out,
            "Buy: gas {} gwei, slippage {}%, quick amounts {}",
            buy.gas_price.normalize(),
            buy.slippage.normalize(),
            join(&buy.quick_amounts, "")
        );
    }

    if let Some(TransactionParams::Sell(sell)) =
        TransactionParams::from_settings(settings, TransactionCategory::Sell)
    {
        let _ = writeln!(
            out,
            "Sell: gas {} gwei, slippage {}%, quick percentages {}",
            sell.gas_price.normalize(),
            sell.slippage.normalize(),
            join(&sell.quick_percentages, "%")
        );
    }

    match TransactionParams::from_settings(settings, TransactionCategory::AutoBuy) {
        Some(TransactionParams::AutoBuy(auto)) => {
            let _ = writeln!(
                out,
                "Auto-buy: on, amount {}, gas {} gwei, slippage {}%",
                auto.amount.normalize(),
                auto.gas_price.normalize(),
                auto.slippage.normalize()
            );
        }
        _ => out.push_str("Auto-buy: off\n"),
    }

    let _ = write!(
        out,
        "Fast mode: {}",
        if settings.fast_mode { "on" } else { "off" }
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsCoreConfig;
    use crate::models::SettingsUpdate;
    use crate::resilience::FallbackManager;
    use crate::test_helpers::{sample_settings, InMemoryCacheBackend, InMemoryDurableStore};
    use rust_decimal_macros::dec;

    fn setup() -> (
        Arc<InMemoryDurableStore>,
        Arc<InMemoryCacheBackend>,
        Arc<CriticalSettingsCache>,
        SettingsSummaryCache,
    ) {
        let config = SettingsCoreConfig::for_test();
        let store = Arc::new(InMemoryDurableStore::new());
        let backend = Arc::new(InMemoryCacheBackend::new());
        let fallback = Arc::new(FallbackManager::new(
            &config.fallback,
            config.cache.operation_timeout(),
        ));
        let cache = CacheStore::new(backend.clone(), fallback, "t", config.cache.operation_timeout());
        let settings = Arc::new(CriticalSettingsCache::new(store.clone(), cache.clone()));
        let summary = SettingsSummaryCache::new(settings.clone(), cache, Duration::from_secs(60));
        (store, backend, settings, summary)
    }

    #[test]
    fn test_render_summary() {
        let rendered = render_summary(&sample_settings(1));
        assert_eq!(
            rendered,
            "Buy: gas 15 gwei, slippage 12%, quick amounts 0.2 / 0.5 / 2\n\
             Sell: gas 20 gwei, slippage 18%, quick percentages 10% / 50% / 100%\n\
             Auto-buy: on, amount 0.25, gas 30 gwei, slippage 25%\n\
             Fast mode: off"
        );
    }

    #[test]
    fn test_render_summary_with_defaults() {
        let rendered = render_summary(&AccountSettings::unset(1));
        assert!(rendered.contains("Buy: gas 10 gwei, slippage 10%"));
        assert!(rendered.contains("Auto-buy: off"));
    }

    #[tokio::test]
    async fn test_summary_is_cached_with_ttl() {
        let (store, backend, _, summary) = setup();
        store.insert_settings(sample_settings(2));

        let rendered = summary.summary(2).await.unwrap().unwrap();
        assert!(rendered.starts_with("Buy: gas 15 gwei"));
        assert!(backend.raw("t:settings_summary:2").is_some());
        assert!(backend.ttl_of("t:settings_summary:2").unwrap() <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_summary_absent_for_unknown_account() {
        let (_, _, _, summary) = setup();
        assert_eq!(summary.summary(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mutation_refreshes_summary() {
        let (store, _, settings, summary) = setup();
        store.insert_settings(sample_settings(2));
        summary.summary(2).await.unwrap();

        settings
            .write_through(2, &SettingsUpdate::new().buy_gas_price(dec!(40)))
            .await
            .unwrap();

        let rendered = summary.summary(2).await.unwrap().unwrap();
        assert!(rendered.starts_with("Buy: gas 40 gwei"));
    }
}

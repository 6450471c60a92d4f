//! Shared harness: a `SettingsService` over the in-memory durable store and
//! cache backend, driven by a manual clock.

#![allow(dead_code)]

use std::sync::Arc;

use settings_core::config::SettingsCoreConfig;
use settings_core::service::SettingsService;
use settings_core::test_helpers::{InMemoryCacheBackend, InMemoryDurableStore};
use settings_core::utils::ManualClock;

pub use settings_core::test_helpers::sample_settings;

pub struct Harness {
    pub config: SettingsCoreConfig,
    pub durable: Arc<InMemoryDurableStore>,
    pub backend: Arc<InMemoryCacheBackend>,
    pub clock: ManualClock,
    pub service: SettingsService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SettingsCoreConfig::for_test())
    }

    pub fn with_config(config: SettingsCoreConfig) -> Self {
        let durable = Arc::new(InMemoryDurableStore::new());
        let backend = Arc::new(InMemoryCacheBackend::new());
        let clock = ManualClock::starting_now();
        let service = SettingsService::new(
            config.clone(),
            durable.clone(),
            backend.clone(),
            Arc::new(clock.clone()),
        )
        .expect("test configuration is valid");

        Self {
            config,
            durable,
            backend,
            clock,
            service,
        }
    }

    pub fn key(&self, namespace: &str, account_id: i64) -> String {
        format!("{}:{}:{}", self.config.cache.key_prefix, namespace, account_id)
    }

    pub fn settings_key(&self, account_id: i64) -> String {
        self.key("settings", account_id)
    }

    /// Parse the raw cached settings entry as JSON
    pub fn cached_settings_json(&self, account_id: i64) -> Option<serde_json::Value> {
        self.backend
            .raw(&self.settings_key(account_id))
            .map(|raw| serde_json::from_str(&raw).expect("cached entry is JSON"))
    }

    pub fn put_cached_settings_json(&self, account_id: i64, value: &serde_json::Value) {
        self.backend
            .put_raw(&self.settings_key(account_id), &value.to_string());
    }
}

/// Let spawned tasks run after a paused-time advance
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

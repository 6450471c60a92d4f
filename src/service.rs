//! # Settings Service
//!
//! The public entry point. Wires the durable store, the remote cache, the
//! fallback manager and the background tasks together and exposes the
//! operations the outer (chat) layer calls.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::background::{
    BackgroundScheduler, CacheRecoveryTask, ConversationSweepTask, IntegritySamplerTask,
};
use crate::cache::{CacheBackend, CacheMetricsSnapshot, CacheStore, RedisCacheBackend};
use crate::config::{ConfigManager, SettingsCoreConfig};
use crate::database::{create_pool, health_check, DurableStore, PgDurableStore};
use crate::error::{Result, SettingsError};
use crate::models::{ConversationState, SettingsUpdate};
use crate::resilience::{CircuitBreakerMetrics, FallbackManager, FallbackStatus};
use crate::resolver::{ParameterResolver, TransactionCategory, TransactionParams};
use crate::settings::{CriticalSettingsCache, SettingsSummaryCache};
use crate::state::ConversationStateStore;
use crate::utils::{Clock, SystemClock};
use crate::warmup::WarmupService;

const STARTUP_WARMUP_TASK: &str = "startup_warmup";

/// Point-in-time view of the cache layer's health
#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetrics {
    pub cache: CacheMetricsSnapshot,
    pub fallback: FallbackStatus,
    pub circuit_breaker: CircuitBreakerMetrics,
    pub local_cache_entries: usize,
    pub dirty_keys: usize,
    pub background_tasks: Vec<&'static str>,
}

#[derive(Debug)]
pub struct SettingsService {
    config: SettingsCoreConfig,
    backend: Arc<dyn CacheBackend>,
    cache: CacheStore,
    settings: Arc<CriticalSettingsCache>,
    summary: SettingsSummaryCache,
    states: ConversationStateStore,
    resolver: ParameterResolver,
    warmup: Arc<WarmupService>,
    scheduler: BackgroundScheduler,
}

impl SettingsService {
    pub fn new(
        config: SettingsCoreConfig,
        durable: Arc<dyn DurableStore>,
        backend: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let fallback = Arc::new(FallbackManager::new(
            &config.fallback,
            config.cache.operation_timeout(),
        ));
        let cache = CacheStore::new(
            backend.clone(),
            fallback,
            config.cache.key_prefix.clone(),
            config.cache.operation_timeout(),
        );
        let settings = Arc::new(CriticalSettingsCache::new(durable.clone(), cache.clone()));
        let summary =
            SettingsSummaryCache::new(settings.clone(), cache.clone(), config.cache.summary_ttl());
        let states = ConversationStateStore::new(durable.clone(), cache.clone(), clock.clone());
        let resolver = ParameterResolver::new(settings.clone());
        let warmup = Arc::new(WarmupService::new(
            settings.clone(),
            durable,
            clock,
            config.warmup.clone(),
        ));

        Ok(Self {
            config,
            backend,
            cache,
            settings,
            summary,
            states,
            resolver,
            warmup,
            scheduler: BackgroundScheduler::new(),
        })
    }

    /// Connect to PostgreSQL and Redis per the loaded configuration. Redis
    /// connects lazily, so an unreachable cache does not block startup.
    pub async fn from_config(manager: &ConfigManager) -> Result<Self> {
        let config = manager.config().clone();

        let pool = create_pool(&config.database).await?;
        ensure_healthy(health_check(&pool).await)?;

        let backend = RedisCacheBackend::new(&config.cache.redis_url)
            .map_err(|e| SettingsError::Configuration(format!("cache.redis_url: {e}")))?;

        info!(
            environment = manager.environment(),
            key_prefix = %config.cache.key_prefix,
            "🚀 Settings service initialized"
        );

        Self::new(
            config,
            Arc::new(PgDurableStore::new(pool)),
            Arc::new(backend),
            Arc::new(SystemClock),
        )
    }

    pub fn config(&self) -> &SettingsCoreConfig {
        &self.config
    }

    pub fn settings(&self) -> &Arc<CriticalSettingsCache> {
        &self.settings
    }

    pub fn conversation_states(&self) -> &ConversationStateStore {
        &self.states
    }

    pub fn warmup(&self) -> &Arc<WarmupService> {
        &self.warmup
    }

    pub fn scheduler(&self) -> &BackgroundScheduler {
        &self.scheduler
    }

    pub fn is_degraded(&self) -> bool {
        self.cache.is_degraded()
    }

    /// Fast path for building a transaction
    pub async fn get_transaction_params(
        &self,
        account_id: i64,
        category: TransactionCategory,
    ) -> Result<Option<TransactionParams>> {
        self.resolver.resolve(account_id, category).await
    }

    /// Readiness path: integrity check (and refresh on mismatch) before
    /// resolving. Use immediately before executing a transaction.
    pub async fn get_validated_transaction_params(
        &self,
        account_id: i64,
        category: TransactionCategory,
    ) -> Result<Option<TransactionParams>> {
        self.resolver.validate_readiness(account_id, category).await
    }

    /// Returns `false` if the account does not exist
    pub async fn update_setting(&self, account_id: i64, update: &SettingsUpdate) -> Result<bool> {
        self.settings.write_through(account_id, update).await
    }

    pub async fn set_conversation_state(
        &self,
        account_id: i64,
        state_tag: &str,
        payload: serde_json::Value,
        ttl_minutes: u32,
    ) -> Result<()> {
        self.states
            .set_state(account_id, state_tag, payload, ttl_minutes)
            .await
    }

    /// Like [`set_conversation_state`](Self::set_conversation_state) with the
    /// configured default lifetime
    pub async fn set_conversation_state_default_ttl(
        &self,
        account_id: i64,
        state_tag: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.set_conversation_state(
            account_id,
            state_tag,
            payload,
            self.config.conversation.default_ttl_minutes,
        )
        .await
    }

    pub async fn get_conversation_state(&self, account_id: i64) -> Result<Option<ConversationState>> {
        self.states.get_state(account_id).await
    }

    pub async fn clear_conversation_state(&self, account_id: i64) -> Result<()> {
        self.states.clear_state(account_id).await.map(|_| ())
    }

    pub async fn settings_summary(&self, account_id: i64) -> Result<Option<String>> {
        self.summary.summary(account_id).await
    }

    /// Start the sweep, integrity sampler and recovery probe, plus the
    /// one-shot startup warmup when enabled. Idempotent.
    pub fn start_background_tasks(&self) {
        self.scheduler.start(Arc::new(ConversationSweepTask::new(
            self.states.clone(),
            self.config.conversation.sweep_interval(),
        )));
        self.scheduler.start(Arc::new(CacheRecoveryTask::new(
            self.cache.fallback().clone(),
            self.backend.clone(),
            self.warmup.clone(),
            self.config.fallback.probe_interval(),
        )));

        if self.config.warmup.enabled {
            self.scheduler.start(Arc::new(IntegritySamplerTask::new(
                self.warmup.clone(),
                self.config.warmup.integrity_interval(),
            )));

            let warmup = self.warmup.clone();
            self.scheduler.start_once(STARTUP_WARMUP_TASK, async move {
                if let Err(e) = warmup.warm_recently_active().await {
                    warn!(error = %e, "Startup warmup failed");
                }
            });
        }

        info!(tasks = ?self.scheduler.running_tasks(), "Background tasks started");
    }

    /// Stop every background task and wait for them to exit
    pub async fn shutdown(&self) {
        info!("🛑 Shutting down settings service");
        self.scheduler.shutdown().await;
    }

    pub fn metrics(&self) -> ServiceMetrics {
        let fallback = self.cache.fallback();
        ServiceMetrics {
            cache: self.cache.metrics(),
            fallback: fallback.status(),
            circuit_breaker: fallback.breaker().metrics(),
            local_cache_entries: fallback.local_len(),
            dirty_keys: fallback.dirty_key_count(),
            background_tasks: self.scheduler.running_tasks(),
        }
    }
}

fn ensure_healthy(result: std::result::Result<bool, sqlx::Error>) -> Result<()> {
    match result {
        Ok(true) => {
            info!("✅ Durable store health check passed");
            Ok(())
        }
        Ok(false) => {
            error!("❌ Durable store health check returned an unexpected result");
            Err(SettingsError::DurableStoreUnavailable(
                "health check returned an unexpected result".to_string(),
            ))
        }
        Err(e) => {
            error!(error = %e, "❌ Durable store health check failed");
            Err(SettingsError::DurableStoreUnavailable(format!(
                "health check failed: {e}"
            )))
        }
    }
}

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CacheBackend, CacheError, CacheMetrics, CacheMetricsSnapshot};
use crate::constants::CacheNamespace;
use crate::logging::log_cache_operation;
use crate::resilience::FallbackManager;

/// Where a mutation landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWrite {
    /// Written to the remote cache
    Applied,
    /// Degraded mode: written to the in-process map only
    Degraded,
    /// The remote write failed. The key is marked dirty, the value kept
    /// locally, and the store switched to degraded mode.
    Failed,
}

impl CacheWrite {
    pub fn is_failed(&self) -> bool {
        matches!(self, CacheWrite::Failed)
    }
}

enum RawRead {
    Hit(String),
    Miss,
    Failed,
}

/// Namespaced cache access with loader-on-miss and failure isolation.
///
/// Read failures count towards the fallback threshold. Failed authoritative
/// writes (`set`, `delete`) switch to degraded mode at once, because the
/// remote cache may now hold a value that no longer matches the durable
/// store.
#[derive(Debug, Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    fallback: Arc<FallbackManager>,
    metrics: Arc<CacheMetrics>,
    key_prefix: String,
    operation_timeout: Duration,
}

impl CacheStore {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        fallback: Arc<FallbackManager>,
        key_prefix: impl Into<String>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            fallback,
            metrics: Arc::new(CacheMetrics::new()),
            key_prefix: key_prefix.into(),
            operation_timeout,
        }
    }

    pub fn full_key(&self, namespace: CacheNamespace, key: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, namespace, key)
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn fallback(&self) -> &Arc<FallbackManager> {
        &self.fallback
    }

    pub fn is_degraded(&self) -> bool {
        self.fallback.is_degraded()
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Cached value or `None`. Never fails: a cache failure reads as a miss.
    pub async fn get<T: DeserializeOwned>(&self, namespace: CacheNamespace, key: &str) -> Option<T> {
        let full_key = self.full_key(namespace, key);
        match self.read_raw(&full_key).await {
            RawRead::Hit(raw) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    self.metrics.record_hit();
                    log_cache_operation("get", namespace.as_str(), key, "hit", None);
                    Some(value)
                }
                Err(e) => {
                    self.discard_malformed(namespace, key, &full_key, &e).await;
                    self.metrics.record_miss();
                    None
                }
            },
            RawRead::Miss | RawRead::Failed => {
                self.metrics.record_miss();
                log_cache_operation("get", namespace.as_str(), key, "miss", None);
                None
            }
        }
    }

    /// Cached value, or the loader's value stored and returned on a miss.
    ///
    /// Loader errors propagate untouched. Storing the loaded value is best
    /// effort: the remote cache had nothing newer to lose.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        if let Some(value) = self.get::<T>(namespace, key).await {
            return Ok(Some(value));
        }

        let loaded = loader().await?;
        if let Some(value) = &loaded {
            self.populate(namespace, key, value, ttl).await;
        }
        Ok(loaded)
    }

    /// Authoritative write
    pub async fn set<T: Serialize>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheWrite {
        let full_key = self.full_key(namespace, key);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                // Nothing was written, so any previous remote value is now stale
                warn!(key = %full_key, error = %e, "Failed to encode cache value");
                return self.delete(namespace, key).await;
            }
        };

        if self.fallback.hold_write(&full_key, raw.clone(), ttl) {
            self.metrics.record_fallback();
            return CacheWrite::Degraded;
        }

        match self.bounded(self.backend.set(&full_key, &raw, ttl)).await {
            Ok(()) => {
                self.fallback.record_success();
                log_cache_operation("set", namespace.as_str(), key, "applied", None);
                CacheWrite::Applied
            }
            Err(e) => {
                self.metrics.record_error();
                self.fallback.mark_dirty(&full_key);
                self.fallback.local_set(&full_key, raw, ttl);
                self.fallback
                    .force_degraded(&format!("authoritative write to {full_key} failed: {e}"));
                CacheWrite::Failed
            }
        }
    }

    /// Authoritative delete
    pub async fn delete(&self, namespace: CacheNamespace, key: &str) -> CacheWrite {
        let full_key = self.full_key(namespace, key);
        if self.fallback.hold_delete(&full_key) {
            self.metrics.record_fallback();
            return CacheWrite::Degraded;
        }

        match self.bounded(self.backend.delete(&full_key)).await {
            Ok(()) => {
                self.fallback.record_success();
                log_cache_operation("delete", namespace.as_str(), key, "applied", None);
                CacheWrite::Applied
            }
            Err(e) => {
                self.metrics.record_error();
                self.fallback.mark_dirty(&full_key);
                self.fallback
                    .force_degraded(&format!("authoritative delete of {full_key} failed: {e}"));
                CacheWrite::Failed
            }
        }
    }

    /// Direct liveness check of the backend, bypassing the breaker
    pub async fn ping(&self) -> Result<(), CacheError> {
        self.bounded(self.backend.ping()).await
    }

    /// Best-effort write of a value just loaded from the durable store.
    ///
    /// Insert-if-absent: an authoritative write that landed after the load
    /// is never replaced by the older loaded value. Failures count towards
    /// the threshold but never force degraded mode.
    pub async fn populate<T: Serialize>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) {
        let full_key = self.full_key(namespace, key);
        let Ok(raw) = serde_json::to_string(value) else {
            return;
        };

        if self.fallback.hold_populate(&full_key, raw.clone(), ttl) {
            self.metrics.record_fallback();
            return;
        }

        match self
            .bounded(self.backend.set_if_absent(&full_key, &raw, ttl))
            .await
        {
            Ok(stored) => {
                self.fallback.record_success();
                if !stored {
                    debug!(key = %full_key, "Newer entry already cached, loaded value not stored");
                }
            }
            Err(e) => {
                self.metrics.record_error();
                self.fallback.record_failure(&e);
            }
        }
    }

    async fn read_raw(&self, full_key: &str) -> RawRead {
        if self.fallback.is_degraded() {
            self.metrics.record_fallback();
            return match self.fallback.local_get(full_key) {
                Some(raw) => RawRead::Hit(raw),
                None => RawRead::Miss,
            };
        }

        match self.bounded(self.backend.get(full_key)).await {
            Ok(Some(raw)) => {
                self.fallback.record_success();
                RawRead::Hit(raw)
            }
            Ok(None) => {
                self.fallback.record_success();
                RawRead::Miss
            }
            Err(e) => {
                self.metrics.record_error();
                self.fallback.record_failure(&e);
                RawRead::Failed
            }
        }
    }

    async fn discard_malformed(
        &self,
        namespace: CacheNamespace,
        key: &str,
        full_key: &str,
        error: &serde_json::Error,
    ) {
        self.metrics.record_malformed();
        warn!(
            namespace = %namespace,
            key = %key,
            error = %error,
            "🧹 Malformed cache entry, deleting and treating as miss"
        );
        if self.delete(namespace, key).await.is_failed() {
            debug!(key = %full_key, "Malformed entry could not be deleted remotely");
        }
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.operation_timeout, operation)
            .await
            .map_err(|_| CacheError::Timeout(self.operation_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackConfig;
    use crate::resilience::ProbeOutcome;
    use crate::test_helpers::InMemoryCacheBackend;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        size: u32,
    }

    fn item() -> Item {
        Item {
            name: "widget".into(),
            size: 3,
        }
    }

    fn store_with(backend: Arc<InMemoryCacheBackend>, threshold: u32) -> CacheStore {
        let fallback = FallbackManager::new(
            &FallbackConfig {
                failure_threshold: threshold,
                failure_window_seconds: 30,
                cooldown_seconds: 30,
                probe_interval_seconds: 1,
                local_cache_max_entries: 100,
            },
            Duration::from_millis(100),
        );
        CacheStore::new(backend, Arc::new(fallback), "test", Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_miss_without_loader_is_absent() {
        let store = store_with(Arc::new(InMemoryCacheBackend::new()), 3);
        let value: Option<Item> = store.get(CacheNamespace::Settings, "1").await;
        assert!(value.is_none());
        assert_eq!(store.metrics().misses, 1);
    }

    #[tokio::test]
    async fn test_loader_runs_on_miss_and_result_is_cached() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let store = store_with(backend.clone(), 3);

        let loaded = store
            .get_or_load(CacheNamespace::Settings, "1", None, || async {
                Ok::<_, String>(Some(item()))
            })
            .await
            .unwrap();
        assert_eq!(loaded, Some(item()));
        assert!(backend.raw("test:settings:1").is_some());

        // second read is a hit, loader not needed
        let again = store
            .get_or_load(CacheNamespace::Settings, "1", None, || async {
                Err::<Option<Item>, _>("loader must not run".to_string())
            })
            .await
            .unwrap();
        assert_eq!(again, Some(item()));
        assert_eq!(store.metrics().hits, 1);
    }

    #[tokio::test]
    async fn test_loader_error_propagates() {
        let store = store_with(Arc::new(InMemoryCacheBackend::new()), 3);
        let result = store
            .get_or_load(CacheNamespace::Settings, "1", None, || async {
                Err::<Option<Item>, _>("db down".to_string())
            })
            .await;
        assert_eq!(result, Err("db down".to_string()));
    }

    #[tokio::test]
    async fn test_malformed_entry_is_deleted_and_missed() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        backend.put_raw("test:settings:1", "{not json");
        let store = store_with(backend.clone(), 3);

        let value: Option<Item> = store.get(CacheNamespace::Settings, "1").await;
        assert!(value.is_none());
        assert_eq!(store.metrics().malformed, 1);
        assert!(backend.raw("test:settings:1").is_none());
    }

    #[tokio::test]
    async fn test_read_failures_trip_after_threshold() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        backend.disconnect();
        let store = store_with(backend.clone(), 3);

        for _ in 0..3 {
            let _: Option<Item> = store.get(CacheNamespace::Settings, "1").await;
        }
        assert!(store.is_degraded());

        let calls_before = backend.call_count();
        let _: Option<Item> = store.get(CacheNamespace::Settings, "1").await;
        assert_eq!(backend.call_count(), calls_before, "degraded reads must skip the backend");
    }

    #[tokio::test]
    async fn test_failed_set_degrades_immediately_and_keeps_value_locally() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let store = store_with(backend.clone(), 10);
        backend.disconnect();

        let write = store.set(CacheNamespace::Settings, "1", &item(), None).await;
        assert_eq!(write, CacheWrite::Failed);
        assert!(store.is_degraded());

        let value: Option<Item> = store.get(CacheNamespace::Settings, "1").await;
        assert_eq!(value, Some(item()));
        assert_eq!(store.fallback().dirty_key_count(), 1);
    }

    #[tokio::test]
    async fn test_degraded_delete_removes_local_copy() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let store = store_with(backend.clone(), 10);
        store.fallback().force_degraded("test");

        assert_eq!(
            store.set(CacheNamespace::Conversation, "7", &item(), None).await,
            CacheWrite::Degraded
        );
        assert_eq!(
            store.delete(CacheNamespace::Conversation, "7").await,
            CacheWrite::Degraded
        );
        let value: Option<Item> = store.get(CacheNamespace::Conversation, "7").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_populate_does_not_replace_existing_entry() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let store = store_with(backend.clone(), 3);
        let newer = Item {
            name: "widget".into(),
            size: 4,
        };

        store.set(CacheNamespace::Settings, "1", &newer, None).await;
        store.populate(CacheNamespace::Settings, "1", &item(), None).await;

        let value: Option<Item> = store.get(CacheNamespace::Settings, "1").await;
        assert_eq!(value, Some(newer));

        store.populate(CacheNamespace::Settings, "2", &item(), None).await;
        let value: Option<Item> = store.get(CacheNamespace::Settings, "2").await;
        assert_eq!(value, Some(item()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_writes_racing_recovery_leave_no_pre_outage_values() {
        for _ in 0..25 {
            let backend = Arc::new(InMemoryCacheBackend::new());
            let fallback = FallbackManager::new(
                &FallbackConfig {
                    failure_threshold: 3,
                    failure_window_seconds: 30,
                    cooldown_seconds: 0,
                    probe_interval_seconds: 1,
                    local_cache_max_entries: 100,
                },
                Duration::from_millis(500),
            );
            let store = CacheStore::new(
                backend.clone(),
                Arc::new(fallback),
                "test",
                Duration::from_millis(500),
            );
            for i in 0..8 {
                backend.put_raw(&format!("test:settings:{i}"), "\"pre-outage\"");
            }
            store.fallback().force_degraded("test");

            let mut handles = Vec::new();
            for i in 0..8 {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    store
                        .set(CacheNamespace::Settings, &i.to_string(), &format!("fresh-{i}"), None)
                        .await;
                }));
            }
            let recovery = {
                let store = store.clone();
                let backend = backend.clone();
                tokio::spawn(async move {
                    while store.fallback().probe(backend.as_ref()).await != ProbeOutcome::Recovered {
                        tokio::task::yield_now().await;
                    }
                })
            };
            for handle in handles {
                handle.await.unwrap();
            }
            recovery.await.unwrap();

            for i in 0..8 {
                let value: Option<String> = store.get(CacheNamespace::Settings, &i.to_string()).await;
                assert_ne!(value.as_deref(), Some("pre-outage"), "key {i}");
                if let Some(value) = value {
                    assert_eq!(value, format!("fresh-{i}"));
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_counts_as_failure() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        backend.set_latency(Duration::from_secs(1));
        let store = store_with(backend, 1);

        let value: Option<Item> = store.get(CacheNamespace::Settings, "1").await;
        assert!(value.is_none());
        assert_eq!(store.metrics().errors, 1);
        assert!(store.is_degraded());
    }
}

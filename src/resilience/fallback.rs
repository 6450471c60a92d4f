//! # Fallback Manager
//!
//! Owns the process-wide "degraded" state of the remote cache. While
//! degraded, the cache store serves from a bounded in-process map and loads
//! misses from the durable store. Keys mutated while degraded are remembered
//! so recovery can purge them from the remote cache before it is trusted
//! again.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::cache::{CacheBackend, CacheError};
use crate::config::FallbackConfig;

#[derive(Debug, Clone)]
struct LocalEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl LocalEntry {
    fn is_live(&self) -> bool {
        self.expires_at.map(|at| Instant::now() < at).unwrap_or(true)
    }
}

/// Observable state of the fallback manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FallbackStatus {
    Healthy,
    Degraded {
        since: DateTime<Utc>,
        consecutive_failures: u64,
        probing: bool,
    },
}

/// Result of one recovery probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The cache is healthy, nothing to do
    NotDegraded,
    /// Degraded, cool-down not yet elapsed or another probe in flight
    CoolingDown,
    /// Probe ran and the cache is still unavailable
    StillUnavailable,
    /// Probe succeeded and the remote cache is trusted again
    Recovered,
}

#[derive(Debug)]
pub struct FallbackManager {
    breaker: CircuitBreaker,
    local: DashMap<String, LocalEntry>,
    dirty: DashSet<String>,
    max_local_entries: usize,
    operation_timeout: Duration,
    degraded_since: parking_lot::Mutex<Option<DateTime<Utc>>>,
}

impl FallbackManager {
    pub fn new(config: &FallbackConfig, operation_timeout: Duration) -> Self {
        Self {
            breaker: CircuitBreaker::new("remote_cache", CircuitBreakerConfig::from(config)),
            local: DashMap::new(),
            dirty: DashSet::new(),
            max_local_entries: config.local_cache_max_entries,
            operation_timeout,
            degraded_since: parking_lot::Mutex::new(None),
        }
    }

    /// Whether calls must bypass the remote cache
    pub fn is_degraded(&self) -> bool {
        self.breaker.is_open()
    }

    pub fn status(&self) -> FallbackStatus {
        match self.breaker.state() {
            CircuitState::Closed => FallbackStatus::Healthy,
            state => FallbackStatus::Degraded {
                since: self.degraded_since.lock().unwrap_or_else(Utc::now),
                consecutive_failures: self.breaker.metrics().consecutive_failures,
                probing: state == CircuitState::HalfOpen,
            },
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn record_success(&self) {
        self.breaker.record_success();
    }

    /// Count a failed read or best-effort write towards the threshold
    pub fn record_failure(&self, error: &CacheError) {
        warn!(error = %error, "⚠️ Remote cache operation failed");
        if self.breaker.record_failure() {
            self.mark_degraded();
        }
    }

    /// Enter degraded mode immediately. Used when the remote cache may now
    /// hold a value the durable store no longer agrees with.
    pub fn force_degraded(&self, reason: &str) {
        self.breaker.force_open(reason);
        self.mark_degraded();
    }

    fn mark_degraded(&self) {
        let mut since = self.degraded_since.lock();
        if since.is_none() {
            *since = Some(Utc::now());
        }
    }

    /// Remember a key whose remote value can no longer be trusted
    pub fn mark_dirty(&self, key: &str) {
        self.dirty.insert(key.to_string());
    }

    pub fn dirty_key_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn local_get(&self, key: &str) -> Option<String> {
        let entry = self.local.get(key)?;
        if entry.is_live() {
            return Some(entry.value.clone());
        }
        drop(entry);
        self.local.remove(key);
        None
    }

    pub fn local_set(&self, key: &str, value: String, ttl: Option<Duration>) {
        if self.local.len() >= self.max_local_entries && !self.local.contains_key(key) {
            self.evict_one();
        }
        self.local.insert(
            key.to_string(),
            LocalEntry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    /// Insert unless a live entry exists. Returns whether the value was
    /// stored.
    pub fn local_set_if_absent(&self, key: &str, value: String, ttl: Option<Duration>) -> bool {
        if self.local.len() >= self.max_local_entries && !self.local.contains_key(key) {
            self.evict_one();
        }
        let entry = LocalEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        match self.local.entry(key.to_string()) {
            Entry::Occupied(existing) if existing.get().is_live() => false,
            Entry::Occupied(mut expired) => {
                expired.insert(entry);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    /// Keep an authoritative write locally while degraded.
    ///
    /// The key is marked dirty before the degraded flag is re-read, so either
    /// a concurrent recovery purges it or this returns `false` and the caller
    /// must write the remote cache itself.
    pub fn hold_write(&self, key: &str, value: String, ttl: Option<Duration>) -> bool {
        if !self.is_degraded() {
            return false;
        }
        self.mark_dirty(key);
        self.local_set(key, value, ttl);
        if self.is_degraded() {
            return true;
        }
        self.local.remove(key);
        false
    }

    /// Delete counterpart of [`hold_write`](Self::hold_write)
    pub fn hold_delete(&self, key: &str) -> bool {
        self.local.remove(key);
        if !self.is_degraded() {
            return false;
        }
        self.mark_dirty(key);
        self.is_degraded()
    }

    /// Best-effort local insert of a freshly loaded value. Returns `false`
    /// if the breaker closed meanwhile and the remote cache should take it.
    pub fn hold_populate(&self, key: &str, value: String, ttl: Option<Duration>) -> bool {
        if !self.is_degraded() {
            return false;
        }
        let inserted = self.local_set_if_absent(key, value, ttl);
        if self.is_degraded() {
            return true;
        }
        if inserted {
            self.local.remove(key);
        }
        false
    }

    pub fn local_delete(&self, key: &str) {
        self.local.remove(key);
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    fn evict_one(&self) {
        // Expired entries go first, otherwise any entry
        let victim = self
            .local
            .iter()
            .find(|entry| !entry.value().is_live())
            .or_else(|| self.local.iter().next())
            .map(|entry| entry.key().clone());
        if let Some(victim) = victim {
            self.local.remove(&victim);
            debug!(key = %victim, "Evicted entry from degraded-mode local cache");
        }
    }

    /// Ping the backend if the cool-down has elapsed; on success purge dirty
    /// keys from the remote cache and close the circuit.
    pub async fn probe(&self, backend: &dyn CacheBackend) -> ProbeOutcome {
        if !self.is_degraded() {
            return ProbeOutcome::NotDegraded;
        }
        if !self.breaker.begin_probe() {
            return ProbeOutcome::CoolingDown;
        }

        if let Err(e) = self.bounded(backend.ping()).await {
            debug!(error = %e, "Remote cache probe failed");
            self.breaker.probe_failed();
            return ProbeOutcome::StillUnavailable;
        }

        if let Err(e) = self.purge_dirty(backend).await {
            warn!(error = %e, "Failed to purge keys written during degraded mode");
            self.breaker.probe_failed();
            return ProbeOutcome::StillUnavailable;
        }

        self.breaker.probe_succeeded();

        // Keys mutated between the first purge and the close
        if let Err(e) = self.purge_dirty(backend).await {
            self.force_degraded(&format!("post-recovery purge failed: {e}"));
            return ProbeOutcome::StillUnavailable;
        }

        self.local.clear();
        let degraded_for = self
            .degraded_since
            .lock()
            .take()
            .map(|since| Utc::now() - since);
        info!(
            degraded_for_seconds = degraded_for.map(|d| d.num_seconds()),
            "🟢 Remote cache recovered, leaving degraded mode"
        );
        ProbeOutcome::Recovered
    }

    async fn purge_dirty(&self, backend: &dyn CacheBackend) -> Result<(), CacheError> {
        let keys: Vec<String> = self.dirty.iter().map(|k| k.key().clone()).collect();
        for key in keys {
            self.bounded(backend.delete(&key)).await?;
            self.dirty.remove(&key);
        }
        Ok(())
    }

    async fn bounded<T>(
        &self,
        operation: impl std::future::Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.operation_timeout, operation)
            .await
            .map_err(|_| CacheError::Timeout(self.operation_timeout))?
    }
}

//! # Cache Store
//!
//! Namespaced access to the remote key-value cache. The [`CacheStore`] never
//! surfaces a cache failure to its callers: misses and failures both come
//! back as "absent", failures are reported to the
//! [`FallbackManager`](crate::resilience::FallbackManager), and while the
//! breaker is open the remote cache is bypassed entirely.

pub mod metrics;
pub mod redis_backend;
pub mod store;

use async_trait::async_trait;
use std::time::Duration;

pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use redis_backend::RedisCacheBackend;
pub use store::{CacheStore, CacheWrite};

/// Classified remote cache failure. Always non-fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache value could not be encoded: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

/// Raw remote cache operations over fully-qualified string keys
#[async_trait]
pub trait CacheBackend: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Write only if the key is absent (`SET NX`). Returns whether the value
    /// was stored.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Liveness probe
    async fn ping(&self) -> Result<(), CacheError>;
}

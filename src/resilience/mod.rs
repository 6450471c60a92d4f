//! # Resilience Module
//!
//! Circuit breaker and degraded-mode handling for the remote cache. The
//! durable store is deliberately not covered: without ground truth no
//! transaction may proceed.
//!
//! ## Usage
//!
//! ```rust
//! use settings_core::config::SettingsCoreConfig;
//! use settings_core::resilience::FallbackManager;
//!
//! let config = SettingsCoreConfig::for_test();
//! let fallback = FallbackManager::new(&config.fallback, config.cache.operation_timeout());
//! assert!(!fallback.is_degraded());
//! ```

pub mod circuit_breaker;
pub mod fallback;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
pub use fallback::{FallbackManager, FallbackStatus, ProbeOutcome};

//! # Settings Core Configuration
//!
//! YAML-driven configuration with per-environment overrides and environment
//! variable overrides applied on top.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use settings_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let threshold = manager.config().fallback.failure_threshold;
//! let sweep = manager.config().conversation.sweep_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/settings-core.yaml`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SettingsCoreConfig {
    /// Environment name, filled in by the loader
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Durable store connection settings
    pub database: DatabaseConfig,

    /// Remote cache connection and key settings
    pub cache: CacheConfig,

    /// Circuit breaker over the remote cache
    pub fallback: FallbackConfig,

    /// Ephemeral conversation state settings
    pub conversation: ConversationConfig,

    /// Startup warmup and integrity sampling
    pub warmup: WarmupConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

/// PostgreSQL connection and pooling configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Acquire timeout; an exceeded timeout is a hard durable store failure
    pub acquire_timeout_seconds: u64,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    /// Database URL, falling back to `DATABASE_URL`
    pub fn database_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }
}

/// Remote cache configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheConfig {
    pub redis_url: String,
    /// Prefix for every key this process writes
    pub key_prefix: String,
    /// Upper bound on a single remote cache call
    pub operation_timeout_ms: u64,
    /// TTL of the pre-rendered settings summary
    pub summary_ttl_seconds: u64,
}

impl CacheConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn summary_ttl(&self) -> Duration {
        Duration::from_secs(self.summary_ttl_seconds)
    }
}

/// Circuit breaker configuration for the remote cache
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FallbackConfig {
    /// Consecutive failures that flip the degraded flag
    pub failure_threshold: u32,
    /// Failures further apart than this restart the count
    pub failure_window_seconds: u64,
    /// Minimum time spent degraded before the probe may recover
    pub cooldown_seconds: u64,
    pub probe_interval_seconds: u64,
    /// Size bound of the in-process map used while degraded
    pub local_cache_max_entries: usize,
}

impl FallbackConfig {
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_seconds)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds)
    }
}

/// Conversation state configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConversationConfig {
    pub default_ttl_minutes: u32,
    pub sweep_interval_seconds: u64,
}

impl ConversationConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Warmup and integrity sampling configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WarmupConfig {
    pub enabled: bool,
    /// Accounts active within this window are warmed at startup
    pub lookback_hours: u32,
    pub max_accounts: u32,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub batch_delay_ms: u64,
    pub integrity_interval_seconds: u64,
    pub integrity_sample_size: usize,
}

impl WarmupConfig {
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.lookback_hours))
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn integrity_interval(&self) -> Duration {
        Duration::from_secs(self.integrity_interval_seconds)
    }
}

impl Default for SettingsCoreConfig {
    /// Production defaults
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                min_connections: 2,
                acquire_timeout_seconds: 5,
            },
            cache: CacheConfig {
                redis_url: "redis://127.0.0.1:6379".to_string(),
                key_prefix: "settings_core".to_string(),
                operation_timeout_ms: 50,
                summary_ttl_seconds: 300,
            },
            fallback: FallbackConfig {
                failure_threshold: 5,
                failure_window_seconds: 30,
                cooldown_seconds: 30,
                probe_interval_seconds: 5,
                local_cache_max_entries: 10_000,
            },
            conversation: ConversationConfig {
                default_ttl_minutes: 10,
                sweep_interval_seconds: 300,
            },
            warmup: WarmupConfig {
                enabled: true,
                lookback_hours: 24,
                max_accounts: 5_000,
                batch_size: 100,
                max_concurrency: 10,
                batch_delay_ms: 50,
                integrity_interval_seconds: 60,
                integrity_sample_size: 50,
            },
        }
    }
}

impl SettingsCoreConfig {
    /// Test configuration: tight thresholds, no warmup pauses
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.environment = "test".to_string();
        config.cache.key_prefix = "settings_core_test".to_string();
        config.cache.operation_timeout_ms = 100;
        config.cache.summary_ttl_seconds = 5;
        config.fallback.failure_threshold = 3;
        config.fallback.failure_window_seconds = 10;
        config.fallback.cooldown_seconds = 1;
        config.fallback.probe_interval_seconds = 1;
        config.fallback.local_cache_max_entries = 100;
        config.conversation.sweep_interval_seconds = 300;
        config.warmup.enabled = false;
        config.warmup.batch_size = 10;
        config.warmup.max_concurrency = 4;
        config.warmup.batch_delay_ms = 0;
        config.warmup.integrity_sample_size = 5;
        config
    }

    /// Development configuration: more generous cache timeout, small warmup
    pub fn for_development() -> Self {
        let mut config = Self::default();
        config.environment = "development".to_string();
        config.cache.operation_timeout_ms = 250;
        config.cache.summary_ttl_seconds = 60;
        config.warmup.max_accounts = 500;
        config.warmup.integrity_sample_size = 10;
        config
    }

    /// Preset for an environment name
    pub fn for_environment(environment: &str) -> Self {
        match environment {
            "test" => Self::for_test(),
            "development" => Self::for_development(),
            _ => Self::default(),
        }
    }

    /// Validate value ranges that would otherwise fail at runtime
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "must be greater than zero",
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigurationError::invalid_value(
                "database.min_connections",
                self.database.min_connections.to_string(),
                "must not exceed max_connections",
            ));
        }
        if self.cache.redis_url.is_empty() {
            return Err(ConfigurationError::missing_required_field("cache.redis_url"));
        }
        if self.cache.operation_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.operation_timeout_ms",
                "0",
                "must be greater than zero",
            ));
        }
        if self.fallback.failure_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "fallback.failure_threshold",
                "0",
                "must be greater than zero",
            ));
        }
        if self.fallback.probe_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "fallback.probe_interval_seconds",
                "0",
                "must be greater than zero",
            ));
        }
        if self.conversation.default_ttl_minutes == 0 {
            return Err(ConfigurationError::invalid_value(
                "conversation.default_ttl_minutes",
                "0",
                "must be greater than zero",
            ));
        }
        if self.conversation.sweep_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "conversation.sweep_interval_seconds",
                "0",
                "must be greater than zero",
            ));
        }
        if self.warmup.batch_size == 0 || self.warmup.max_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "warmup.batch_size/max_concurrency",
                format!("{}/{}", self.warmup.batch_size, self.warmup.max_concurrency),
                "must be greater than zero",
            ));
        }
        if self.warmup.integrity_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "warmup.integrity_interval_seconds",
                "0",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert!(SettingsCoreConfig::default().validate().is_ok());
        assert!(SettingsCoreConfig::for_test().validate().is_ok());
        assert!(SettingsCoreConfig::for_development().validate().is_ok());
    }

    #[test]
    fn test_for_environment_selects_preset() {
        assert_eq!(SettingsCoreConfig::for_environment("test").environment, "test");
        assert_eq!(
            SettingsCoreConfig::for_environment("staging").environment,
            "production"
        );
    }

    #[test]
    fn test_validation_rejects_zero_threshold() {
        let mut config = SettingsCoreConfig::for_test();
        config.fallback.failure_threshold = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fallback.failure_threshold"));
    }

    #[test]
    fn test_validation_rejects_min_above_max_connections() {
        let mut config = SettingsCoreConfig::default();
        config.database.min_connections = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_helpers() {
        let config = SettingsCoreConfig::default();
        assert_eq!(config.cache.operation_timeout(), Duration::from_millis(50));
        assert_eq!(config.conversation.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.warmup.lookback(), chrono::Duration::hours(24));
    }
}

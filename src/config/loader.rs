//! Configuration Loader
//!
//! Environment-aware configuration loading. The environment preset is the
//! base layer, the YAML file is merged over it, the file's environment
//! section is merged over that, and environment variables win last.

use super::error::{ConfigResult, ConfigurationError};
use super::SettingsCoreConfig;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CONFIG_FILE_NAMES: [&str; 2] = ["settings-core.yaml", "settings-core.yml"];
const ENVIRONMENT_SECTIONS: [&str; 3] = ["development", "test", "production"];

/// Loaded configuration plus the context it was loaded from
#[derive(Debug)]
pub struct ConfigManager {
    config: SettingsCoreConfig,
    environment: String,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// A missing file is not an error: the environment preset is used.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading settings core configuration"
        );

        let config_file = Self::find_config_file(&config_directory);
        let mut config = match &config_file {
            Some(path) => Self::load_and_merge_config(path, environment)?,
            None => {
                warn!(
                    directory = %config_directory.display(),
                    "No configuration file found, using environment preset"
                );
                SettingsCoreConfig::for_environment(environment)
            }
        };
        config.environment = environment.to_string();

        let config = Self::apply_env_overrides_with(config, |key| env::var(key).ok());
        config.validate()?;

        info!(
            environment = %environment,
            config = %Self::sanitize_config_for_logging(&config),
            "⚙️ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_file,
        }))
    }

    /// Wrap an already-built configuration (tests, embedding applications)
    pub fn from_config(config: SettingsCoreConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            environment: config.environment.clone(),
            config,
            config_file: None,
        }))
    }

    pub fn config(&self) -> &SettingsCoreConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Detect current environment from environment variables
    fn detect_environment() -> String {
        env::var("SETTINGS_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn find_config_file(config_directory: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| config_directory.join(name))
            .find(|path| path.is_file())
    }

    /// Read a configuration file with a size limit
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                "configuration file larger than 1MB",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    fn load_and_merge_config(
        config_file: &Path,
        environment: &str,
    ) -> ConfigResult<SettingsCoreConfig> {
        let yaml_content = Self::read_config_file_safely(config_file)?;
        let path = config_file.display().to_string();

        let mut file_data: YamlValue = serde_yaml::from_str(&yaml_content)
            .map_err(|e| ConfigurationError::invalid_yaml(path.clone(), e))?;

        let env_overrides = file_data
            .get(YamlValue::String(environment.to_string()))
            .cloned();

        if let YamlValue::Mapping(ref mut map) = file_data {
            for section in ENVIRONMENT_SECTIONS {
                map.remove(YamlValue::String(section.to_string()));
            }
        }

        let mut merged = serde_yaml::to_value(SettingsCoreConfig::for_environment(environment))
            .map_err(|e| ConfigurationError::invalid_yaml(path.clone(), e))?;
        Self::merge_yaml_values(&mut merged, file_data);

        if let Some(env_overrides) = env_overrides {
            debug!(environment = %environment, "Applying environment-specific overrides");
            Self::merge_yaml_values(&mut merged, env_overrides);
        }

        serde_yaml::from_value(merged).map_err(|e| {
            ConfigurationError::invalid_yaml(path, format!("Failed to deserialize configuration: {e}"))
        })
    }

    /// Recursively merge YAML mappings; scalars and sequences are replaced
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    if let Some(existing_value) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing_value, value);
                    } else {
                        base_map.insert(key, value);
                    }
                }
            }
            (base_ref, override_val) => {
                *base_ref = override_val;
            }
        }
    }

    /// Apply environment variable overrides using the given lookup
    pub fn apply_env_overrides_with<F>(mut config: SettingsCoreConfig, lookup: F) -> SettingsCoreConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            config.database.url = Some(url);
            info!("Database URL override from DATABASE_URL");
        }

        if let Some(url) = lookup("REDIS_URL") {
            config.cache.redis_url = url;
            info!("Redis URL override from REDIS_URL");
        }

        if let Some(value) = lookup("SETTINGS_CACHE_OPERATION_TIMEOUT_MS") {
            if let Ok(ms) = value.parse::<u64>() {
                config.cache.operation_timeout_ms = ms;
                info!("Cache operation timeout override: {}ms", ms);
            }
        }

        if let Some(value) = lookup("SETTINGS_FALLBACK_FAILURE_THRESHOLD") {
            if let Ok(threshold) = value.parse::<u32>() {
                config.fallback.failure_threshold = threshold;
                info!("Fallback failure threshold override: {}", threshold);
            }
        }

        if let Some(value) = lookup("SETTINGS_FALLBACK_COOLDOWN_SECONDS") {
            if let Ok(seconds) = value.parse::<u64>() {
                config.fallback.cooldown_seconds = seconds;
                info!("Fallback cooldown override: {}s", seconds);
            }
        }

        if let Some(value) = lookup("SETTINGS_CONVERSATION_SWEEP_INTERVAL_SECONDS") {
            if let Ok(seconds) = value.parse::<u64>() {
                config.conversation.sweep_interval_seconds = seconds;
                info!("Conversation sweep interval override: {}s", seconds);
            }
        }

        if let Some(value) = lookup("SETTINGS_WARMUP_ENABLED") {
            config.warmup.enabled = value.parse().unwrap_or(config.warmup.enabled);
            info!("Warmup enabled override: {}", config.warmup.enabled);
        }

        config
    }

    /// JSON view of the configuration with connection strings masked
    fn sanitize_config_for_logging(config: &SettingsCoreConfig) -> serde_json::Value {
        let mut value = serde_json::json!(config);
        Self::sanitize_json_recursive(&mut value);
        value
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value) {
        const SENSITIVE_PATTERNS: [&str; 4] = ["url", "password", "secret", "token"];

        if let serde_json::Value::Object(map) = value {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                if SENSITIVE_PATTERNS.iter().any(|p| key_lower.contains(p)) {
                    if let serde_json::Value::String(s) = val {
                        *val = serde_json::Value::String(Self::mask_url(s));
                    }
                } else {
                    Self::sanitize_json_recursive(val);
                }
            }
        }
    }

    /// Keep scheme and host, drop credentials
    fn mask_url(raw: &str) -> String {
        match (raw.find("://"), raw.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://***{}", &raw[..scheme_end], &raw[at..])
            }
            _ => raw.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    const TEST_YAML: &str = r#"
cache:
  redis_url: "redis://cache.internal:6379"
  key_prefix: "bot"
fallback:
  failure_threshold: 7
development:
  fallback:
    failure_threshold: 2
test:
  cache:
    key_prefix: "bot_test"
"#;

    fn setup_config_dir(contents: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("settings-core.yaml"), contents).unwrap();
        dir
    }

    #[test]
    fn test_base_file_merges_over_preset() {
        let dir = setup_config_dir(TEST_YAML);
        let path = dir.path().join("settings-core.yaml");
        let config = ConfigManager::load_and_merge_config(&path, "production").unwrap();

        assert_eq!(config.cache.redis_url, "redis://cache.internal:6379");
        assert_eq!(config.cache.key_prefix, "bot");
        assert_eq!(config.fallback.failure_threshold, 7);
        // untouched values come from the production preset
        assert_eq!(config.conversation.sweep_interval_seconds, 300);
    }

    #[test]
    fn test_environment_section_overrides_base() {
        let dir = setup_config_dir(TEST_YAML);
        let path = dir.path().join("settings-core.yaml");

        let dev = ConfigManager::load_and_merge_config(&path, "development").unwrap();
        assert_eq!(dev.fallback.failure_threshold, 2);
        assert_eq!(dev.cache.key_prefix, "bot");

        let test = ConfigManager::load_and_merge_config(&path, "test").unwrap();
        assert_eq!(test.fallback.failure_threshold, 7);
        assert_eq!(test.cache.key_prefix, "bot_test");
    }

    #[test]
    fn test_missing_file_uses_preset() {
        let dir = TempDir::new().unwrap();
        assert!(ConfigManager::find_config_file(dir.path()).is_none());
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let dir = setup_config_dir("cache: [unterminated");
        let path = dir.path().join("settings-core.yaml");
        let err = ConfigManager::load_and_merge_config(&path, "test").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidYaml { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("REDIS_URL", "redis://override:6380"),
            ("SETTINGS_FALLBACK_FAILURE_THRESHOLD", "9"),
            ("SETTINGS_WARMUP_ENABLED", "false"),
            ("SETTINGS_FALLBACK_COOLDOWN_SECONDS", "not-a-number"),
        ]);
        let config = ConfigManager::apply_env_overrides_with(SettingsCoreConfig::default(), |key| {
            vars.get(key).map(|v| v.to_string())
        });

        assert_eq!(config.cache.redis_url, "redis://override:6380");
        assert_eq!(config.fallback.failure_threshold, 9);
        assert!(!config.warmup.enabled);
        assert_eq!(config.fallback.cooldown_seconds, 30);
    }

    #[test]
    fn test_config_sanitization_masks_credentials() {
        let mut config = SettingsCoreConfig::default();
        config.database.url = Some("postgresql://trader:hunter2@db:5432/bot".to_string());
        let sanitized = ConfigManager::sanitize_config_for_logging(&config).to_string();

        assert!(!sanitized.contains("hunter2"));
        assert!(sanitized.contains("postgresql://***@db:5432/bot"));
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = SettingsCoreConfig::for_test();
        config.warmup.batch_size = 0;
        assert!(ConfigManager::from_config(config).is_err());
    }
}

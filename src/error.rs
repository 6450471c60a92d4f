use crate::cache::CacheError;
use crate::config::ConfigurationError;
use crate::database::DurableStoreError;

/// Error taxonomy for the settings core.
///
/// Only `DurableStoreUnavailable`, `Validation` and `Configuration` ever reach
/// callers of the public operations. Cache failures are absorbed at the cache
/// store boundary and integrity violations are repaired in place.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("Durable store unavailable: {0}")]
    DurableStoreUnavailable(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Integrity violation for account {account_id}: fields {fields:?}")]
    IntegrityViolation {
        account_id: i64,
        fields: Vec<String>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SettingsError {
    /// Whether the current call must abort because ground truth is unreachable
    pub fn is_fatal(&self) -> bool {
        matches!(self, SettingsError::DurableStoreUnavailable(_))
    }

    /// Message safe to show an end user. Internal error classes are never
    /// surfaced verbatim.
    pub fn user_message(&self) -> &'static str {
        match self {
            SettingsError::Validation(_) => "That value isn't valid. Please check it and try again.",
            _ => "Something went wrong while loading your settings. Please try again in a moment.",
        }
    }
}

impl From<DurableStoreError> for SettingsError {
    fn from(err: DurableStoreError) -> Self {
        SettingsError::DurableStoreUnavailable(err.to_string())
    }
}

impl From<CacheError> for SettingsError {
    fn from(err: CacheError) -> Self {
        SettingsError::CacheUnavailable(err.to_string())
    }
}

impl From<ConfigurationError> for SettingsError {
    fn from(err: ConfigurationError) -> Self {
        SettingsError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;

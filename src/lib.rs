#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, Redis in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Settings Core
//!
//! Cache-consistency layer for a trading assistant's per-account settings.
//!
//! ## Overview
//!
//! Settings that determine how real-money transactions execute (gas price,
//! slippage, auto-buy amount, quick-trade presets) live in PostgreSQL, the
//! source of truth, and are mirrored in Redis for hot-path latency. A stale
//! cached slippage value can lose money, so the cache for these values is
//! write-through, field-complete and validated against the durable store
//! before a transaction executes.
//!
//! ## Architecture
//!
//! - **Cache Store**: namespaced get/set/delete with loader-on-miss; cache
//!   failures read as misses and never surface to callers
//! - **Fallback Manager**: circuit breaker over the remote cache; while
//!   degraded, reads go to an in-process map and the durable store
//! - **Critical Settings Cache**: persistent entries, write-through mutation,
//!   field-by-field integrity validation and repair
//! - **Conversation State Store**: TTL-bound per-account flow state with a
//!   periodic sweep
//! - **Warmup**: pre-population for recently active accounts and rotating
//!   integrity sampling
//! - **Transaction Parameter Resolver**: category to parameter mapping with
//!   system defaults
//!
//! ## Module Organization
//!
//! - [`service`] - Public facade
//! - [`settings`] - Critical settings cache and derived summary cache
//! - [`state`] - Conversation state
//! - [`cache`] - Cache store and Redis backend
//! - [`resilience`] - Circuit breaker and fallback manager
//! - [`database`] - Durable store trait and PostgreSQL implementation
//! - [`background`] - Periodic task scheduler
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use settings_core::config::ConfigManager;
//! use settings_core::resolver::TransactionCategory;
//! use settings_core::service::SettingsService;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! settings_core::logging::init_structured_logging();
//!
//! let manager = ConfigManager::load()?;
//! let service = SettingsService::from_config(&manager).await?;
//! service.start_background_tasks();
//!
//! if let Some(params) = service
//!     .get_validated_transaction_params(42, TransactionCategory::Buy)
//!     .await?
//! {
//!     println!("slippage: {}%", params.slippage());
//! }
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod cache;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod resilience;
pub mod resolver;
pub mod service;
pub mod settings;
pub mod state;
pub mod utils;
pub mod warmup;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

pub use cache::{CacheBackend, CacheStore, RedisCacheBackend};
pub use config::{ConfigManager, SettingsCoreConfig};
pub use constants::CacheNamespace;
pub use database::{DurableStore, PgDurableStore};
pub use error::{Result, SettingsError};
pub use models::{AccountSettings, ConversationState, SettingsUpdate};
pub use resolver::{TransactionCategory, TransactionParams};
pub use service::{ServiceMetrics, SettingsService};
pub use settings::IntegrityReport;
pub use utils::{Clock, ManualClock, SystemClock};

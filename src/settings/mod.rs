//! # Settings
//!
//! The critical settings cache and the caches derived from it.

pub mod critical;
pub mod summary;

pub use critical::{CriticalSettingsCache, IntegrityReport};
pub use summary::{render_summary, SettingsSummaryCache};

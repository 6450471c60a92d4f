//! # Background Tasks
//!
//! Periodic maintenance (conversation sweep, integrity sampling, cache
//! recovery probing) and the one-shot startup warmup. All of it runs off the
//! request path under a [`BackgroundScheduler`].

pub mod scheduler;
pub mod tasks;

pub use scheduler::{BackgroundScheduler, PeriodicTask};
pub use tasks::{CacheRecoveryTask, ConversationSweepTask, IntegritySamplerTask};

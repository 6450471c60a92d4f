use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::PeriodicTask;
use crate::cache::CacheBackend;
use crate::error::Result;
use crate::resilience::{FallbackManager, ProbeOutcome};
use crate::state::ConversationStateStore;
use crate::warmup::WarmupService;

/// Deletes expired conversation state rows
#[derive(Debug)]
pub struct ConversationSweepTask {
    states: ConversationStateStore,
    interval: Duration,
}

impl ConversationSweepTask {
    pub fn new(states: ConversationStateStore, interval: Duration) -> Self {
        Self { states, interval }
    }
}

#[async_trait]
impl PeriodicTask for ConversationSweepTask {
    fn name(&self) -> &'static str {
        "conversation_sweep"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> Result<()> {
        self.states.sweep_expired().await.map(|_| ())
    }
}

/// Validates a rotating sample of active accounts
#[derive(Debug)]
pub struct IntegritySamplerTask {
    warmup: Arc<WarmupService>,
    interval: Duration,
}

impl IntegritySamplerTask {
    pub fn new(warmup: Arc<WarmupService>, interval: Duration) -> Self {
        Self { warmup, interval }
    }
}

#[async_trait]
impl PeriodicTask for IntegritySamplerTask {
    fn name(&self) -> &'static str {
        "integrity_sampler"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> Result<()> {
        self.warmup.sample_integrity().await.map(|_| ())
    }
}

/// Probes the remote cache while degraded and re-warms after recovery,
/// since the in-process map was discarded on the way out
#[derive(Debug)]
pub struct CacheRecoveryTask {
    fallback: Arc<FallbackManager>,
    backend: Arc<dyn CacheBackend>,
    warmup: Arc<WarmupService>,
    interval: Duration,
}

impl CacheRecoveryTask {
    pub fn new(
        fallback: Arc<FallbackManager>,
        backend: Arc<dyn CacheBackend>,
        warmup: Arc<WarmupService>,
        interval: Duration,
    ) -> Self {
        Self {
            fallback,
            backend,
            warmup,
            interval,
        }
    }
}

#[async_trait]
impl PeriodicTask for CacheRecoveryTask {
    fn name(&self) -> &'static str {
        "cache_recovery_probe"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> Result<()> {
        match self.fallback.probe(self.backend.as_ref()).await {
            ProbeOutcome::Recovered => {
                info!("Remote cache recovered, re-warming active accounts");
                if self.warmup.config().enabled {
                    self.warmup.warm_recently_active().await?;
                }
            }
            ProbeOutcome::StillUnavailable => {
                warn!("Remote cache still unavailable, staying in degraded mode");
            }
            outcome => debug!(outcome = ?outcome, "Recovery probe skipped"),
        }
        Ok(())
    }
}

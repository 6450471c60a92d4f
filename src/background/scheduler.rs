use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Work that runs on a fixed interval until stopped
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// One tick. Errors are logged and the task runs again next tick.
    async fn run_once(&self) -> Result<()>;
}

#[derive(Debug)]
struct TaskHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Owns the background tasks. Each task has its own shutdown signal and
/// join handle, so it can be stopped (graceful, waits for the current tick)
/// or cancelled (aborted) independently.
#[derive(Debug, Default)]
pub struct BackgroundScheduler {
    tasks: Mutex<HashMap<&'static str, TaskHandle>>,
}

impl BackgroundScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a periodic task. The first tick fires one interval after start.
    /// Returns `false` if a task with the same name is already running.
    pub fn start(&self, task: Arc<dyn PeriodicTask>) -> bool {
        let name = task.name();
        let mut tasks = self.tasks.lock();
        if tasks.get(name).is_some_and(|h| !h.join.is_finished()) {
            warn!(task = name, "Background task already running");
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = task.interval();

        let join = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(task = name, interval_ms = period.as_millis() as u64, "▶️ Background task started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!(task = name, "Running background task tick");
                        if let Err(e) = task.run_once().await {
                            error!(task = name, error = %e, "Background task tick failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(task = name, "⏹️ Background task stopped");
        });

        tasks.insert(name, TaskHandle { shutdown, join });
        true
    }

    /// Run a future once in the background under `name`, stoppable like a
    /// periodic task
    pub fn start_once<F>(&self, name: &'static str, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        if tasks.get(name).is_some_and(|h| !h.join.is_finished()) {
            warn!(task = name, "Background task already running");
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            tokio::select! {
                _ = work => debug!(task = name, "One-shot background task finished"),
                _ = shutdown_rx.changed() => info!(task = name, "One-shot background task stopped early"),
            }
        });

        tasks.insert(name, TaskHandle { shutdown, join });
        true
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .lock()
            .get(name)
            .is_some_and(|h| !h.join.is_finished())
    }

    pub fn running_tasks(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .tasks
            .lock()
            .iter()
            .filter(|(_, h)| !h.join.is_finished())
            .map(|(name, _)| *name)
            .collect();
        names.sort_unstable();
        names
    }

    /// Signal the task and wait for it to exit. Returns `false` if no task
    /// with that name was registered.
    pub async fn stop(&self, name: &str) -> bool {
        let Some(handle) = self.tasks.lock().remove(name) else {
            return false;
        };
        let _ = handle.shutdown.send(true);
        if let Err(e) = handle.join.await {
            if !e.is_cancelled() {
                error!(task = name, error = %e, "Background task panicked");
            }
        }
        true
    }

    /// Abort the task without waiting for the current tick
    pub fn cancel(&self, name: &str) -> bool {
        match self.tasks.lock().remove(name) {
            Some(handle) => {
                handle.join.abort();
                info!(task = name, "Background task cancelled");
                true
            }
            None => false,
        }
    }

    /// Stop every task
    pub async fn shutdown(&self) {
        let handles: Vec<(&'static str, TaskHandle)> = self.tasks.lock().drain().collect();
        for (_, handle) in &handles {
            let _ = handle.shutdown.send(true);
        }
        for (name, handle) in handles {
            if let Err(e) = handle.join.await {
                if !e.is_cancelled() {
                    error!(task = name, error = %e, "Background task panicked");
                }
            }
        }
    }
}

//! # Circuit Breaker Implementation
//!
//! Three-state breaker guarding the remote cache: Closed (normal operation),
//! Open (cache bypassed) and Half-Open (a recovery probe is in flight).
//!
//! Unlike a request-path breaker, regular calls never move the circuit out of
//! Open. Only the periodic probe does, once the cool-down has elapsed.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, the remote cache is used
    Closed = 0,
    /// Degraded, the remote cache is bypassed
    Open = 1,
    /// Degraded, a recovery probe is running
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            // Default to safest state
            _ => CircuitState::Open,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Failures further apart than this restart the consecutive count
    pub failure_window: Duration,
    /// Time the circuit stays open before a probe may run
    pub cooldown: Duration,
}

impl From<&crate::config::FallbackConfig> for CircuitBreakerConfig {
    fn from(config: &crate::config::FallbackConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            failure_window: config.failure_window(),
            cooldown: config.cooldown(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u64,
    /// Times the circuit opened
    pub trips: u64,
    /// Times a probe closed the circuit
    pub recoveries: u64,
}

#[derive(Debug, Default)]
struct BreakerTimes {
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
}

/// Circuit breaker with atomic state and mutex-guarded counters
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging
    name: String,
    state: AtomicU8,
    config: CircuitBreakerConfig,
    metrics: Mutex<CircuitBreakerMetrics>,
    times: Mutex<BreakerTimes>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            failure_window_seconds = config.failure_window.as_secs(),
            cooldown_seconds = config.cooldown.as_secs(),
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            metrics: Mutex::new(CircuitBreakerMetrics::default()),
            times: Mutex::new(BreakerTimes::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Open or half-open
    pub fn is_open(&self) -> bool {
        self.state() != CircuitState::Closed
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.times.lock().opened_at
    }

    pub fn record_success(&self) {
        let mut metrics = self.metrics.lock();
        metrics.total_calls += 1;
        metrics.success_count += 1;
        if self.state() == CircuitState::Closed {
            metrics.consecutive_failures = 0;
        }
    }

    /// Record a failure. Returns `true` if this call opened the circuit.
    pub fn record_failure(&self) -> bool {
        let now = Instant::now();
        let mut metrics = self.metrics.lock();
        let mut times = self.times.lock();

        metrics.total_calls += 1;
        metrics.failure_count += 1;

        let window_expired = times
            .last_failure_at
            .map(|last| now.duration_since(last) > self.config.failure_window)
            .unwrap_or(false);
        if window_expired {
            metrics.consecutive_failures = 0;
        }
        metrics.consecutive_failures += 1;
        times.last_failure_at = Some(now);

        debug!(
            component = %self.name,
            consecutive_failures = metrics.consecutive_failures,
            "🔴 Operation failed"
        );

        if metrics.consecutive_failures < u64::from(self.config.failure_threshold) {
            return false;
        }

        let tripped = self.try_transition(CircuitState::Closed, CircuitState::Open);
        if tripped {
            times.opened_at = Some(now);
            metrics.trips += 1;
            error!(
                component = %self.name,
                consecutive_failures = metrics.consecutive_failures,
                failure_threshold = self.config.failure_threshold,
                cooldown_seconds = self.config.cooldown.as_secs(),
                "🔴 Circuit breaker opened (degraded mode)"
            );
        }
        tripped
    }

    /// Whether the cool-down since opening has elapsed
    pub fn cooldown_elapsed(&self) -> bool {
        self.times
            .lock()
            .opened_at
            .map(|opened| opened.elapsed() >= self.config.cooldown)
            .unwrap_or(true)
    }

    /// Move Open → HalfOpen if the cool-down has elapsed. Returns `true` if
    /// the caller now owns the probe.
    pub fn begin_probe(&self) -> bool {
        if self.state() != CircuitState::Open || !self.cooldown_elapsed() {
            return false;
        }
        let acquired = self.try_transition(CircuitState::Open, CircuitState::HalfOpen);
        if acquired {
            info!(component = %self.name, "🟡 Circuit breaker half-open (probing recovery)");
        }
        acquired
    }

    /// Close the circuit after a successful probe
    pub fn probe_succeeded(&self) {
        if !self.try_transition(CircuitState::HalfOpen, CircuitState::Closed) {
            return;
        }
        let mut metrics = self.metrics.lock();
        let mut times = self.times.lock();
        metrics.consecutive_failures = 0;
        metrics.recoveries += 1;
        times.opened_at = None;
        times.last_failure_at = None;

        info!(
            component = %self.name,
            recoveries = metrics.recoveries,
            "🟢 Circuit breaker closed (recovered)"
        );
    }

    /// Re-open after a failed probe, restarting the cool-down
    pub fn probe_failed(&self) {
        if self.try_transition(CircuitState::HalfOpen, CircuitState::Open) {
            self.times.lock().opened_at = Some(Instant::now());
            warn!(component = %self.name, "🔴 Recovery probe failed, cool-down restarted");
        }
    }

    /// Force circuit to open state, e.g. after a failed authoritative write
    pub fn force_open(&self, reason: &str) {
        let previous = CircuitState::from(
            self.state
                .swap(CircuitState::Open as u8, Ordering::AcqRel),
        );
        self.times.lock().opened_at = Some(Instant::now());
        if previous == CircuitState::Closed {
            self.metrics.lock().trips += 1;
        }
        warn!(component = %self.name, reason = %reason, "🚨 Circuit breaker forced open");
    }

    /// Force circuit to closed state (operator recovery)
    pub fn force_closed(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.metrics.lock().consecutive_failures = 0;
        let mut times = self.times.lock();
        times.opened_at = None;
        times.last_failure_at = None;
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.metrics.lock().clone()
    }

    fn try_transition(&self, from: CircuitState, to: CircuitState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            failure_window: Duration::from_secs(10),
            cooldown: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_on_consecutive_failures() {
        let circuit = CircuitBreaker::new("test", config(3));
        assert_eq!(circuit.state(), CircuitState::Closed);

        assert!(!circuit.record_failure());
        assert!(!circuit.record_failure());
        assert!(circuit.record_failure());
        assert_eq!(circuit.state(), CircuitState::Open);
        assert_eq!(circuit.metrics().trips, 1);

        // already open, nobody else trips it
        assert!(!circuit.record_failure());
        assert_eq!(circuit.metrics().trips, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let circuit = CircuitBreaker::new("test", config(2));
        circuit.record_failure();
        circuit.record_success();
        assert!(!circuit.record_failure());
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_do_not_accumulate() {
        let circuit = CircuitBreaker::new("test", config(2));
        circuit.record_failure();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!circuit.record_failure());
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert!(circuit.record_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_requires_cooldown() {
        let circuit = CircuitBreaker::new("test", config(1));
        circuit.record_failure();
        assert!(!circuit.begin_probe());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(circuit.begin_probe());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        // only one probe at a time
        assert!(!circuit.begin_probe());

        circuit.probe_succeeded();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.metrics().recoveries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_restarts_cooldown() {
        let circuit = CircuitBreaker::new("test", config(1));
        circuit.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(circuit.begin_probe());

        circuit.probe_failed();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(!circuit.cooldown_elapsed());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(circuit.cooldown_elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_operations() {
        let circuit = CircuitBreaker::new("test", config(10));

        circuit.force_open("test");
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(circuit.is_open());

        circuit.force_closed();
        assert_eq!(circuit.state(), CircuitState::Closed);
    }
}

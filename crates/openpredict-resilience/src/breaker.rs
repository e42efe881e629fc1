//! Circuit breaker: per-dependency failure isolation.
//!
//! Three-state FSM per named dependency:
//!
//! - **closed**: calls pass through; outcomes land in a rolling window.
//!   Once the window holds at least `min_samples` calls and either the
//!   failure rate or the slow-call rate crosses its threshold, the
//!   breaker opens and stamps a next-attempt time.
//! - **open**: calls short-circuit with [`OpenpredictError::CircuitOpen`]
//!   until the cooldown elapses, then the breaker goes half-open.
//! - **half-open**: up to `half_open_probes` calls proceed concurrently.
//!   All probes succeeding closes the breaker and resets the window; any
//!   failure re-opens it with the cooldown doubled (capped).
//!
//! State and window updates are short critical sections under one mutex,
//! so transitions appear atomic to concurrent callers.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use openpredict_types::{BreakerConfig, OpenpredictError, Result};

/// Outcome of one recorded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy)]
struct CallRecord {
    outcome: Outcome,
    latency: Duration,
}

/// Fixed-size ring buffer of the last N call outcomes.
#[derive(Debug)]
struct RollingWindow {
    records: Vec<CallRecord>,
    next: usize,
    size: usize,
}

impl RollingWindow {
    fn new(size: usize) -> Self {
        Self {
            records: Vec::with_capacity(size),
            next: 0,
            size,
        }
    }

    fn push(&mut self, record: CallRecord) {
        if self.records.len() < self.size {
            self.records.push(record);
        } else {
            self.records[self.next] = record;
            self.next = (self.next + 1) % self.size;
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn failure_rate_pct(&self) -> u32 {
        if self.records.is_empty() {
            return 0;
        }
        let failures = self
            .records
            .iter()
            .filter(|r| r.outcome == Outcome::Failure)
            .count();
        (failures * 100 / self.records.len()) as u32
    }

    fn slow_rate_pct(&self, threshold: Duration) -> u32 {
        if self.records.is_empty() {
            return 0;
        }
        let slow = self.records.iter().filter(|r| r.latency > threshold).count();
        (slow * 100 / self.records.len()) as u32
    }

    fn clear(&mut self) {
        self.records.clear();
        self.next = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { in_flight: usize, successes: usize },
}

#[derive(Debug)]
struct BreakerInner {
    phase: Phase,
    window: RollingWindow,
    /// Current cooldown; doubles on each re-open, capped.
    cooldown: Duration,
    trip_count: u64,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: BreakerState,
    pub window_samples: usize,
    pub failure_rate_pct: u32,
    pub slow_rate_pct: u32,
    pub trip_count: u64,
}

/// A named circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Permit to perform one guarded call; report the outcome through
/// [`CircuitBreaker::record`].
#[derive(Debug)]
pub struct CallPermit {
    started: Instant,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: config.clone(),
            inner: Mutex::new(BreakerInner {
                phase: Phase::Closed,
                window: RollingWindow::new(config.window_size.max(1)),
                cooldown: config.cooldown(),
                trip_count: 0,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask to perform a call now.
    ///
    /// # Errors
    /// [`OpenpredictError::CircuitOpen`] while open, or while half-open
    /// with all probe slots taken.
    pub fn try_acquire(&self) -> Result<CallPermit> {
        let mut inner = self.inner.lock();
        match &mut inner.phase {
            Phase::Closed => {}
            Phase::Open { until } => {
                if Instant::now() < *until {
                    return Err(OpenpredictError::CircuitOpen {
                        name: self.name.clone(),
                    });
                }
                info!(breaker = %self.name, "half-open probe window");
                inner.phase = Phase::HalfOpen {
                    in_flight: 1,
                    successes: 0,
                };
            }
            Phase::HalfOpen { in_flight, .. } => {
                if *in_flight >= self.config.half_open_probes.max(1) {
                    return Err(OpenpredictError::CircuitOpen {
                        name: self.name.clone(),
                    });
                }
                *in_flight += 1;
            }
        }
        Ok(CallPermit {
            started: Instant::now(),
        })
    }

    /// Record the outcome of a permitted call.
    pub fn record(&self, permit: CallPermit, success: bool) {
        self.record_with_latency(success, permit.started.elapsed());
    }

    /// Record an outcome with an explicit latency.
    pub fn record_with_latency(&self, success: bool, latency: Duration) {
        let mut inner = self.inner.lock();
        let record = CallRecord {
            outcome: if success {
                Outcome::Success
            } else {
                Outcome::Failure
            },
            latency,
        };

        match &mut inner.phase {
            Phase::Closed => {
                inner.window.push(record);
                if self.should_trip(&inner.window) {
                    self.trip(&mut inner);
                }
            }
            Phase::HalfOpen {
                in_flight,
                successes,
            } => {
                *in_flight = in_flight.saturating_sub(1);
                if success {
                    *successes += 1;
                    if *successes >= self.config.half_open_probes.max(1) {
                        info!(breaker = %self.name, "probes succeeded, closing");
                        inner.phase = Phase::Closed;
                        inner.window.clear();
                        inner.cooldown = self.config.cooldown();
                    }
                } else {
                    // Any probe failure re-opens with a longer cooldown.
                    inner.cooldown = (inner.cooldown * 2).min(self.config.max_cooldown());
                    self.trip(&mut inner);
                }
            }
            Phase::Open { .. } => {
                // A straggler finishing after the breaker opened; the
                // window keeps the observation.
                inner.window.push(record);
            }
        }
    }

    fn should_trip(&self, window: &RollingWindow) -> bool {
        if window.len() < self.config.min_samples.max(1) {
            return false;
        }
        window.failure_rate_pct() >= self.config.failure_threshold_pct
            || window.slow_rate_pct(self.config.slow_call_threshold())
                >= self.config.slow_threshold_pct
    }

    fn trip(&self, inner: &mut BreakerInner) {
        inner.trip_count += 1;
        let until = Instant::now() + inner.cooldown;
        warn!(
            breaker = %self.name,
            cooldown_ms = inner.cooldown.as_millis() as u64,
            failure_rate_pct = inner.window.failure_rate_pct(),
            "circuit opened"
        );
        inner.phase = Phase::Open { until };
    }

    /// Run an async operation under this breaker with the configured
    /// call timeout. A timeout counts as a failure in the window.
    ///
    /// # Errors
    /// `CircuitOpen` when short-circuited, `CallTimeout` on timeout, or
    /// the operation's own error (recorded as a failure).
    pub async fn call<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let permit = self.try_acquire()?;
        match tokio::time::timeout(self.config.call_timeout(), fut).await {
            Ok(Ok(value)) => {
                self.record(permit, true);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record(permit, false);
                Err(err)
            }
            Err(_) => {
                self.record_with_latency(false, self.config.call_timeout());
                Err(OpenpredictError::CallTimeout {
                    name: self.name.clone(),
                    ms: self.config.call_timeout_ms,
                })
            }
        }
    }

    /// Current state (coarse; `Open` reports open even if the cooldown
    /// has lapsed and the next call would probe).
    #[must_use]
    pub fn state(&self) -> BreakerState {
        match self.inner.lock().phase {
            Phase::Closed => BreakerState::Closed,
            Phase::Open { .. } => BreakerState::Open,
            Phase::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            name: self.name.clone(),
            state: match inner.phase {
                Phase::Closed => BreakerState::Closed,
                Phase::Open { .. } => BreakerState::Open,
                Phase::HalfOpen { .. } => BreakerState::HalfOpen,
            },
            window_samples: inner.window.len(),
            failure_rate_pct: inner.window.failure_rate_pct(),
            slow_rate_pct: inner.window.slow_rate_pct(self.config.slow_call_threshold()),
            trip_count: inner.trip_count,
        }
    }

    /// Force the breaker open (operational kill switch).
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        let cooldown = inner.cooldown;
        inner.phase = Phase::Open {
            until: Instant::now() + cooldown,
        };
        warn!(breaker = %self.name, "forced open");
    }

    /// Force the breaker closed and reset its window.
    pub fn force_close(&self) {
        self.reset();
    }

    /// Reset to the initial closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.phase = Phase::Closed;
        inner.window.clear();
        inner.cooldown = self.config.cooldown();
        info!(breaker = %self.name, "reset to closed");
    }
}

// ===================================================================
// Registry
// ===================================================================

/// Overall health derived from the registry's breakers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegistryHealth {
    Healthy,
    /// At least one breaker is open.
    Degraded { open: Vec<String> },
}

/// Named breakers behind one injected handle. Constructed at startup and
/// passed where needed; no process-wide singleton.
#[derive(Debug)]
pub struct BreakerRegistry {
    default_config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the breaker for a dependency name.
    #[must_use]
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return breaker.clone();
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = name, "breaker created");
                Arc::new(CircuitBreaker::new(name, self.default_config.clone()))
            })
            .clone()
    }

    /// Register a breaker with a non-default configuration.
    #[must_use]
    pub fn with_config(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    /// Stats for every registered breaker.
    #[must_use]
    pub fn all_stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<BreakerStats> = self
            .breakers
            .read()
            .values()
            .map(|b| b.stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Degraded when any breaker is open.
    #[must_use]
    pub fn health(&self) -> RegistryHealth {
        let open: Vec<String> = self
            .all_stats()
            .into_iter()
            .filter(|s| s.state == BreakerState::Open)
            .map(|s| s.name)
            .collect();
        if open.is_empty() {
            RegistryHealth::Healthy
        } else {
            RegistryHealth::Degraded { open }
        }
    }

    /// Reset every breaker to closed.
    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            window_size: 10,
            min_samples: 5,
            failure_threshold_pct: 50,
            slow_threshold_pct: 100,
            slow_call_ms: 1_000,
            cooldown_ms: 40,
            max_cooldown_ms: 400,
            half_open_probes: 1,
            call_timeout_ms: 100,
        }
    }

    fn record_failures(breaker: &CircuitBreaker, n: usize) {
        for _ in 0..n {
            let permit = breaker.try_acquire().unwrap();
            breaker.record(permit, false);
        }
    }

    #[test]
    fn trips_after_failures_over_min_samples() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        record_failures(&breaker, 4);
        assert_eq!(breaker.state(), BreakerState::Closed, "below min samples");

        record_failures(&breaker, 1);
        assert_eq!(breaker.state(), BreakerState::Open);

        // Short-circuit while open.
        assert!(matches!(
            breaker.try_acquire(),
            Err(OpenpredictError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn recovers_through_half_open() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        record_failures(&breaker, 5);
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(60));

        // Exactly one probe is admitted.
        let permit = breaker.try_acquire().unwrap();
        assert!(matches!(
            breaker.try_acquire(),
            Err(OpenpredictError::CircuitOpen { .. })
        ));

        breaker.record(permit, true);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.stats().window_samples, 0, "window reset on close");
    }

    #[test]
    fn failed_probe_reopens_with_longer_cooldown() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        record_failures(&breaker, 5);
        std::thread::sleep(Duration::from_millis(60));

        let permit = breaker.try_acquire().unwrap();
        breaker.record(permit, false);
        assert_eq!(breaker.state(), BreakerState::Open);

        // The original 40ms cooldown doubled: still open after 60ms.
        std::thread::sleep(Duration::from_millis(60));
        assert!(matches!(
            breaker.try_acquire(),
            Err(OpenpredictError::CircuitOpen { .. })
        ));
        // But a probe is admitted after the doubled cooldown.
        std::thread::sleep(Duration::from_millis(40));
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn slow_calls_trip_the_breaker() {
        let mut config = fast_config();
        config.failure_threshold_pct = 101; // only slowness can trip
        config.slow_threshold_pct = 50;
        let breaker = CircuitBreaker::new("dep", config);

        for _ in 0..5 {
            let _ = breaker.try_acquire().unwrap();
            breaker.record_with_latency(true, Duration::from_millis(2_000));
        }
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn successes_keep_it_closed() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        for _ in 0..20 {
            let permit = breaker.try_acquire().unwrap();
            breaker.record(permit, true);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn force_open_and_reset() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        breaker.force_open();
        assert_eq!(breaker.state(), BreakerState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn call_records_success_and_failure() {
        let breaker = CircuitBreaker::new("dep", fast_config());

        let ok: Result<u32> = breaker.call(async { Ok(42) }).await;
        assert_eq!(ok.unwrap(), 42);

        for _ in 0..5 {
            let _: Result<u32> = breaker
                .call(async {
                    Err(OpenpredictError::DependencyFailed {
                        name: "dep".into(),
                        reason: "boom".into(),
                    })
                })
                .await;
        }
        // 1 success + 5 failures in a window of 6: 83% failure rate.
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn call_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("dep", fast_config());
        let result: Result<()> = breaker
            .call(async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(OpenpredictError::CallTimeout { .. })));
        assert_eq!(breaker.stats().window_samples, 1);
        assert_eq!(breaker.stats().failure_rate_pct, 100);
    }

    #[test]
    fn registry_reuses_and_reports_health() {
        let registry = BreakerRegistry::new(fast_config());
        let a = registry.get("payments");
        let b = registry.get("payments");
        assert!(Arc::ptr_eq(&a, &b));

        assert_eq!(registry.health(), RegistryHealth::Healthy);
        record_failures(&a, 5);
        match registry.health() {
            RegistryHealth::Degraded { open } => assert_eq!(open, vec!["payments".to_string()]),
            RegistryHealth::Healthy => panic!("expected degraded"),
        }

        registry.reset_all();
        assert_eq!(registry.health(), RegistryHealth::Healthy);
    }
}

//! Typed configuration for every OpenPredict subsystem.
//!
//! Each section is a concrete struct with serde derives and
//! `deny_unknown_fields`, so a stray key fails at load time instead of
//! being silently ignored.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::EngineKind;

/// Policy for a market order that cannot fully fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketOrderPolicy {
    /// Fill what the book has; cancel the residual.
    PartialOk,
    /// Reject the whole order unless it can fully fill.
    AllOrNone,
}

/// What to do when an incoming order would match the same user's resting
/// order at the top of the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelfTradePolicy {
    /// Skip the user's own resting orders while matching.
    Prevent,
    /// Let the user trade with themselves.
    Allow,
}

/// Order-book engine options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BookConfig {
    /// Upper bound of the integer price grid.
    pub price_ticks: u16,
    pub market_order_policy: MarketOrderPolicy,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            price_ticks: constants::MAX_PRICE_TICK,
            market_order_policy: MarketOrderPolicy::PartialOk,
        }
    }
}

/// AMM engine options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AmmConfig {
    /// Swap fee in basis points, charged on the input side.
    pub fee_bps: u32,
}

impl Default for AmmConfig {
    fn default() -> Self {
        Self { fee_bps: 0 }
    }
}

/// Risk gate options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RiskConfig {
    pub self_trade: SelfTradePolicy,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            self_trade: SelfTradePolicy::Prevent,
        }
    }
}

/// Market coordinator options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CoordinatorConfig {
    /// Bounded depth of each market writer's command channel.
    pub command_queue_depth: usize,
    /// How long a caller waits for space in a full channel before
    /// receiving `MarketBusy` (ms).
    pub submit_deadline_ms: u64,
}

impl CoordinatorConfig {
    #[must_use]
    pub fn submit_deadline(&self) -> Duration {
        Duration::from_millis(self.submit_deadline_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            command_queue_depth: constants::DEFAULT_COMMAND_QUEUE_DEPTH,
            submit_deadline_ms: constants::DEFAULT_SUBMIT_DEADLINE_MS,
        }
    }
}

/// Circuit breaker options (per dependency).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BreakerConfig {
    /// Rolling window size in call outcomes.
    pub window_size: usize,
    /// Minimum recorded calls before rates are evaluated.
    pub min_samples: usize,
    /// Failure-rate threshold, percent of the window.
    pub failure_threshold_pct: u32,
    /// Slow-call-rate threshold, percent of the window.
    pub slow_threshold_pct: u32,
    /// Latency above which a call counts as slow (ms).
    pub slow_call_ms: u64,
    /// Cooldown before the first half-open attempt (ms).
    pub cooldown_ms: u64,
    /// Cap on the exponentially growing cooldown (ms).
    pub max_cooldown_ms: u64,
    /// Concurrent probe calls admitted in half-open.
    pub half_open_probes: usize,
    /// Per-call timeout (ms); exceeding it counts as a failure.
    pub call_timeout_ms: u64,
}

impl BreakerConfig {
    #[must_use]
    pub fn slow_call_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_call_ms)
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    #[must_use]
    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms)
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_size: constants::DEFAULT_BREAKER_WINDOW,
            min_samples: constants::DEFAULT_BREAKER_MIN_SAMPLES,
            failure_threshold_pct: constants::DEFAULT_BREAKER_FAILURE_PCT,
            slow_threshold_pct: constants::DEFAULT_BREAKER_SLOW_PCT,
            slow_call_ms: constants::DEFAULT_BREAKER_SLOW_MS,
            cooldown_ms: constants::DEFAULT_BREAKER_COOLDOWN_MS,
            max_cooldown_ms: constants::DEFAULT_BREAKER_MAX_COOLDOWN_MS,
            half_open_probes: constants::DEFAULT_HALF_OPEN_PROBES,
            call_timeout_ms: constants::DEFAULT_BREAKER_CALL_TIMEOUT_MS,
        }
    }
}

/// SLO monitor options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SloConfig {
    /// Measurement window (hours).
    pub window_hours: u64,
    /// Bucket size (minutes). The window is split into
    /// `window_hours * 60 / bucket_minutes` rotating buckets.
    pub bucket_minutes: u64,
    /// SLO name → target good-ratio (e.g. 0.999).
    pub targets: HashMap<String, f64>,
}

impl SloConfig {
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_hours * 3_600)
    }

    #[must_use]
    pub fn bucket(&self) -> Duration {
        Duration::from_secs(self.bucket_minutes * 60)
    }
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            window_hours: constants::DEFAULT_SLO_WINDOW_HOURS,
            bucket_minutes: constants::DEFAULT_SLO_BUCKET_MINUTES,
            targets: HashMap::new(),
        }
    }
}

/// Multi-layer cache options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub l1_capacity: usize,
    pub l1_ttl_ms: u64,
    pub l2_ttl_ms: u64,
    pub shards: usize,
}

impl CacheConfig {
    #[must_use]
    pub fn l1_ttl(&self) -> Duration {
        Duration::from_millis(self.l1_ttl_ms)
    }

    #[must_use]
    pub fn l2_ttl(&self) -> Duration {
        Duration::from_millis(self.l2_ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: constants::DEFAULT_L1_CAPACITY,
            l1_ttl_ms: constants::DEFAULT_L1_TTL_MS,
            l2_ttl_ms: constants::DEFAULT_L2_TTL_MS,
            shards: constants::DEFAULT_CACHE_SHARDS,
        }
    }
}

/// Retry backoff parameters: exponential with jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub factor: u32,
    pub cap_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: constants::DEFAULT_BACKOFF_BASE_MS,
            factor: constants::DEFAULT_BACKOFF_FACTOR,
            cap_ms: constants::DEFAULT_BACKOFF_CAP_MS,
            jitter: true,
        }
    }
}

/// Background task queue options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TaskQueueConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            workers: constants::DEFAULT_TASKQ_WORKERS,
            max_attempts: constants::DEFAULT_TASKQ_MAX_ATTEMPTS,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Engine used when a market spec doesn't name one explicitly.
    pub default_engine: EngineKind,
    pub book: BookConfig,
    pub amm: AmmConfig,
    pub risk: RiskConfig,
    pub coordinator: CoordinatorConfig,
    pub breaker: BreakerConfig,
    pub slo: SloConfig,
    pub cache: CacheConfig,
    pub taskq: TaskQueueConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_engine: EngineKind::OrderBook,
            book: BookConfig::default(),
            amm: AmmConfig::default(),
            risk: RiskConfig::default(),
            coordinator: CoordinatorConfig::default(),
            breaker: BreakerConfig::default(),
            slo: SloConfig::default(),
            cache: CacheConfig::default(),
            taskq: TaskQueueConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.book.price_ticks, 9_999);
        assert_eq!(cfg.book.market_order_policy, MarketOrderPolicy::PartialOk);
        assert_eq!(cfg.risk.self_trade, SelfTradePolicy::Prevent);
        assert!(cfg.breaker.min_samples <= cfg.breaker.window_size);
        assert!(cfg.taskq.workers > 0);
    }

    #[test]
    fn unknown_keys_rejected() {
        let json = r#"{"book": {"price_ticks": 9999, "spread_limit": 5}}"#;
        let parsed: std::result::Result<EngineConfig, _> = serde_json::from_str(json);
        assert!(parsed.is_err(), "unknown key must fail at load time");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let json = r#"{"amm": {"fee_bps": 30}}"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.amm.fee_bps, 30);
        assert_eq!(cfg.cache.shards, 16);
    }

    #[test]
    fn serde_roundtrip() {
        let mut cfg = EngineConfig::default();
        cfg.slo.targets.insert("order_submit".to_string(), 0.999);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.slo.targets["order_submit"], 0.999);
    }
}

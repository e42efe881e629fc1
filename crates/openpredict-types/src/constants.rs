//! System-wide constants for the OpenPredict engine.

/// Payout of one winning share, in ticks. Prices are basis points of this.
pub const PRICE_SCALE: i64 = 10_000;

/// Lowest legal price tick (0.01% probability).
pub const MIN_PRICE_TICK: u16 = 1;

/// Highest legal price tick (99.99% probability).
pub const MAX_PRICE_TICK: u16 = 9_999;

/// Maximum outcomes in a categorical market.
pub const MAX_OUTCOMES: usize = 16;

/// Default per-user position cap (shares per outcome) when a market
/// doesn't override it.
pub const DEFAULT_POSITION_CAP: u64 = 1_000_000;

/// Default depth of a market writer's command channel.
pub const DEFAULT_COMMAND_QUEUE_DEPTH: usize = 1_024;

/// Default deadline for enqueueing a command to a market writer (ms).
pub const DEFAULT_SUBMIT_DEADLINE_MS: u64 = 250;

/// Settlement idempotency cache size (number of (market, user) pairs).
pub const SETTLEMENT_IDEMPOTENCY_CACHE_SIZE: usize = 500_000;

/// Default circuit breaker rolling window size (call outcomes).
pub const DEFAULT_BREAKER_WINDOW: usize = 100;

/// Default minimum samples before a breaker evaluates failure rates.
pub const DEFAULT_BREAKER_MIN_SAMPLES: usize = 10;

/// Default breaker failure-rate threshold, percent of the window.
pub const DEFAULT_BREAKER_FAILURE_PCT: u32 = 50;

/// Default breaker slow-call-rate threshold, percent of the window.
pub const DEFAULT_BREAKER_SLOW_PCT: u32 = 50;

/// Default slow-call latency threshold (ms).
pub const DEFAULT_BREAKER_SLOW_MS: u64 = 1_000;

/// Default breaker cooldown before half-open (ms).
pub const DEFAULT_BREAKER_COOLDOWN_MS: u64 = 30_000;

/// Default cap on the breaker's exponential cooldown (ms).
pub const DEFAULT_BREAKER_MAX_COOLDOWN_MS: u64 = 300_000;

/// Default number of half-open probe calls.
pub const DEFAULT_HALF_OPEN_PROBES: usize = 1;

/// Default per-call timeout through a breaker (ms).
pub const DEFAULT_BREAKER_CALL_TIMEOUT_MS: u64 = 10_000;

/// Default SLO measurement window (hours). 30 days.
pub const DEFAULT_SLO_WINDOW_HOURS: u64 = 720;

/// Default SLO bucket size (minutes).
pub const DEFAULT_SLO_BUCKET_MINUTES: u64 = 60;

/// Default L1 cache capacity (entries).
pub const DEFAULT_L1_CAPACITY: usize = 1_000;

/// Default L1 cache TTL (ms). 5 minutes.
pub const DEFAULT_L1_TTL_MS: u64 = 300_000;

/// Default L2 cache TTL (ms). 1 hour.
pub const DEFAULT_L2_TTL_MS: u64 = 3_600_000;

/// Default number of L1 cache shards.
pub const DEFAULT_CACHE_SHARDS: usize = 16;

/// Default task queue worker count.
pub const DEFAULT_TASKQ_WORKERS: usize = 4;

/// Default maximum task attempts before dead-lettering.
pub const DEFAULT_TASKQ_MAX_ATTEMPTS: u32 = 5;

/// Default retry backoff base (ms).
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;

/// Default retry backoff multiplier.
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;

/// Default retry backoff cap (ms).
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 60_000;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "OpenPredict";

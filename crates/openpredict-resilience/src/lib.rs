//! # openpredict-resilience
//!
//! The failure-isolation substrate every external call in OpenPredict
//! goes through:
//!
//! - [`CircuitBreaker`] / [`BreakerRegistry`]: per-dependency three-state
//!   breakers with rolling-window failure and slow-call detection
//! - [`SloMonitor`]: rolling request/latency/error counters, compliance
//!   and error-budget tracking
//! - [`MultiLayerCache`]: sharded L1 + pluggable L2 with single-flight
//!   loading and tag invalidation
//! - [`TaskQueue`]: priority background queue with retry, backoff, and
//!   dead-lettering
//!
//! Everything here is an explicit, injected handle constructed at
//! startup — no ambient globals — so tests instantiate isolated
//! instances freely.

pub mod breaker;
pub mod cache;
pub mod slo;
pub mod taskq;

pub use breaker::{BreakerRegistry, BreakerState, BreakerStats, CircuitBreaker, RegistryHealth};
pub use cache::{CacheBackend, CacheStats, MemoryBackend, MultiLayerCache};
pub use slo::{SloMonitor, SloSnapshot, SloStatus};
pub use taskq::{DeadLetter, Task, TaskHandler, TaskPriority, TaskQueue, TaskQueueStats, TaskStatus};

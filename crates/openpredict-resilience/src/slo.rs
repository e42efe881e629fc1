//! SLO monitoring and error-budget tracking.
//!
//! Each SLO keeps rolling counters inside a bucketed window (the window
//! and bucket size come from [`SloConfig`]). Buckets rotate lazily: on
//! every record, slots whose time span has elapsed are zeroed before the
//! write. Latencies land in a power-of-two histogram so quantiles come
//! from a compact fixed-size array rather than stored samples.
//!
//! The error budget is `(1 - target) - (1 - compliance)`: negative means
//! the budget is exhausted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use openpredict_types::{OpenpredictError, Result, SloConfig};

/// Power-of-two latency buckets, in microseconds. Bucket `i` covers
/// `[2^i, 2^(i+1))` µs; 32 buckets reach past an hour.
const HISTOGRAM_BUCKETS: usize = 32;

#[derive(Debug, Clone)]
struct Bucket {
    /// Which window slot this bucket currently holds.
    index: u64,
    good: u64,
    total: u64,
    histogram: [u64; HISTOGRAM_BUCKETS],
}

impl Bucket {
    fn empty(index: u64) -> Self {
        Self {
            index,
            good: 0,
            total: 0,
            histogram: [0; HISTOGRAM_BUCKETS],
        }
    }
}

#[derive(Debug)]
struct SloRecord {
    target: f64,
    buckets: Vec<Bucket>,
}

/// Compliance classification, by error budget remaining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SloStatus {
    /// No measurements in the window yet.
    Unknown,
    /// More than a quarter of the budget remains.
    Healthy,
    /// Budget is running low.
    Warning,
    /// Budget exhausted.
    Critical,
}

/// Point-in-time view of one SLO.
#[derive(Debug, Clone, Serialize)]
pub struct SloSnapshot {
    pub name: String,
    pub target: f64,
    pub compliance: f64,
    pub error_budget: f64,
    pub status: SloStatus,
    pub total: u64,
    pub good: u64,
}

/// Rolling SLO counters behind one injected handle.
#[derive(Debug)]
pub struct SloMonitor {
    origin: Instant,
    bucket: Duration,
    bucket_count: usize,
    slos: RwLock<HashMap<String, Mutex<SloRecord>>>,
}

impl SloMonitor {
    /// Build a monitor with the given window geometry and register the
    /// configured targets.
    ///
    /// # Errors
    /// `Configuration` for a degenerate geometry or a target outside
    /// `(0, 1]`.
    pub fn from_config(config: &SloConfig) -> Result<Self> {
        let bucket = config.bucket();
        if bucket.is_zero() || config.window().is_zero() || config.window() < bucket {
            return Err(OpenpredictError::Configuration(
                "SLO window must be a positive multiple of the bucket size".to_string(),
            ));
        }
        let bucket_count = (config.window().as_secs() / bucket.as_secs()).max(1) as usize;
        let monitor = Self {
            origin: Instant::now(),
            bucket,
            bucket_count,
            slos: RwLock::new(HashMap::new()),
        };
        for (name, target) in &config.targets {
            monitor.register(name, *target)?;
        }
        Ok(monitor)
    }

    /// Register an SLO with its target good-ratio.
    ///
    /// # Errors
    /// `Configuration` when the target is outside `(0, 1]`.
    pub fn register(&self, name: &str, target: f64) -> Result<()> {
        if !(target > 0.0 && target <= 1.0) {
            return Err(OpenpredictError::Configuration(format!(
                "SLO '{name}' target {target} outside (0, 1]"
            )));
        }
        self.slos.write().insert(
            name.to_string(),
            Mutex::new(SloRecord {
                target,
                buckets: (0..self.bucket_count).map(|_| Bucket::empty(0)).collect(),
            }),
        );
        debug!(slo = name, target, "SLO registered");
        Ok(())
    }

    fn current_index(&self) -> u64 {
        (self.origin.elapsed().as_nanos() / self.bucket.as_nanos().max(1)) as u64
    }

    fn with_record<T>(&self, name: &str, f: impl FnOnce(&mut SloRecord, u64) -> T) -> Result<T> {
        let slos = self.slos.read();
        let record = slos
            .get(name)
            .ok_or_else(|| OpenpredictError::Configuration(format!("unknown SLO '{name}'")))?;
        let now = self.current_index();
        let mut record = record.lock();
        Ok(f(&mut record, now))
    }

    /// Record one event: whether it was good, and its latency.
    ///
    /// # Errors
    /// `Configuration` for an unregistered SLO name.
    pub fn record(&self, name: &str, good: bool, latency: Duration) -> Result<()> {
        let bucket_count = self.bucket_count as u64;
        self.with_record(name, |record, now| {
            let slot = (now % bucket_count) as usize;
            let bucket = &mut record.buckets[slot];
            // Rotate a bucket whose window slot has elapsed.
            if bucket.index != now {
                *bucket = Bucket::empty(now);
            }
            bucket.total += 1;
            if good {
                bucket.good += 1;
            }
            bucket.histogram[histogram_bucket(latency)] += 1;
        })
    }

    /// Good-event ratio inside the current window. `1.0` when no events
    /// have been recorded.
    ///
    /// # Errors
    /// `Configuration` for an unregistered SLO name.
    pub fn compliance(&self, name: &str) -> Result<f64> {
        let bucket_count = self.bucket_count as u64;
        self.with_record(name, |record, now| {
            let (good, total) = live_counts(record, now, bucket_count);
            if total == 0 {
                1.0
            } else {
                good as f64 / total as f64
            }
        })
    }

    /// `(1 - target) - (1 - compliance)`: how much unreliability remains
    /// affordable. Negative means the budget is exhausted.
    ///
    /// # Errors
    /// `Configuration` for an unregistered SLO name.
    pub fn error_budget(&self, name: &str) -> Result<f64> {
        let bucket_count = self.bucket_count as u64;
        self.with_record(name, |record, now| {
            let (good, total) = live_counts(record, now, bucket_count);
            let compliance = if total == 0 {
                1.0
            } else {
                good as f64 / total as f64
            };
            (1.0 - record.target) - (1.0 - compliance)
        })
    }

    /// Latency quantile from the histogram; returns the upper bound of
    /// the bucket containing the requested rank. `None` with no events.
    ///
    /// # Errors
    /// `Configuration` for an unregistered SLO name.
    pub fn latency_quantile(&self, name: &str, q: f64) -> Result<Option<Duration>> {
        let q = q.clamp(0.0, 1.0);
        let bucket_count = self.bucket_count as u64;
        self.with_record(name, |record, now| {
            let mut histogram = [0u64; HISTOGRAM_BUCKETS];
            let mut total = 0u64;
            for bucket in live_buckets(record, now, bucket_count) {
                total += bucket.total;
                for (slot, count) in bucket.histogram.iter().enumerate() {
                    histogram[slot] += count;
                }
            }
            if total == 0 {
                return None;
            }
            let rank = ((q * total as f64).ceil() as u64).max(1);
            let mut seen = 0u64;
            for (slot, count) in histogram.iter().enumerate() {
                seen += count;
                if seen >= rank {
                    return Some(Duration::from_micros(1u64 << (slot + 1)));
                }
            }
            Some(Duration::from_micros(1u64 << HISTOGRAM_BUCKETS))
        })
    }

    /// Full view of one SLO.
    ///
    /// # Errors
    /// `Configuration` for an unregistered SLO name.
    pub fn snapshot(&self, name: &str) -> Result<SloSnapshot> {
        let bucket_count = self.bucket_count as u64;
        self.with_record(name, |record, now| {
            let (good, total) = live_counts(record, now, bucket_count);
            let compliance = if total == 0 {
                1.0
            } else {
                good as f64 / total as f64
            };
            let error_budget = (1.0 - record.target) - (1.0 - compliance);
            let allowance = 1.0 - record.target;
            let status = if total == 0 {
                SloStatus::Unknown
            } else if error_budget <= 0.0 {
                SloStatus::Critical
            } else if allowance > 0.0 && error_budget / allowance <= 0.25 {
                SloStatus::Warning
            } else {
                SloStatus::Healthy
            };
            SloSnapshot {
                name: name.to_string(),
                target: record.target,
                compliance,
                error_budget,
                status,
                total,
                good,
            }
        })
    }

    /// Snapshots for every registered SLO, sorted by name.
    #[must_use]
    pub fn all_snapshots(&self) -> Vec<SloSnapshot> {
        let names: Vec<String> = self.slos.read().keys().cloned().collect();
        let mut snapshots: Vec<SloSnapshot> = names
            .iter()
            .filter_map(|name| self.snapshot(name).ok())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}

/// Buckets still inside the window (a slot is stale once its index falls
/// a full rotation behind).
fn live_buckets<'a>(
    record: &'a SloRecord,
    now: u64,
    bucket_count: u64,
) -> impl Iterator<Item = &'a Bucket> {
    record
        .buckets
        .iter()
        .filter(move |b| b.total > 0 && b.index + bucket_count > now)
}

fn live_counts(record: &SloRecord, now: u64, bucket_count: u64) -> (u64, u64) {
    live_buckets(record, now, bucket_count)
        .fold((0, 0), |(good, total), b| (good + b.good, total + b.total))
}

fn histogram_bucket(latency: Duration) -> usize {
    let micros = latency.as_micros().max(1) as u64;
    (63 - micros.leading_zeros() as usize).min(HISTOGRAM_BUCKETS - 1)
}

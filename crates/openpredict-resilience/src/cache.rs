//! Multi-layer cache: in-process L1 over a shared L2 backend, with
//! single-flight loading and tag invalidation.
//!
//! - **Get**: L1 first; on miss, L2 (hits promote to L1 with the shorter
//!   TTL); on miss, the supplied loader runs under **single-flight** —
//!   concurrent callers for the same key block on one load and all
//!   receive the same value.
//! - **Set**: writes both layers; L1 takes `min(ttl, l1_ttl)`.
//! - **Invalidate(tag)**: deletes every key carrying the tag from both
//!   layers.
//!
//! L1 is a sharded map with per-shard locks and LRU eviction at fixed
//! capacity. The L2 backend sits behind a circuit breaker: backend
//! faults degrade the cache to L1-only and surface as misses, never as
//! errors to the caller.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use openpredict_types::{CacheConfig, OpenpredictError, Result};

use crate::breaker::CircuitBreaker;

// ===================================================================
// L2 backend
// ===================================================================

/// A shared cache backend (the production deployment points this at its
/// external store; tests use [`MemoryBackend`]).
#[async_trait]
pub trait CacheBackend: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-process L2 backend with TTL expiry.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.entries
            .lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

// ===================================================================
// L1 shards
// ===================================================================

#[derive(Debug)]
struct L1Entry {
    value: Vec<u8>,
    expires: Instant,
    last_access: u64,
}

#[derive(Debug, Default)]
struct Shard {
    entries: HashMap<String, L1Entry>,
    access_counter: u64,
}

impl Shard {
    fn get(&mut self, key: &str) -> Option<Vec<u8>> {
        match self.entries.get_mut(key) {
            Some(entry) if entry.expires > Instant::now() => {
                self.access_counter += 1;
                entry.last_access = self.access_counter;
                Some(entry.value.clone())
            }
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert, evicting the least recently used entry at capacity.
    /// Returns whether an eviction happened.
    fn insert(&mut self, key: String, value: Vec<u8>, ttl: Duration, capacity: usize) -> bool {
        let mut evicted = false;
        if self.entries.len() >= capacity && !self.entries.contains_key(&key) {
            if let Some(lru_key) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&lru_key);
                evicted = true;
            }
        }
        self.access_counter += 1;
        self.entries.insert(
            key,
            L1Entry {
                value,
                expires: Instant::now() + ttl,
                last_access: self.access_counter,
            },
        );
        evicted
    }
}

// ===================================================================
// Stats
// ===================================================================

/// Hit/miss/eviction counters for one layer.
#[derive(Debug, Default)]
pub struct LayerStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Snapshot of both layers' counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l1_evictions: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub loads: u64,
}

// ===================================================================
// The cache
// ===================================================================

/// L1 + L2 cache with single-flight loading.
#[derive(Debug)]
pub struct MultiLayerCache {
    config: CacheConfig,
    shards: Vec<Mutex<Shard>>,
    shard_capacity: usize,
    backend: Option<Arc<dyn CacheBackend>>,
    breaker: Arc<CircuitBreaker>,
    /// Tag -> keys carrying it.
    tags: Mutex<HashMap<String, HashSet<String>>>,
    /// Per-key waiters for in-flight loads.
    inflight: Mutex<HashMap<String, Arc<OnceCell<Vec<u8>>>>>,
    l1_stats: LayerStats,
    l2_stats: LayerStats,
    loads: AtomicU64,
}

impl MultiLayerCache {
    /// Build a cache. `backend` is the L2 layer (absent = L1-only);
    /// `breaker` guards every backend call.
    #[must_use]
    pub fn new(
        config: CacheConfig,
        backend: Option<Arc<dyn CacheBackend>>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let shard_count = config.shards.max(1);
        let shard_capacity = (config.l1_capacity / shard_count).max(1);
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(Shard::default())).collect(),
            shard_capacity,
            backend,
            breaker,
            tags: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            l1_stats: LayerStats::default(),
            l2_stats: LayerStats::default(),
            loads: AtomicU64::new(0),
            config,
        }
    }

    fn shard(&self, key: &str) -> &Mutex<Shard> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn l1_get(&self, key: &str) -> Option<Vec<u8>> {
        let value = self.shard(key).lock().get(key);
        match &value {
            Some(_) => self.l1_stats.hits.fetch_add(1, Ordering::Relaxed),
            None => self.l1_stats.misses.fetch_add(1, Ordering::Relaxed),
        };
        value
    }

    fn l1_set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let evicted = self
            .shard(key)
            .lock()
            .insert(key.to_string(), value, ttl, self.shard_capacity);
        if evicted {
            self.l1_stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// L2 read through the breaker; faults degrade to a miss.
    async fn l2_get(&self, key: &str) -> Option<Vec<u8>> {
        let backend = self.backend.as_ref()?;
        let result = self.breaker.call(backend.get(key)).await;
        match result {
            Ok(Some(value)) => {
                self.l2_stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.l2_stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                self.l2_stats.misses.fetch_add(1, Ordering::Relaxed);
                warn!(key, %err, "L2 degraded to miss");
                None
            }
        }
    }

    /// L2 write through the breaker; faults are logged and dropped.
    async fn l2_set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        if let Some(backend) = self.backend.as_ref() {
            if let Err(err) = self.breaker.call(backend.set(key, value, ttl)).await {
                warn!(key, %err, "L2 write dropped");
            }
        }
    }

    async fn l2_delete(&self, key: &str) {
        if let Some(backend) = self.backend.as_ref() {
            if let Err(err) = self.breaker.call(backend.delete(key)).await {
                warn!(key, %err, "L2 delete dropped");
            }
        }
    }

    // =================================================================
    // Public surface
    // =================================================================

    /// Read-only get: L1, then L2 with promotion. No loader.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(value) = self.l1_get(key) {
            return Some(value);
        }
        let value = self.l2_get(key).await?;
        self.l1_set(key, value.clone(), self.config.l1_ttl());
        Some(value)
    }

    /// Get with single-flight load on miss. The first caller for a
    /// missing key runs `loader`; concurrent callers wait and share the
    /// result. A successful load is written to both layers.
    ///
    /// # Errors
    /// Only the loader's own error; infrastructure faults degrade.
    pub async fn get_or_load<F, Fut>(&self, key: &str, tags: &[&str], loader: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<u8>>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        // Join (or start) the in-flight load for this key.
        let (cell, leader) = {
            let mut inflight = self.inflight.lock();
            match inflight.get(key) {
                Some(cell) => (cell.clone(), false),
                None => {
                    let cell = Arc::new(OnceCell::new());
                    inflight.insert(key.to_string(), cell.clone());
                    (cell, true)
                }
            }
        };

        let result = cell
            .get_or_try_init(|| async {
                self.loads.fetch_add(1, Ordering::Relaxed);
                debug!(key, "single-flight load");
                loader().await
            })
            .await
            .cloned();

        if leader {
            self.inflight.lock().remove(key);
            if let Ok(value) = &result {
                self.store(key, value.clone(), self.config.l2_ttl(), tags).await;
            }
        }
        result
    }

    /// Write a value to both layers and index its tags.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration, tags: &[&str]) {
        self.store(key, value, ttl, tags).await;
    }

    async fn store(&self, key: &str, value: Vec<u8>, ttl: Duration, tags: &[&str]) {
        let l1_ttl = ttl.min(self.config.l1_ttl());
        self.l1_set(key, value.clone(), l1_ttl);
        self.l2_set(key, value, ttl).await;
        if !tags.is_empty() {
            let mut index = self.tags.lock();
            for tag in tags {
                index
                    .entry((*tag).to_string())
                    .or_default()
                    .insert(key.to_string());
            }
        }
    }

    /// Delete one key from both layers.
    pub async fn delete(&self, key: &str) {
        self.shard(key).lock().entries.remove(key);
        self.l2_delete(key).await;
    }

    /// Delete every key carrying `tag` from both layers.
    pub async fn invalidate_tag(&self, tag: &str) {
        let keys: Vec<String> = self
            .tags
            .lock()
            .remove(tag)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        debug!(tag, count = keys.len(), "tag invalidation");
        for key in keys {
            self.delete(&key).await;
        }
    }

    /// Counter snapshot for monitoring.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            l1_hits: self.l1_stats.hits.load(Ordering::Relaxed),
            l1_misses: self.l1_stats.misses.load(Ordering::Relaxed),
            l1_evictions: self.l1_stats.evictions.load(Ordering::Relaxed),
            l2_hits: self.l2_stats.hits.load(Ordering::Relaxed),
            l2_misses: self.l2_stats.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
        }
    }
}

/// A backend that always fails, for exercising degradation paths.
#[derive(Debug)]
pub struct FailingBackend;

#[async_trait]
impl CacheBackend for FailingBackend {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(OpenpredictError::DependencyFailed {
            name: "l2".to_string(),
            reason: "unreachable".to_string(),
        })
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
        Err(OpenpredictError::DependencyFailed {
            name: "l2".to_string(),
            reason: "unreachable".to_string(),
        })
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(OpenpredictError::DependencyFailed {
            name: "l2".to_string(),
            reason: "unreachable".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openpredict_types::BreakerConfig;

    fn cache_with(backend: Option<Arc<dyn CacheBackend>>) -> MultiLayerCache {
        MultiLayerCache::new(
            CacheConfig::default(),
            backend,
            Arc::new(CircuitBreaker::new("l2", BreakerConfig::default())),
        )
    }

    #[tokio::test]
    async fn set_then_get_hits_l1() {
        let cache = cache_with(Some(Arc::new(MemoryBackend::new())));
        cache
            .set("k", b"v".to_vec(), Duration::from_secs(60), &[])
            .await;
        assert_eq!(cache.get("k").await.unwrap(), b"v");
        assert_eq!(cache.stats().l1_hits, 1);
    }

    #[tokio::test]
    async fn l2_hit_promotes_to_l1() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .set("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let cache = cache_with(Some(backend));

        assert_eq!(cache.get("k").await.unwrap(), b"v");
        let stats = cache.stats();
        assert_eq!(stats.l1_misses, 1);
        assert_eq!(stats.l2_hits, 1);

        // Second read is an L1 hit.
        assert_eq!(cache.get("k").await.unwrap(), b"v");
        assert_eq!(cache.stats().l1_hits, 1);
    }

    #[tokio::test]
    async fn expired_l1_entry_is_a_miss() {
        let cache = cache_with(None);
        cache.set("k", b"v".to_vec(), Duration::ZERO, &[]).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn loader_runs_once_under_concurrency() {
        let cache = Arc::new(cache_with(None));
        let calls = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load("hot", &[], || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(b"loaded".to_vec())
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), b"loaded");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "loader must run once");
    }

    #[tokio::test]
    async fn failed_load_allows_retry() {
        let cache = cache_with(None);
        let err = cache
            .get_or_load("k", &[], || async {
                Err(OpenpredictError::DependencyFailed {
                    name: "db".into(),
                    reason: "down".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OpenpredictError::DependencyFailed { .. }));

        let value = cache
            .get_or_load("k", &[], || async { Ok(b"second".to_vec()) })
            .await
            .unwrap();
        assert_eq!(value, b"second");
    }

    #[tokio::test]
    async fn tag_invalidation_clears_both_layers() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = cache_with(Some(backend.clone()));
        cache
            .set("a", b"1".to_vec(), Duration::from_secs(60), &["markets"])
            .await;
        cache
            .set("b", b"2".to_vec(), Duration::from_secs(60), &["markets"])
            .await;
        cache
            .set("c", b"3".to_vec(), Duration::from_secs(60), &["users"])
            .await;

        cache.invalidate_tag("markets").await;
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_none());
        assert_eq!(cache.get("c").await.unwrap(), b"3");
        assert!(backend.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn backend_failure_degrades_to_miss() {
        let cache = cache_with(Some(Arc::new(FailingBackend)));
        // Infrastructure fault never reaches the caller.
        assert!(cache.get("k").await.is_none());

        // Loads still work L1-only.
        let value = cache
            .get_or_load("k", &[], || async { Ok(b"v".to_vec()) })
            .await
            .unwrap();
        assert_eq!(value, b"v");
        assert_eq!(cache.get("k").await.unwrap(), b"v");
    }

    #[tokio::test]
    async fn lru_eviction_at_capacity() {
        let config = CacheConfig {
            l1_capacity: 2,
            shards: 1,
            ..CacheConfig::default()
        };
        let cache = MultiLayerCache::new(
            config,
            None,
            Arc::new(CircuitBreaker::new("l2", BreakerConfig::default())),
        );

        cache.set("a", b"1".to_vec(), Duration::from_secs(60), &[]).await;
        cache.set("b", b"2".to_vec(), Duration::from_secs(60), &[]).await;
        // Touch "a" so "b" becomes the LRU victim.
        assert!(cache.get("a").await.is_some());
        cache.set("c", b"3".to_vec(), Duration::from_secs(60), &[]).await;

        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none(), "LRU entry evicted");
        assert!(cache.get("c").await.is_some());
        assert_eq!(cache.stats().l1_evictions, 1);
    }
}

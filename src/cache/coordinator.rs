use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;

use super::backend::CacheBackend;
use super::invalidation::{EntityType, Purge};
use super::memory::MemoryStore;
use super::remote::RedisStore;

/// Counters exported through `/api/stats` and `/metrics`
#[derive(Default)]
pub struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
    pub pattern_deletes: AtomicU64,
    pub keys_purged: AtomicU64,
    pub invalidations: AtomicU64,
    pub backend_errors: AtomicU64,
    pub timeouts: AtomicU64,
    pub decode_errors: AtomicU64,
    pub computes: AtomicU64,
}

impl CacheCounters {
    #[inline]
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

type InFlightMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// One caller's hold on a per-key single-flight lock. Dropping it, whether
/// the caller finished or was cancelled, removes the map entry once no one
/// else holds the lock.
struct InFlightSlot<'a> {
    map: &'a InFlightMap,
    key: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> InFlightSlot<'a> {
    fn join(map: &'a InFlightMap, key: &'a str) -> Self {
        let lock = map.lock().entry(key.to_string()).or_default().clone();
        Self { map, key, lock }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        // Map + this clone; anyone else still queued keeps the slot alive.
        let last = map
            .get(self.key)
            .map(|current| Arc::ptr_eq(current, &self.lock) && Arc::strong_count(&self.lock) <= 2)
            .unwrap_or(false);
        if last {
            map.remove(self.key);
        }
    }
}

/// Cache Coordinator - 読み取り系データのキャッシュ窓口
///
/// Best-effort by contract: every backend failure or timeout is logged and
/// turned into a miss / no-op, so a cache outage costs latency, never
/// availability. There is no ordering between concurrent writers; the last
/// `set` wins.
pub struct CacheCoordinator {
    backend: Arc<dyn CacheBackend>,
    /// Present when the process-local store is the active backend
    local: Option<Arc<MemoryStore>>,
    op_timeout: Duration,
    /// Budget for a whole pattern delete
    pattern_timeout: Duration,
    in_flight: InFlightMap,
    pub counters: CacheCounters,
}

impl CacheCoordinator {
    /// Pick the backend from config: the shared store when a URL is set and
    /// reachable, the process-local store otherwise.
    pub async fn connect(config: &CacheConfig) -> Self {
        let op_timeout = Duration::from_millis(config.op_timeout_ms);
        let pattern_timeout = Duration::from_millis(config.pattern_timeout_ms);

        if let Some(url) = config.redis_url.as_deref() {
            let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
            match RedisStore::connect(url, connect_timeout, op_timeout, config.scan_batch).await {
                Ok(store) => {
                    return Self::with_backend(Arc::new(store), op_timeout).with_pattern_timeout(pattern_timeout)
                }
                Err(e) => {
                    warn!("Shared cache unavailable ({}); falling back to process-local cache", e);
                }
            }
        } else {
            info!("No shared cache configured; using process-local cache");
        }

        Self::in_memory(config)
    }

    pub fn in_memory(config: &CacheConfig) -> Self {
        let store = Arc::new(MemoryStore::new(config.max_local_entries));
        let mut coordinator = Self::with_backend(store.clone(), Duration::from_millis(config.op_timeout_ms))
            .with_pattern_timeout(Duration::from_millis(config.pattern_timeout_ms));
        coordinator.local = Some(store);
        coordinator
    }

    /// Pattern deletes get the default `pattern_timeout_ms` budget; see
    /// [`with_pattern_timeout`](Self::with_pattern_timeout).
    pub fn with_backend(backend: Arc<dyn CacheBackend>, op_timeout: Duration) -> Self {
        Self {
            backend,
            local: None,
            op_timeout,
            pattern_timeout: Duration::from_millis(CacheConfig::default().pattern_timeout_ms).max(op_timeout),
            in_flight: Mutex::new(HashMap::new()),
            counters: CacheCounters::default(),
        }
    }

    pub fn with_pattern_timeout(mut self, pattern_timeout: Duration) -> Self {
        self.pattern_timeout = pattern_timeout;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run one backend call under `budget`. `None` means it failed.
    async fn guarded<T, F>(&self, op: &'static str, key: &str, budget: Duration, call: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(budget, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                CacheCounters::inc(&self.counters.backend_errors);
                warn!("Cache {} failed for '{}' on {}: {}", op, key, self.backend.name(), e);
                None
            }
            Err(_) => {
                CacheCounters::inc(&self.counters.timeouts);
                warn!(
                    "Cache {} timed out for '{}' on {} after {:?}",
                    op,
                    key,
                    self.backend.name(),
                    budget
                );
                None
            }
        }
    }

    /// Look up a value. Errors, timeouts and undecodable payloads are misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.guarded("get", key, self.op_timeout, self.backend.get(key)).await.flatten();

        let value = raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                CacheCounters::inc(&self.counters.decode_errors);
                warn!("Discarding undecodable cache entry '{}': {}", key, e);
                None
            }
        });

        if value.is_some() {
            CacheCounters::inc(&self.counters.hits);
            debug!("Cache hit: {}", key);
        } else {
            CacheCounters::inc(&self.counters.misses);
            debug!("Cache miss: {}", key);
        }
        value
    }

    /// Store a value for `ttl_secs`. Failure is logged, never returned.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: u64) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                CacheCounters::inc(&self.counters.backend_errors);
                warn!("Failed to serialize cache value for '{}': {}", key, e);
                return;
            }
        };

        let ttl = Duration::from_secs(ttl_secs);
        if self.guarded("set", key, self.op_timeout, self.backend.set(key, payload, ttl)).await.is_some() {
            CacheCounters::inc(&self.counters.sets);
        }
    }

    /// Remove one key. True only if it existed and the delete went through.
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self
            .guarded("delete", key, self.op_timeout, self.backend.delete(key))
            .await;
        if removed.is_some() {
            CacheCounters::inc(&self.counters.deletes);
        }
        removed.unwrap_or(false)
    }

    /// Remove every key containing `pattern`. Returns how many were removed.
    ///
    /// Runs under the pattern budget, not the single-op timeout. If the budget
    /// runs out, keys already deleted stay deleted but the count reports 0.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let removed = self
            .guarded(
                "delete_pattern",
                pattern,
                self.pattern_timeout,
                self.backend.delete_pattern(pattern),
            )
            .await;
        if removed.is_some() {
            CacheCounters::inc(&self.counters.pattern_deletes);
        }
        let removed = removed.unwrap_or(0);
        debug!("Pattern delete '{}': {} keys", pattern, removed);
        removed
    }

    /// Read-through: return the cached value or compute, store and return it.
    ///
    /// Not atomic. Concurrent callers on the same cold key each run `compute`;
    /// use [`remember_exclusive`](Self::remember_exclusive) when that matters.
    pub async fn remember<T, F, Fut>(&self, key: &str, ttl_secs: u64, compute: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let result = self
            .try_remember(key, ttl_secs, move || async move { Ok::<T, Infallible>(compute().await) })
            .await;
        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like [`remember`](Self::remember) for fallible computations; errors are
    /// returned to the caller and nothing is cached.
    pub async fn try_remember<T, E, F, Fut>(&self, key: &str, ttl_secs: u64, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(key).await {
            return Ok(cached);
        }

        CacheCounters::inc(&self.counters.computes);
        let value = compute().await?;
        self.set(key, &value, ttl_secs).await;
        Ok(value)
    }

    /// Single-flight read-through.
    ///
    /// Callers in this process that miss on the same key queue on a per-key
    /// lock; the first computes and stores, the rest read what it stored.
    /// Other processes sharing the store are not coordinated, and if the
    /// store rejects the write each waiter computes in turn.
    pub async fn remember_exclusive<T, F, Fut>(&self, key: &str, ttl_secs: u64, compute: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(cached) = self.get(key).await {
            return cached;
        }

        let slot = InFlightSlot::join(&self.in_flight, key);
        let _turn = slot.lock.lock().await;
        match self.get(key).await {
            Some(cached) => cached,
            None => {
                CacheCounters::inc(&self.counters.computes);
                let value = compute().await;
                self.set(key, &value, ttl_secs).await;
                value
            }
        }
    }

    /// Purge every key family that a write to `entity` could make stale.
    /// Returns how many keys were removed.
    pub async fn invalidate_related(&self, entity: EntityType, id: Option<&str>) -> u64 {
        let mut purged = 0;
        for step in entity.purge_plan(id) {
            match step {
                Purge::Key(key) => {
                    if self.delete(&key).await {
                        purged += 1;
                    }
                }
                Purge::Family(prefix) => {
                    purged += self.delete_pattern(prefix.as_str()).await;
                }
            }
        }

        CacheCounters::inc(&self.counters.invalidations);
        self.counters.keys_purged.fetch_add(purged, Ordering::Relaxed);
        info!("Invalidated {} {} ({} keys purged)", entity, id.unwrap_or("*"), purged);
        purged
    }

    /// Sweep loop for the process-local store; returns at once for the shared store.
    pub async fn run_sweeper(&self, interval: Duration) {
        let local = match &self.local {
            Some(local) => local.clone(),
            None => return,
        };

        info!("Local cache sweeper started (interval: {:?})", interval);
        loop {
            tokio::time::sleep(interval).await;
            local.purge_expired();
        }
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Get cache stats for the API
    pub fn get_stats(&self) -> serde_json::Value {
        let c = &self.counters;
        let hits = c.hits.load(Ordering::Relaxed);
        let misses = c.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 { hits as f64 / total as f64 * 100.0 } else { 0.0 };

        serde_json::json!({
            "backend": self.backend.name(),
            "op_timeout_ms": self.op_timeout.as_millis() as u64,
            "pattern_timeout_ms": self.pattern_timeout.as_millis() as u64,
            "hits": hits,
            "misses": misses,
            "hit_rate_percent": format!("{:.1}", hit_rate),
            "sets": c.sets.load(Ordering::Relaxed),
            "deletes": c.deletes.load(Ordering::Relaxed),
            "pattern_deletes": c.pattern_deletes.load(Ordering::Relaxed),
            "invalidations": c.invalidations.load(Ordering::Relaxed),
            "keys_purged": c.keys_purged.load(Ordering::Relaxed),
            "backend_errors": c.backend_errors.load(Ordering::Relaxed),
            "timeouts": c.timeouts.load(Ordering::Relaxed),
            "decode_errors": c.decode_errors.load(Ordering::Relaxed),
            "computes": c.computes.load(Ordering::Relaxed),
            "in_flight": self.in_flight_len(),
            "local": self.local.as_ref().map(|l| l.get_stats()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::{self, ttl};
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn coordinator() -> CacheCoordinator {
        CacheCoordinator::in_memory(&CacheConfig::default())
    }

    /// Every call fails.
    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }
        async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            Err(anyhow::anyhow!("connection refused"))
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("connection refused"))
        }
        async fn delete(&self, _key: &str) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("connection refused"))
        }
        async fn delete_pattern(&self, _pattern: &str) -> anyhow::Result<u64> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    /// Every call hangs forever.
    struct HungBackend;

    #[async_trait]
    impl CacheBackend for HungBackend {
        fn name(&self) -> &'static str {
            "hung"
        }
        async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            std::future::pending().await
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> anyhow::Result<()> {
            std::future::pending().await
        }
        async fn delete(&self, _key: &str) -> anyhow::Result<bool> {
            std::future::pending().await
        }
        async fn delete_pattern(&self, _pattern: &str) -> anyhow::Result<u64> {
            std::future::pending().await
        }
    }

    /// Pattern deletes take several op timeouts but do finish.
    struct SlowScanBackend {
        scan_time: Duration,
    }

    #[async_trait]
    impl CacheBackend for SlowScanBackend {
        fn name(&self) -> &'static str {
            "slow-scan"
        }
        async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete(&self, _key: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
        async fn delete_pattern(&self, _pattern: &str) -> anyhow::Result<u64> {
            tokio::time::sleep(self.scan_time).await;
            Ok(3)
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Listing {
        name: String,
        tags: Vec<String>,
        score: Option<u8>,
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let cache = coordinator();
        let listing = Listing {
            name: "Ace Plumbing".to_string(),
            tags: vec!["plumber".to_string(), "24h".to_string()],
            score: Some(82),
        };

        cache.set("business:ace", &listing, ttl::MEDIUM).await;
        assert_eq!(cache.get::<Listing>("business:ace").await, Some(listing));
        assert_eq!(cache.counters.hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let cache = coordinator();
        assert_eq!(cache.get::<Listing>("business:nope").await, None);
        assert_eq!(cache.counters.misses.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_wrong_shape_is_a_miss() {
        let cache = coordinator();
        cache.set("user:1", &json!({"unexpected": true}), ttl::SHORT).await;
        assert_eq!(cache.get::<Listing>("user:1").await, None);
        assert_eq!(cache.counters.decode_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = coordinator();
        cache.set("user:1", &1u32, ttl::SHORT).await;
        assert!(cache.delete("user:1").await);
        assert!(!cache.delete("user:1").await);
        assert_eq!(cache.get::<u32>("user:1").await, None);
    }

    #[tokio::test]
    async fn test_business_invalidation_fan_out() {
        let cache = coordinator();
        let search_a = keys::search(&json!({"category": "plumber", "page": 1}));
        let search_b = keys::search(&json!({"category": "roofer"}));
        let stale = [
            keys::business("b1"),
            keys::business_trust_score("b1"),
            keys::business_reviews("b1"),
            keys::pricing("b1"),
            keys::availability("b1"),
            search_a.clone(),
            search_b.clone(),
        ];
        for key in &stale {
            cache.set(key, &"cached", ttl::LONG).await;
        }
        cache.set(&keys::business("b2"), &"other", ttl::LONG).await;
        cache.set(&keys::user("u1"), &"user", ttl::LONG).await;

        let purged = cache.invalidate_related(EntityType::Business, Some("b1")).await;
        assert_eq!(purged, stale.len() as u64);

        for key in &stale {
            assert_eq!(cache.get::<String>(key).await, None, "{} survived", key);
        }
        assert_eq!(cache.get::<String>(&keys::business("b2")).await.as_deref(), Some("other"));
        assert_eq!(cache.get::<String>(&keys::user("u1")).await.as_deref(), Some("user"));
    }

    #[tokio::test]
    async fn test_review_invalidation() {
        let cache = coordinator();
        cache.set(&keys::review("r1"), &1, ttl::LONG).await;
        cache.set(&keys::review("r2"), &2, ttl::LONG).await;
        cache.set(&keys::search(&json!({"q": "x"})), &3, ttl::LONG).await;

        cache.invalidate_related(EntityType::Review, Some("r1")).await;
        assert_eq!(cache.get::<i32>(&keys::review("r1")).await, None);
        assert_eq!(cache.get::<i32>(&keys::review("r2")).await, Some(2));
        assert_eq!(cache.get::<i32>(&keys::search(&json!({"q": "x"}))).await, None);
    }

    #[tokio::test]
    async fn test_user_invalidation_leaves_search() {
        let cache = coordinator();
        let search = keys::search(&json!({"q": "x"}));
        cache.set(&keys::user("u1"), &1, ttl::LONG).await;
        cache.set(&search, &2, ttl::LONG).await;

        assert_eq!(cache.invalidate_related(EntityType::User, Some("u1")).await, 1);
        assert_eq!(cache.get::<i32>(&keys::user("u1")).await, None);
        assert_eq!(cache.get::<i32>(&search).await, Some(2));
    }

    #[tokio::test]
    async fn test_broken_backend_degrades_to_misses() {
        let cache = CacheCoordinator::with_backend(Arc::new(BrokenBackend), Duration::from_millis(100));

        cache.set("business:1", &"value", ttl::SHORT).await;
        assert_eq!(cache.get::<String>("business:1").await, None);
        assert!(!cache.delete("business:1").await);
        assert_eq!(cache.delete_pattern("search:").await, 0);
        assert_eq!(cache.invalidate_related(EntityType::Business, Some("1")).await, 0);

        let computed = cache.remember("business:1", ttl::SHORT, || async { 7u32 }).await;
        assert_eq!(computed, 7);
        assert!(cache.counters.backend_errors.load(Ordering::Relaxed) >= 5);

        // Failed calls are not counted as completed operations
        assert_eq!(cache.counters.sets.load(Ordering::Relaxed), 0);
        assert_eq!(cache.counters.deletes.load(Ordering::Relaxed), 0);
        assert_eq!(cache.counters.pattern_deletes.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_completed_deletes_are_counted() {
        let cache = coordinator();
        cache.set("user:1", &1u32, ttl::SHORT).await;
        cache.delete("user:1").await;
        cache.delete("user:1").await;
        cache.delete_pattern("search:").await;
        assert_eq!(cache.counters.deletes.load(Ordering::Relaxed), 2);
        assert_eq!(cache.counters.pattern_deletes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_slow_pattern_delete_outlives_op_timeout() {
        let backend = SlowScanBackend {
            scan_time: Duration::from_millis(80),
        };
        let cache = CacheCoordinator::with_backend(Arc::new(backend), Duration::from_millis(20));

        assert_eq!(cache.delete_pattern("search:").await, 3);
        assert_eq!(cache.invalidate_related(EntityType::Business, None).await, 3);
        assert_eq!(cache.counters.timeouts.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_pattern_delete_has_its_own_budget() {
        let cache = CacheCoordinator::with_backend(Arc::new(HungBackend), Duration::from_millis(20))
            .with_pattern_timeout(Duration::from_millis(50));

        let started = std::time::Instant::now();
        assert_eq!(cache.delete_pattern("search:").await, 0);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(cache.counters.timeouts.load(Ordering::Relaxed), 1);
        assert_eq!(cache.counters.pattern_deletes.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_hung_backend_times_out() {
        let cache = CacheCoordinator::with_backend(Arc::new(HungBackend), Duration::from_millis(20));

        let started = std::time::Instant::now();
        assert_eq!(cache.get::<String>("business:1").await, None);
        cache.set("business:1", &"value", ttl::SHORT).await;
        assert!(!cache.delete("business:1").await);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(cache.counters.timeouts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_remember_computes_once_when_warm() {
        let cache = coordinator();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..3 {
            let value = cache
                .remember("search:{}", ttl::SHORT, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    vec![1, 2, 3]
                })
                .await;
            assert_eq!(value, vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remember_is_not_single_flight() {
        let cache = coordinator();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let compute = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            42u32
        };

        let (a, b) = tokio::join!(
            cache.remember("search:cold", ttl::SHORT, compute),
            cache.remember("search:cold", ttl::SHORT, compute),
        );
        assert_eq!((a, b), (42, 42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_try_remember_does_not_cache_errors() {
        let cache = coordinator();

        let failed: Result<u32, String> = cache
            .try_remember("pricing:b1", ttl::SHORT, || async { Err("upstream down".to_string()) })
            .await;
        assert!(failed.is_err());
        assert_eq!(cache.get::<u32>("pricing:b1").await, None);

        let ok: Result<u32, String> = cache
            .try_remember("pricing:b1", ttl::SHORT, || async { Ok(120) })
            .await;
        assert_eq!(ok, Ok(120));
        assert_eq!(cache.get::<u32>("pricing:b1").await, Some(120));
    }

    #[tokio::test]
    async fn test_remember_exclusive_computes_once() {
        let cache = Arc::new(coordinator());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .remember_exclusive("search:expensive", ttl::MEDIUM, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        "aggregated".to_string()
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "aggregated");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_exclusive_compute_releases_slot() {
        let cache = coordinator();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            cache.remember_exclusive("search:stuck", ttl::SHORT, || std::future::pending::<u32>()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(cache.in_flight_len(), 0);

        let value = cache
            .remember_exclusive("search:stuck", ttl::SHORT, || async { 5u32 })
            .await;
        assert_eq!(value, 5);
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let cache = coordinator();
        cache.set("business:1", &1, ttl::SHORT).await;
        cache.get::<i32>("business:1").await;
        cache.get::<i32>("business:2").await;

        let stats = cache.get_stats();
        assert_eq!(stats["backend"], "memory");
        assert_eq!(stats["hits"], 1);
        assert_eq!(stats["misses"], 1);
        assert_eq!(stats["hit_rate_percent"], "50.0");
        assert_eq!(stats["local"]["entries"], 1);
    }
}

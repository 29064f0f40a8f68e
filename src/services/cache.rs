use crate::models::{CompatibilityResult, Profile};
use crate::services::clock::{Clock, SystemClock};
use async_trait::async_trait;
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur with cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Storage behind a [`TtlCache`] tier
///
/// Values are JSON documents so the same cache can sit on an in-process map
/// or on a networked key-value store.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every key starting with `prefix`
    async fn clear(&self, prefix: &str) -> Result<(), CacheError>;
}

/// Stored value with its write timestamp
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub stored_at_ms: u64,
    pub ttl_ms: u64,
}

impl<T> CacheEntry<T> {
    /// Stale iff now - stored_at >= ttl
    pub fn is_stale(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.stored_at_ms) >= self.ttl_ms
    }
}

/// In-process backend: a size-capped LRU map with lazy TTL eviction
///
/// Stale entries are never returned; they are dropped by the `get` that
/// finds them. The size cap only matters under heavy churn.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: Mutex<LruCache<String, CacheEntry<String>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryBackend {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry<String>>> {
        // Entries are plain data; a panic mid-insert cannot leave them inconsistent
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now_ms();
        let mut entries = self.lock();

        let stale = match entries.get(key) {
            Some(entry) if !entry.is_stale(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if stale {
            entries.pop(key);
            tracing::trace!("Evicted stale entry: {}", key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value,
            stored_at_ms: self.clock.now_ms(),
            ttl_ms: ttl.as_millis() as u64,
        };
        self.lock().put(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.lock().pop(key);
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> Result<(), CacheError> {
        let mut entries = self.lock();
        let keys: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            entries.pop(&key);
        }
        Ok(())
    }
}

/// Serialized form of a cached value, stamped with its original write time
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    stored_at_ms: u64,
    value: T,
}

/// Typed TTL cache with a local tier and an optional distributed tier
///
/// Lookups go local first; a remote hit backfills the local tier. Remote
/// failures are logged and treated as misses: the cache is best-effort and
/// callers always recompute on a miss.
pub struct TtlCache<T> {
    namespace: &'static str,
    ttl: Duration,
    local: Arc<MemoryBackend>,
    remote: Option<Arc<dyn CacheBackend>>,
    hits: AtomicU64,
    misses: AtomicU64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TtlCache<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(
        namespace: &'static str,
        ttl: Duration,
        local: Arc<MemoryBackend>,
        remote: Option<Arc<dyn CacheBackend>>,
    ) -> Self {
        Self {
            namespace,
            ttl,
            local,
            remote,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            _marker: PhantomData,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a value (L1 first, then L2)
    pub async fn get(&self, key: &str) -> Option<T> {
        self.get_matching(key, |_| true).await
    }

    /// Get a value only if `accept` holds for it
    ///
    /// A rejected entry is evicted from both tiers and counted as a miss.
    pub async fn get_matching<F>(&self, key: &str, accept: F) -> Option<T>
    where
        F: Fn(&T) -> bool,
    {
        let mut found = self.read_tier(self.local.as_ref(), key, "L1").await;

        if found.is_none() {
            if let Some(remote) = &self.remote {
                found = self.read_tier(remote.as_ref(), key, "L2").await;
                if let Some(entry) = &found {
                    // The local copy lives only for what is left of the original TTL
                    let remaining = self.remaining_ttl(entry.stored_at_ms);
                    self.write_tier(self.local.as_ref(), key, entry, remaining, "L1")
                        .await;
                }
            }
        }

        match found {
            Some(entry) if accept(&entry.value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value)
            }
            Some(_) => {
                tracing::warn!("Evicting mismatched cache entry: {}", key);
                self.invalidate(key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                tracing::trace!("Cache miss: {}", key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Set a value in both tiers, replacing any previous entry
    pub async fn set(&self, key: &str, value: &T) {
        let envelope = Envelope {
            stored_at_ms: self.local.clock().now_ms(),
            value,
        };

        self.write_tier(self.local.as_ref(), key, &envelope, self.ttl, "L1")
            .await;
        if let Some(remote) = &self.remote {
            self.write_tier(remote.as_ref(), key, &envelope, self.ttl, "L2")
                .await;
        }
        tracing::trace!("Cache set: {}", key);
    }

    /// Delete a value from both tiers
    pub async fn invalidate(&self, key: &str) {
        let _ = self.local.delete(key).await;
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete(key).await {
                tracing::warn!("Failed to invalidate {} in L2 cache: {}", key, e);
            }
        }
    }

    /// Drop every entry of this cache's namespace
    pub async fn clear(&self) {
        let prefix = format!("{}:", self.namespace);
        let _ = self.local.clear(&prefix).await;
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.clear(&prefix).await {
                tracing::warn!("Failed to clear L2 namespace {}: {}", self.namespace, e);
            }
        }
        tracing::debug!("Cleared cache namespace: {}", self.namespace);
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hit_count: hits,
            miss_count: misses,
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }

    /// TTL left for an entry first written at `stored_at_ms`; zero once stale
    fn remaining_ttl(&self, stored_at_ms: u64) -> Duration {
        let age = self.local.clock().now_ms().saturating_sub(stored_at_ms);
        self.ttl.saturating_sub(Duration::from_millis(age))
    }

    async fn read_tier(&self, tier: &dyn CacheBackend, key: &str, label: &str) -> Option<Envelope<T>> {
        let json = match tier.get(key).await {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("{} cache read failed for {}: {}", label, key, e);
                return None;
            }
        };

        let entry: Envelope<T> = match serde_json::from_str(&json) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Dropping undecodable {} entry {}: {}", label, key, e);
                let _ = tier.delete(key).await;
                return None;
            }
        };

        // Backends expire on their own clock; the write time is authoritative
        if self.remaining_ttl(entry.stored_at_ms).is_zero() {
            tracing::trace!("Dropping stale {} entry: {}", label, key);
            let _ = tier.delete(key).await;
            return None;
        }

        tracing::trace!("{} cache hit: {}", label, key);
        Some(entry)
    }

    async fn write_tier<E: Serialize>(
        &self,
        tier: &dyn CacheBackend,
        key: &str,
        entry: &E,
        ttl: Duration,
        label: &str,
    ) {
        let json = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to serialize cache value {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = tier.set(key, json, ttl).await {
            tracing::warn!("{} cache write failed for {}: {}", label, key, e);
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
}

/// Statistics for both logical caches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairCacheStats {
    pub profiles: CacheStats,
    pub pairs: CacheStats,
    pub local_entries: usize,
}

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    pub const PROFILE_NAMESPACE: &'static str = "profile";
    pub const PAIR_NAMESPACE: &'static str = "pair";

    /// Build a cache key for a user profile
    pub fn profile(user_id: &str) -> String {
        format!("{}:{}", Self::PROFILE_NAMESPACE, user_id)
    }

    /// Build a cache key for a pair result; (a, b) and (b, a) share a key
    ///
    /// The lower ID is length-prefixed so IDs containing `:` cannot collide.
    pub fn pair(a: &str, b: &str) -> String {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        format!("{}:{}:{}:{}", Self::PAIR_NAMESPACE, low.len(), low, high)
    }
}

/// TTLs and size cap for [`PairCache`]
#[derive(Debug, Clone, Copy)]
pub struct PairCacheConfig {
    pub profile_ttl: Duration,
    pub pair_ttl: Duration,
    pub local_capacity: usize,
}

impl Default for PairCacheConfig {
    fn default() -> Self {
        Self {
            profile_ttl: Duration::from_secs(15 * 60),
            pair_ttl: Duration::from_secs(15 * 60),
            local_capacity: 10_000,
        }
    }
}

/// Profile cache and symmetric pair-result cache sharing one mechanism
pub struct PairCache {
    profiles: TtlCache<Profile>,
    pairs: TtlCache<CompatibilityResult>,
    local: Arc<MemoryBackend>,
    clock: Arc<dyn Clock>,
}

impl PairCache {
    pub fn new(
        config: PairCacheConfig,
        clock: Arc<dyn Clock>,
        remote: Option<Arc<dyn CacheBackend>>,
    ) -> Self {
        let local = Arc::new(MemoryBackend::new(config.local_capacity, clock.clone()));

        Self {
            profiles: TtlCache::new(
                CacheKey::PROFILE_NAMESPACE,
                config.profile_ttl,
                local.clone(),
                remote.clone(),
            ),
            pairs: TtlCache::new(CacheKey::PAIR_NAMESPACE, config.pair_ttl, local.clone(), remote),
            local,
            clock,
        }
    }

    /// Process-local cache on the system clock
    pub fn in_memory(config: PairCacheConfig) -> Self {
        Self::new(config, Arc::new(SystemClock), None)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn get_profile(&self, user_id: &str) -> Option<Profile> {
        self.profiles.get(&CacheKey::profile(user_id)).await
    }

    pub async fn set_profile(&self, profile: &Profile) {
        self.profiles
            .set(&CacheKey::profile(&profile.user_id), profile)
            .await;
    }

    /// Cached result for the unordered pair, oriented to `subject_id`
    pub async fn get_pair(&self, subject_id: &str, candidate_id: &str) -> Option<CompatibilityResult> {
        let cached = self
            .pairs
            .get_matching(&CacheKey::pair(subject_id, candidate_id), |r| {
                is_same_pair(r, subject_id, candidate_id)
            })
            .await?;

        let mut result = cached.oriented_to(subject_id);
        result.from_cache = true;
        Some(result)
    }

    pub async fn set_pair(&self, result: &CompatibilityResult) {
        let key = CacheKey::pair(&result.subject_id, &result.candidate_id);
        self.pairs.set(&key, result).await;
    }

    pub async fn invalidate_pair(&self, a: &str, b: &str) {
        self.pairs.invalidate(&CacheKey::pair(a, b)).await;
    }

    pub async fn invalidate_profile(&self, user_id: &str) {
        self.profiles.invalidate(&CacheKey::profile(user_id)).await;
    }

    /// Drop every cached profile and pair result
    pub async fn clear(&self) {
        self.profiles.clear().await;
        self.pairs.clear().await;
    }

    pub fn stats(&self) -> PairCacheStats {
        PairCacheStats {
            profiles: self.profiles.stats(),
            pairs: self.pairs.stats(),
            local_entries: self.local.len(),
        }
    }
}

fn is_same_pair(result: &CompatibilityResult, a: &str, b: &str) -> bool {
    (result.subject_id == a && result.candidate_id == b)
        || (result.subject_id == b && result.candidate_id == a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;

    fn cache_with_clock() -> (PairCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = PairCache::new(PairCacheConfig::default(), clock.clone(), None);
        (cache, clock)
    }

    #[test]
    fn test_cache_key_builder() {
        assert_eq!(CacheKey::profile("user123"), "profile:user123");
        assert_eq!(CacheKey::pair("b", "a"), "pair:1:a:b");
        assert_ne!(CacheKey::pair("a:b", "c"), CacheKey::pair("a", "b:c"));
        assert_eq!(CacheKey::pair("a", "b"), CacheKey::pair("b", "a"));
    }

    #[test]
    fn test_entry_staleness_boundary() {
        let entry = CacheEntry {
            value: (),
            stored_at_ms: 100,
            ttl_ms: 50,
        };
        assert!(!entry.is_stale(149));
        assert!(entry.is_stale(150));
    }

    #[tokio::test]
    async fn test_memory_backend_evicts_stale_entries() {
        let clock = Arc::new(ManualClock::new(0));
        let backend = MemoryBackend::new(10, clock.clone());

        backend
            .set("k", "v".to_string(), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));

        clock.advance(Duration::from_millis(100));
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_memory_backend_respects_capacity() {
        let backend = MemoryBackend::new(2, Arc::new(ManualClock::new(0)));
        let ttl = Duration::from_secs(60);

        backend.set("a", "1".into(), ttl).await.unwrap();
        backend.set("b", "2".into(), ttl).await.unwrap();
        backend.set("c", "3".into(), ttl).await.unwrap();

        assert_eq!(backend.len(), 2);
        assert_eq!(backend.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_overwrites_and_resets_timestamp() {
        let (cache, clock) = cache_with_clock();
        let mut profile = Profile::new("u1");

        cache.set_profile(&profile).await;
        clock.advance(Duration::from_secs(10 * 60));

        profile.name = Some("Renamed".to_string());
        cache.set_profile(&profile).await;
        clock.advance(Duration::from_secs(10 * 60));

        let cached = cache.get_profile("u1").await.unwrap();
        assert_eq!(cached.name.as_deref(), Some("Renamed"));
    }

    #[tokio::test]
    async fn test_pair_lookup_is_symmetric() {
        let (cache, _) = cache_with_clock();
        let result = CompatibilityResult::neutral("alice", "bob", 1_000);

        cache.set_pair(&result).await;

        let reversed = cache.get_pair("bob", "alice").await.unwrap();
        assert!(reversed.from_cache);
        assert_eq!(reversed.subject_id, "bob");
        assert_eq!(reversed.candidate_id, "alice");
    }

    #[tokio::test]
    async fn test_pair_expires_after_ttl() {
        let (cache, clock) = cache_with_clock();
        cache
            .set_pair(&CompatibilityResult::neutral("a", "b", 0))
            .await;

        clock.advance(Duration::from_secs(15 * 60));
        assert!(cache.get_pair("a", "b").await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.pairs.miss_count, 1);
        assert_eq!(stats.local_entries, 0);
    }

    #[tokio::test]
    async fn test_clear_only_touches_namespace() {
        let (cache, _) = cache_with_clock();
        cache.set_profile(&Profile::new("u1")).await;
        cache
            .set_pair(&CompatibilityResult::neutral("a", "b", 0))
            .await;

        cache.pairs.clear().await;

        assert!(cache.get_pair("a", "b").await.is_none());
        assert!(cache.get_profile("u1").await.is_some());
    }

    #[tokio::test]
    async fn test_remote_hit_backfills_local() {
        let clock = Arc::new(ManualClock::new(0));
        let remote = Arc::new(MemoryBackend::new(10, clock.clone()));
        let cache = PairCache::new(
            PairCacheConfig::default(),
            clock.clone(),
            Some(remote.clone() as Arc<dyn CacheBackend>),
        );

        let json = serde_json::json!({"storedAtMs": 0, "value": Profile::new("u2")}).to_string();
        remote
            .set(&CacheKey::profile("u2"), json, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(cache.get_profile("u2").await.is_some());
        remote.delete(&CacheKey::profile("u2")).await.unwrap();
        assert!(cache.get_profile("u2").await.is_some());
    }

    #[tokio::test]
    async fn test_backfill_keeps_remaining_ttl() {
        let clock = Arc::new(ManualClock::new(0));
        let remote = Arc::new(MemoryBackend::new(10, clock.clone()));
        let shared = Some(remote.clone() as Arc<dyn CacheBackend>);

        // Another instance writes the profile at t=0
        let writer = PairCache::new(PairCacheConfig::default(), clock.clone(), shared.clone());
        writer.set_profile(&Profile::new("u")).await;

        let reader = PairCache::new(PairCacheConfig::default(), clock.clone(), shared);

        clock.advance(Duration::from_secs(14 * 60));
        assert!(reader.get_profile("u").await.is_some());

        clock.advance(Duration::from_secs(60));
        assert!(reader.get_profile("u").await.is_none());

        clock.advance(Duration::from_secs(9 * 60));
        assert!(reader.get_profile("u").await.is_none());
    }

    #[tokio::test]
    async fn test_stale_remote_entry_is_not_backfilled() {
        let clock = Arc::new(ManualClock::new(0));
        let remote = Arc::new(MemoryBackend::new(10, clock.clone()));

        // Remote tier with a longer expiry than the cache's own TTL
        let json = serde_json::json!({"storedAtMs": 0, "value": Profile::new("u")}).to_string();
        remote
            .set(&CacheKey::profile("u"), json, Duration::from_secs(3600))
            .await
            .unwrap();

        let cache = PairCache::new(
            PairCacheConfig::default(),
            clock.clone(),
            Some(remote.clone() as Arc<dyn CacheBackend>),
        );

        clock.advance(Duration::from_secs(15 * 60));
        assert!(cache.get_profile("u").await.is_none());
        assert!(cache.local.is_empty());
    }

    #[tokio::test]
    async fn test_colon_ids_do_not_share_a_pair_slot() {
        let (cache, _) = cache_with_clock();
        let mut result = CompatibilityResult::neutral("a:b", "c", 1_000);
        result.combined_score = 99.0;
        cache.set_pair(&result).await;

        assert!(cache.get_pair("a", "b:c").await.is_none());
        assert_eq!(cache.get_pair("c", "a:b").await.unwrap().combined_score, 99.0);
    }

    #[tokio::test]
    async fn test_mismatched_pair_entry_is_evicted() {
        let (cache, _) = cache_with_clock();

        // Entry stored under a key that belongs to a different pair
        let foreign = CompatibilityResult::neutral("x", "y", 1_000);
        cache.pairs.set(&CacheKey::pair("a", "b"), &foreign).await;

        assert!(cache.get_pair("a", "b").await.is_none());
        assert_eq!(cache.stats().local_entries, 0);
        assert_eq!(cache.stats().pairs.miss_count, 1);
    }
}

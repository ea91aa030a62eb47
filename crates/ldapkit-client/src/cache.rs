//! Search result caching.
//!
//! [`ResultCache`] is a bounded LRU map with a time-to-live. Capacity
//! eviction and expiry are independent: inserting at capacity evicts the
//! least recently used entry, and an entry older than the TTL is never
//! returned, whether or not the background sweep has removed it yet.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::factory::ConnectionFactory;
use crate::request::SearchRequest;
use crate::response::SearchResult;

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub capacity: usize,
    /// How long an entry stays valid.
    pub time_to_live: Duration,
    /// How often expired entries are swept. `None` disables the sweeper;
    /// expired entries are then only dropped when read or evicted.
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            time_to_live: Duration::from_secs(600),
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// A bounded LRU cache whose entries expire.
pub struct ResultCache<K, V> {
    entries: Mutex<LruCache<K, (V, Instant)>>,
    ttl: Duration,
}

impl<K, V> ResultCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| Error::Config("cache capacity must be positive".into()))?;
        if ttl.is_zero() {
            return Err(Error::Config("cache time to live must be positive".into()));
        }
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        })
    }

    /// Time to live of each entry.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up `key`, dropping it if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some((value, inserted)) if inserted.elapsed() < self.ttl => return Some(value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    /// Insert or replace `key`. At capacity the least recently used entry
    /// is evicted.
    pub fn put(&self, key: K, value: V) {
        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(key, (value, Instant::now())) {
            if !entries.contains(&evicted) {
                tracing::trace!(len = entries.len(), "evicted least recently used cache entry");
            }
        }
    }

    /// Remove `key`.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().pop(key).map(|(value, _)| value)
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, (_, inserted))| inserted.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }
}

impl<K, V> ResultCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a shared cache and start its sweeper when configured.
    pub fn from_config(config: &CacheConfig) -> Result<Arc<Self>> {
        let cache = Arc::new(Self::new(config.capacity, config.time_to_live)?);
        if let Some(interval) = config.sweep_interval.filter(|interval| !interval.is_zero()) {
            cache.spawn_sweeper(interval);
        }
        Ok(cache)
    }

    /// Sweep expired entries every `interval` until the cache is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged = purged, remaining = cache.len(), "cache sweep");
                }
            }
        })
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for ResultCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("ResultCache")
            .field("len", &entries.len())
            .field("capacity", &entries.cap())
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Runs searches through a [`ConnectionFactory`], answering repeats from a
/// [`ResultCache`].
///
/// Only successful searches are cached. Requests are keyed by content, so
/// two requests differing only in a control value are cached separately.
#[derive(Debug)]
pub struct CachingSearcher<F> {
    factory: F,
    cache: Arc<ResultCache<SearchRequest, SearchResult>>,
}

impl<F: ConnectionFactory> CachingSearcher<F> {
    /// Wrap `factory` with `cache`.
    pub fn new(factory: F, cache: Arc<ResultCache<SearchRequest, SearchResult>>) -> Self {
        Self { factory, cache }
    }

    /// The cache in use.
    pub fn cache(&self) -> &Arc<ResultCache<SearchRequest, SearchResult>> {
        &self.cache
    }

    /// Return cached results for `request`, or search and cache them.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        if let Some(hit) = self.cache.get(request) {
            tracing::trace!(base_dn = %request.base_dn, "search cache hit");
            return Ok(hit);
        }
        let mut conn = self.factory.get_connection().await?;
        let result = conn.search(request).await?;
        self.cache.put(request.clone(), result.clone());
        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResultCache::new(10, Duration::from_secs(5)).unwrap();
        cache.put("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get(&"a"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_refreshes_insertion_time() {
        let cache = ResultCache::new(10, Duration::from_secs(5)).unwrap();
        cache.put("a", 1);
        tokio::time::advance(Duration::from_secs(4)).await;
        cache.put("a", 2);
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get(&"a"), Some(2));
    }

    #[test]
    fn test_lru_evicts_exactly_one() {
        let cache = ResultCache::new(3, Duration::from_secs(60)).unwrap();
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        // touch "a" so "b" is least recently used
        assert_eq!(cache.get(&"a"), Some(1));
        cache.put("d", 4);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.get(&"d"), Some(4));
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = ResultCache::new(3, Duration::from_secs(60)).unwrap();
        cache.put(1, "x");
        cache.put(2, "y");
        assert_eq!(cache.remove(&1), Some("x"));
        assert_eq!(cache.remove(&1), None);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_debug_reports_size() {
        let cache = ResultCache::new(4, Duration::from_secs(60)).unwrap();
        cache.put("a", 1);
        let debug = format!("{cache:?}");
        assert!(debug.contains("len: 1"), "{debug}");
        assert!(debug.contains("capacity: 4"), "{debug}");
    }

    #[tokio::test]
    async fn test_zero_sweep_interval_is_ignored() {
        let config = CacheConfig {
            sweep_interval: Some(Duration::ZERO),
            ..CacheConfig::default()
        };
        let cache = ResultCache::<u8, u8>::from_config(&config).unwrap();
        cache.put(1, 1);
        assert_eq!(cache.get(&1), Some(1));
    }

    #[test]
    fn test_invalid_settings() {
        assert!(ResultCache::<u8, u8>::new(0, Duration::from_secs(1)).is_err());
        assert!(ResultCache::<u8, u8>::new(1, Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let cache = Arc::new(ResultCache::new(10, Duration::from_secs(5)).unwrap());
        cache.put("a", 1);
        let sweeper = cache.spawn_sweeper(Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(3)).await;
        cache.put("b", 2);
        assert_eq!(cache.len(), 2);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"b"), Some(2));

        drop(cache);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(sweeper.is_finished());
    }

    #[test]
    fn test_search_requests_as_keys() {
        let cache = ResultCache::new(2, Duration::from_secs(60)).unwrap();
        let req = SearchRequest::new("dc=example,dc=com", "(uid=jdoe)").unwrap();
        cache.put(req.clone(), SearchResult::empty());

        let same = SearchRequest::new("dc=example,dc=com", "(uid=jdoe)").unwrap();
        assert!(cache.get(&same).is_some());

        let other = same.size_limit(1);
        assert!(cache.get(&other).is_none());
    }
}

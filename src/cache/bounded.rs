//! Generic size-bounded LRU container.

use crate::{Error, ErrorContext, Result};
use lru::LruCache;
use serde::Serialize;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// One stored value plus its access metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<K, V> {
    pub key: K,
    pub value: V,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
}

impl<K, V> CacheEntry<K, V> {
    fn new(key: K, value: V) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Least-recently-used cache with a hard capacity.
///
/// All mutation goes through one lock, so concurrent inserts of the same key
/// never lose an update. `get` refreshes recency; `has` does not.
pub struct BoundedCache<K: Hash + Eq, V> {
    inner: Mutex<LruCache<K, CacheEntry<K, V>>>,
    capacity: NonZeroUsize,
    stats: AtomicStats,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            Error::configuration_with_context(
                "cache capacity must be at least 1",
                ErrorContext::new()
                    .with_field_path("capacity")
                    .with_source("bounded_cache"),
            )
        })?;
        Ok(Self {
            inner: Mutex::new(LruCache::new(capacity)),
            capacity,
            stats: AtomicStats::default(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, CacheEntry<K, V>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        match inner.get_mut(key) {
            Some(entry) => {
                entry.last_accessed = Instant::now();
                entry.access_count += 1;
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Entry metadata without touching recency or counters.
    pub fn peek_entry(&self, key: &K) -> Option<CacheEntry<K, V>> {
        self.lock().peek(key).cloned()
    }

    /// Insert or replace. Returns the key evicted to make room, if any.
    pub fn set(&self, key: K, value: V) -> Option<K> {
        let mut inner = self.lock();
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        if let Some(entry) = inner.get_mut(&key) {
            *entry = CacheEntry::new(key, value);
            return None;
        }
        let evicted = inner
            .push(key.clone(), CacheEntry::new(key, value))
            .map(|(k, _)| k);
        if evicted.is_some() {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Return the cached value or build, store and return a new one.
    ///
    /// The lock is held while `build` runs, so two callers never build the
    /// same key concurrently. A failed build stores nothing.
    pub fn try_get_or_insert_with<F>(&self, key: K, build: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let mut inner = self.lock();
        if let Some(entry) = inner.get_mut(&key) {
            entry.last_accessed = Instant::now();
            entry.access_count += 1;
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry.value.clone());
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let value = build()?;
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        if inner
            .push(key.clone(), CacheEntry::new(key, value.clone()))
            .is_some()
        {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(value)
    }

    pub fn has(&self, key: &K) -> bool {
        self.lock().contains(key)
    }

    pub fn delete(&self, key: &K) -> bool {
        let removed = self.lock().pop(key).is_some();
        if removed {
            self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Drop every entry created more than `max_age` ago. Returns how many
    /// were removed.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let mut inner = self.lock();
        let stale: Vec<K> = inner
            .iter()
            .filter(|(_, e)| e.created_at.elapsed() > max_age)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &stale {
            inner.pop(k);
        }
        self.stats
            .evictions
            .fetch_add(stale.len() as u64, Ordering::Relaxed);
        stale.len()
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        self.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(BoundedCache::<String, u32>::new(0).is_err());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = BoundedCache::new(3).unwrap();
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);
        // refresh "a" so "b" becomes the candidate
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.set("d", 4), Some("b"));
        assert_eq!(cache.len(), 3);
        assert!(!cache.has(&"b"));
        assert_eq!(cache.keys(), vec!["d", "a", "c"]);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = BoundedCache::new(2).unwrap();
        cache.set(1, "x");
        cache.set(2, "y");
        assert_eq!(cache.set(1, "z"), None);
        assert_eq!(cache.get(&1), Some("z"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_has_does_not_refresh_recency() {
        let cache = BoundedCache::new(2).unwrap();
        cache.set(1, ());
        cache.set(2, ());
        assert!(cache.has(&1));
        assert_eq!(cache.set(3, ()), Some(1));
    }

    #[test]
    fn test_access_metadata_and_hit_ratio() {
        let cache = BoundedCache::new(4).unwrap();
        cache.set("k", 10);
        cache.get(&"k");
        cache.get(&"k");
        cache.get(&"missing");
        let entry = cache.peek_entry(&"k").unwrap();
        assert_eq!(entry.access_count, 2);
        assert!(entry.last_accessed >= entry.created_at);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (2, 1));
        assert!((stats.hit_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = BoundedCache::new(4).unwrap();
        cache.set(1, 1);
        cache.set(2, 2);
        assert!(cache.delete(&1));
        assert!(!cache.delete(&1));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 4);
    }

    #[test]
    fn test_failed_build_stores_nothing() {
        let cache: BoundedCache<&str, u32> = BoundedCache::new(2).unwrap();
        assert!(cache
            .try_get_or_insert_with("k", || Err(Error::validation("nope")))
            .is_err());
        assert!(!cache.has(&"k"));
        assert_eq!(cache.try_get_or_insert_with("k", || Ok(5)).unwrap(), 5);
        assert_eq!(cache.try_get_or_insert_with("k", || Ok(9)).unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_older_than() {
        let cache = BoundedCache::new(8).unwrap();
        cache.set("old", 1);
        tokio::time::advance(Duration::from_secs(10)).await;
        cache.set("new", 2);
        assert_eq!(cache.evict_older_than(Duration::from_secs(5)), 1);
        assert!(!cache.has(&"old"));
        assert!(cache.has(&"new"));
    }

    #[test]
    fn test_concurrent_set_get_respects_capacity() {
        let cache = std::sync::Arc::new(BoundedCache::<u64, u64>::new(8).unwrap());
        let mut handles = vec![];
        for t in 0..8u64 {
            let cache = std::sync::Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..500u64 {
                    let key = t * 1_000 + i;
                    cache.set(key, i);
                    cache.get(&key);
                    assert!(cache.len() <= cache.capacity());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let stats = cache.stats();
        assert_eq!(cache.len(), 8);
        assert_eq!(stats.sets, 4_000);
        // every key is distinct, so each set beyond capacity evicted exactly one entry
        assert_eq!(stats.evictions, stats.sets - cache.len() as u64);
        assert_eq!(stats.hits + stats.misses, 4_000);
    }
}

//! In-process cache of decoded images, bounded by aggregate byte size.
//!
//! ## Eviction
//!
//! Strict LRU through [`LruIndex`]: both [`MemoryCache::get`] and
//! [`MemoryCache::put`] promote the entry to most recently used, and `put`
//! evicts least recently used entries until the new total fits. An entry
//! larger than the whole ceiling is rejected; the caller still owns it, and
//! any older value cached under the same key is dropped.
//!
//! ## Thread Safety
//!
//! All operations take `&self` and serialize on one internal mutex, so
//! eviction happens atomically with the insertion that caused it. Values are
//! handed out as `Arc<V>`; the cache owns them once stored and callers only
//! ever get shared read access.

use crate::lru::{Admission, LruIndex};
use crate::stats::CacheStats;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Values that know their approximate in-memory footprint.
pub trait Weighted {
    /// Approximate size in bytes used for cache accounting.
    fn weight(&self) -> usize;
}

impl Weighted for Vec<u8> {
    fn weight(&self) -> usize {
        self.len()
    }
}

/// What happened to a value passed to [`MemoryCache::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Stored; `evicted` entries were dropped to make room.
    Stored { evicted: usize },
    /// Larger than the whole ceiling; not cached.
    Rejected,
}

#[derive(Debug)]
struct Entry<V> {
    value: Arc<V>,
    last_access: Instant,
}

#[derive(Debug)]
struct Inner<K, V> {
    index: LruIndex<K>,
    entries: HashMap<K, Entry<V>>,
    hit_count: u64,
    miss_count: u64,
    eviction_count: u64,
    rejection_count: u64,
}

/// Byte-bounded, thread-safe LRU cache.
#[derive(Debug)]
pub struct MemoryCache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> MemoryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Weighted,
{
    /// Create a cache holding at most `ceiling_bytes` of values.
    pub fn new(ceiling_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                index: LruIndex::new(ceiling_bytes),
                entries: HashMap::new(),
                hit_count: 0,
                miss_count: 0,
                eviction_count: 0,
                rejection_count: 0,
            }),
        }
    }

    /// Look up a value, promoting it to most recently used.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = Instant::now();
                inner.index.touch(key);
                inner.hit_count += 1;
                Some(Arc::clone(&entry.value))
            }
            None => {
                inner.miss_count += 1;
                None
            }
        }
    }

    /// Check presence without touching recency or statistics.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Store a value as most recently used, evicting as needed.
    pub fn put(&self, key: K, value: Arc<V>) -> PutOutcome {
        let size = value.weight();
        let mut inner = self.inner.lock();
        match inner.index.insert(key.clone(), size) {
            Admission::Rejected => {
                inner.entries.remove(&key);
                inner.rejection_count += 1;
                trace!(size, ceiling = inner.index.max_bytes(), "memory cache rejected oversized entry");
                PutOutcome::Rejected
            }
            Admission::Admitted { evicted } => {
                for victim in &evicted {
                    inner.entries.remove(victim);
                }
                inner.eviction_count += evicted.len() as u64;
                inner.entries.insert(
                    key,
                    Entry {
                        value,
                        last_access: Instant::now(),
                    },
                );
                if !evicted.is_empty() {
                    trace!(evicted = evicted.len(), "memory cache evicted entries");
                }
                PutOutcome::Stored {
                    evicted: evicted.len(),
                }
            }
        }
    }

    /// Remove an entry, returning it if it existed.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        let mut inner = self.inner.lock();
        inner.index.remove(key);
        inner.entries.remove(key).map(|entry| entry.value)
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.index.clear();
        inner.entries.clear();
    }

    /// When the entry was last read or written.
    pub fn last_access(&self, key: &K) -> Option<Instant> {
        self.inner.lock().entries.get(key).map(|e| e.last_access)
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<K> {
        self.inner.lock().index.keys_by_recency()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident size in bytes.
    pub fn current_bytes(&self) -> usize {
        self.inner.lock().index.current_bytes()
    }

    pub fn ceiling_bytes(&self) -> usize {
        self.inner.lock().index.max_bytes()
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            bytes: inner.index.current_bytes(),
            ceiling_bytes: inner.index.max_bytes(),
            hit_count: inner.hit_count,
            miss_count: inner.miss_count,
            eviction_count: inner.eviction_count,
            rejection_count: inner.rejection_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn blob(len: usize) -> Arc<Vec<u8>> {
        Arc::new(vec![0u8; len])
    }

    #[test]
    fn test_get_miss_then_hit() {
        let cache: MemoryCache<&str, Vec<u8>> = MemoryCache::new(100);
        assert!(cache.get(&"a").is_none());
        cache.put("a", blob(10));
        assert_eq!(cache.get(&"a").map(|v| v.len()), Some(10));

        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 1,
                bytes: 10,
                ceiling_bytes: 100,
                hit_count: 1,
                miss_count: 1,
                eviction_count: 0,
                rejection_count: 0,
            }
        );
    }

    #[test]
    fn test_oversized_replacement_evicts_stale_value() {
        let cache: MemoryCache<&str, Vec<u8>> = MemoryCache::new(16);
        cache.put("a", blob(8));
        cache.put("b", blob(4));
        assert_eq!(cache.put("a", blob(17)), PutOutcome::Rejected);
        assert!(cache.get(&"a").is_none());
        assert_eq!(cache.keys_by_recency(), vec!["b"]);
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 1,
                bytes: 4,
                ceiling_bytes: 16,
                hit_count: 0,
                miss_count: 1,
                eviction_count: 0,
                rejection_count: 1,
            }
        );
    }

    #[test]
    fn test_put_evicts_least_recently_used() {
        let cache: MemoryCache<&str, Vec<u8>> = MemoryCache::new(30);
        cache.put("a", blob(10));
        cache.put("b", blob(10));
        cache.put("c", blob(10));
        cache.get(&"a");

        assert_eq!(cache.put("d", blob(10)), PutOutcome::Stored { evicted: 1 });
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"a"));
        assert_eq!(cache.current_bytes(), 30);
    }

    #[test]
    fn test_oversized_rejected_but_still_usable() {
        let cache: MemoryCache<&str, Vec<u8>> = MemoryCache::new(16);
        let value = blob(17);
        assert_eq!(cache.put("big", Arc::clone(&value)), PutOutcome::Rejected);
        assert!(cache.get(&"big").is_none());
        assert_eq!(value.len(), 17);
        assert_eq!(cache.stats().rejection_count, 1);
    }

    #[test]
    fn test_repeated_get_keeps_accounting() {
        let cache: MemoryCache<&str, Vec<u8>> = MemoryCache::new(100);
        cache.put("a", blob(10));
        cache.put("b", blob(20));
        let before = cache.current_bytes();
        for _ in 0..10 {
            cache.get(&"a");
        }
        assert_eq!(cache.current_bytes(), before);
        assert_eq!(cache.keys_by_recency(), vec!["a", "b"]);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache: MemoryCache<u32, Vec<u8>> = MemoryCache::new(100);
        cache.put(1, blob(10));
        cache.put(2, blob(10));
        assert!(cache.remove(&1).is_some());
        assert!(cache.remove(&1).is_none());
        assert_eq!(cache.current_bytes(), 10);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.current_bytes(), 0);
    }

    #[test]
    fn test_last_access_advances_on_get() {
        let cache: MemoryCache<u32, Vec<u8>> = MemoryCache::new(100);
        cache.put(1, blob(1));
        let stored = cache.last_access(&1).unwrap();
        cache.get(&1);
        assert!(cache.last_access(&1).unwrap() >= stored);
    }
}

use serde::Serialize;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Thread-safe bounded LRU map. One mutex guards every operation; all of
/// them are O(1), so contention stays cheap. `get` returns clones, never
/// references into the map.
pub struct LruCache<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
}

struct Inner<K: Hash + Eq, V> {
    map: lru::LruCache<K, V>,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub utilization: f32,
    pub hit_rate: f32,
}

impl<K: Hash + Eq, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(Inner {
                map: lru::LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Returns a clone of the value and promotes the entry to
    /// most-recently-used. Misses are counted.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        match inner.map.get(key) {
            Some(value) => {
                let value = value.clone();
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Inserts or refreshes `key`; the least-recently-used entry is evicted
    /// when the cache is full.
    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.put(key, value);
    }

    /// Membership check without promoting the entry.
    pub fn contains(&self, key: &K) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.map.contains(key)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.clear();
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        let size = inner.map.len();
        let capacity = inner.map.cap().get();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            size,
            capacity,
            hits: inner.hits,
            misses: inner.misses,
            utilization: size as f32 / capacity as f32,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f32 / lookups as f32
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_after_put_returns_value() {
        let cache: LruCache<String, u32> = LruCache::new(4);
        cache.put("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn overflow_evicts_least_recently_used() {
        let cache: LruCache<u32, u32> = LruCache::new(2);
        cache.put(1, 10);
        cache.put(2, 20);
        // Touch 1 so 2 becomes the eviction candidate.
        assert_eq!(cache.get(&1), Some(10));
        cache.put(3, 30);

        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn value_survives_up_to_capacity_distinct_puts() {
        let capacity = 8;
        let cache: LruCache<u32, u32> = LruCache::new(capacity);
        cache.put(0, 0);
        for key in 1..capacity as u32 {
            cache.put(key, key);
        }
        assert_eq!(cache.get(&0), Some(0));

        cache.put(100, 100);
        cache.put(101, 101);
        // 0 was most-recently-used after the get, so 1 and 2 went first.
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), None);
    }

    #[test]
    fn contains_does_not_promote() {
        let cache: LruCache<u32, u32> = LruCache::new(2);
        cache.put(1, 10);
        cache.put(2, 20);
        assert!(cache.contains(&1));
        cache.put(3, 30);
        // 1 stayed least-recently-used despite the contains call.
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(20));
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache: LruCache<u32, u32> = LruCache::new(4);
        cache.put(1, 10);
        cache.get(&1);
        cache.get(&2);
        cache.get(&3);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 4);
        assert!((stats.hit_rate - 1.0 / 3.0).abs() < 1e-6);
        assert!((stats.utilization - 0.25).abs() < 1e-6);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache: LruCache<u32, u32> = LruCache::new(4);
        cache.put(1, 10);
        cache.clear();
        assert!(cache.is_empty());
    }
}

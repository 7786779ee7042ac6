//! Adaptive replacement cache with a fixed expiration window.
//!
//! Four LRU lists: `t1` holds entries seen once, `t2` entries seen at least
//! twice; `b1` and `b2` remember keys recently evicted from each. A hit in
//! a ghost list shifts the target size `p` of `t1` toward the list that
//! would have kept it, so the cache adapts between recency and frequency.

use lru::LruCache;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires: Instant,
}

/// A bounded ARC cache whose entries expire `ttl` after insertion.
#[derive(Debug)]
pub struct ArcCache<K: Hash + Eq, V> {
    capacity: usize,
    ttl: Duration,
    p: usize,
    t1: LruCache<K, Entry<V>>,
    t2: LruCache<K, Entry<V>>,
    b1: LruCache<K, ()>,
    b2: LruCache<K, ()>,
}

impl<K: Hash + Eq + Clone, V: Clone> ArcCache<K, V> {
    /// Creates a cache holding at most `capacity` live entries.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            p: 0,
            t1: LruCache::unbounded(),
            t2: LruCache::unbounded(),
            b1: LruCache::unbounded(),
            b2: LruCache::unbounded(),
        }
    }

    /// Maximum number of live entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached entries, expired ones included until touched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.t1.len() + self.t2.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is cached and not expired. Does not count as a use.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        self.t1
            .peek(key)
            .or_else(|| self.t2.peek(key))
            .is_some_and(|e| e.expires > now)
    }

    /// Returns the cached value, promoting it to the frequent list.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.t1.pop(key) {
            if entry.expires <= now {
                return None;
            }
            let value = entry.value.clone();
            self.t2.put(key.clone(), entry);
            return Some(value);
        }
        let expired = match self.t2.get(key) {
            Some(entry) if entry.expires > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.t2.pop(key);
        }
        None
    }

    /// Inserts or replaces a value, restarting its expiration window.
    pub fn insert(&mut self, key: K, value: V) {
        let entry = Entry {
            value,
            expires: Instant::now() + self.ttl,
        };

        if self.t1.pop(&key).is_some() || self.t2.contains(&key) {
            self.t2.put(key, entry);
            return;
        }

        if self.b1.contains(&key) {
            let delta = (self.b2.len() / self.b1.len()).max(1);
            self.p = (self.p + delta).min(self.capacity);
            self.replace(false);
            self.b1.pop(&key);
            self.t2.put(key, entry);
            return;
        }

        if self.b2.contains(&key) {
            let delta = (self.b1.len() / self.b2.len()).max(1);
            self.p = self.p.saturating_sub(delta);
            self.replace(true);
            self.b2.pop(&key);
            self.t2.put(key, entry);
            return;
        }

        let l1 = self.t1.len() + self.b1.len();
        let total = l1 + self.t2.len() + self.b2.len();
        if l1 >= self.capacity {
            if self.t1.len() < self.capacity {
                self.b1.pop_lru();
                self.replace(false);
            } else {
                self.t1.pop_lru();
            }
        } else if total >= self.capacity {
            if total >= 2 * self.capacity {
                self.b2.pop_lru();
            }
            self.replace(false);
        }
        self.t1.put(key, entry);
    }

    /// Removes `key`, returning its value if it was cached.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.b1.pop(key);
        self.b2.pop(key);
        self.t1
            .pop(key)
            .or_else(|| self.t2.pop(key))
            .map(|entry| entry.value)
    }

    /// Drops every entry and ghost.
    pub fn purge(&mut self) {
        self.t1.clear();
        self.t2.clear();
        self.b1.clear();
        self.b2.clear();
        self.p = 0;
    }

    /// Evicts one live entry into its ghost list if the cache is full.
    fn replace(&mut self, in_b2: bool) {
        if self.t1.len() + self.t2.len() < self.capacity {
            return;
        }
        let t1_len = self.t1.len();
        if t1_len > 0 && (t1_len > self.p || (in_b2 && t1_len == self.p)) {
            if let Some((key, _)) = self.t1.pop_lru() {
                self.b1.put(key, ());
            }
        } else if let Some((key, _)) = self.t2.pop_lru() {
            self.b2.put(key, ());
        } else if let Some((key, _)) = self.t1.pop_lru() {
            self.b1.put(key, ());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn insert_get_remove() {
        let mut cache = ArcCache::new(4, HOUR);
        assert!(cache.is_empty());
        cache.insert("a", 1);
        assert!(cache.contains(&"a"));
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("a", 2);
        assert_eq!(cache.get(&"a"), Some(2));
        assert_eq!(cache.remove(&"a"), Some(2));
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut cache = ArcCache::new(8, HOUR);
        for i in 0..100 {
            cache.insert(i, i);
            if i % 3 == 0 {
                cache.get(&(i / 2));
            }
            assert!(cache.len() <= 8, "len {} at {i}", cache.len());
        }
    }

    #[test]
    fn frequent_entries_survive_a_scan() {
        let mut cache = ArcCache::new(4, HOUR);
        for key in [1, 2] {
            cache.insert(key, key);
            cache.get(&key);
        }
        for key in 100..110 {
            cache.insert(key, key);
        }
        assert_eq!(cache.get(&1), Some(1));
        assert_eq!(cache.get(&2), Some(2));
    }

    #[test]
    fn ghost_hit_readmits_as_frequent() {
        let mut cache = ArcCache::new(2, HOUR);
        cache.insert(1, 1);
        cache.get(&1);
        cache.insert(2, 2);
        cache.insert(3, 3);
        assert!(!cache.contains(&2));
        assert!(cache.b1.contains(&2));

        cache.insert(2, 20);
        assert_eq!(cache.p, 1);
        assert_eq!(cache.get(&2), Some(20));
        assert!(cache.t2.contains(&2));
        assert!(!cache.contains(&1));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn entries_expire() {
        let mut cache = ArcCache::new(4, Duration::from_millis(10));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.get(&"b");
        thread::sleep(Duration::from_millis(20));
        assert!(!cache.contains(&"a"));
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_clears_everything() {
        let mut cache = ArcCache::new(2, HOUR);
        cache.insert(1, 1);
        cache.insert(2, 2);
        cache.insert(3, 3);
        cache.purge();
        assert!(cache.is_empty());
        cache.insert(1, 1);
        assert_eq!(cache.get(&1), Some(1));
    }
}

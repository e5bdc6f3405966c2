// src/streaming/cache/lru.rs
//
// Set-associative cache: a key hashes to one bucket, each bucket holds at most `ways`
// entries, and a full bucket evicts its least recently used slot.
use std::hash::{BuildHasher, BuildHasherDefault, Hash};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::RwLock;
use rustc_hash::FxHasher;

use crate::config::CacheGeometry;
use crate::streaming::types::CacheStats;

struct Slot<K, V> {
    key: K,
    value: Arc<V>,
    // Bumped under the shared lock on every hit; compared under the exclusive lock.
    stamp: AtomicU64,
}

struct Bucket<K, V> {
    slots: Vec<Slot<K, V>>,
}

impl<K: Eq, V> Bucket<K, V> {
    #[inline]
    fn find(&self, key: &K) -> Option<&Slot<K, V>> {
        self.slots.iter().find(|s| &s.key == key)
    }

    /// Inserts or replaces. Returns whatever left the bucket.
    fn insert(&mut self, key: K, value: Arc<V>, stamp: u64, ways: usize) -> Option<(K, Arc<V>)> {
        if let Some(pos) = self.slots.iter().position(|s| s.key == key) {
            let old = std::mem::replace(&mut self.slots[pos], Slot { key, value, stamp: AtomicU64::new(stamp) });
            return Some((old.key, old.value));
        }

        if self.slots.len() < ways {
            self.slots.push(Slot { key, value, stamp: AtomicU64::new(stamp) });
            return None;
        }

        let victim = self
            .slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.stamp.load(Ordering::Relaxed))
            .map(|(i, _)| i)?;
        let old = std::mem::replace(&mut self.slots[victim], Slot { key, value, stamp: AtomicU64::new(stamp) });
        Some((old.key, old.value))
    }
}

pub struct BucketCache<K, V> {
    buckets: Box<[RwLock<Bucket<K, V>>]>,
    ways: usize,
    hasher: BuildHasherDefault<FxHasher>,

    stamp: AtomicU64,
    requests: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> BucketCache<K, V>
where
    K: Copy + Eq + Hash,
{
    pub fn new(geometry: CacheGeometry) -> Self {
        assert!(geometry.buckets > 0 && geometry.ways > 0, "cache needs at least one slot");
        let buckets = (0..geometry.buckets)
            .map(|_| RwLock::new(Bucket { slots: Vec::with_capacity(geometry.ways) }))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buckets,
            ways: geometry.ways,
            hasher: BuildHasherDefault::default(),
            stamp: AtomicU64::new(1),
            requests: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    #[inline]
    fn bucket(&self, key: &K) -> &RwLock<Bucket<K, V>> {
        let h = self.hasher.hash_one(key) as usize;
        &self.buckets[h % self.buckets.len()]
    }

    #[inline]
    fn next_stamp(&self) -> u64 {
        self.stamp.fetch_add(1, Ordering::Relaxed)
    }

    /// Shared-lock lookup; a hit refreshes the slot's recency.
    pub fn find(&self, key: &K) -> Option<Arc<V>> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let bucket = self.bucket(key).read();
        let slot = bucket.find(key)?;
        slot.stamp.store(self.next_stamp(), Ordering::Relaxed);
        Some(slot.value.clone())
    }

    /// Never fails. Returns the entry that had to leave (LRU victim or replaced value).
    pub fn add_to_cache(&self, key: K, value: Arc<V>) -> Option<(K, Arc<V>)> {
        let stamp = self.next_stamp();
        let evicted = self.bucket(&key).write().insert(key, value, stamp, self.ways);
        if evicted.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Double-checked get-or-generate. `make` runs under the bucket's exclusive lock, so two
    /// threads missing on the same key produce one value.
    ///
    /// Returns the cached value plus whatever was evicted to make room.
    pub fn get_or_insert_with<E>(
        &self,
        key: K,
        make: impl FnOnce() -> Result<V, E>,
    ) -> Result<(Arc<V>, Option<(K, Arc<V>)>), E> {
        if let Some(v) = self.find(&key) {
            return Ok((v, None));
        }

        let mut bucket = self.bucket(&key).write();
        if let Some(slot) = bucket.find(&key) {
            slot.stamp.store(self.next_stamp(), Ordering::Relaxed);
            return Ok((slot.value.clone(), None));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(make()?);
        let evicted = bucket.insert(key, value.clone(), self.next_stamp(), self.ways);
        if evicted.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok((value, evicted))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.bucket(key).read().find(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.read().slots.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len() * self.ways
    }

    /// Empties every bucket and hands back the contents.
    pub fn drain(&self) -> Vec<(K, Arc<V>)> {
        let mut out = Vec::new();
        for b in self.buckets.iter() {
            out.extend(b.write().slots.drain(..).map(|s| (s.key, s.value)));
        }
        out
    }

    /// Clones out the current contents without touching recency.
    pub fn snapshot(&self) -> Vec<(K, Arc<V>)> {
        let mut out = Vec::new();
        for b in self.buckets.iter() {
            out.extend(b.read().slots.iter().map(|s| (s.key, s.value.clone())));
        }
        out
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len() as u32,
            capacity: self.capacity() as u32,
            requests: self.requests.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use super::*;

    fn ok<T>(v: T) -> Result<T, Infallible> {
        Ok(v)
    }

    #[test]
    fn single_slot_bucket_evicts_previous_entry() {
        let cache = BucketCache::<u32, &'static str>::new(CacheGeometry::new(1, 1));
        assert!(cache.add_to_cache(1, Arc::new("a")).is_none());

        let evicted = cache.add_to_cache(2, Arc::new("b"));
        let (k, v) = evicted.expect("first entry must be evicted");
        assert_eq!((k, *v), (1, "a"));
        assert_eq!(cache.len(), 1);
        assert!(cache.find(&1).is_none());
        assert_eq!(cache.find(&2).as_deref(), Some(&"b"));
    }

    #[test]
    fn evicts_least_recently_used_way() {
        let cache = BucketCache::<u32, u32>::new(CacheGeometry::new(1, 3));
        for k in 0..3 {
            cache.add_to_cache(k, Arc::new(k * 10));
        }
        // 0 becomes the most recent.
        assert!(cache.find(&0).is_some());

        let (victim, _) = cache.add_to_cache(3, Arc::new(30)).unwrap();
        assert_eq!(victim, 1);
        assert!(cache.contains(&0));
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
    }

    #[test]
    fn never_exceeds_capacity() {
        let cache = BucketCache::<i64, i64>::new(CacheGeometry::new(8, 4));
        let mut evicted = 0;
        for k in 0..1000 {
            if cache.add_to_cache(k, Arc::new(k)).is_some() {
                evicted += 1;
            }
            assert!(cache.len() <= cache.capacity());
        }
        assert_eq!(cache.len() + evicted, 1000);
        assert_eq!(cache.stats().evictions, evicted as u64);
    }

    #[test]
    fn replacing_a_key_returns_the_old_value() {
        let cache = BucketCache::<u8, u8>::new(CacheGeometry::new(2, 2));
        cache.add_to_cache(5, Arc::new(1));
        let (k, old) = cache.add_to_cache(5, Arc::new(2)).unwrap();
        assert_eq!((k, *old), (5, 1));
        assert_eq!(*cache.find(&5).unwrap(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_misses_generate_once() {
        let cache = Arc::new(BucketCache::<u32, u32>::new(CacheGeometry::new(4, 2)));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                thread::spawn(move || {
                    let (v, _) = cache
                        .get_or_insert_with(42, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(5));
                            ok(7)
                        })
                        .unwrap();
                    *v
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_generation_leaves_no_entry() {
        let cache = BucketCache::<u32, u32>::new(CacheGeometry::new(1, 1));
        let r: Result<_, &str> = cache.get_or_insert_with(1, || Err("boom"));
        assert!(r.is_err());
        assert!(cache.is_empty());
    }
}

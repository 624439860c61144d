//! `SegmentedLruCache` — a fixed-capacity, sharded, access-ordered LRU
//! cache.

use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use ahash::AHasher;
use indexmap::IndexMap;

const MIN_SEGMENTS: usize = 4;
const MAX_SEGMENTS: usize = 32;
const TARGET_ENTRIES_PER_SEGMENT: usize = 128;

fn spread(h: u64) -> u64 {
    h ^ (h >> 16)
}

fn derive_segment_count(max_size: usize) -> usize {
    let raw = (max_size / TARGET_ENTRIES_PER_SEGMENT).max(1);
    raw.next_power_of_two().clamp(MIN_SEGMENTS, MAX_SEGMENTS)
}

/// One shard: a mutex-guarded, access-ordered map. Reads move their entry
/// to the back (most-recently-used); eviction removes from the front.
struct Segment<K, V> {
    map: Mutex<IndexMap<K, V, ahash::RandomState>>,
    capacity: usize,
}

impl<K, V> Segment<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn new(capacity: usize) -> Self {
        Segment {
            map: Mutex::new(IndexMap::with_hasher(ahash::RandomState::new())),
            capacity,
        }
    }

    fn touch(map: &mut IndexMap<K, V, ahash::RandomState>, key: &K) -> Option<V> {
        let (_, value) = map.shift_remove_entry(key)?;
        map.insert(key.clone(), value.clone());
        Some(value)
    }

    fn evict_over_capacity(map: &mut IndexMap<K, V, ahash::RandomState>, capacity: usize) {
        while map.len() > capacity {
            map.shift_remove_index(0);
            log::trace!("segment over capacity ({capacity}), evicted least-recently-used entry");
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        let mut map = self.map.lock().unwrap();
        Self::touch(&mut map, key)
    }

    fn put(&self, key: K, value: V) {
        let mut map = self.map.lock().unwrap();
        map.shift_remove(&key);
        map.insert(key, value);
        Self::evict_over_capacity(&mut map, self.capacity);
    }

    /// Insert-if-absent: the loser of a race adopts the winner's value
    /// rather than overwriting it.
    fn put_if_absent(&self, key: K, value: V) -> V {
        let mut map = self.map.lock().unwrap();
        if let Some(existing) = Self::touch(&mut map, &key) {
            return existing;
        }
        map.insert(key, value.clone());
        Self::evict_over_capacity(&mut map, self.capacity);
        value
    }

    fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    fn clear(&self) {
        self.map.lock().unwrap().clear();
    }
}

/// A sharded, access-ordered LRU cache. Segment count is a power of two,
/// auto-derived from `max_size` to target ~128 entries/segment and clamped
/// to 4..32; eviction is strict LRU within a segment, approximate globally.
pub struct SegmentedLruCache<K, V> {
    segments: Vec<Segment<K, V>>,
    shard_mask: u64,
}

impl<K, V> SegmentedLruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(max_size: usize) -> Self {
        let segment_count = derive_segment_count(max_size.max(1));
        let segment_cap = max_size.div_ceil(segment_count).max(1);
        let segments = (0..segment_count)
            .map(|_| Segment::new(segment_cap))
            .collect();
        SegmentedLruCache {
            segments,
            shard_mask: (segment_count as u64) - 1,
        }
    }

    fn segment_for(&self, key: &K) -> &Segment<K, V> {
        let mut hasher = AHasher::default();
        key.hash(&mut hasher);
        let idx = (spread(hasher.finish()) & self.shard_mask) as usize;
        &self.segments[idx]
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.segment_for(key).get(key)
    }

    pub fn put(&self, key: K, value: V) {
        self.segment_for(&key).put(key, value);
    }

    pub fn put_if_absent(&self, key: K, value: V) -> V {
        self.segment_for(&key).put_if_absent(key, value)
    }

    /// Fast read; on miss, `f()` runs outside the segment lock, then the
    /// result is published with insert-if-absent. Concurrent computations
    /// for the same key may both run; exactly one stored value wins.
    pub fn get_or_compute<F: FnOnce() -> V>(&self, key: K, f: F) -> V {
        if let Some(existing) = self.get(&key) {
            return existing;
        }
        let computed = f();
        self.put_if_absent(key, computed)
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn clear(&self) {
        for segment in &self.segments {
            segment.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn put_then_get_round_trips() {
        let cache: SegmentedLruCache<&str, i32> = SegmentedLruCache::new(16);
        cache.put("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
    }

    #[test]
    fn segment_count_is_power_of_two_and_clamped() {
        let small: SegmentedLruCache<&str, i32> = SegmentedLruCache::new(1);
        assert_eq!(small.segment_count(), 4);
        let huge: SegmentedLruCache<&str, i32> = SegmentedLruCache::new(1_000_000);
        assert_eq!(huge.segment_count(), 32);
        assert!(huge.segment_count().is_power_of_two());
    }

    #[test]
    fn lru_eviction_respects_recent_access() {
        // single segment: max_size below the 128-per-segment target keeps
        // segment_count at its floor of 4... force a single segment by
        // driving capacity per-segment directly through a tiny max_size
        // and asserting on total occupancy instead of per-segment order
        // would be flaky across hash-dependent shard assignment, so this
        // test pins behavior at the `Segment` level directly.
        let segment: Segment<&str, i32> = Segment::new(4);
        segment.put("A", 1);
        segment.put("B", 2);
        segment.put("C", 3);
        segment.put("D", 4);
        segment.put("E", 5); // over capacity: evicts A
        assert_eq!(segment.get(&"A"), None);
        assert_eq!(segment.get(&"B"), Some(2)); // touches B, moves to back
        segment.put("F", 6); // over capacity: evicts C, not B
        assert_eq!(segment.get(&"C"), None);
        assert_eq!(segment.get(&"B"), Some(2));
    }

    #[test]
    fn put_if_absent_keeps_first_writer() {
        let cache: SegmentedLruCache<&str, i32> = SegmentedLruCache::new(16);
        let first = cache.put_if_absent("k", 1);
        let second = cache.put_if_absent("k", 2);
        assert_eq!(first, 1);
        assert_eq!(second, 1);
        assert_eq!(cache.get(&"k"), Some(1));
    }

    #[test]
    fn concurrent_get_or_compute_converges_on_one_value() {
        let cache: Arc<SegmentedLruCache<&str, i32>> = Arc::new(SegmentedLruCache::new(16));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(thread::spawn(move || {
                cache.get_or_compute("shared", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    100 + i
                })
            }));
        }
        let results: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winner = results[0];
        assert!(results.iter().all(|r| *r == winner));
    }
}

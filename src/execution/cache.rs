//! Tile caching for operator output.
//!
//! Computed tiles are cached per (band group, level, tile index). A band
//! group's bands are stored together so that stack operators are only ever
//! asked once per tile. Each entry has its own lock: concurrent requests for
//! the same tile wait for one computation, unrelated tiles never block.
//! Entries in use by a request are never evicted.

use crate::core::raster::{Raster, TileIndex};
use indexmap::IndexMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Computed tiles of one band group, keyed by band name.
pub type TileSet = IndexMap<String, Arc<Raster>>;

/// Cache key of a tile set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Band group index.
    pub group: usize,
    /// Resolution level.
    pub level: usize,
    /// Tile index within the level.
    pub tile: TileIndex,
}

impl TileKey {
    pub fn new(group: usize, level: usize, tile: TileIndex) -> Self {
        Self { group, level, tile }
    }
}

/// A cache entry. Empty until its first computation succeeds.
#[derive(Default)]
struct TileSlot {
    value: Mutex<Option<Arc<TileSet>>>,
    memory_size: AtomicUsize,
    /// Requests holding this slot. Incremented only under the entries lock.
    users: AtomicUsize,
}

impl TileSlot {
    fn is_idle(&self) -> bool {
        self.users.load(Ordering::Acquire) == 0
    }
}

/// Marks a slot as in use for the duration of a request.
struct SlotUse(Arc<TileSlot>);

impl Drop for SlotUse {
    fn drop(&mut self) {
        self.0.users.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (computations).
    pub misses: u64,
    /// Number of entries evicted.
    pub evictions: u64,
    /// Total time spent computing tiles.
    pub compute_time: Duration,
}

impl CacheStats {
    /// Calculate hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Thread-safe, bounded tile cache.
pub struct TileCache {
    entries: Mutex<LruCache<TileKey, Arc<TileSlot>>>,
    capacity: usize,
    max_memory: usize,
    current_memory: AtomicUsize,
    stats: Mutex<CacheStats>,
}

impl TileCache {
    /// Create a cache holding at most `capacity` tile sets.
    pub fn new(capacity: usize) -> Self {
        Self::with_memory_limit(capacity, 512)
    }

    /// Create a cache with a memory budget in megabytes.
    pub fn with_memory_limit(capacity: usize, max_memory_mb: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            capacity: capacity.max(1),
            max_memory: max_memory_mb.saturating_mul(1024 * 1024),
            current_memory: AtomicUsize::new(0),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Get a cached tile set, if present.
    pub fn get(&self, key: &TileKey) -> Option<Arc<TileSet>> {
        let slot = self.entries.lock().get(key).cloned()?;
        let value = slot.value.lock().clone();
        value
    }

    /// Get a tile set, computing it if it is not cached.
    ///
    /// At most one computation runs per key at a time. A failed computation
    /// leaves the entry empty so that a later request retries.
    pub fn get_or_compute<E, F>(&self, key: TileKey, compute: F) -> Result<Arc<TileSet>, E>
    where
        F: FnOnce() -> Result<TileSet, E>,
    {
        let slot = self.slot(key);
        let mut value = slot.0.value.lock();
        if let Some(tiles) = value.as_ref() {
            self.stats.lock().hits += 1;
            return Ok(Arc::clone(tiles));
        }

        let start = Instant::now();
        let tiles = Arc::new(compute()?);
        let size = estimate_memory_size(&tiles);
        {
            let mut stats = self.stats.lock();
            stats.misses += 1;
            stats.compute_time += start.elapsed();
        }
        *value = Some(Arc::clone(&tiles));
        drop(value);

        {
            // an invalidated slot no longer counts against the budget
            let entries = self.entries.lock();
            if entries.peek(&key).is_some_and(|current| Arc::ptr_eq(current, &slot.0)) {
                slot.0.memory_size.store(size, Ordering::Relaxed);
                self.current_memory.fetch_add(size, Ordering::Relaxed);
            }
        }
        self.enforce_memory_limit(&key);
        Ok(tiles)
    }

    /// Whether a computed tile set is cached for `key`.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.get_slot(key).is_some_and(|slot| slot.value.lock().is_some())
    }

    /// Drop every entry of a band group.
    pub fn invalidate_group(&self, group: usize) {
        let mut entries = self.entries.lock();
        let keys: Vec<TileKey> = entries
            .iter()
            .filter(|(k, _)| k.group == group)
            .map(|(k, _)| *k)
            .collect();
        for key in keys {
            if let Some(slot) = entries.pop(&key) {
                self.release(&slot);
            }
        }
    }

    /// Clear the entire cache.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        self.current_memory.store(0, Ordering::Relaxed);
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Get current memory usage in bytes.
    pub fn memory_usage(&self) -> usize {
        self.current_memory.load(Ordering::Relaxed)
    }

    /// Get number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_slot(&self, key: &TileKey) -> Option<Arc<TileSlot>> {
        self.entries.lock().peek(key).cloned()
    }

    /// The slot of `key`, created if missing, marked as in use.
    fn slot(&self, key: TileKey) -> SlotUse {
        let mut entries = self.entries.lock();
        let existing = entries.get(&key).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                while entries.len() >= self.capacity {
                    if !self.evict_idle(&mut entries, None) {
                        log::trace!("Tile cache over capacity, all {} entries in use", entries.len());
                        break;
                    }
                }
                let slot = Arc::new(TileSlot::default());
                entries.push(key, Arc::clone(&slot));
                slot
            }
        };
        slot.users.fetch_add(1, Ordering::AcqRel);
        SlotUse(slot)
    }

    /// Evict least recently used entries until the budget is met, keeping `keep`.
    fn enforce_memory_limit(&self, keep: &TileKey) {
        let mut entries = self.entries.lock();
        while self.current_memory.load(Ordering::Relaxed) > self.max_memory {
            if !self.evict_idle(&mut entries, Some(keep)) {
                break;
            }
        }
    }

    /// Evict the least recently used idle entry other than `keep`.
    fn evict_idle(&self, entries: &mut LruCache<TileKey, Arc<TileSlot>>, keep: Option<&TileKey>) -> bool {
        let victim = entries
            .iter()
            .rev()
            .find(|(key, slot)| Some(*key) != keep && slot.is_idle())
            .map(|(key, _)| *key);
        match victim.and_then(|key| entries.pop(&key)) {
            Some(slot) => {
                self.release(&slot);
                self.stats.lock().evictions += 1;
                true
            }
            None => false,
        }
    }

    fn release(&self, slot: &TileSlot) {
        let size = slot.memory_size.swap(0, Ordering::Relaxed);
        let _ = self
            .current_memory
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(size))
            });
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(4096)
    }
}

/// Estimate memory size of a tile set.
fn estimate_memory_size(tiles: &TileSet) -> usize {
    tiles
        .iter()
        .map(|(name, raster)| name.len() + std::mem::size_of::<Raster>() + raster.estimated_memory_size())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DataType;

    fn tiles(value: f64) -> TileSet {
        let mut set = TileSet::new();
        set.insert("b1".to_string(), Arc::new(Raster::filled(4, 4, DataType::Float32, value)));
        set
    }

    fn key(column: u32) -> TileKey {
        TileKey::new(0, 0, TileIndex::new(column, 0))
    }

    #[test]
    fn test_get_or_compute_caches() {
        let cache = TileCache::new(10);
        let first = cache.get_or_compute::<String, _>(key(0), || Ok(tiles(1.0))).unwrap();
        let second = cache
            .get_or_compute::<String, _>(key(0), || panic!("must not recompute"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!(cache.contains(&key(0)));
        assert!(cache.memory_usage() > 0);
    }

    #[test]
    fn test_failed_computation_is_retried() {
        let cache = TileCache::new(10);
        let err = cache.get_or_compute(key(0), || Err("boom".to_string()));
        assert_eq!(err.unwrap_err(), "boom");
        assert!(!cache.contains(&key(0)));
        assert!(cache.get_or_compute::<String, _>(key(0), || Ok(tiles(2.0))).is_ok());
    }

    #[test]
    fn test_capacity_eviction() {
        let cache = TileCache::new(2);
        for column in 0..3 {
            cache.get_or_compute::<String, _>(key(column), || Ok(tiles(1.0))).unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&key(0)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_memory_limit_eviction() {
        let cache = TileCache::with_memory_limit(100, 0);
        cache.get_or_compute::<String, _>(key(0), || Ok(tiles(1.0))).unwrap();
        cache.get_or_compute::<String, _>(key(1), || Ok(tiles(1.0))).unwrap();
        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(0)));
    }

    #[test]
    fn test_tiles_in_flight_are_not_evicted() {
        let cache = TileCache::new(1);
        let computations = AtomicUsize::new(0);
        let (started_tx, started_rx) = crossbeam::channel::bounded(1);
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(1);

        std::thread::scope(|scope| {
            let slow = scope.spawn(|| {
                cache.get_or_compute::<String, _>(key(0), || {
                    computations.fetch_add(1, Ordering::SeqCst);
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(tiles(1.0))
                })
            });
            started_rx.recv().unwrap();

            // key(0) is still computing, so inserting key(1) must not evict it
            cache.get_or_compute::<String, _>(key(1), || Ok(tiles(2.0))).unwrap();
            assert_eq!(cache.len(), 2);

            let waiting = scope.spawn(|| {
                cache.get_or_compute::<String, _>(key(0), || {
                    computations.fetch_add(1, Ordering::SeqCst);
                    Ok(tiles(3.0))
                })
            });
            release_tx.send(()).unwrap();

            let first = slow.join().unwrap().unwrap();
            let second = waiting.join().unwrap().unwrap();
            assert!(Arc::ptr_eq(&first, &second));
        });
        assert_eq!(computations.load(Ordering::SeqCst), 1);

        // once idle, entries are evicted back down to capacity
        cache.get_or_compute::<String, _>(key(2), || Ok(tiles(1.0))).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key(2)));
    }

    #[test]
    fn test_invalidate_group() {
        let cache = TileCache::new(10);
        cache.get_or_compute::<String, _>(key(0), || Ok(tiles(1.0))).unwrap();
        cache
            .get_or_compute::<String, _>(TileKey::new(1, 0, TileIndex::new(0, 0)), || Ok(tiles(1.0)))
            .unwrap();
        cache.invalidate_group(0);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.memory_usage(), 0);
    }
}

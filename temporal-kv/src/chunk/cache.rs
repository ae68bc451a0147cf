//! The process-wide chunk cache.
//!
//! A TTL-bounded map from chunk id to loaded chunk, with atomic hit/miss
//! counters, passed around as an explicit handle rather than held as
//! hidden global state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::chunk::{Chunk, ChunkId};

enum CacheEntry {
    Hit(Arc<Chunk>, Instant),
    /// A recent load failure, cached briefly to prevent thrash on
    /// repeatedly-missing objects.
    Miss(Instant),
}

/// A TTL-bounded cache of loaded chunks, keyed by [`ChunkId`].
pub struct ChunkCache {
    entries: Mutex<HashMap<ChunkId, CacheEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ChunkCache {
    pub fn new(ttl: Duration) -> Self {
        ChunkCache {
            entries: Mutex::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Five minutes, a reasonable default for chunk read-heavy workloads.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(5 * 60))
    }

    /// Returns `Some(chunk)` on a live positive hit, `None` otherwise
    /// (including on a live negative entry, or on expiry).
    pub fn get(&self, id: ChunkId) -> Option<Arc<Chunk>> {
        let mut entries = self.entries.lock().expect("chunk cache lock poisoned");
        match entries.get(&id) {
            Some(CacheEntry::Hit(chunk, stored_at)) if stored_at.elapsed() < self.ttl => {
                let chunk = Arc::clone(chunk);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(chunk)
            }
            Some(CacheEntry::Miss(stored_at)) if stored_at.elapsed() < self.ttl => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            _ => {
                entries.remove(&id);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, id: ChunkId, chunk: Arc<Chunk>) {
        let mut entries = self.entries.lock().expect("chunk cache lock poisoned");
        entries.insert(id, CacheEntry::Hit(chunk, Instant::now()));
    }

    /// Records a load failure for `id` so repeated lookups against a
    /// missing object don't storm the store within the TTL window.
    pub fn insert_negative(&self, id: ChunkId) {
        let mut entries = self.entries.lock().expect("chunk cache lock poisoned");
        entries.insert(id, CacheEntry::Miss(Instant::now()));
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::with_default_ttl()
    }
}

/// Hit/miss counters, read atomically; used for telemetry gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::id::ChunkId as Id;
    use crate::event::KeyFrame;
    use crate::timestamp::AbsTimestamp;

    #[test]
    fn records_hits_and_misses() {
        let cache = ChunkCache::with_default_ttl();
        let id = Id::from_timestamp(AbsTimestamp::now());

        assert!(cache.get(id).is_none());
        let chunk = Arc::new(Chunk::finish(id, AbsTimestamp::now(), KeyFrame::new(), Vec::new()).unwrap());
        cache.insert(id, chunk);
        assert!(cache.get(id).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn negative_entries_count_as_misses() {
        let cache = ChunkCache::with_default_ttl();
        let id = Id::from_timestamp(AbsTimestamp::now());
        cache.insert_negative(id);
        assert!(cache.get(id).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn expired_entries_are_treated_as_absent() {
        let cache = ChunkCache::new(Duration::from_millis(0));
        let id = Id::from_timestamp(AbsTimestamp::now());
        let chunk = Arc::new(Chunk::finish(id, AbsTimestamp::now(), KeyFrame::new(), Vec::new()).unwrap());
        cache.insert(id, chunk);
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get(id).is_none());
    }
}

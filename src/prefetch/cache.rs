//! Global chunk cache shared by every open prefetch handle.
//!
//! Generalizes the teacher's `AttributeCache::Lru` (`lru::LruCache<u64,
//! FileAttr>`, entry-count capacity) to a byte-budgeted cache of downloaded
//! ranges keyed by `(handle, offset)`, per spec.md §4.2's "global memory
//! budget; LRU eviction of chunks across all handles." Chunks belonging to
//! a handle with an ongoing read are pinned and skipped during eviction.

use bytes::Bytes;
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub handle_id: u64,
    pub offset: u64,
}

struct Inner {
    cache: LruCache<ChunkKey, Bytes>,
    used_bytes: u64,
    pinned: HashSet<u64>,
}

pub struct GlobalChunkCache {
    inner: Mutex<Inner>,
    budget_bytes: u64,
}

impl GlobalChunkCache {
    pub fn new(budget_bytes: u64) -> Self {
        Self {
            // Entry count is unbounded; eviction is driven by `used_bytes`
            // against `budget_bytes` instead of LRU's own capacity.
            inner: Mutex::new(Inner {
                cache: LruCache::new(NonZeroUsize::new(1_000_000).unwrap()),
                used_bytes: 0,
                pinned: HashSet::new(),
            }),
            budget_bytes,
        }
    }

    pub fn get(&self, key: &ChunkKey) -> Option<Bytes> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.cache.get(key).cloned()
    }

    pub fn insert(&self, key: ChunkKey, data: Bytes) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = inner.cache.put(key, data.clone()) {
            inner.used_bytes = inner.used_bytes.saturating_sub(old.len() as u64);
        }
        inner.used_bytes += data.len() as u64;
        Self::evict_over_budget(&mut inner, self.budget_bytes);
    }

    pub fn remove(&self, key: &ChunkKey) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(data) = inner.cache.pop(key) {
            inner.used_bytes = inner.used_bytes.saturating_sub(data.len() as u64);
        }
    }

    /// Removes every chunk belonging to `handle_id`, e.g. on handle release.
    pub fn evict_handle(&self, handle_id: u64, known_offsets: &[u64]) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        for offset in known_offsets {
            let key = ChunkKey {
                handle_id,
                offset: *offset,
            };
            if let Some(data) = inner.cache.pop(&key) {
                inner.used_bytes = inner.used_bytes.saturating_sub(data.len() as u64);
            }
        }
    }

    /// Exempts `handle_id`'s chunks from eviction for the duration of an
    /// ongoing read; call [`Self::unpin`] once the read completes.
    pub fn pin(&self, handle_id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.pinned.insert(handle_id);
    }

    pub fn unpin(&self, handle_id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.pinned.remove(&handle_id);
    }

    fn evict_over_budget(inner: &mut Inner, budget_bytes: u64) {
        let mut attempts = inner.cache.len();
        while inner.used_bytes > budget_bytes && attempts > 0 {
            attempts -= 1;
            let Some((key, _)) = inner.cache.peek_lru().map(|(k, v)| (*k, v.len())) else {
                break;
            };
            if inner.pinned.contains(&key.handle_id) {
                // Move the pinned entry to most-recently-used so the scan
                // makes progress toward an evictable candidate.
                inner.cache.promote(&key);
                continue;
            }
            if let Some(data) = inner.cache.pop(&key) {
                inner.used_bytes = inner.used_bytes.saturating_sub(data.len() as u64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_respects_budget() {
        let cache = GlobalChunkCache::new(10);
        cache.insert(ChunkKey { handle_id: 1, offset: 0 }, Bytes::from_static(b"0123456789"));
        cache.insert(ChunkKey { handle_id: 1, offset: 10 }, Bytes::from_static(b"abcde"));
        // inserting 5 more bytes over a 10-byte budget must evict the oldest
        assert!(cache.get(&ChunkKey { handle_id: 1, offset: 0 }).is_none());
        assert!(cache.get(&ChunkKey { handle_id: 1, offset: 10 }).is_some());
    }

    #[test]
    fn pinned_handle_is_skipped_during_eviction() {
        let cache = GlobalChunkCache::new(10);
        cache.insert(ChunkKey { handle_id: 1, offset: 0 }, Bytes::from_static(b"0123456789"));
        cache.pin(1);
        cache.insert(ChunkKey { handle_id: 2, offset: 0 }, Bytes::from_static(b"abcde"));
        assert!(cache.get(&ChunkKey { handle_id: 1, offset: 0 }).is_some());
        cache.unpin(1);
    }
}

// Opaque response cache for backend channels
//
// Keys are 64-bit hashes of (path, body); values are the upstream status
// and body bytes. Bounded by entry count and a byte budget with LRU
// eviction.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-entry bookkeeping overhead
const ENTRY_OVERHEAD_BYTES: usize = 64;

/// 64-bit cache key for a (path, body) pair
pub fn cache_key(path: &str, body: &[u8]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.as_bytes());
    hasher.update(&[0]);
    hasher.update(body);
    let digest = hasher.finalize();
    u64::from_le_bytes(digest.as_bytes()[..8].try_into().unwrap())
}

#[derive(Debug, Clone)]
struct CachedResponse {
    status: u16,
    body: Vec<u8>,
    size_bytes: usize,
    last_accessed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseCacheStats {
    pub entries: usize,
    pub current_memory_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub insertions: u64,
}

pub struct ResponseCache {
    max_entries: usize,
    max_memory_bytes: usize,
    entries: HashMap<u64, CachedResponse>,
    current_memory_bytes: usize,
    access_counter: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    insertions: u64,
}

impl ResponseCache {
    pub fn new(max_entries: usize, max_memory_bytes: usize) -> Self {
        Self {
            max_entries,
            max_memory_bytes,
            entries: HashMap::new(),
            current_memory_bytes: 0,
            access_counter: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            insertions: 0,
        }
    }

    pub fn get(&mut self, key: u64) -> Option<(u16, Vec<u8>)> {
        self.access_counter += 1;
        let counter = self.access_counter;
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.last_accessed = counter;
                self.hits += 1;
                Some((entry.status, entry.body.clone()))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a response; entries larger than the whole budget are
    /// silently skipped (the cache is best-effort)
    pub fn put(&mut self, key: u64, status: u16, body: Vec<u8>) {
        let size_bytes = body.len() + ENTRY_OVERHEAD_BYTES;
        if size_bytes > self.max_memory_bytes {
            return;
        }

        if let Some(old) = self.entries.remove(&key) {
            self.current_memory_bytes -= old.size_bytes;
        }

        while self.entries.len() >= self.max_entries
            || self.current_memory_bytes + size_bytes > self.max_memory_bytes
        {
            if !self.evict_lru() {
                break;
            }
        }

        self.access_counter += 1;
        self.entries.insert(
            key,
            CachedResponse {
                status,
                body,
                size_bytes,
                last_accessed: self.access_counter,
            },
        );
        self.current_memory_bytes += size_bytes;
        self.insertions += 1;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_memory_bytes = 0;
    }

    pub fn stats(&self) -> ResponseCacheStats {
        ResponseCacheStats {
            entries: self.entries.len(),
            current_memory_bytes: self.current_memory_bytes,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            insertions: self.insertions,
        }
    }

    fn evict_lru(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| *key);
        match victim {
            Some(key) => {
                if let Some(entry) = self.entries.remove(&key) {
                    self.current_memory_bytes -= entry.size_bytes;
                    self.evictions += 1;
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_depends_on_path_and_body() {
        let a = cache_key("/wallet/balance", b"{}");
        let b = cache_key("/wallet/balance", b"{\"x\":1}");
        let c = cache_key("/ledger/balance", b"{}");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, cache_key("/wallet/balance", b"{}"));
    }

    #[test]
    fn test_get_put_round_trip() {
        let mut cache = ResponseCache::new(16, 4_096);
        let key = cache_key("/wallet/balance", b"{}");
        assert!(cache.get(key).is_none());

        cache.put(key, 200, b"ok".to_vec());
        let (status, body) = cache.get(key).unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, b"ok");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_lru_eviction_on_entry_cap() {
        let mut cache = ResponseCache::new(2, 1 << 20);
        cache.put(1, 200, b"one".to_vec());
        cache.put(2, 200, b"two".to_vec());
        // Touch 1 so 2 is the LRU victim
        cache.get(1);
        cache.put(3, 200, b"three".to_vec());

        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_byte_budget_is_enforced() {
        let mut cache = ResponseCache::new(1_000, 1_000);
        for i in 0..50u64 {
            cache.put(i, 200, vec![0u8; 100]);
            assert!(cache.stats().current_memory_bytes <= 1_000);
        }
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn test_oversized_entry_is_skipped() {
        let mut cache = ResponseCache::new(8, 128);
        cache.put(1, 200, vec![0u8; 1_024]);
        assert!(cache.get(1).is_none());
        assert_eq!(cache.stats().entries, 0);
    }
}

// Bounded TTL resolution cache with LRU eviction and statistics
//
// Invariants after every mutating call:
//   current_memory_bytes <= max_memory_bytes
//   entries <= max_entries
// Expired entries are removed in-band on lookup and counted as expirations.

use ghostbridge_shared::types::{
    now_unix_millis, CacheEvent, CacheEventType, DomainData, ResolutionSource,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::config::CacheConfig;

/// Fixed per-entry overhead added on top of owned string bytes
const ENTRY_OVERHEAD_BYTES: usize = 256;

/// Pending cache events are capped; the facade drains them after every call
const MAX_PENDING_EVENTS: usize = 1_024;

#[derive(Debug, Error, PartialEq)]
pub enum CacheError {
    /// A single entry alone exceeds the configured byte budget
    #[error("entry for {domain} ({size_bytes} bytes) exceeds cache memory limit")]
    CapacityExhausted { domain: String, size_bytes: usize },
}

/// One cached resolution, owned exclusively by the cache
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub domain_data: DomainData,
    pub cached_at: u64,
    pub expires_at: u64,
    pub last_accessed: u64,
    pub hit_count: u64,
    pub source: ResolutionSource,
    pub size_bytes: usize,
}

/// Counters exposed through stats() and the metrics surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub entries: usize,
    pub current_memory_bytes: usize,
    pub max_entries: usize,
    pub max_memory_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub insertions: u64,
    pub hit_rate: f64,
}

pub struct ResolutionCache {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry>,
    current_memory_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    insertions: u64,
    last_cleanup: u64,
    pending_events: Vec<CacheEvent>,
}

impl ResolutionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            current_memory_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
            insertions: 0,
            last_cleanup: now_unix_millis(),
            pending_events: Vec::new(),
        }
    }

    /// Clamp a requested TTL into the configured band
    pub fn effective_ttl(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.config.default_ttl)
            .clamp(self.config.min_ttl, self.config.max_ttl)
    }

    /// Lookup; a hit requires `now < expires_at`. Hits become most
    /// recently used.
    pub fn get(&mut self, domain: &str) -> Option<&CacheEntry> {
        self.get_at(domain, now_unix_millis())
    }

    pub(crate) fn get_at(&mut self, domain: &str, now: u64) -> Option<&CacheEntry> {
        self.maybe_cleanup(now);

        let expired = match self.entries.get(domain) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) => now >= entry.expires_at,
        };
        if expired {
            self.remove_expired(domain);
            self.misses += 1;
            return None;
        }

        self.hits += 1;
        let entry = self.entries.get_mut(domain).unwrap();
        entry.hit_count += 1;
        entry.last_accessed = now;
        Some(&*entry)
    }

    /// Insert a deep copy of `data`. The previous entry for the same
    /// domain is dropped first; LRU eviction then makes room for the new
    /// entry. Fails only when the entry alone exceeds the byte budget.
    pub fn put(
        &mut self,
        data: &DomainData,
        ttl: Option<u32>,
        source: ResolutionSource,
    ) -> Result<(), CacheError> {
        self.put_at(data, ttl, source, now_unix_millis())
    }

    pub(crate) fn put_at(
        &mut self,
        data: &DomainData,
        ttl: Option<u32>,
        source: ResolutionSource,
        now: u64,
    ) -> Result<(), CacheError> {
        self.maybe_cleanup(now);

        let size_bytes = entry_size(data);
        if size_bytes > self.config.max_memory_bytes {
            return Err(CacheError::CapacityExhausted {
                domain: data.domain.clone(),
                size_bytes,
            });
        }

        // Release the previous entry before inserting the replacement
        if let Some(old) = self.entries.remove(&data.domain) {
            self.current_memory_bytes -= old.size_bytes;
        }

        while self.entries.len() >= self.config.max_entries
            || self.current_memory_bytes + size_bytes > self.config.max_memory_bytes
        {
            if !self.evict_lru(now) {
                break;
            }
        }

        let effective_ttl = self.effective_ttl(ttl) as u64;
        let entry = CacheEntry {
            domain_data: data.clone(),
            cached_at: now,
            expires_at: now + effective_ttl * 1_000,
            last_accessed: now,
            hit_count: 0,
            source,
            size_bytes,
        };
        self.current_memory_bytes += size_bytes;
        self.entries.insert(data.domain.clone(), entry);
        self.insertions += 1;
        Ok(())
    }

    pub fn remove(&mut self, domain: &str) -> bool {
        if let Some(entry) = self.entries.remove(domain) {
            self.current_memory_bytes -= entry.size_bytes;
            true
        } else {
            false
        }
    }

    /// Drop everything and record a flush event
    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_memory_bytes = 0;
        self.push_event(CacheEvent::new(CacheEventType::Flush, "*"));
    }

    /// Remove every expired entry, returning how many were dropped.
    /// Processed in batches to keep critical sections short.
    pub fn cleanup_expired(&mut self) -> usize {
        self.cleanup_expired_at(now_unix_millis())
    }

    pub(crate) fn cleanup_expired_at(&mut self, now: u64) -> usize {
        self.last_cleanup = now;
        let mut removed = 0;
        loop {
            let batch: Vec<String> = self
                .entries
                .iter()
                .filter(|(_, e)| now >= e.expires_at)
                .take(self.config.eviction_batch_size.max(1))
                .map(|(d, _)| d.clone())
                .collect();
            if batch.is_empty() {
                break;
            }
            for domain in batch {
                self.remove_expired(&domain);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("🧹 Cache cleanup removed {} expired entries", removed);
        }
        removed
    }

    pub fn stats(&self) -> CacheStatistics {
        let lookups = self.hits + self.misses;
        CacheStatistics {
            entries: self.entries.len(),
            current_memory_bytes: self.current_memory_bytes,
            max_entries: self.config.max_entries,
            max_memory_bytes: self.config.max_memory_bytes,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
            insertions: self.insertions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn memory_bytes(&self) -> usize {
        self.current_memory_bytes
    }

    /// Drain eviction/expiry/flush events recorded since the last call
    pub fn take_events(&mut self) -> Vec<CacheEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn maybe_cleanup(&mut self, now: u64) {
        if now.saturating_sub(self.last_cleanup) >= self.config.cleanup_interval_ms {
            self.cleanup_expired_at(now);
        }
    }

    fn remove_expired(&mut self, domain: &str) {
        if let Some(entry) = self.entries.remove(domain) {
            self.current_memory_bytes -= entry.size_bytes;
            self.expirations += 1;
            self.push_event(CacheEvent::new(CacheEventType::Eviction, domain));
        }
    }

    /// Evict the least-recently-used entry. Ties on `last_accessed` fall
    /// to the smaller `expires_at`, then to the larger `size_bytes`.
    fn evict_lru(&mut self, _now: u64) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by(|(_, a), (_, b)| {
                a.last_accessed
                    .cmp(&b.last_accessed)
                    .then(a.expires_at.cmp(&b.expires_at))
                    .then(b.size_bytes.cmp(&a.size_bytes))
            })
            .map(|(domain, _)| domain.clone());

        match victim {
            Some(domain) => {
                if let Some(entry) = self.entries.remove(&domain) {
                    self.current_memory_bytes -= entry.size_bytes;
                    self.evictions += 1;
                    self.push_event(CacheEvent::new(CacheEventType::Eviction, &domain));
                }
                true
            }
            None => false,
        }
    }

    fn push_event(&mut self, event: CacheEvent) {
        if self.pending_events.len() >= MAX_PENDING_EVENTS {
            self.pending_events.remove(0);
        }
        self.pending_events.push(event);
    }
}

/// Entry size: every owned string plus a fixed overhead constant
fn entry_size(data: &DomainData) -> usize {
    let mut size = ENTRY_OVERHEAD_BYTES;
    size += data.domain.len() + data.owner.len() + data.signature.len();
    size += data.contract_address.as_deref().map_or(0, str::len);
    for record in &data.records {
        size += record.name.len() + record.value.len();
        size += record.target.as_deref().map_or(0, str::len);
        size += record.signature.as_deref().map_or(0, str::len);
    }
    let meta = &data.metadata;
    size += meta.registrar.len();
    size += meta.description.as_deref().map_or(0, str::len);
    size += meta.avatar.as_deref().map_or(0, str::len);
    size += meta.website.as_deref().map_or(0, str::len);
    for (k, v) in &meta.social_links {
        size += k.len() + v.len();
    }
    for tag in &meta.tags {
        size += tag.len();
    }
    size
}

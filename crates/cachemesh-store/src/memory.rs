//! Bounded, TTL-aware in-process cache tier with exact LRU eviction.

use cachemesh_core::CacheEntry;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Default item-count ceiling.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default byte ceiling (64 MiB of stored representations).
pub const DEFAULT_MAX_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    /// Monotonic recency stamp, bumped on insert and on every read.
    touched_at: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Slot>,
    total_bytes: usize,
    clock: u64,
}

impl Inner {
    fn next_stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(slot.entry.size_bytes);
        Some(slot.entry)
    }

    /// Evicts the least-recently-used entry. Returns its key.
    fn evict_lru(&mut self) -> Option<String> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, slot)| slot.touched_at)
            .map(|(key, _)| key.clone())?;
        self.remove(&victim);
        Some(victim)
    }
}

/// The L1 tier: a Mutex-guarded map bounded by both an item-count ceiling
/// and a total-byte ceiling of *stored* representation sizes.
///
/// Operations on this tier cannot fail for normal causes; there is no I/O.
/// TTL is enforced passively on read and actively via `sweep_expired`.
#[derive(Debug)]
pub struct MemoryTier {
    inner: Mutex<Inner>,
    max_entries: usize,
    max_bytes: usize,
}

impl MemoryTier {
    #[must_use]
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries: max_entries.max(1),
            max_bytes: max_bytes.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up a key, refreshing recency and access accounting.
    ///
    /// Expired entries are removed on sight and reported as a miss.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.lock();
        let expired = match inner.entries.get(key) {
            None => return None,
            Some(slot) => slot.entry.is_expired(),
        };
        if expired {
            inner.remove(key);
            tracing::debug!(key = %key, "memory tier entry expired on read");
            return None;
        }

        let stamp = inner.next_stamp();
        let slot = inner.entries.get_mut(key)?;
        slot.touched_at = stamp;
        slot.entry.touch();
        Some(slot.entry.clone())
    }

    /// Inserts or replaces an entry, evicting LRU victims while either
    /// ceiling is exceeded.
    pub fn insert(&self, entry: CacheEntry) {
        let mut inner = self.lock();
        let key = entry.key.clone();
        let size = entry.size_bytes;

        inner.remove(&key);
        let stamp = inner.next_stamp();
        inner.entries.insert(
            key,
            Slot {
                entry,
                touched_at: stamp,
            },
        );
        inner.total_bytes += size;

        while inner.entries.len() > self.max_entries || inner.total_bytes > self.max_bytes {
            match inner.evict_lru() {
                Some(victim) => tracing::debug!(key = %victim, "evicted LRU entry"),
                None => break,
            }
        }
    }

    /// Removes a key. Returns the removed entry, if any.
    pub fn delete(&self, key: &str) -> Option<CacheEntry> {
        self.lock().remove(key)
    }

    /// Returns whether a live (non-expired) entry exists, without touching
    /// recency.
    pub fn has(&self, key: &str) -> bool {
        self.lock()
            .entries
            .get(key)
            .is_some_and(|slot| !slot.entry.is_expired())
    }

    /// Snapshot of all keys currently held, expired or not.
    pub fn keys(&self) -> Vec<String> {
        self.lock().entries.keys().cloned().collect()
    }

    /// Snapshot of all live entries, for maintenance passes.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.lock()
            .entries
            .values()
            .filter(|slot| !slot.entry.is_expired())
            .map(|slot| slot.entry.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.lock().total_bytes
    }

    /// Bytes used over the byte ceiling, in `[0.0, 1.0]`.
    pub fn usage_ratio(&self) -> f64 {
        self.lock().total_bytes as f64 / self.max_bytes as f64
    }

    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Actively reclaims expired entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    /// Empties the tier.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.total_bytes = 0;
    }
}

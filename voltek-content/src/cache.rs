//! TTL cache for fetched items.
//!
//! Content changes rarely compared to how often pages render, so every
//! resolved read is held for a short window. A cached `None` is a real
//! entry: a missing item stays missing for the TTL instead of being
//! re-requested on every render.
//!
//! Each key also carries an invalidation epoch. Writers bump it via
//! [`CacheStore::invalidate`]; fetches capture it when they start and store
//! through [`CacheStore::store_if_current`], so a response that was already
//! in flight when the invalidation happened can never overwrite newer data.

use std::collections::HashMap;
use tokio::time::{Duration, Instant};
use voltek_types::{Item, ItemKey};

/// Default freshness window for cached items.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(5000);

struct CacheEntry {
    /// The fetched item, or `None` for a cached not-found.
    data: Option<Item>,
    fetched_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

/// In-memory item cache with per-key invalidation epochs.
pub struct CacheStore {
    ttl: Duration,
    entries: HashMap<ItemKey, CacheEntry>,
    epochs: HashMap<ItemKey, u64>,
}

impl CacheStore {
    /// Creates an empty cache with the given freshness window.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            epochs: HashMap::new(),
        }
    }

    /// Returns the cached resolution for a key if it is still fresh.
    ///
    /// The outer `Option` is the cache verdict; the inner one is the cached
    /// resolution itself (`None` = known not-found). Expired entries are
    /// pruned on observation.
    pub fn fresh(&mut self, key: &ItemKey) -> Option<Option<Item>> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(self.ttl),
            None => return None,
        };

        if expired {
            self.entries.remove(key);
            return None;
        }

        self.entries.get(key).map(|entry| entry.data.clone())
    }

    /// Current invalidation epoch for a key. Zero until first invalidated.
    #[must_use]
    pub fn epoch(&self, key: &ItemKey) -> u64 {
        self.epochs.get(key).copied().unwrap_or(0)
    }

    /// Stores a resolution, but only if the key's epoch still matches the
    /// one captured when the fetch started. Returns whether it stored.
    pub fn store_if_current(&mut self, key: &ItemKey, data: Option<Item>, epoch: u64) -> bool {
        if self.epoch(key) != epoch {
            return false;
        }
        self.entries.insert(
            key.clone(),
            CacheEntry {
                data,
                fetched_at: Instant::now(),
            },
        );
        true
    }

    /// Drops a key and advances its epoch so in-flight fetches cannot
    /// resurrect the old value.
    pub fn invalidate(&mut self, key: &ItemKey) {
        self.entries.remove(key);
        *self.epochs.entry(key.clone()).or_insert(0) += 1;
    }

    /// Drops every entry. Epochs are kept so in-flight fetches stay valid.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of live entries (fresh or not yet observed as expired).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

//! Submission deduplication.
//!
//! Tier 1 is a bounded, per-process LRU of recently-seen dedup keys,
//! populated only *after* a submission is durably accepted. It is a cache,
//! not a source of truth. Tier 2 is the store's authoritative existence
//! check. The store's unique constraint is the final backstop — a race
//! between two processes past Tier 2 is resolved at insert time and is not
//! an error.

use std::sync::Arc;

use dashmap::DashSet;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use crate::event::DedupKey;
use crate::store::EventStore;

/// Default Tier-1 LRU capacity, overridden by `dedup_lru_size`.
pub const DEFAULT_LRU_CAPACITY: usize = 100_000;

/// Tier-1 + Tier-2 deduplication filter.
pub struct Deduplicator {
    tier1: Mutex<LruCache<DedupKey, ()>>,
    store: Arc<dyn EventStore>,
    /// Keys seen earlier in the batch currently being persisted. Cleared at
    /// the start of every `Persister` batch (see `crate::ingestion`). A
    /// third, ephemeral layer beyond the two durable tiers: two copies of
    /// the same dedup key landing in the same poll batch would otherwise
    /// both pass the durable checks before either is recorded.
    batch_local: DashSet<DedupKey>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn EventStore>, lru_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(lru_capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            tier1: Mutex::new(LruCache::new(capacity)),
            store,
            batch_local: DashSet::new(),
        }
    }

    /// Call once per consumed buffer batch, before processing its messages.
    pub fn begin_batch(&self) {
        self.batch_local.clear();
    }

    /// Returns `true` if `key` is a known duplicate by any tier checked so
    /// far (Tier 1, batch-local, or Tier 2, in that cheapest-first order).
    pub async fn is_duplicate(&self, key: &DedupKey) -> anyhow::Result<bool> {
        if self.tier1.lock().contains(key) {
            return Ok(true);
        }
        if self.batch_local.contains(key) {
            return Ok(true);
        }
        self.store.exists_dedup_key(key).await
    }

    /// Record `key` as seen. Call after a successful buffer acceptance
    /// (Tier 1) and again after the message is durably persisted or
    /// suppressed within the current batch (batch-local tier).
    pub fn record_accepted(&self, key: DedupKey) {
        self.batch_local.insert(key.clone());
        self.tier1.lock().put(key, ());
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use jiff::Timestamp;

use crate::entry::{CacheEntry, NewEntry, StoreAggregate};
use crate::error::CacheError;
use crate::storage::CacheStore;

/// In-process store backed by a concurrent map (single instance only)
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, CacheEntry>>,
    misses: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read an entry without counting a hit
    pub fn peek(&self, cache_key: &str) -> Option<CacheEntry> {
        self.entries.get(cache_key).map(|e| e.value().clone())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn upsert(&self, entry: NewEntry, now: Timestamp) -> Result<(), CacheError> {
        match self.entries.entry(entry.cache_key.clone()) {
            Entry::Occupied(mut existing) => entry.apply_to(existing.get_mut()),
            Entry::Vacant(slot) => {
                slot.insert(entry.into_entry(now));
            }
        }
        Ok(())
    }

    async fn find_and_touch(&self, cache_key: &str, now: Timestamp) -> Result<Option<CacheEntry>, CacheError> {
        if let Some(mut entry) = self.entries.get_mut(cache_key) {
            entry.hit_count += 1;
            entry.last_accessed_at = now;
            Ok(Some(entry.value().clone()))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }
    }

    async fn delete_by_lecture(&self, lecture_id: &str) -> Result<u64, CacheError> {
        let mut deleted = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.lecture_ids.iter().any(|id| id == lecture_id);
            if !keep {
                deleted += 1;
            }
            keep
        });
        Ok(deleted)
    }

    async fn delete_created_before(&self, cutoff: Timestamp) -> Result<u64, CacheError> {
        let mut deleted = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.created_at >= cutoff;
            if !keep {
                deleted += 1;
            }
            keep
        });
        Ok(deleted)
    }

    async fn delete_all(&self) -> Result<(), CacheError> {
        self.entries.clear();
        self.misses.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn aggregate(&self) -> Result<StoreAggregate, CacheError> {
        let mut aggregate = StoreAggregate {
            total_misses: self.misses.load(Ordering::Relaxed),
            ..StoreAggregate::default()
        };

        for entry in self.entries.iter() {
            aggregate.total_entries += 1;
            aggregate.total_hits += entry.hit_count;
            aggregate.tokens_saved += entry.tokens_used.saturating_mul(entry.hit_count);
            aggregate.storage_used += entry.content_size;
            aggregate.oldest_entry = Some(aggregate.oldest_entry.map_or(entry.created_at, |t| t.min(entry.created_at)));
            aggregate.newest_entry = Some(aggregate.newest_entry.map_or(entry.created_at, |t| t.max(entry.created_at)));
        }

        Ok(aggregate)
    }
}

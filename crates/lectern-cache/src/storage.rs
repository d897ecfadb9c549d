//! Persistent entry stores
//!
//! The service never mirrors entries in process memory, so every
//! operation here must be atomic on the store side.

pub mod memory;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use lectern_config::{CacheConfig, CacheStorage};

use crate::entry::{CacheEntry, NewEntry, StoreAggregate};
use crate::error::CacheError;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Keyed store owning cache entry lifetime
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Insert a new entry or overwrite the mutable fields of an existing
    /// one, leaving its hit count and creation time untouched
    async fn upsert(&self, entry: NewEntry, now: Timestamp) -> Result<(), CacheError>;

    /// Look up an entry, atomically incrementing its hit count and
    /// setting its last access time on a hit; records a miss otherwise
    async fn find_and_touch(&self, cache_key: &str, now: Timestamp) -> Result<Option<CacheEntry>, CacheError>;

    /// Delete every entry whose lecture set contains `lecture_id`
    async fn delete_by_lecture(&self, lecture_id: &str) -> Result<u64, CacheError>;

    /// Delete every entry created strictly before `cutoff`
    async fn delete_created_before(&self, cutoff: Timestamp) -> Result<u64, CacheError>;

    /// Remove all entries and reset the miss counter
    async fn delete_all(&self) -> Result<(), CacheError>;

    /// Compute statistics totals on the store side
    async fn aggregate(&self) -> Result<StoreAggregate, CacheError>;
}

/// Build the configured store backend
///
/// # Errors
///
/// Returns an error if the Redis URL is invalid
pub fn create_store(config: &CacheConfig) -> Result<Arc<dyn CacheStore>, CacheError> {
    match &config.storage {
        CacheStorage::Memory => Ok(Arc::new(MemoryStore::new())),
        CacheStorage::Redis(redis_config) => Ok(Arc::new(RedisStore::new(
            redis_config.url.as_str(),
            Some(redis_config.key_prefix.clone()),
        )?)),
    }
}

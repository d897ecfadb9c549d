//! Content-addressed cache for AI responses over lecture material
//!
//! Responses for test generation, chat, summaries, flashcards and mind
//! maps are keyed by a SHA-256 fingerprint of the operation, the lecture
//! set, the request params and the lecture content hash. Entries live
//! only in the backing store (in-memory or Redis/Valkey) and are removed
//! by lecture invalidation, age-based cleanup or a full clear.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod clock;
mod entry;
mod error;
mod key;
mod service;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{CacheEntry, CacheStats, DEFAULT_COST_PER_TOKEN, NewEntry, StoreAggregate};
pub use error::CacheError;
pub use key::{CacheKeyDescriptor, OperationType, canonical_json, content_hash, derive_key};
pub use service::{CacheService, Cached, Computed, RetryPolicy};
pub use storage::{CacheStore, MemoryStore, RedisStore, create_store};

use lectern_config::CacheConfig;

/// Create a cache service from configuration
pub fn create_cache_service(config: &CacheConfig) -> Result<CacheService, CacheError> {
    let backoff = duration_str::parse(&config.write_retry.backoff)
        .map_err(|e| CacheError::Config(format!("invalid retry backoff '{}': {e}", config.write_retry.backoff)))?;

    let store = create_store(config)?;

    Ok(CacheService::new(store)
        .with_retry(RetryPolicy {
            attempts: config.write_retry.attempts,
            backoff,
        })
        .with_cost_per_token(config.cost_per_token))
}

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::key::OperationType;

/// Cost in USD attributed to one generated token when estimating savings
pub const DEFAULT_COST_PER_TOKEN: f64 = 0.000_002;

/// Persisted cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub cache_key: String,
    pub operation_type: OperationType,
    pub lecture_ids: Vec<String>,
    pub params: Map<String, Value>,
    pub content_hash: String,
    /// Cached AI response payload
    pub response_data: Value,
    pub tokens_used: u64,
    pub content_size: u64,
    /// Successful reads since creation
    pub hit_count: u64,
    pub created_at: Timestamp,
    pub last_accessed_at: Timestamp,
}

/// Fields written on the miss path
///
/// Hit count and timestamps are owned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntry {
    pub cache_key: String,
    pub operation_type: OperationType,
    pub lecture_ids: Vec<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub content_hash: String,
    pub response_data: Value,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub content_size: u64,
}

impl NewEntry {
    /// Materialize a fresh entry created at `now`
    pub fn into_entry(self, now: Timestamp) -> CacheEntry {
        CacheEntry {
            cache_key: self.cache_key,
            operation_type: self.operation_type,
            lecture_ids: self.lecture_ids,
            params: self.params,
            content_hash: self.content_hash,
            response_data: self.response_data,
            tokens_used: self.tokens_used,
            content_size: self.content_size,
            hit_count: 0,
            created_at: now,
            last_accessed_at: now,
        }
    }

    /// Overwrite the mutable fields of an existing entry, keeping its
    /// counters and timestamps
    pub fn apply_to(self, entry: &mut CacheEntry) {
        entry.operation_type = self.operation_type;
        entry.lecture_ids = self.lecture_ids;
        entry.params = self.params;
        entry.content_hash = self.content_hash;
        entry.response_data = self.response_data;
        entry.tokens_used = self.tokens_used;
        entry.content_size = self.content_size;
    }
}

/// Raw totals computed by a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreAggregate {
    pub total_entries: u64,
    pub total_hits: u64,
    pub total_misses: u64,
    /// Sum of `tokens_used * hit_count`
    pub tokens_saved: u64,
    /// Sum of `content_size`
    pub storage_used: u64,
    pub oldest_entry: Option<Timestamp>,
    pub newest_entry: Option<Timestamp>,
}

/// Cache statistics as presented to dashboards
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_entries: u64,
    pub total_hits: u64,
    pub total_misses: u64,
    /// Hits over lookups, 0 when there were no lookups
    pub hit_rate: f64,
    pub tokens_saved: u64,
    /// Estimated USD saved
    pub estimated_cost_saved: f64,
    pub storage_used: u64,
    pub oldest_entry: Option<Timestamp>,
    pub newest_entry: Option<Timestamp>,
}

impl CacheStats {
    #[allow(clippy::cast_precision_loss)]
    pub fn from_aggregate(aggregate: StoreAggregate, cost_per_token: f64) -> Self {
        let lookups = aggregate.total_hits.saturating_add(aggregate.total_misses);
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            aggregate.total_hits as f64 / lookups as f64
        };

        Self {
            total_entries: aggregate.total_entries,
            total_hits: aggregate.total_hits,
            total_misses: aggregate.total_misses,
            hit_rate,
            tokens_saved: aggregate.tokens_saved,
            estimated_cost_saved: aggregate.tokens_saved as f64 * cost_per_token,
            storage_used: aggregate.storage_used,
            oldest_entry: aggregate.oldest_entry,
            newest_entry: aggregate.newest_entry,
        }
    }
}

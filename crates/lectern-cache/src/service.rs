use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::entry::{CacheEntry, CacheStats, DEFAULT_COST_PER_TOKEN, NewEntry};
use crate::error::CacheError;
use crate::key::{CacheKeyDescriptor, derive_key};
use crate::storage::CacheStore;

/// Retry policy for the best-effort write path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub attempts: u32,
    /// Delay before the first retry, doubled on each subsequent one
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const NONE: Self = Self {
        attempts: 0,
        backoff: Duration::ZERO,
    };

    fn delay(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(2_u32.saturating_pow(retry))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

/// Output of an expensive AI operation, ready to be cached
#[derive(Debug, Clone, PartialEq)]
pub struct Computed {
    pub response_data: Value,
    pub tokens_used: u64,
    pub content_size: u64,
}

/// Result of [`CacheService::get_or_compute`]
#[derive(Debug, Clone, PartialEq)]
pub enum Cached {
    /// Served from the cache
    Hit(CacheEntry),
    /// Produced by the expensive operation on this call
    Fresh(Computed),
}

impl Cached {
    pub const fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub const fn response_data(&self) -> &Value {
        match self {
            Self::Hit(entry) => &entry.response_data,
            Self::Fresh(computed) => &computed.response_data,
        }
    }

    pub fn into_response_data(self) -> Value {
        match self {
            Self::Hit(entry) => entry.response_data,
            Self::Fresh(computed) => computed.response_data,
        }
    }
}

/// AI response cache over a persistent store
///
/// Holds no entries itself; clones share the same store and may be used
/// from any number of concurrent handlers.
#[derive(Clone)]
pub struct CacheService {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    cost_per_token: f64,
}

impl CacheService {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::NONE,
            cost_per_token: DEFAULT_COST_PER_TOKEN,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn with_cost_per_token(mut self, cost_per_token: f64) -> Self {
        self.cost_per_token = cost_per_token;
        self
    }

    /// Look up a cached response, counting the hit
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached
    pub async fn get_cached_response(&self, cache_key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entry = self.store.find_and_touch(cache_key, self.clock.now()).await?;

        match &entry {
            Some(entry) => tracing::debug!(cache_key, hit_count = entry.hit_count, "cache hit"),
            None => tracing::debug!(cache_key, "cache miss"),
        }

        Ok(entry)
    }

    /// Store a response after a miss
    ///
    /// Never fails: retryable store errors are retried per the configured
    /// policy, then logged and dropped. UUID lecture ids are stored in their
    /// lowercase hyphenated form.
    pub async fn cache_response(&self, mut entry: NewEntry) {
        for id in &mut entry.lecture_ids {
            if let Some(canonical) = canonical_lecture_id(id) {
                *id = canonical;
            }
        }

        let mut retry = 0;

        loop {
            match self.store.upsert(entry.clone(), self.clock.now()).await {
                Ok(()) => {
                    tracing::debug!(
                        cache_key = %entry.cache_key,
                        operation_type = %entry.operation_type,
                        tokens_used = entry.tokens_used,
                        "cached response"
                    );
                    return;
                }
                Err(e) if e.is_retryable() && retry < self.retry.attempts => {
                    let delay = self.retry.delay(retry);
                    tracing::debug!(cache_key = %entry.cache_key, retry, error = %e, "retrying cache write");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => {
                    tracing::warn!(cache_key = %entry.cache_key, error = %e, "failed to cache response");
                    return;
                }
            }
        }
    }

    /// Serve from the cache or run `compute` and cache its output
    ///
    /// A store failure during lookup is treated as a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is invalid or `compute` fails
    pub async fn get_or_compute<F, Fut, E>(&self, descriptor: &CacheKeyDescriptor, compute: F) -> Result<Cached, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Computed, E>>,
        E: From<CacheError>,
    {
        let cache_key = derive_key(descriptor)?;

        match self.get_cached_response(&cache_key).await {
            Ok(Some(entry)) => return Ok(Cached::Hit(entry)),
            Ok(None) => {}
            Err(e) => tracing::warn!(%cache_key, error = %e, "cache lookup failed, computing response"),
        }

        let computed = compute().await?;

        self.cache_response(NewEntry {
            cache_key,
            operation_type: descriptor.operation_type,
            lecture_ids: descriptor.lecture_ids.clone(),
            params: descriptor.params.clone(),
            content_hash: descriptor.content_hash.clone(),
            response_data: computed.response_data.clone(),
            tokens_used: computed.tokens_used,
            content_size: computed.content_size,
        })
        .await;

        Ok(Cached::Fresh(computed))
    }

    /// Drop every entry referencing a lecture
    ///
    /// # Errors
    ///
    /// Returns an error if `lecture_id` is not a UUID or the store fails
    pub async fn invalidate_lecture_cache(&self, lecture_id: &str) -> Result<u64, CacheError> {
        let Some(lecture_id) = canonical_lecture_id(lecture_id) else {
            return Err(CacheError::InvalidInput(format!("invalid lecture id: {lecture_id}")));
        };

        let deleted = self.store.delete_by_lecture(&lecture_id).await?;
        tracing::info!(%lecture_id, deleted, "invalidated lecture cache");
        Ok(deleted)
    }

    /// Drop entries created more than `days_threshold` days ago
    ///
    /// Entries exactly at the threshold are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the threshold is zero or the store fails
    pub async fn clear_old_cache(&self, days_threshold: u32) -> Result<u64, CacheError> {
        if days_threshold == 0 {
            return Err(CacheError::InvalidInput("daysThreshold must be a positive integer".to_owned()));
        }

        // Thresholds reaching past the earliest timestamp match nothing
        let age = SignedDuration::from_hours(i64::from(days_threshold) * 24);
        let cutoff = self.clock.now().checked_sub(age).unwrap_or(Timestamp::MIN);

        let deleted = self.store.delete_created_before(cutoff).await?;
        tracing::info!(days_threshold, %cutoff, deleted, "cleared old cache entries");
        Ok(deleted)
    }

    /// Empty the cache
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails
    pub async fn clear_all_cache(&self) -> Result<(), CacheError> {
        self.store.delete_all().await?;
        tracing::info!("cleared all cache entries");
        Ok(())
    }

    /// Aggregate statistics, zeroed when the store cannot provide them
    pub async fn get_cache_stats(&self) -> CacheStats {
        match self.store.aggregate().await {
            Ok(aggregate) => CacheStats::from_aggregate(aggregate, self.cost_per_token),
            Err(e) => {
                tracing::warn!(error = %e, "cache statistics unavailable");
                CacheStats::default()
            }
        }
    }
}

/// Lowercase hyphenated form of a UUID lecture id, in any accepted spelling
fn canonical_lecture_id(lecture_id: &str) -> Option<String> {
    uuid::Uuid::parse_str(lecture_id.trim())
        .ok()
        .map(|id| id.hyphenated().to_string())
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("retry", &self.retry)
            .field("cost_per_token", &self.cost_per_token)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::{Map, json};

    use super::*;
    use crate::clock::ManualClock;
    use crate::entry::StoreAggregate;
    use crate::key::OperationType;
    use crate::storage::MemoryStore;

    const LECTURE_X: &str = "5b0c9c1e-6a0f-4f55-9a43-6d1a3c0e9f01";
    const LECTURE_Y: &str = "0f6e2d7a-8c3b-4e1d-b2a9-3c4d5e6f7a80";

    fn start() -> Timestamp {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    fn service() -> (CacheService, MemoryStore, Arc<ManualClock>) {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(start()));
        let service = CacheService::new(Arc::new(store.clone())).with_clock(clock.clone());
        (service, store, clock)
    }

    fn new_entry(key: &str, lectures: &[&str], data: Value) -> NewEntry {
        NewEntry {
            cache_key: key.to_owned(),
            operation_type: OperationType::TestGeneration,
            lecture_ids: lectures.iter().map(|&s| s.to_owned()).collect(),
            params: Map::new(),
            content_hash: "e".repeat(64),
            response_data: data,
            tokens_used: 1200,
            content_size: 4096,
        }
    }

    /// Store whose every call fails, counting upsert attempts
    #[derive(Default)]
    struct UnavailableStore {
        upserts: AtomicU32,
    }

    #[async_trait]
    impl CacheStore for UnavailableStore {
        async fn upsert(&self, _: NewEntry, _: Timestamp) -> Result<(), CacheError> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::StoreUnavailable("connection refused".to_owned()))
        }

        async fn find_and_touch(&self, _: &str, _: Timestamp) -> Result<Option<CacheEntry>, CacheError> {
            Err(CacheError::StoreUnavailable("connection refused".to_owned()))
        }

        async fn delete_by_lecture(&self, _: &str) -> Result<u64, CacheError> {
            Err(CacheError::StoreUnavailable("connection refused".to_owned()))
        }

        async fn delete_created_before(&self, _: Timestamp) -> Result<u64, CacheError> {
            Err(CacheError::StoreUnavailable("connection refused".to_owned()))
        }

        async fn delete_all(&self) -> Result<(), CacheError> {
            Err(CacheError::StoreUnavailable("connection refused".to_owned()))
        }

        async fn aggregate(&self) -> Result<StoreAggregate, CacheError> {
            Err(CacheError::AggregationUnavailable("no aggregation routine".to_owned()))
        }
    }

    #[tokio::test]
    async fn store_then_read_round_trips() {
        let (service, _, _) = service();
        let data = json!({"questions": [{"q": "2+2?", "a": "4"}]});

        service.cache_response(new_entry("k", &[LECTURE_X], data.clone())).await;
        let entry = service.get_cached_response("k").await.unwrap().unwrap();

        assert_eq!(entry.response_data, data);
        assert_eq!(entry.tokens_used, 1200);
        assert_eq!(entry.content_size, 4096);
        assert_eq!(entry.hit_count, 1);
    }

    #[tokio::test]
    async fn each_hit_increments_and_touches() {
        let (service, _, clock) = service();
        service.cache_response(new_entry("k", &[LECTURE_X], json!("r"))).await;

        for n in 1..=5 {
            clock.advance(SignedDuration::from_mins(1));
            let entry = service.get_cached_response("k").await.unwrap().unwrap();
            assert_eq!(entry.hit_count, n);
            assert_eq!(entry.last_accessed_at, clock.now());
            assert_eq!(entry.created_at, start());
        }
    }

    #[tokio::test]
    async fn miss_creates_nothing() {
        let (service, store, _) = service();
        assert!(service.get_cached_response("never-written").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn second_write_replaces_data() {
        let (service, store, _) = service();
        service.cache_response(new_entry("k", &[LECTURE_X], json!("first"))).await;
        service.cache_response(new_entry("k", &[LECTURE_X], json!("second"))).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.peek("k").unwrap().response_data, json!("second"));
    }

    #[tokio::test]
    async fn lecture_invalidation_deletes_every_referencing_entry() {
        let (service, store, _) = service();
        service.cache_response(new_entry("a", &[LECTURE_X, LECTURE_Y], json!("a"))).await;
        service.cache_response(new_entry("b", &[LECTURE_Y], json!("b"))).await;
        service.cache_response(new_entry("c", &[LECTURE_X], json!("c"))).await;

        assert_eq!(service.invalidate_lecture_cache(LECTURE_X).await.unwrap(), 2);
        assert!(store.peek("a").is_none());
        assert!(store.peek("b").is_some());
        assert!(store.peek("c").is_none());

        assert_eq!(service.invalidate_lecture_cache(LECTURE_X).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn invalidation_accepts_any_uuid_spelling() {
        let spellings = [
            LECTURE_X.to_uppercase(),
            format!("urn:uuid:{LECTURE_X}"),
            format!("{{{LECTURE_X}}}"),
            LECTURE_X.replace('-', ""),
        ];

        for spelling in spellings {
            let (service, store, _) = service();
            service.cache_response(new_entry("k", &[LECTURE_X], json!(1))).await;

            assert_eq!(service.invalidate_lecture_cache(&spelling).await.unwrap(), 1, "{spelling}");
            assert!(store.is_empty());
        }
    }

    #[tokio::test]
    async fn stored_lecture_ids_are_canonical() {
        let (service, store, _) = service();
        let upper = LECTURE_Y.to_uppercase();
        service.cache_response(new_entry("k", &[upper.as_str(), "legacy-id"], json!(1))).await;

        assert_eq!(store.peek("k").unwrap().lecture_ids, vec![LECTURE_Y.to_owned(), "legacy-id".to_owned()]);
        assert_eq!(service.invalidate_lecture_cache(LECTURE_Y).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalidation_rejects_malformed_ids() {
        let (service, _, _) = service();
        let err = service.invalidate_lecture_cache("lecture-1").await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn age_cleanup_keeps_the_boundary() {
        let (service, store, clock) = service();
        service.cache_response(new_entry("old", &[LECTURE_X], json!(1))).await;
        clock.advance(SignedDuration::from_hours(24));
        service.cache_response(new_entry("boundary", &[LECTURE_X], json!(2))).await;
        clock.advance(SignedDuration::from_hours(30 * 24));

        assert_eq!(service.clear_old_cache(30).await.unwrap(), 1);
        assert!(store.peek("old").is_none());
        assert!(store.peek("boundary").is_some());
        assert_eq!(service.clear_old_cache(30).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_day_threshold_is_rejected() {
        let (service, _, _) = service();
        assert!(matches!(
            service.clear_old_cache(0).await.unwrap_err(),
            CacheError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn huge_day_threshold_deletes_nothing() {
        let (service, store, clock) = service();
        service.cache_response(new_entry("k", &[LECTURE_X], json!(1))).await;
        clock.advance(SignedDuration::from_hours(365 * 24));

        assert_eq!(service.clear_old_cache(5_000_000).await.unwrap(), 0);
        assert_eq!(service.clear_old_cache(u32::MAX).await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn rewrite_keeps_counters_and_timestamps() {
        let (service, store, clock) = service();
        service.cache_response(new_entry("k", &[LECTURE_X], json!("first"))).await;
        clock.advance(SignedDuration::from_mins(5));
        service.get_cached_response("k").await.unwrap();
        let touched = clock.now();

        clock.advance(SignedDuration::from_mins(5));
        service.cache_response(new_entry("k", &[LECTURE_Y], json!("second"))).await;

        let entry = store.peek("k").unwrap();
        assert_eq!(entry.response_data, json!("second"));
        assert_eq!(entry.lecture_ids, vec![LECTURE_Y.to_owned()]);
        assert_eq!(entry.hit_count, 1);
        assert_eq!(entry.created_at, start());
        assert_eq!(entry.last_accessed_at, touched);
    }

    #[tokio::test]
    async fn clear_all_empties_store() {
        let (service, store, _) = service();
        service.cache_response(new_entry("a", &[LECTURE_X], json!(1))).await;
        service.cache_response(new_entry("b", &[LECTURE_Y], json!(2))).await;

        service.clear_all_cache().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn stats_reflect_hits_and_misses() {
        let (service, _, clock) = service();
        service.cache_response(new_entry("a", &[LECTURE_X], json!(1))).await;
        clock.advance(SignedDuration::from_hours(1));
        service.cache_response(new_entry("b", &[LECTURE_Y], json!(2))).await;

        service.get_cached_response("a").await.unwrap();
        service.get_cached_response("a").await.unwrap();
        service.get_cached_response("b").await.unwrap();
        service.get_cached_response("missing").await.unwrap();

        let stats = service.get_cache_stats().await;
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_hits, 3);
        assert_eq!(stats.total_misses, 1);
        assert!((stats.hit_rate - 0.75).abs() < 1e-9);
        assert_eq!(stats.tokens_saved, 3600);
        assert!((stats.estimated_cost_saved - 3600.0 * DEFAULT_COST_PER_TOKEN).abs() < 1e-12);
        assert_eq!(stats.storage_used, 8192);
        assert_eq!(stats.oldest_entry, Some(start()));
        assert_eq!(stats.newest_entry, Some(clock.now()));
    }

    #[tokio::test]
    async fn write_failures_are_swallowed_after_retries() {
        let store = Arc::new(UnavailableStore::default());
        let service = CacheService::new(store.clone()).with_retry(RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(1),
        });

        service.cache_response(new_entry("k", &[LECTURE_X], json!(1))).await;
        assert_eq!(store.upserts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn read_and_admin_failures_propagate() {
        let service = CacheService::new(Arc::new(UnavailableStore::default()));

        assert!(matches!(
            service.get_cached_response("k").await.unwrap_err(),
            CacheError::StoreUnavailable(_)
        ));
        assert!(service.invalidate_lecture_cache(LECTURE_X).await.is_err());
        assert!(service.clear_old_cache(30).await.is_err());
        assert!(service.clear_all_cache().await.is_err());
    }

    #[tokio::test]
    async fn stats_degrade_to_zero() {
        let service = CacheService::new(Arc::new(UnavailableStore::default()));
        assert_eq!(service.get_cache_stats().await, CacheStats::default());
    }

    #[derive(Debug)]
    enum GenerateError {
        Cache(CacheError),
        Model,
    }

    impl From<CacheError> for GenerateError {
        fn from(e: CacheError) -> Self {
            Self::Cache(e)
        }
    }

    fn summary_descriptor() -> CacheKeyDescriptor {
        let mut params = Map::new();
        params.insert("length".to_owned(), json!("short"));
        CacheKeyDescriptor::new(OperationType::Summary, [LECTURE_Y, LECTURE_X], params, "f".repeat(64))
    }

    async fn summarize() -> Result<Computed, GenerateError> {
        Ok(Computed {
            response_data: json!({"summary": "monads are burritos"}),
            tokens_used: 300,
            content_size: 2048,
        })
    }

    #[tokio::test]
    async fn get_or_compute_caches_fresh_results() {
        let (service, store, _) = service();
        let descriptor = summary_descriptor();

        let first = service.get_or_compute(&descriptor, summarize).await.unwrap();
        assert!(!first.is_hit());

        let second = service.get_or_compute(&descriptor, summarize).await.unwrap();
        assert!(second.is_hit());
        assert_eq!(second.response_data(), first.response_data());

        let key = derive_key(&descriptor).unwrap();
        assert_eq!(store.peek(&key).unwrap().hit_count, 1);
    }

    #[tokio::test]
    async fn get_or_compute_survives_a_broken_store() {
        let service = CacheService::new(Arc::new(UnavailableStore::default()));
        let result = service.get_or_compute(&summary_descriptor(), summarize).await.unwrap();
        assert_eq!(result.into_response_data(), json!({"summary": "monads are burritos"}));
    }

    #[tokio::test]
    async fn get_or_compute_propagates_compute_and_validation_errors() {
        let (service, store, _) = service();

        let failed = service
            .get_or_compute(&summary_descriptor(), || async { Err::<Computed, _>(GenerateError::Model) })
            .await;
        assert!(matches!(failed, Err(GenerateError::Model)));
        assert!(store.is_empty());

        let mut invalid = summary_descriptor();
        invalid.lecture_ids.clear();
        let rejected = service.get_or_compute(&invalid, summarize).await;
        assert!(matches!(rejected, Err(GenerateError::Cache(CacheError::InvalidInput(_)))));
    }
}

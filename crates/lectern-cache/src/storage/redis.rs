//! Redis/Valkey-backed entry store
//!
//! Layout under the key prefix:
//! - `{prefix}:entry:{key}` hash holding one entry
//! - `{prefix}:created` sorted set of keys scored by creation time (ms)
//! - `{prefix}:lecture:{id}` set of keys referencing a lecture
//! - `{prefix}:misses` lookup miss counter
//!
//! Every operation runs as a single Lua script so the indexes never
//! drift from the entries. Scripts compute key names from the prefix,
//! which requires a non-clustered deployment.

use std::collections::HashMap;

use async_trait::async_trait;
use jiff::Timestamp;
use redis::Script;
use redis::aio::MultiplexedConnection;
use serde_json::Value;

use crate::entry::{CacheEntry, NewEntry, StoreAggregate};
use crate::error::CacheError;
use crate::key::OperationType;
use crate::storage::CacheStore;

const DROP_ENTRY: &str = r"
local function drop(prefix, key)
  local entry = prefix .. ':entry:' .. key
  local ids = redis.call('HGET', entry, 'lecture_ids')
  if ids then
    for _, id in ipairs(cjson.decode(ids)) do
      redis.call('SREM', prefix .. ':lecture:' .. id, key)
    end
  end
  redis.call('ZREM', prefix .. ':created', key)
  return redis.call('DEL', entry)
end
";

const UPSERT: &str = r"
local prefix, key, now = ARGV[1], ARGV[2], ARGV[3]
local entry = prefix .. ':entry:' .. key
local previous = redis.call('HGET', entry, 'lecture_ids')
if previous then
  for _, id in ipairs(cjson.decode(previous)) do
    redis.call('SREM', prefix .. ':lecture:' .. id, key)
  end
end
local created = redis.call('HGET', entry, 'created_at')
if not created then
  created = now
  redis.call('HSET', entry, 'created_at', now, 'last_accessed_at', now, 'hit_count', 0)
end
redis.call('HSET', entry,
  'operation_type', ARGV[4], 'lecture_ids', ARGV[5], 'params', ARGV[6],
  'content_hash', ARGV[7], 'response_data', ARGV[8],
  'tokens_used', ARGV[9], 'content_size', ARGV[10])
redis.call('ZADD', prefix .. ':created', created, key)
for i = 11, #ARGV do
  redis.call('SADD', prefix .. ':lecture:' .. ARGV[i], key)
end
return 1
";

const FIND_AND_TOUCH: &str = r"
local entry = ARGV[1] .. ':entry:' .. ARGV[2]
if redis.call('EXISTS', entry) == 0 then
  redis.call('INCR', ARGV[1] .. ':misses')
  return false
end
redis.call('HINCRBY', entry, 'hit_count', 1)
redis.call('HSET', entry, 'last_accessed_at', ARGV[3])
return redis.call('HGETALL', entry)
";

const DELETE_BY_LECTURE: &str = r"
local prefix = ARGV[1]
local index = prefix .. ':lecture:' .. ARGV[2]
local deleted = 0
for _, key in ipairs(redis.call('SMEMBERS', index)) do
  deleted = deleted + drop(prefix, key)
end
redis.call('DEL', index)
return deleted
";

const DELETE_CREATED_BEFORE: &str = r"
local prefix = ARGV[1]
local deleted = 0
for _, key in ipairs(redis.call('ZRANGEBYSCORE', prefix .. ':created', '-inf', '(' .. ARGV[2])) do
  deleted = deleted + drop(prefix, key)
end
return deleted
";

const DELETE_ALL: &str = r"
local prefix = ARGV[1]
for _, key in ipairs(redis.call('ZRANGE', prefix .. ':created', 0, -1)) do
  drop(prefix, key)
end
redis.call('DEL', prefix .. ':created', prefix .. ':misses')
return 1
";

const AGGREGATE: &str = r"
local prefix = ARGV[1]
local created = prefix .. ':created'
local keys = redis.call('ZRANGE', created, 0, -1)
local hits, saved, storage = 0, 0, 0
for _, key in ipairs(keys) do
  local f = redis.call('HMGET', prefix .. ':entry:' .. key, 'hit_count', 'tokens_used', 'content_size')
  local h = tonumber(f[1]) or 0
  hits = hits + h
  saved = saved + h * (tonumber(f[2]) or 0)
  storage = storage + (tonumber(f[3]) or 0)
end
local oldest = redis.call('ZRANGE', created, 0, 0, 'WITHSCORES')
local newest = redis.call('ZRANGE', created, -1, -1, 'WITHSCORES')
local misses = tonumber(redis.call('GET', prefix .. ':misses') or 0) or 0
return {#keys, hits, misses, saved, storage, oldest[2] or '', newest[2] or ''}
";

#[derive(Clone)]
struct Scripts {
    upsert: Script,
    find_and_touch: Script,
    delete_by_lecture: Script,
    delete_created_before: Script,
    delete_all: Script,
    aggregate: Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            upsert: Script::new(UPSERT),
            find_and_touch: Script::new(FIND_AND_TOUCH),
            delete_by_lecture: Script::new(&format!("{DROP_ENTRY}{DELETE_BY_LECTURE}")),
            delete_created_before: Script::new(&format!("{DROP_ENTRY}{DELETE_CREATED_BEFORE}")),
            delete_all: Script::new(&format!("{DROP_ENTRY}{DELETE_ALL}")),
            aggregate: Script::new(AGGREGATE),
        }
    }
}

/// Entry store backed by Redis or Valkey
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    key_prefix: String,
    scripts: Scripts,
}

impl RedisStore {
    /// Create a new Redis-backed store
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid
    pub fn new(url: &str, key_prefix: Option<String>) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(url).map_err(|e| CacheError::Config(format!("invalid URL: {e}")))?;

        Ok(Self {
            client,
            key_prefix: key_prefix.unwrap_or_else(|| "lectern:cache".to_owned()),
            scripts: Scripts::new(),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::StoreUnavailable(format!("connection failed: {e}")))
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn upsert(&self, entry: NewEntry, now: Timestamp) -> Result<(), CacheError> {
        let lecture_ids = encode_json(&entry.lecture_ids)?;
        let params = encode_json(&entry.params)?;
        let response_data = encode_json(&entry.response_data)?;

        let mut indexed: Vec<&str> = entry.lecture_ids.iter().map(String::as_str).collect();
        indexed.sort_unstable();
        indexed.dedup();

        let mut conn = self.connection().await?;
        let mut invocation = self.scripts.upsert.prepare_invoke();
        invocation
            .arg(&self.key_prefix)
            .arg(&entry.cache_key)
            .arg(now.as_millisecond())
            .arg(entry.operation_type.as_str())
            .arg(lecture_ids)
            .arg(params)
            .arg(&entry.content_hash)
            .arg(response_data)
            .arg(entry.tokens_used)
            .arg(entry.content_size);
        for id in indexed {
            invocation.arg(id);
        }

        let _: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::StoreUnavailable(format!("upsert failed: {e}")))?;

        Ok(())
    }

    async fn find_and_touch(&self, cache_key: &str, now: Timestamp) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.connection().await?;
        let fields: Option<HashMap<String, String>> = self
            .scripts
            .find_and_touch
            .arg(&self.key_prefix)
            .arg(cache_key)
            .arg(now.as_millisecond())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::StoreUnavailable(format!("lookup failed: {e}")))?;

        fields.map(|fields| decode_entry(cache_key, fields)).transpose()
    }

    async fn delete_by_lecture(&self, lecture_id: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection().await?;
        self.scripts
            .delete_by_lecture
            .arg(&self.key_prefix)
            .arg(lecture_id)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::StoreUnavailable(format!("lecture delete failed: {e}")))
    }

    async fn delete_created_before(&self, cutoff: Timestamp) -> Result<u64, CacheError> {
        let mut conn = self.connection().await?;
        self.scripts
            .delete_created_before
            .arg(&self.key_prefix)
            .arg(cutoff.as_millisecond())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::StoreUnavailable(format!("age delete failed: {e}")))
    }

    async fn delete_all(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: i64 = self
            .scripts
            .delete_all
            .arg(&self.key_prefix)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::StoreUnavailable(format!("clear failed: {e}")))?;
        Ok(())
    }

    async fn aggregate(&self) -> Result<StoreAggregate, CacheError> {
        let mut conn = self
            .connection()
            .await
            .map_err(|e| CacheError::AggregationUnavailable(e.to_string()))?;

        let (total_entries, total_hits, total_misses, tokens_saved, storage_used, oldest, newest): (
            u64,
            u64,
            u64,
            u64,
            u64,
            String,
            String,
        ) = self
            .scripts
            .aggregate
            .arg(&self.key_prefix)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::AggregationUnavailable(format!("aggregate failed: {e}")))?;

        Ok(StoreAggregate {
            total_entries,
            total_hits,
            total_misses,
            tokens_saved,
            storage_used,
            oldest_entry: parse_score(&oldest)?,
            newest_entry: parse_score(&newest)?,
        })
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, CacheError> {
    serde_json::to_string(value).map_err(|e| CacheError::Serialization(format!("serialize: {e}")))
}

fn decode_entry(cache_key: &str, mut fields: HashMap<String, String>) -> Result<CacheEntry, CacheError> {
    let mut take = |name: &str| {
        fields
            .remove(name)
            .ok_or_else(|| CacheError::Serialization(format!("entry {cache_key} missing field {name}")))
    };

    let operation_type = OperationType::parse(&take("operation_type")?)
        .map_err(|e| CacheError::Serialization(format!("entry {cache_key}: {e}")))?;
    let lecture_ids: Vec<String> = decode_json(&take("lecture_ids")?)?;
    let params: serde_json::Map<String, Value> = decode_json(&take("params")?)?;
    let content_hash = take("content_hash")?;
    let response_data: Value = decode_json(&take("response_data")?)?;
    let tokens_used = parse_u64(&take("tokens_used")?)?;
    let content_size = parse_u64(&take("content_size")?)?;
    let hit_count = parse_u64(&take("hit_count")?)?;
    let created_at = parse_millis(&take("created_at")?)?;
    let last_accessed_at = parse_millis(&take("last_accessed_at")?)?;

    Ok(CacheEntry {
        cache_key: cache_key.to_owned(),
        operation_type,
        lecture_ids,
        params,
        content_hash,
        response_data,
        tokens_used,
        content_size,
        hit_count,
        created_at,
        last_accessed_at,
    })
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, CacheError> {
    serde_json::from_str(raw).map_err(|e| CacheError::Serialization(format!("deserialize: {e}")))
}

fn parse_u64(raw: &str) -> Result<u64, CacheError> {
    raw.parse()
        .map_err(|e| CacheError::Serialization(format!("invalid integer '{raw}': {e}")))
}

fn parse_millis(raw: &str) -> Result<Timestamp, CacheError> {
    let millis: i64 = raw
        .parse()
        .map_err(|e| CacheError::Serialization(format!("invalid timestamp '{raw}': {e}")))?;
    Timestamp::from_millisecond(millis).map_err(|e| CacheError::Serialization(format!("timestamp out of range: {e}")))
}

/// Sorted-set scores come back as decimal strings; empty means no entries
fn parse_score(raw: &str) -> Result<Option<Timestamp>, CacheError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let millis: f64 = raw
        .parse()
        .map_err(|e| CacheError::AggregationUnavailable(format!("invalid score '{raw}': {e}")))?;
    #[allow(clippy::cast_possible_truncation)]
    let millis = millis as i64;
    Timestamp::from_millisecond(millis)
        .map(Some)
        .map_err(|e| CacheError::AggregationUnavailable(format!("timestamp out of range: {e}")))
}

use serde::Deserialize;
use url::Url;

/// Response cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Storage backend
    #[serde(default)]
    pub storage: CacheStorage,
    /// USD attributed to one generated token when estimating savings
    #[serde(default = "default_cost_per_token")]
    pub cost_per_token: f64,
    /// Default age threshold for cleanup, in days
    #[serde(default = "default_cleanup_days")]
    pub cleanup_days: u32,
    /// Retry behavior for cache writes after a miss
    #[serde(default)]
    pub write_retry: WriteRetryConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage: CacheStorage::default(),
            cost_per_token: default_cost_per_token(),
            cleanup_days: default_cleanup_days(),
            write_retry: WriteRetryConfig::default(),
        }
    }
}

/// Cache storage backend
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheStorage {
    /// In-memory storage (single instance only)
    #[default]
    Memory,
    /// Redis or Valkey (shared across instances)
    Redis(RedisStorageConfig),
}

/// Redis storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisStorageConfig {
    /// Connection URL
    pub url: Url,
    /// Prefix for every key the cache writes
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Write-path retry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteRetryConfig {
    /// Extra attempts after the first failure
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Initial backoff (e.g. "100ms"), doubled per retry
    #[serde(default = "default_backoff")]
    pub backoff: String,
}

impl Default for WriteRetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff: default_backoff(),
        }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_cost_per_token() -> f64 {
    0.000_002
}

#[allow(clippy::missing_const_for_fn)]
fn default_cleanup_days() -> u32 {
    30
}

#[allow(clippy::missing_const_for_fn)]
fn default_attempts() -> u32 {
    2
}

fn default_backoff() -> String {
    "100ms".to_owned()
}

fn default_key_prefix() -> String {
    "lectern:cache".to_owned()
}

use std::path::Path;

use secrecy::ExposeSecret;

use crate::{CacheStorage, Config};

const REDIS_SCHEMES: [&str; 4] = ["redis", "rediss", "valkey", "valkeys"];

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::parse(&raw)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing or validation fails
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_cache_config()?;
        self.validate_admin_config()?;
        Ok(())
    }

    fn validate_cache_config(&self) -> anyhow::Result<()> {
        let cache = &self.cache;

        if let CacheStorage::Redis(ref redis) = cache.storage
            && !REDIS_SCHEMES.contains(&redis.url.scheme())
        {
            anyhow::bail!("cache.storage.url must use one of {REDIS_SCHEMES:?}, got '{}'", redis.url.scheme());
        }

        if !cache.cost_per_token.is_finite() || cache.cost_per_token < 0.0 {
            anyhow::bail!("cache.cost_per_token must be a non-negative number");
        }

        if cache.cleanup_days == 0 {
            anyhow::bail!("cache.cleanup_days must be greater than 0");
        }

        duration_str::parse(&cache.write_retry.backoff)
            .map_err(|e| anyhow::anyhow!("invalid cache.write_retry.backoff '{}': {e}", cache.write_retry.backoff))?;

        Ok(())
    }

    fn validate_admin_config(&self) -> anyhow::Result<()> {
        let admin = &self.server.admin;
        if !admin.enabled {
            return Ok(());
        }

        let prefix = &admin.path_prefix;
        if !prefix.starts_with('/') || prefix.ends_with('/') {
            anyhow::bail!("server.admin.path_prefix must start with '/' and must not end with '/', got '{prefix}'");
        }

        if admin
            .gateway_secret
            .as_ref()
            .is_none_or(|secret| secret.expose_secret().is_empty())
        {
            anyhow::bail!("server.admin.gateway_secret must be set when the admin endpoints are enabled");
        }

        Ok(())
    }
}

use thiserror::Error;

/// Cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Configuration error
    #[error("cache configuration error: {0}")]
    Config(String),

    /// Malformed descriptor or identifier supplied by the caller
    #[error("{0}")]
    InvalidInput(String),

    /// Backing store could not be reached or rejected a command
    #[error("cache store unavailable: {0}")]
    StoreUnavailable(String),

    /// Statistics aggregation is missing or failed
    #[error("cache aggregation unavailable: {0}")]
    AggregationUnavailable(String),

    /// Stored data could not be encoded or decoded
    #[error("serialization: {0}")]
    Serialization(String),
}

impl CacheError {
    /// Whether retrying the same store call may succeed
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}


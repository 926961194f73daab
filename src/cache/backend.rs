//! Cache backend trait and error types.

use async_trait::async_trait;

/// Errors from connecting to a backend or decoding a stored entry.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache connection error: {0}")]
    ConnectionError(String),
    #[error("Cache operation error: {0}")]
    OperationError(String),
    #[error("Corrupt cache entry: {0}")]
    CorruptEntry(String),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Key-value store holding serialized responses.
///
/// Implementations must be thread-safe and fail open: a backend error is
/// logged and reported as a miss (`get`) or `false` (writes), never
/// propagated into the request.
///
/// # Implementations
///
/// - [`crate::cache::InMemoryCache`] - process-local map with lazy expiry
/// - [`crate::cache::RedisCache`] - Redis-backed cache with TTL support
/// - [`crate::cache::NullCache`] - no-op, used when Redis is unreachable
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the stored value, or `None` on miss, expiry or error.
    async fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` for `ttl_seconds`.
    ///
    /// # Returns
    ///
    /// `true` if the value was stored.
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> bool;

    /// Removes a key. Returns `true` if something was removed.
    async fn delete(&self, key: &str) -> bool;

    /// Removes every key owned by this backend.
    async fn clear(&self) -> bool;

    /// Used by the health endpoint to report cache status.
    async fn health_check(&self) -> bool;

    fn name(&self) -> &'static str;
}

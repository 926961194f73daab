//! No-op backend for disabled caching.

use super::backend::CacheBackend;
use async_trait::async_trait;
use tracing::debug;

/// A backend that stores nothing; every lookup is a miss.
///
/// Used when the external backend cannot be reached at startup or when
/// `backend = external` is configured without one being registered.
pub struct NullCache;

impl NullCache {
    pub fn new() -> Self {
        debug!("Using NullCache (caching disabled)");
        Self
    }
}

impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set(&self, _key: &str, _value: &str, _ttl_seconds: u64) -> bool {
        false
    }

    async fn delete(&self, _key: &str) -> bool {
        false
    }

    async fn clear(&self) -> bool {
        true
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

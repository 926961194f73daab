//! Response caching.
//!
//! Provides a [`CacheBackend`] trait with three implementations:
//! - [`InMemoryCache`] - process-local map, expiry checked on read
//! - [`RedisCache`] - external Redis store
//! - [`NullCache`] - no-op fallback
//!
//! Key derivation ([`key`]) and TTL policy ([`CacheMiddleware::ttl_for`]) do
//! not depend on the backend.

mod backend;
pub mod entry;
pub mod key;
mod memory;
pub mod middleware;
mod null_cache;
mod redis_cache;

pub use backend::{CacheBackend, CacheError, CacheResult};
pub use entry::CachedResponse;
pub use memory::{CacheStats, InMemoryCache};
pub use middleware::{BackendKind, CacheMiddleware, CacheSettings};
pub use null_cache::NullCache;
pub use redis_cache::RedisCache;

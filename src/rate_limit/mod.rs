//! Request rate limiting.
//!
//! Two interchangeable algorithms sit behind [`RateLimiter`]:
//!
//! - [`TokenBucketLimiter`] - `capacity` tokens per identifier, refilled at
//!   `refill_rate` tokens/second, lazily on each check
//! - [`SlidingWindowLimiter`] - at most `limit` requests in any trailing
//!   `window_seconds`
//!
//! State is per identifier; checks for different identifiers never contend on
//! the same lock.

pub mod middleware;
pub mod sliding_window;
pub mod token_bucket;

pub use middleware::{RateLimitMiddleware, RateLimitSettings};
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::{TokenBucket, TokenBucketLimiter};

use async_trait::async_trait;
use tokio::time::Duration;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records one request for `identifier` and reports whether it is allowed.
    async fn is_allowed(&self, identifier: &str) -> bool;

    /// Requests still allowed right now. Does not record anything.
    async fn get_remaining(&self, identifier: &str) -> u64;

    /// Time until one more request would be allowed.
    async fn reset_after(&self, identifier: &str) -> Duration;

    /// Configured ceiling, reported as `X-RateLimit-Limit`.
    fn limit(&self) -> u64;

    fn algorithm(&self) -> &'static str;
}

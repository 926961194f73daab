use super::RateLimiter;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::{Duration, Instant};

/// A single token bucket with lazy refill.
///
/// Tokens stay within `0..=capacity`; there is no background timer.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    /// Tokens added per second.
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(capacity: u64, refill_rate: f64) -> Self {
        let capacity = capacity as f64;
        Self {
            capacity,
            refill_rate: refill_rate.max(0.0),
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes `amount` tokens if available.
    pub fn consume(&mut self, amount: u64) -> bool {
        self.refill();
        let amount = amount as f64;
        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available.
    pub fn remaining(&mut self) -> u64 {
        self.refill();
        self.tokens.floor() as u64
    }

    /// Time until one token is available. `Duration::MAX` when the bucket never refills.
    pub fn time_until_available(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if self.refill_rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64((1.0 - self.tokens) / self.refill_rate).unwrap_or(Duration::MAX)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }
}

/// One [`TokenBucket`] per identifier, created full on first use.
pub struct TokenBucketLimiter {
    capacity: u64,
    refill_rate: f64,
    buckets: DashMap<String, Mutex<TokenBucket>>,
}

impl TokenBucketLimiter {
    pub fn new(capacity: u64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            buckets: DashMap::new(),
        }
    }

    /// Number of identifiers with a bucket.
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn is_allowed(&self, identifier: &str) -> bool {
        let entry = self
            .buckets
            .entry(identifier.to_string())
            .or_insert_with(|| Mutex::new(TokenBucket::new(self.capacity, self.refill_rate)));
        entry.lock().consume(1)
    }

    async fn get_remaining(&self, identifier: &str) -> u64 {
        match self.buckets.get(identifier) {
            Some(bucket) => bucket.lock().remaining(),
            None => self.capacity,
        }
    }

    async fn reset_after(&self, identifier: &str) -> Duration {
        match self.buckets.get(identifier) {
            Some(bucket) => bucket.lock().time_until_available(),
            None => Duration::ZERO,
        }
    }

    fn limit(&self) -> u64 {
        self.capacity
    }

    fn algorithm(&self) -> &'static str {
        "token_bucket"
    }
}

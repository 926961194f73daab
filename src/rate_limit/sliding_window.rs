use super::RateLimiter;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::time::{Duration, Instant};

/// Request timestamps within the last `window`, oldest first.
#[derive(Debug, Default)]
struct Window {
    hits: VecDeque<Instant>,
}

impl Window {
    /// Drops hits at or before `now - window`.
    fn prune(&mut self, now: Instant, window: Duration) {
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        while self.hits.front().is_some_and(|t| *t <= cutoff) {
            self.hits.pop_front();
        }
    }
}

/// Allows at most `limit` requests per identifier in any trailing `window`.
pub struct SlidingWindowLimiter {
    limit: u64,
    window: Duration,
    windows: DashMap<String, Mutex<Window>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn is_allowed(&self, identifier: &str) -> bool {
        let now = Instant::now();
        let entry = self.windows.entry(identifier.to_string()).or_default();
        let mut window = entry.lock();
        window.prune(now, self.window);
        if (window.hits.len() as u64) < self.limit {
            window.hits.push_back(now);
            true
        } else {
            false
        }
    }

    async fn get_remaining(&self, identifier: &str) -> u64 {
        let Some(entry) = self.windows.get(identifier) else {
            return self.limit;
        };
        let mut window = entry.lock();
        window.prune(Instant::now(), self.window);
        self.limit.saturating_sub(window.hits.len() as u64)
    }

    async fn reset_after(&self, identifier: &str) -> Duration {
        let Some(entry) = self.windows.get(identifier) else {
            return Duration::ZERO;
        };
        let now = Instant::now();
        let mut window = entry.lock();
        window.prune(now, self.window);
        if (window.hits.len() as u64) < self.limit {
            return Duration::ZERO;
        }
        // Capacity frees up when the oldest hit leaves the window.
        match window.hits.front() {
            Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn algorithm(&self) -> &'static str {
        "sliding_window"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_window_boundary() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(10));
        for _ in 0..3 {
            assert!(limiter.is_allowed("ip:a").await);
        }
        assert!(!limiter.is_allowed("ip:a").await);
        assert_eq!(limiter.get_remaining("ip:a").await, 0);
        assert_eq!(limiter.reset_after("ip:a").await, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!limiter.is_allowed("ip:a").await);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.is_allowed("ip:a").await);
        assert_eq!(limiter.get_remaining("ip:a").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_are_not_recorded() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(5));
        assert!(limiter.is_allowed("k").await);
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!limiter.is_allowed("k").await);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.is_allowed("k").await);
    }

    #[tokio::test]
    async fn test_unknown_identifier() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(60));
        assert_eq!(limiter.get_remaining("nobody").await, 5);
        assert_eq!(limiter.reset_after("nobody").await, Duration::ZERO);
        assert!(limiter.windows.is_empty());
    }
}

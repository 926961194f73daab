use request_pipeline::rate_limit::{RateLimiter, SlidingWindowLimiter, TokenBucketLimiter};
use std::sync::Arc;
use std::time::Duration;

async fn hammer(limiter: Arc<dyn RateLimiter>, identifier: &str, attempts: usize) -> usize {
    let tasks: Vec<_> = (0..attempts)
        .map(|_| {
            let limiter = limiter.clone();
            let identifier = identifier.to_string();
            tokio::spawn(async move { limiter.is_allowed(&identifier).await })
        })
        .collect();

    let mut allowed = 0;
    for task in tasks {
        if task.await.unwrap() {
            allowed += 1;
        }
    }
    allowed
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_token_bucket_never_over_admits_under_contention() {
    let limiter: Arc<dyn RateLimiter> = Arc::new(TokenBucketLimiter::new(10, 0.001));

    assert_eq!(hammer(limiter.clone(), "user:1", 64).await, 10);
    assert_eq!(limiter.get_remaining("user:1").await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sliding_window_never_over_admits_under_contention() {
    let limiter: Arc<dyn RateLimiter> =
        Arc::new(SlidingWindowLimiter::new(10, Duration::from_secs(60)));

    assert_eq!(hammer(limiter.clone(), "ip:10.0.0.1", 64).await, 10);
    assert_eq!(limiter.get_remaining("ip:10.0.0.1").await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identifiers_are_isolated_under_contention() {
    let limiter: Arc<dyn RateLimiter> = Arc::new(TokenBucketLimiter::new(5, 0.001));

    let (a, b) = tokio::join!(
        hammer(limiter.clone(), "user:a", 20),
        hammer(limiter.clone(), "user:b", 20)
    );

    assert_eq!((a, b), (5, 5));
    assert!(!limiter.is_allowed("user:a").await);
    assert_eq!(limiter.get_remaining("user:c").await, 5);
}

#[tokio::test(start_paused = true)]
async fn test_token_bucket_refills_at_configured_rate() {
    let limiter = TokenBucketLimiter::new(2, 1.0);

    assert!(limiter.is_allowed("k").await);
    assert!(limiter.is_allowed("k").await);
    assert!(!limiter.is_allowed("k").await);
    assert_eq!(limiter.reset_after("k").await, Duration::from_secs(1));

    tokio::time::advance(Duration::from_millis(1_100)).await;
    assert!(limiter.is_allowed("k").await);
    assert!(!limiter.is_allowed("k").await);
}

#[tokio::test(start_paused = true)]
async fn test_sliding_window_frees_slots_as_hits_age_out() {
    let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(10));

    assert!(limiter.is_allowed("k").await);
    tokio::time::advance(Duration::from_secs(4)).await;
    assert!(limiter.is_allowed("k").await);
    assert!(!limiter.is_allowed("k").await);
    assert_eq!(limiter.reset_after("k").await, Duration::from_secs(6));

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(limiter.is_allowed("k").await);
    assert!(!limiter.is_allowed("k").await);
    assert_eq!(limiter.get_remaining("k").await, 0);
}

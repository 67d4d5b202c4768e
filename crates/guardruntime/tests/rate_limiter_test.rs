use guardruntime::{RateLimitConfig, RateLimiter};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_sixth_call_in_window_is_refused() {
    let limiter = RateLimiter::default();

    for _ in 0..5 {
        assert!(limiter.check_limit("wf-1"));
        limiter.record("wf-1");
    }
    assert!(!limiter.check_limit("wf-1"));
    assert_eq!(limiter.remaining("wf-1"), 0);

    tokio::time::advance(Duration::from_secs(61)).await;

    assert!(limiter.check_limit("wf-1"));
    assert_eq!(limiter.remaining("wf-1"), 5);
}

#[tokio::test(start_paused = true)]
async fn test_window_slides_per_call() {
    let limiter = RateLimiter::new(2, Duration::from_secs(10));

    assert!(limiter.try_acquire("wf"));
    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(limiter.try_acquire("wf"));
    assert!(!limiter.try_acquire("wf"));

    // First call expires, second one still counts
    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(limiter.remaining("wf"), 1);
    assert!(limiter.try_acquire("wf"));
    assert!(!limiter.try_acquire("wf"));
}

#[tokio::test(start_paused = true)]
async fn test_keys_are_independent() {
    let limiter = RateLimiter::from_config(&RateLimitConfig {
        max_calls: 1,
        window_secs: 60,
    });

    assert!(limiter.try_acquire("wf-a"));
    assert!(!limiter.try_acquire("wf-a"));
    assert!(limiter.try_acquire("wf-b"));

    limiter.reset("wf-a");
    assert!(limiter.try_acquire("wf-a"));
}

#[tokio::test(start_paused = true)]
async fn test_drained_keys_are_dropped() {
    let limiter = RateLimiter::new(2, Duration::from_secs(10));

    for i in 0..50 {
        assert!(limiter.try_acquire(&format!("wf-{i}")));
    }
    assert_eq!(limiter.tracked_keys(), 50);

    tokio::time::advance(Duration::from_secs(11)).await;

    // Any accessor that touches a drained key evicts it
    assert!(limiter.check_limit("wf-0"));
    assert_eq!(limiter.remaining("wf-1"), 2);
    assert_eq!(limiter.tracked_keys(), 48);

    assert!(limiter.try_acquire("wf-2"));
    assert_eq!(limiter.tracked_keys(), 48);
    assert_eq!(limiter.remaining("wf-2"), 1);

    for i in 3..50 {
        assert_eq!(limiter.remaining(&format!("wf-{i}")), 2);
    }
    assert_eq!(limiter.tracked_keys(), 1);
}

#[tokio::test]
async fn test_unseen_key_has_full_budget() {
    let limiter = RateLimiter::default();
    assert!(limiter.check_limit("never-called"));
    assert_eq!(limiter.remaining("never-called"), 5);

    let closed = RateLimiter::new(0, Duration::from_secs(60));
    assert!(!closed.check_limit("wf"));
    assert!(!closed.try_acquire("wf"));
}

#[tokio::test]
async fn test_try_acquire_never_overspends_under_contention() {
    let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(60)));

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.try_acquire("shared") })
        })
        .collect();

    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            granted += 1;
        }
    }

    assert_eq!(granted, 5);
}

//! Integration tests for rate limiting algorithms.

use std::time::Duration;

use keygate::{
    BucketConfig, DynRateLimiter, FailurePolicy, FixedWindowCounter, LeakyBucket, ManualClock,
    RateLimiter, RateLimiterExt, SlidingWindowCounter, SlidingWindowLog, TokenBucket, WindowConfig,
};

#[tokio::test]
async fn test_token_bucket_burst_then_drain() {
    let clock = ManualClock::new(1_700_000_000_000);
    let algorithm = TokenBucket::in_memory(BucketConfig::new(10.0, 1.0)).with_clock(clock.clone());

    for i in 1..=10 {
        assert!(
            algorithm.allow("acme:alice").await.unwrap(),
            "Request {} should be allowed (burst)",
            i
        );
    }
    let decision = algorithm.check_and_record("acme:alice").await.unwrap();
    assert!(decision.is_denied(), "11th request should be denied");
    assert!(decision.info().retry_after.is_some(), "Should have retry_after");

    clock.advance(Duration::from_millis(10_100));

    for i in 1..=10 {
        assert!(
            algorithm.allow("acme:alice").await.unwrap(),
            "Request {} should be allowed after refill",
            i
        );
    }
    assert!(!algorithm.allow("acme:alice").await.unwrap());
}

#[tokio::test]
async fn test_sliding_log_exactness() {
    let algorithm = SlidingWindowLog::new(3, Duration::from_millis(100)).unwrap();

    for i in 1..=3 {
        assert!(algorithm.allow("acme:alice").await.unwrap(), "Request {} should be allowed", i);
    }
    assert!(!algorithm.allow("acme:alice").await.unwrap(), "4th request should be denied");

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(algorithm.allow("acme:alice").await.unwrap());
}

#[tokio::test]
async fn test_sliding_window_weighted_boundary() {
    // Start on a clean 500ms boundary.
    let clock = ManualClock::new(1_700_000_000_000);
    let config = WindowConfig::new(10, Duration::from_millis(500));
    let algorithm = SlidingWindowCounter::in_memory(config).with_clock(clock.clone());

    for _ in 0..10 {
        assert!(algorithm.allow("acme:alice").await.unwrap());
    }

    clock.advance(Duration::from_millis(750));

    // Half of the previous window's 10 still counts.
    for i in 1..=5 {
        assert!(algorithm.allow("acme:alice").await.unwrap(), "Request {} should be allowed", i);
    }
    assert!(!algorithm.allow("acme:alice").await.unwrap(), "6th request should be denied");
}

#[tokio::test]
async fn test_fixed_window_boundary_tolerance() {
    const K: u64 = 5;
    let clock = ManualClock::new(1_700_000_000_000);
    let algorithm = FixedWindowCounter::in_memory(WindowConfig::new(K, Duration::from_secs(1)))
        .with_clock(clock.clone());

    // Within one epoch never more than K, however many attempts.
    let mut admitted = 0;
    for _ in 0..(3 * K) {
        if algorithm.allow("acme:alice").await.unwrap() {
            admitted += 1;
        }
        clock.advance(Duration::from_millis(30));
    }
    assert_eq!(admitted, K);

    // Last millisecond of an epoch, then the first of the next: 2K within 1ms.
    clock.set(1_700_000_001_999);
    let mut admitted = 0;
    for _ in 0..(2 * K) {
        if algorithm.allow("acme:bob").await.unwrap() {
            admitted += 1;
        }
    }
    clock.advance(Duration::from_millis(1));
    for _ in 0..(2 * K) {
        if algorithm.allow("acme:bob").await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 2 * K);
}

#[tokio::test]
async fn test_leaky_bucket_smooths_bursts() {
    let clock = ManualClock::new(1_700_000_000_000);
    let algorithm = LeakyBucket::in_memory(BucketConfig::new(4.0, 2.0)).with_clock(clock.clone());

    let mut admitted = 0;
    for _ in 0..10 {
        if algorithm.allow("acme:alice").await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 4);

    // Two units leak per second.
    clock.advance(Duration::from_secs(1));
    let mut admitted = 0;
    for _ in 0..10 {
        if algorithm.allow("acme:alice").await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 2);
}

#[tokio::test]
async fn test_separate_keys_independent() {
    let algorithm = TokenBucket::new(2.0, 0.1).unwrap();

    algorithm.allow_subject("acme", "1").await.unwrap();
    algorithm.allow_subject("acme", "1").await.unwrap();
    assert!(!algorithm.allow_subject("acme", "1").await.unwrap(), "acme:1 should be rate limited");

    assert!(algorithm.allow_subject("acme", "2").await.unwrap(), "acme:2 should be allowed");
    assert!(algorithm.allow_subject("globex", "1").await.unwrap(), "globex:1 should be allowed");
}

#[tokio::test]
async fn test_subject_and_opaque_keys_are_equivalent() {
    let algorithm = FixedWindowCounter::new(1, Duration::from_secs(60)).unwrap();

    assert!(algorithm.allow_subject("acme", "alice").await.unwrap());
    assert!(!algorithm.allow("acme:alice").await.unwrap());
}

#[tokio::test]
async fn test_idempotent_construction() {
    let clock = ManualClock::new(1_700_000_000_000);
    let first = TokenBucket::in_memory(BucketConfig::new(3.0, 1.0)).with_clock(clock.clone());
    let second = TokenBucket::in_memory(BucketConfig::new(3.0, 1.0)).with_clock(clock.clone());

    let a = first.check_and_record("acme:alice").await.unwrap();
    let b = second.check_and_record("acme:alice").await.unwrap();
    assert!(a.is_allowed());
    assert_eq!(a, b);

    let first = SlidingWindowLog::in_memory(WindowConfig::per_second(1)).with_clock(clock.clone());
    let second = SlidingWindowLog::in_memory(WindowConfig::per_second(1)).with_clock(clock.clone());
    assert_eq!(
        first.check_and_record("acme:alice").await.unwrap(),
        second.check_and_record("acme:alice").await.unwrap()
    );
}

#[tokio::test]
async fn test_invalid_parameters_fail_at_construction() {
    assert!(TokenBucket::new(0.0, 1.0).is_err());
    assert!(LeakyBucket::new(5.0, -1.0).is_err());
    assert!(FixedWindowCounter::new(0, Duration::from_secs(1)).is_err());
    assert!(SlidingWindowCounter::new(5, Duration::ZERO).is_err());
    assert!(SlidingWindowLog::new(5, Duration::from_nanos(10)).is_err());
}

#[tokio::test]
async fn test_empty_key_is_an_error_not_a_denial() {
    let algorithm = SlidingWindowCounter::new(5, Duration::from_secs(1)).unwrap();
    assert!(algorithm.check_and_record("").await.is_err());
}

async fn admitted_of<L: RateLimiter>(limiter: &L, calls: usize) -> usize {
    let mut admitted = 0;
    for i in 0..calls {
        // Each key is borrowed for a shorter time than the limiter.
        let key = format!("acme:user{}", i % 2);
        if limiter.allow(&key).await.unwrap() {
            admitted += 1;
        }
    }
    admitted
}

#[tokio::test]
async fn test_boxed_limiter_is_a_rate_limiter() {
    let clock = ManualClock::new(1_700_000_000_000);
    let limiter: Box<dyn DynRateLimiter> =
        Box::new(FixedWindowCounter::in_memory(WindowConfig::per_minute(3)).with_clock(clock));

    assert_eq!(limiter.name(), "fixed_window");
    assert_eq!(admitted_of(&limiter, 10).await, 6);
    assert!(!limiter.allow_subject("acme", "user0").await.unwrap());
    assert!(limiter.allow_subject("acme", "user2").await.unwrap());
    assert!(limiter.admit("acme:user3", FailurePolicy::Closed).await);
}

#[tokio::test]
async fn test_slow_buckets_do_not_overflow_expiry() {
    let bucket = TokenBucket::new(1e20, 0.001).unwrap();
    assert!(bucket.allow("acme:alice").await.unwrap());

    let leaky = LeakyBucket::new(1e20, 0.001).unwrap();
    assert!(leaky.allow("acme:alice").await.unwrap());

    let trickle = TokenBucket::new(1.0, 1e-300).unwrap();
    assert!(trickle.allow("acme:alice").await.unwrap());
    let decision = trickle.check_and_record("acme:alice").await.unwrap();
    assert!(decision.is_denied());
    assert_eq!(decision.info().retry_after, Some(Duration::MAX));
}

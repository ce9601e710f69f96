//! Integration tests against a live Redis server.
//!
//! Run with:
//! ```text
//! REDIS_URL=redis://127.0.0.1:6379 cargo test --features redis --test redis_store -- --ignored
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use keygate::storage::{RedisStore, SharedStore};
use keygate::{
    BucketConfig, LeakyBucket, LimiterConfig, ManualClock, RateLimitError, RateLimiter,
    StorageError, TokenBucket, WindowConfig,
};

const START_MS: u64 = 1_700_000_000_000;

async fn connect() -> Arc<RedisStore> {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    Arc::new(RedisStore::from_url(url).await.unwrap())
}

/// A namespace no earlier run has written to.
fn fresh_namespace(test: &str) -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    format!("keygate_test_{test}_{nanos}")
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_token_bucket_script_on_redis() {
    let store = connect().await;
    let ns = fresh_namespace("token_bucket");
    let clock = ManualClock::new(START_MS);
    let bucket = TokenBucket::shared(BucketConfig::new(3.0, 1.0), Arc::clone(&store))
        .with_namespace(ns.as_str())
        .unwrap()
        .with_clock(clock.clone());

    for _ in 0..3 {
        assert!(bucket.allow("acme:alice").await.unwrap());
    }
    let denied = bucket.check_and_record("acme:alice").await.unwrap();
    assert!(denied.is_denied());
    assert_eq!(denied.info().retry_after, Some(Duration::from_secs(1)));

    let raw = store
        .get(&format!("{ns}:token_bucket:acme:alice"))
        .await
        .unwrap()
        .unwrap();
    let record: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(record["tokens"], 0.0);
    assert_eq!(record["lastRefill"], START_MS);

    clock.advance(Duration::from_secs(1));
    assert!(bucket.allow("acme:alice").await.unwrap());
    assert!(!bucket.allow("acme:alice").await.unwrap());
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_compare_and_set_on_redis() {
    let store = connect().await;
    let ns = fresh_namespace("leaky_bucket");
    let clock = ManualClock::new(START_MS);
    let config = BucketConfig::new(2.0, 0.5);

    let first = LeakyBucket::shared(config, Arc::clone(&store))
        .with_namespace(ns.as_str())
        .unwrap()
        .with_clock(clock.clone());
    let second = LeakyBucket::shared(config, Arc::clone(&store))
        .with_namespace(ns.as_str())
        .unwrap()
        .with_clock(clock.clone());

    assert!(first.allow("acme:alice").await.unwrap());
    assert!(second.allow("acme:alice").await.unwrap());
    assert!(!first.allow("acme:alice").await.unwrap());

    let raw = store
        .get(&format!("{ns}:leaky_bucket:acme:alice"))
        .await
        .unwrap()
        .unwrap();
    let record: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(record["level"], 2.0);
    assert_eq!(record["lastLeak"], START_MS);
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_every_algorithm_shares_through_redis() {
    let store = connect().await;
    let ns = fresh_namespace("config");
    let configs = [
        LimiterConfig::TokenBucket(BucketConfig::new(2.0, 0.001)),
        LimiterConfig::LeakyBucket(BucketConfig::new(2.0, 0.001)),
        LimiterConfig::FixedWindow(WindowConfig::per_hour(2)),
        LimiterConfig::SlidingWindow(WindowConfig::per_hour(2)),
        LimiterConfig::SlidingLog(WindowConfig::per_hour(2)),
    ];

    for config in configs {
        let a = config.build_shared(Arc::clone(&store), &ns).unwrap();
        let b = config.build_shared(Arc::clone(&store), &ns).unwrap();
        assert!(a.allow("acme:alice").await.unwrap(), "{}", config.algorithm());
        assert!(b.allow("acme:alice").await.unwrap(), "{}", config.algorithm());
        assert!(!a.allow("acme:alice").await.unwrap(), "{}", config.algorithm());
        assert!(!b.allow("acme:alice").await.unwrap(), "{}", config.algorithm());
    }
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_corrupt_records_on_redis_are_faults() {
    let store = connect().await;
    let ns = fresh_namespace("corrupt");
    let bucket_key = format!("{ns}:token_bucket:acme:alice");
    let leaky_key = format!("{ns}:leaky_bucket:acme:alice");
    for key in [&bucket_key, &leaky_key] {
        store.set(key, "not json", Duration::from_secs(60)).await.unwrap();
    }

    let bucket = TokenBucket::shared(BucketConfig::new(10.0, 1.0), Arc::clone(&store))
        .with_namespace(ns.as_str())
        .unwrap();
    let result = bucket.allow("acme:alice").await;
    assert!(matches!(
        result,
        Err(RateLimitError::Storage(StorageError::Decode { ref key, .. })) if *key == bucket_key
    ));

    let leaky = LeakyBucket::shared(BucketConfig::new(10.0, 1.0), Arc::clone(&store))
        .with_namespace(ns.as_str())
        .unwrap();
    let result = leaky.allow("acme:alice").await;
    assert!(matches!(
        result,
        Err(RateLimitError::Storage(StorageError::Decode { ref key, .. })) if *key == leaky_key
    ));

    for key in [&bucket_key, &leaky_key] {
        assert_eq!(store.get(key).await.unwrap().as_deref(), Some("not json"));
    }
}

//! The `RateLimiter` capability and its five implementations.
//!
//! Every algorithm instance owns its parameters, its key space and a state
//! backend, and exposes the same decision call, so callers can swap one
//! algorithm for another without touching call sites.
//!
//! # Available Algorithms
//!
//! - **Token Bucket**: continuous refill, tolerates bursts up to capacity
//! - **Leaky Bucket**: an occupancy level that drains at a constant rate
//! - **Fixed Window Counter**: per-epoch counter with a hard reset
//! - **Sliding Window Counter**: two windows blended by elapsed time
//! - **Sliding Window Log**: exact window from a log of timestamps

mod fixed_window;
mod leaky_bucket;
mod sliding_log;
mod sliding_window;
pub(crate) mod token_bucket;

pub use fixed_window::FixedWindowCounter;
pub use leaky_bucket::LeakyBucket;
pub use sliding_log::SlidingWindowLog;
pub use sliding_window::SlidingWindowCounter;
pub use token_bucket::TokenBucket;

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, trace};

use crate::decision::Decision;
use crate::error::Result;
use crate::key::SubjectKey;

/// Rate limiting capability.
///
/// # Algorithm Comparison
///
/// | Algorithm | Accuracy | Memory per key | Burst |
/// |-----------|----------|----------------|-------|
/// | Token Bucket | High | O(1) | Up to capacity |
/// | Leaky Bucket | High | O(1) | Up to max level |
/// | Fixed Window | Low | O(1) | Up to 2x capacity across a boundary |
/// | Sliding Window Counter | Medium | O(1) | Smoothed |
/// | Sliding Window Log | Exact | O(capacity) | None beyond capacity |
pub trait RateLimiter: Send + Sync + 'static {
    /// Algorithm name, as used in store keys.
    fn name(&self) -> &'static str;

    /// Decide on one request for `key` and record it if admitted.
    ///
    /// Exceeding the budget yields `Ok` with a denied [`Decision`]. `Err` is
    /// reserved for faults: unreachable store, corrupt record, bad key.
    fn check_and_record(&self, key: &str) -> impl Future<Output = Result<Decision>> + Send;

    /// Whether one request for `key` may proceed.
    fn allow(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.check_and_record(key).await?.is_allowed()) }
    }

    /// [`allow`](RateLimiter::allow) for a tenant/user pair, keyed as
    /// `{tenantId}:{userId}`.
    fn allow_subject(
        &self,
        tenant: &str,
        user: &str,
    ) -> impl Future<Output = Result<bool>> + Send {
        async move {
            let subject = SubjectKey::new(tenant, user)?;
            self.allow(&subject.to_string()).await
        }
    }
}

/// Boxed future returned by [`DynRateLimiter`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe form of [`RateLimiter`], for limiters chosen at runtime.
///
/// Every `RateLimiter` implements it, and `Box<dyn DynRateLimiter>` is itself a
/// `RateLimiter`.
pub trait DynRateLimiter: Send + Sync {
    /// Algorithm name, as used in store keys.
    fn algorithm_name(&self) -> &'static str;

    /// Boxed [`RateLimiter::check_and_record`].
    fn check_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Decision>>;
}

impl<L: RateLimiter> DynRateLimiter for L {
    fn algorithm_name(&self) -> &'static str {
        self.name()
    }

    fn check_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Decision>> {
        Box::pin(self.check_and_record(key))
    }
}

impl RateLimiter for Box<dyn DynRateLimiter> {
    fn name(&self) -> &'static str {
        self.as_ref().algorithm_name()
    }

    fn check_and_record(&self, key: &str) -> impl Future<Output = Result<Decision>> + Send {
        async move { self.as_ref().check_boxed(key).await }
    }
}

/// Log a finished decision.
pub(crate) fn log_decision(key: &str, decision: &Decision) {
    let info = decision.info();
    if decision.is_allowed() {
        trace!(key, algorithm = info.algorithm, remaining = info.remaining, "request allowed");
    } else {
        debug!(
            key,
            algorithm = info.algorithm,
            retry_after_ms = info.retry_after.map(|d| d.as_millis() as u64),
            "request denied"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{BucketConfig, WindowConfig};

    #[tokio::test]
    async fn test_limiters_are_interchangeable() {
        let clock = ManualClock::new(1_000_000);
        let window = WindowConfig::per_minute(2);
        let limiters: Vec<Box<dyn DynRateLimiter>> = vec![
            Box::new(TokenBucket::in_memory(BucketConfig::new(2.0, 1.0)).with_clock(clock.clone())),
            Box::new(LeakyBucket::in_memory(BucketConfig::new(2.0, 1.0)).with_clock(clock.clone())),
            Box::new(FixedWindowCounter::in_memory(window).with_clock(clock.clone())),
            Box::new(SlidingWindowCounter::in_memory(window).with_clock(clock.clone())),
            Box::new(SlidingWindowLog::in_memory(window).with_clock(clock.clone())),
        ];

        for limiter in &limiters {
            assert!(limiter.allow("t:u").await.unwrap(), "{}", limiter.name());
            assert!(limiter.allow("t:u").await.unwrap(), "{}", limiter.name());
            assert!(!limiter.allow("t:u").await.unwrap(), "{}", limiter.name());
        }
    }

    #[tokio::test]
    async fn test_allow_subject_rejects_empty_parts() {
        let limiter = TokenBucket::in_memory(BucketConfig::new(1.0, 1.0));
        assert!(limiter.allow_subject("", "u").await.is_err());
        assert!(limiter.allow_subject("t", "u").await.unwrap());
    }
}

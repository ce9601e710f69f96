//! Leaky Bucket rate limiting algorithm.
//!
//! Each admitted request adds one unit to a bucket that drains at a constant
//! rate. Bursts fill the bucket; once it is full, requests are rejected until
//! enough has leaked out.

use std::sync::Arc;

use crate::algorithm::{RateLimiter, log_decision};
use crate::clock::{Clock, SharedClock, system_clock};
use crate::config::BucketConfig;
use crate::decision::{Decision, RateLimitInfo, secs_to_duration};
use crate::error::Result;
use crate::key::{KeySpace, LEAKY_BUCKET};
use crate::storage::{LeakyBucketState, MemoryBackend, SharedStore, StateBackend, StoreBackend};

/// Shortest retry hint for a full bucket.
const MIN_RETRY_SECS: f64 = 0.001;

/// Leaky Bucket rate limiting algorithm.
///
/// `capacity` is the maximum level and `rate` the leak rate per second. The
/// level starts at zero. A request is rejected when the level has already
/// reached the maximum; otherwise the level grows by one.
pub struct LeakyBucket<B = MemoryBackend<LeakyBucketState>> {
    config: BucketConfig,
    space: KeySpace,
    backend: B,
    clock: SharedClock,
}

impl<B> std::fmt::Debug for LeakyBucket<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeakyBucket")
            .field("config", &self.config)
            .field("space", &self.space)
            .finish()
    }
}

impl LeakyBucket {
    /// In-process bucket holding at most `max_level` that leaks `leak_rate`
    /// per second.
    pub fn new(max_level: f64, leak_rate: f64) -> Result<Self> {
        Ok(Self::in_memory(BucketConfig::try_new(max_level, leak_rate)?))
    }

    /// In-process bucket from a validated configuration.
    pub fn in_memory(config: BucketConfig) -> Self {
        Self::with_backend(config, MemoryBackend::new())
    }
}

impl<C: SharedStore> LeakyBucket<StoreBackend<C>> {
    /// Bucket whose state lives in a shared store.
    pub fn shared(config: BucketConfig, store: Arc<C>) -> Self {
        Self::with_backend(config, StoreBackend::new(store))
    }
}

impl<B> LeakyBucket<B> {
    /// Bucket over any state backend.
    pub fn with_backend(config: BucketConfig, backend: B) -> Self {
        Self {
            config,
            space: KeySpace::with_default_namespace(LEAKY_BUCKET),
            backend,
            clock: system_clock(),
        }
    }

    /// Use a different key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Result<Self> {
        self.space = KeySpace::new(namespace, LEAKY_BUCKET)?;
        Ok(self)
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The bucket parameters.
    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// The state backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// Drain `current` up to `now`, then try to add one unit.
fn leak_and_fill(
    current: Option<LeakyBucketState>,
    config: &BucketConfig,
    now: u64,
) -> (LeakyBucketState, Decision) {
    let max_level = config.capacity();
    let leak_rate = config.rate();

    let (level, last_leak) = match current {
        Some(state) => (state.level, state.last_leak),
        None => (0.0, now),
    };
    let elapsed_secs = now.saturating_sub(last_leak) as f64 / 1000.0;
    let mut level = (level - elapsed_secs * leak_rate).max(0.0);

    let decision = if level >= max_level {
        let wait = ((level - max_level) / leak_rate).max(MIN_RETRY_SECS);
        let info = RateLimitInfo::new(LEAKY_BUCKET, config.limit(), 0)
            .with_retry_after(secs_to_duration(wait));
        Decision::denied(info)
    } else {
        level += 1.0;
        let remaining = (max_level - level).max(0.0).ceil() as u64;
        Decision::allowed(RateLimitInfo::new(LEAKY_BUCKET, config.limit(), remaining))
    };

    let state = LeakyBucketState {
        level,
        last_leak: now.max(last_leak),
    };
    (state, decision)
}

impl<B: StateBackend<LeakyBucketState>> RateLimiter for LeakyBucket<B> {
    fn name(&self) -> &'static str {
        LEAKY_BUCKET
    }

    async fn check_and_record(&self, key: &str) -> Result<Decision> {
        let store_key = self.space.resolve(key)?;
        let now = self.clock.now_ms();

        let decision = self
            .backend
            .update(&store_key, self.config.ttl(), |current| {
                leak_and_fill(current, &self.config, now)
            })
            .await?;

        log_decision(&store_key, &decision);
        Ok(decision)
    }
}

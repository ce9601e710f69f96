//! Sliding Window Log rate limiting algorithm.
//!
//! Keeps the timestamp of every admitted request still inside the window, so
//! it never lets more than `capacity` requests through in any window-length
//! span. The price is memory proportional to the capacity for each key.

use std::sync::Arc;
use std::time::Duration;

use crate::algorithm::{RateLimiter, log_decision};
use crate::clock::{Clock, SharedClock, system_clock};
use crate::config::WindowConfig;
use crate::decision::{Decision, RateLimitInfo};
use crate::error::Result;
use crate::key::{KeySpace, SLIDING_LOG};
use crate::storage::{MemoryBackend, SharedStore, SlidingWindowLogState, StateBackend, StoreBackend};

/// Sliding Window Log rate limiting algorithm.
pub struct SlidingWindowLog<B = MemoryBackend<SlidingWindowLogState>> {
    config: WindowConfig,
    space: KeySpace,
    backend: B,
    clock: SharedClock,
}

impl<B> std::fmt::Debug for SlidingWindowLog<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLog")
            .field("config", &self.config)
            .field("space", &self.space)
            .finish()
    }
}

impl SlidingWindowLog {
    /// In-process log admitting `capacity` requests per sliding `window`.
    pub fn new(capacity: u64, window: Duration) -> Result<Self> {
        Ok(Self::in_memory(WindowConfig::try_new(capacity, window)?))
    }

    /// In-process log from a validated configuration.
    pub fn in_memory(config: WindowConfig) -> Self {
        Self::with_backend(config, MemoryBackend::new())
    }
}

impl<C: SharedStore> SlidingWindowLog<StoreBackend<C>> {
    /// Log whose state lives in a shared store.
    pub fn shared(config: WindowConfig, store: Arc<C>) -> Self {
        Self::with_backend(config, StoreBackend::new(store))
    }
}

impl<B> SlidingWindowLog<B> {
    /// Log over any state backend.
    pub fn with_backend(config: WindowConfig, backend: B) -> Self {
        Self {
            config,
            space: KeySpace::with_default_namespace(SLIDING_LOG),
            backend,
            clock: system_clock(),
        }
    }

    /// Use a different key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Result<Self> {
        self.space = KeySpace::new(namespace, SLIDING_LOG)?;
        Ok(self)
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The window parameters.
    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// The state backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

fn trim_and_append(
    current: Option<SlidingWindowLogState>,
    config: &WindowConfig,
    now: u64,
) -> (SlidingWindowLogState, Decision) {
    let window_ms = config.window_ms();
    let capacity = config.capacity();
    let mut state = current.unwrap_or_default();

    // Entries are ascending, so the expired ones form a prefix.
    if let Some(threshold) = now.checked_sub(window_ms) {
        while state.entries.front().is_some_and(|&ts| ts <= threshold) {
            state.entries.pop_front();
        }
    }

    let len = state.entries.len() as u64;
    let decision = if len < capacity {
        // Never append below the tail, so the log stays sorted.
        let ts = state.entries.back().map_or(now, |&last| last.max(now));
        state.entries.push_back(ts);
        Decision::allowed(RateLimitInfo::new(SLIDING_LOG, capacity, capacity - len - 1))
    } else {
        let oldest = state.entries.front().copied().unwrap_or(now);
        let wait = (oldest + window_ms).saturating_sub(now).max(1);
        let info = RateLimitInfo::new(SLIDING_LOG, capacity, 0)
            .with_retry_after(Duration::from_millis(wait));
        Decision::denied(info)
    };

    (state, decision)
}

impl<B: StateBackend<SlidingWindowLogState>> RateLimiter for SlidingWindowLog<B> {
    fn name(&self) -> &'static str {
        SLIDING_LOG
    }

    async fn check_and_record(&self, key: &str) -> Result<Decision> {
        let store_key = self.space.resolve(key)?;
        let now = self.clock.now_ms();

        let decision = self
            .backend
            .update(&store_key, self.config.window(), |current| {
                trim_and_append(current, &self.config, now)
            })
            .await?;

        log_decision(&store_key, &decision);
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn log(capacity: u64, window_ms: u64, clock: &ManualClock) -> SlidingWindowLog {
        SlidingWindowLog::in_memory(WindowConfig::new(capacity, Duration::from_millis(window_ms)))
            .with_clock(clock.clone())
    }

    #[tokio::test]
    async fn test_sliding_log_basic() {
        let clock = ManualClock::new(1_000_000);
        let algorithm = log(3, 100, &clock);

        for i in 1..=3 {
            let decision = algorithm.check_and_record("user:1").await.unwrap();
            assert!(decision.is_allowed(), "Request {} should be allowed", i);
            assert_eq!(decision.info().remaining, 3 - i);
        }

        let decision = algorithm.check_and_record("user:1").await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.info().retry_after, Some(Duration::from_millis(100)));

        clock.advance(Duration::from_millis(150));
        assert!(algorithm.allow("user:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_sliding_log_precision() {
        let clock = ManualClock::new(1_000_000);
        let algorithm = log(2, 1_000, &clock);

        assert!(algorithm.allow("k").await.unwrap());
        clock.advance(Duration::from_millis(600));
        assert!(algorithm.allow("k").await.unwrap());
        assert!(!algorithm.allow("k").await.unwrap());

        // The first entry expires exactly one window after it was logged.
        clock.advance(Duration::from_millis(399));
        assert!(!algorithm.allow("k").await.unwrap());
        clock.advance(Duration::from_millis(1));
        assert!(algorithm.allow("k").await.unwrap());
        assert!(!algorithm.allow("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_sliding_log_stays_sorted_under_clock_regression() {
        let clock = ManualClock::new(1_000_000);
        let algorithm = log(3, 1_000, &clock);

        algorithm.allow("k").await.unwrap();
        clock.set(999_500);
        algorithm.allow("k").await.unwrap();

        let state = algorithm.backend().load("rate_limit:sliding_log:k").await.unwrap().unwrap();
        assert_eq!(Vec::from(state.entries), vec![1_000_000, 1_000_000]);
    }

    #[tokio::test]
    async fn test_sliding_log_near_zero_timestamps() {
        let clock = ManualClock::new(5);
        let algorithm = log(1, 100, &clock);

        assert!(algorithm.allow("k").await.unwrap());
        assert!(!algorithm.allow("k").await.unwrap());
    }
}

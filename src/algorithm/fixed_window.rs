//! Fixed Window Counter rate limiting algorithm.
//!
//! Time is cut into epochs of one window each, aligned to the Unix epoch. Each
//! key gets `capacity` requests per epoch and the budget resets at the next
//! epoch. A client can spend one budget at the end of an epoch and another at
//! the start of the next, so up to twice the capacity may pass within one
//! window-length span that straddles a boundary.

use std::sync::Arc;
use std::time::Duration;

use crate::algorithm::{RateLimiter, log_decision};
use crate::clock::{Clock, SharedClock, system_clock};
use crate::config::WindowConfig;
use crate::decision::{Decision, RateLimitInfo};
use crate::error::Result;
use crate::key::{FIXED_WINDOW, KeySpace};
use crate::storage::{FixedWindowState, MemoryBackend, SharedStore, StateBackend, StoreBackend};

/// Fixed Window Counter rate limiting algorithm.
pub struct FixedWindowCounter<B = MemoryBackend<FixedWindowState>> {
    config: WindowConfig,
    space: KeySpace,
    backend: B,
    clock: SharedClock,
}

impl<B> std::fmt::Debug for FixedWindowCounter<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowCounter")
            .field("config", &self.config)
            .field("space", &self.space)
            .finish()
    }
}

impl FixedWindowCounter {
    /// In-process counter admitting `capacity` requests per `window`.
    pub fn new(capacity: u64, window: Duration) -> Result<Self> {
        Ok(Self::in_memory(WindowConfig::try_new(capacity, window)?))
    }

    /// In-process counter from a validated configuration.
    pub fn in_memory(config: WindowConfig) -> Self {
        Self::with_backend(config, MemoryBackend::new())
    }
}

impl<C: SharedStore> FixedWindowCounter<StoreBackend<C>> {
    /// Counter whose state lives in a shared store.
    pub fn shared(config: WindowConfig, store: Arc<C>) -> Self {
        Self::with_backend(config, StoreBackend::new(store))
    }
}

impl<B> FixedWindowCounter<B> {
    /// Counter over any state backend.
    pub fn with_backend(config: WindowConfig, backend: B) -> Self {
        Self {
            config,
            space: KeySpace::with_default_namespace(FIXED_WINDOW),
            backend,
            clock: system_clock(),
        }
    }

    /// Use a different key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Result<Self> {
        self.space = KeySpace::new(namespace, FIXED_WINDOW)?;
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

fn count(
    current: Option<FixedWindowState>,
    config: &WindowConfig,
    now: u64,
) -> (FixedWindowState, Decision) {
    let window_ms = config.window_ms();
    let epoch = now / window_ms;

    let mut state = match current {
        Some(state) if state.window_index >= epoch => state,
        _ => FixedWindowState {
            window_index: epoch,
            remaining: config.capacity(),
        },
    };

    let decision = if state.remaining == 0 {
        // A record from a later epoch (slow local clock) keeps its own reset.
        let reset_at = (state.window_index + 1).saturating_mul(window_ms);
        let info = RateLimitInfo::new(FIXED_WINDOW, config.capacity(), 0)
            .with_retry_after(Duration::from_millis(reset_at.saturating_sub(now).max(1)));
        Decision::denied(info)
    } else {
        state.remaining -= 1;
        Decision::allowed(RateLimitInfo::new(FIXED_WINDOW, config.capacity(), state.remaining))
    };

    (state, decision)
}

impl<B: StateBackend<FixedWindowState>> RateLimiter for FixedWindowCounter<B> {
    fn name(&self) -> &'static str {
        FIXED_WINDOW
    }

    async fn check_and_record(&self, key: &str) -> Result<Decision> {
        let store_key = self.space.resolve(key)?;
        let now = self.clock.now_ms();

        // Expire with the epoch so an idle key costs nothing once it resets.
        let window_ms = self.config.window_ms();
        let epoch_end = (now / window_ms + 1).saturating_mul(window_ms);
        let ttl = Duration::from_millis(epoch_end.saturating_sub(now).max(1));

        let decision = self
            .backend
            .update(&store_key, ttl, |current| count(current, &self.config, now))
            .await?;

        log_decision(&store_key, &decision);
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn counter(capacity: u64, window_ms: u64, clock: &ManualClock) -> FixedWindowCounter {
        FixedWindowCounter::in_memory(WindowConfig::new(capacity, Duration::from_millis(window_ms)))
            .with_clock(clock.clone())
    }

    #[tokio::test]
    async fn test_fixed_window_basic() {
        let clock = ManualClock::new(10_000);
        let algorithm = counter(3, 1_000, &clock);

        for i in 1..=3 {
            let decision = algorithm.check_and_record("k").await.unwrap();
            assert!(decision.is_allowed(), "Request {} should be allowed", i);
            assert_eq!(decision.info().remaining, 3 - i);
        }

        clock.advance(Duration::from_millis(250));
        let decision = algorithm.check_and_record("k").await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.info().retry_after, Some(Duration::from_millis(750)));
    }

    #[tokio::test]
    async fn test_fixed_window_resets_at_epoch() {
        let clock = ManualClock::new(10_999);
        let algorithm = counter(2, 1_000, &clock);

        assert!(algorithm.allow("k").await.unwrap());
        assert!(algorithm.allow("k").await.unwrap());
        assert!(!algorithm.allow("k").await.unwrap());

        // One millisecond later a new epoch begins: the boundary burst.
        clock.advance(Duration::from_millis(1));
        assert!(algorithm.allow("k").await.unwrap());
        assert!(algorithm.allow("k").await.unwrap());
        assert!(!algorithm.allow("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_fixed_window_skipped_epochs() {
        let clock = ManualClock::new(0);
        let algorithm = counter(1, 100, &clock);

        assert!(algorithm.allow("k").await.unwrap());
        clock.advance(Duration::from_millis(1_050));
        assert!(algorithm.allow("k").await.unwrap());

        let state = algorithm.backend().load("rate_limit:fixed_window:k").await.unwrap().unwrap();
        assert_eq!(state.window_index, 10);
        assert_eq!(state.remaining, 0);
    }

    #[tokio::test]
    async fn test_fixed_window_does_not_reset_backwards() {
        let clock = ManualClock::new(5_000);
        let algorithm = counter(1, 1_000, &clock);

        assert!(algorithm.allow("k").await.unwrap());
        clock.set(4_500);
        let decision = algorithm.check_and_record("k").await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.info().retry_after, Some(Duration::from_millis(1_500)));
    }
}

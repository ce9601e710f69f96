//! Sliding Window Counter rate limiting algorithm.
//!
//! Approximates a true sliding window with two adjacent fixed windows: the
//! count of the previous window is weighted by how much of it still overlaps
//! the sliding window ending now.
//!
//! Window starts are aligned to multiples of the window length since the Unix
//! epoch, so every instance that shares a record agrees on where windows begin.

use std::sync::Arc;
use std::time::Duration;

use crate::algorithm::{RateLimiter, log_decision};
use crate::clock::{Clock, SharedClock, system_clock};
use crate::config::{MAX_RECORD_TTL, WindowConfig};
use crate::decision::{Decision, RateLimitInfo};
use crate::error::Result;
use crate::key::{KeySpace, SLIDING_WINDOW};
use crate::storage::{
    MemoryBackend, SharedStore, SlidingWindowCounterState, StateBackend, StoreBackend,
};

/// Sliding Window Counter rate limiting algorithm.
///
/// O(1) state per key, smoother than a fixed window at the boundaries.
pub struct SlidingWindowCounter<B = MemoryBackend<SlidingWindowCounterState>> {
    config: WindowConfig,
    space: KeySpace,
    backend: B,
    clock: SharedClock,
}

impl<B> std::fmt::Debug for SlidingWindowCounter<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowCounter")
            .field("config", &self.config)
            .field("space", &self.space)
            .finish()
    }
}

impl SlidingWindowCounter {
    /// In-process counter admitting about `capacity` requests per sliding
    /// `window`.
    pub fn new(capacity: u64, window: Duration) -> Result<Self> {
        Ok(Self::in_memory(WindowConfig::try_new(capacity, window)?))
    }

    /// In-process counter from a validated configuration.
    pub fn in_memory(config: WindowConfig) -> Self {
        Self::with_backend(config, MemoryBackend::new())
    }
}

impl<C: SharedStore> SlidingWindowCounter<StoreBackend<C>> {
    /// Counter whose state lives in a shared store.
    pub fn shared(config: WindowConfig, store: Arc<C>) -> Self {
        Self::with_backend(config, StoreBackend::new(store))
    }
}

impl<B> SlidingWindowCounter<B> {
    /// Counter over any state backend.
    pub fn with_backend(config: WindowConfig, backend: B) -> Self {
        Self {
            config,
            space: KeySpace::with_default_namespace(SLIDING_WINDOW),
            backend,
            clock: system_clock(),
        }
    }

    /// Use a different key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Result<Self> {
        self.space = KeySpace::new(namespace, SLIDING_WINDOW)?;
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

fn slide(
    current: Option<SlidingWindowCounterState>,
    config: &WindowConfig,
    now: u64,
) -> (SlidingWindowCounterState, Decision) {
    let window_ms = config.window_ms();
    let aligned = now - now % window_ms;

    let mut state = current.unwrap_or(SlidingWindowCounterState {
        current_count: 0,
        previous_count: 0,
        window_start: aligned,
    });

    let mut elapsed = now.saturating_sub(state.window_start);
    if elapsed >= window_ms {
        state.previous_count = if elapsed >= 2 * window_ms {
            0
        } else {
            state.current_count
        };
        state.current_count = 0;
        state.window_start = aligned;
        elapsed = now - aligned;
    }

    let capacity = config.capacity() as f64;
    let weight = (window_ms - elapsed) as f64 / window_ms as f64;
    let effective = state.current_count as f64 + state.previous_count as f64 * weight;

    let decision = if effective >= capacity {
        let wait = retry_after_ms(&state, config, elapsed);
        let info = RateLimitInfo::new(SLIDING_WINDOW, config.capacity(), 0)
            .with_retry_after(Duration::from_millis(wait));
        Decision::denied(info)
    } else {
        state.current_count += 1;
        let remaining = (capacity - (effective + 1.0)).max(0.0).floor() as u64;
        Decision::allowed(RateLimitInfo::new(SLIDING_WINDOW, config.capacity(), remaining))
    };

    (state, decision)
}

/// Milliseconds until the weighted count drops below capacity, assuming no
/// further admissions.
fn retry_after_ms(state: &SlidingWindowCounterState, config: &WindowConfig, elapsed: u64) -> u64 {
    let window = config.window_ms() as f64;
    let capacity = config.capacity() as f64;
    let current = state.current_count as f64;

    if current < capacity && state.previous_count > 0 {
        // The previous window's weight decays within this window.
        let previous = state.previous_count as f64;
        let threshold = window * (1.0 - (capacity - current) / previous);
        (threshold.floor() as u64 + 1).saturating_sub(elapsed).max(1)
    } else {
        // This window's count becomes the decaying previous one.
        let into_next = window * (1.0 - capacity / current).max(0.0);
        let until_next = config.window_ms() - elapsed;
        (until_next + into_next.floor() as u64 + 1).max(1)
    }
}

impl<B: StateBackend<SlidingWindowCounterState>> RateLimiter for SlidingWindowCounter<B> {
    fn name(&self) -> &'static str {
        SLIDING_WINDOW
    }

    async fn check_and_record(&self, key: &str) -> Result<Decision> {
        let store_key = self.space.resolve(key)?;
        let now = self.clock.now_ms();
        let ttl = (self.config.window() * 2).min(MAX_RECORD_TTL);

        let decision = self
            .backend
            .update(&store_key, ttl, |current| slide(current, &self.config, now))
            .await?;

        log_decision(&store_key, &decision);
        Ok(decision)
    }
}

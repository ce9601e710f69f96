//! Construction-time parameters.
//!
//! Parameters are validated here, once, before any limiter exists: a config
//! value that made it past [`BucketConfig::try_new`] or
//! [`WindowConfig::try_new`] (or deserialization, which goes through them) is
//! always usable. Loading configuration files is left to the caller.
//!
//! # Examples
//!
//! ```
//! use keygate::config::{BucketConfig, LimiterConfig, WindowConfig};
//! use std::time::Duration;
//!
//! // 10 tokens, refilled at 1 token per second
//! let bucket = BucketConfig::try_new(10.0, 1.0).unwrap();
//!
//! // 100 requests per minute
//! let window = WindowConfig::per_minute(100);
//!
//! // Picked from configuration
//! let raw = r#"{"algorithm":"token_bucket","maxTokens":10,"refillRate":1}"#;
//! let config: LimiterConfig = serde_json::from_str(raw).unwrap();
//! assert_eq!(config.algorithm(), "token_bucket");
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::algorithm::{
    DynRateLimiter, FixedWindowCounter, LeakyBucket, SlidingWindowCounter, SlidingWindowLog,
    TokenBucket,
};
use crate::error::{ConfigError, Result};
use crate::key;
use crate::storage::{SharedStore, StoreBackend};

/// Capacity and rate for the bucket algorithms.
///
/// For a token bucket `capacity` is `maxTokens` and `rate` the refill rate; for
/// a leaky bucket they are `maxLevel` and the leak rate. Rates are units per
/// second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BucketParams", into = "BucketParams")]
pub struct BucketConfig {
    capacity: f64,
    rate: f64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketParams {
    #[serde(alias = "maxTokens", alias = "maxLevel")]
    capacity: f64,
    #[serde(alias = "refillRate", alias = "leakRate")]
    rate: f64,
}

impl TryFrom<BucketParams> for BucketConfig {
    type Error = ConfigError;

    fn try_from(params: BucketParams) -> std::result::Result<Self, Self::Error> {
        Self::validate(params.capacity, params.rate)
    }
}

impl From<BucketConfig> for BucketParams {
    fn from(config: BucketConfig) -> Self {
        Self {
            capacity: config.capacity,
            rate: config.rate,
        }
    }
}

impl BucketConfig {
    /// Create a bucket configuration.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` or `rate` is not a positive finite number.
    pub fn new(capacity: f64, rate: f64) -> Self {
        match Self::validate(capacity, rate) {
            Ok(config) => config,
            Err(e) => panic!("invalid bucket configuration: {e}"),
        }
    }

    /// Try to create a bucket configuration, returning an error if invalid.
    pub fn try_new(capacity: f64, rate: f64) -> Result<Self> {
        Ok(Self::validate(capacity, rate)?)
    }

    fn validate(capacity: f64, rate: f64) -> std::result::Result<Self, ConfigError> {
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(ConfigError::InvalidCapacity(capacity));
        }
        if !(rate.is_finite() && rate > 0.0) {
            return Err(ConfigError::InvalidRate(rate));
        }
        Ok(Self { capacity, rate })
    }

    /// Maximum tokens (token bucket) or maximum level (leaky bucket).
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Refill or leak rate, per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Capacity as a whole request count, for reporting.
    pub fn limit(&self) -> u64 {
        self.capacity.floor() as u64
    }

    /// Expiry for a record: twice the time a full bucket needs to return to
    /// its default state.
    pub fn ttl(&self) -> Duration {
        drain_ttl(self.capacity, self.rate)
    }
}

/// Longest expiry given to any record, and the longest accepted window.
pub const MAX_RECORD_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// `ceil(capacity / rate) * 2` seconds, at least two seconds and at most
/// [`MAX_RECORD_TTL`].
pub(crate) fn drain_ttl(capacity: f64, rate: f64) -> Duration {
    let secs = (capacity / rate).ceil().max(1.0) * 2.0;
    Duration::try_from_secs_f64(secs)
        .unwrap_or(MAX_RECORD_TTL)
        .min(MAX_RECORD_TTL)
}

/// Budget and window length for the window algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WindowParams", into = "WindowParams")]
pub struct WindowConfig {
    capacity: u64,
    window: Duration,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WindowParams {
    capacity: u64,
    window_ms: u64,
}

impl TryFrom<WindowParams> for WindowConfig {
    type Error = ConfigError;

    fn try_from(params: WindowParams) -> std::result::Result<Self, Self::Error> {
        Self::validate(params.capacity, Duration::from_millis(params.window_ms))
    }
}

impl From<WindowConfig> for WindowParams {
    fn from(config: WindowConfig) -> Self {
        Self {
            capacity: config.capacity,
            window_ms: config.window_ms(),
        }
    }
}

impl WindowConfig {
    /// Create a window configuration.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0 or `window` is shorter than a millisecond or
    /// longer than [`MAX_RECORD_TTL`].
    pub fn new(capacity: u64, window: Duration) -> Self {
        match Self::validate(capacity, window) {
            Ok(config) => config,
            Err(e) => panic!("invalid window configuration: {e}"),
        }
    }

    /// Try to create a window configuration, returning an error if invalid.
    pub fn try_new(capacity: u64, window: Duration) -> Result<Self> {
        Ok(Self::validate(capacity, window)?)
    }

    fn validate(capacity: u64, window: Duration) -> std::result::Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity(0.0));
        }
        if window.as_millis() == 0 || window > MAX_RECORD_TTL {
            return Err(ConfigError::InvalidWindow(window));
        }
        Ok(Self { capacity, window })
    }

    /// `n` requests per second.
    pub fn per_second(n: u64) -> Self {
        Self::new(n, Duration::from_secs(1))
    }

    /// `n` requests per minute.
    pub fn per_minute(n: u64) -> Self {
        Self::new(n, Duration::from_secs(60))
    }

    /// `n` requests per hour.
    pub fn per_hour(n: u64) -> Self {
        Self::new(n, Duration::from_secs(3600))
    }

    /// Requests admitted per window.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Window length in whole milliseconds (never 0).
    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

/// One limiter, selected by name.
///
/// Deserializes from `{"algorithm": "<name>", ...params}` where the name is one
/// of the key segments in [`crate::key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterConfig {
    /// [`TokenBucket`]
    TokenBucket(BucketConfig),
    /// [`LeakyBucket`]
    LeakyBucket(BucketConfig),
    /// [`FixedWindowCounter`]
    FixedWindow(WindowConfig),
    /// [`SlidingWindowCounter`]
    SlidingWindow(WindowConfig),
    /// [`SlidingWindowLog`]
    SlidingLog(WindowConfig),
}

impl LimiterConfig {
    /// Algorithm key segment.
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::TokenBucket(_) => key::TOKEN_BUCKET,
            Self::LeakyBucket(_) => key::LEAKY_BUCKET,
            Self::FixedWindow(_) => key::FIXED_WINDOW,
            Self::SlidingWindow(_) => key::SLIDING_WINDOW,
            Self::SlidingLog(_) => key::SLIDING_LOG,
        }
    }

    /// Build a limiter with its own in-process state table.
    pub fn build_local(&self) -> Box<dyn DynRateLimiter> {
        match *self {
            Self::TokenBucket(c) => Box::new(TokenBucket::in_memory(c)),
            Self::LeakyBucket(c) => Box::new(LeakyBucket::in_memory(c)),
            Self::FixedWindow(c) => Box::new(FixedWindowCounter::in_memory(c)),
            Self::SlidingWindow(c) => Box::new(SlidingWindowCounter::in_memory(c)),
            Self::SlidingLog(c) => Box::new(SlidingWindowLog::in_memory(c)),
        }
    }

    /// Build a limiter whose state lives in `store` under `namespace`.
    pub fn build_shared<C: SharedStore>(
        &self,
        store: Arc<C>,
        namespace: &str,
    ) -> Result<Box<dyn DynRateLimiter>> {
        let backend = StoreBackend::new(store);
        let limiter: Box<dyn DynRateLimiter> = match *self {
            Self::TokenBucket(c) => {
                Box::new(TokenBucket::with_backend(c, backend).with_namespace(namespace)?)
            }
            Self::LeakyBucket(c) => {
                Box::new(LeakyBucket::with_backend(c, backend).with_namespace(namespace)?)
            }
            Self::FixedWindow(c) => {
                Box::new(FixedWindowCounter::with_backend(c, backend).with_namespace(namespace)?)
            }
            Self::SlidingWindow(c) => {
                Box::new(SlidingWindowCounter::with_backend(c, backend).with_namespace(namespace)?)
            }
            Self::SlidingLog(c) => {
                Box::new(SlidingWindowLog::with_backend(c, backend).with_namespace(namespace)?)
            }
        };
        Ok(limiter)
    }
}

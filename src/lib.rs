//! Per-key admission control for multi-tenant services.
//!
//! `keygate` decides, per caller key, whether one more request may proceed.
//! It ships five algorithms behind one [`RateLimiter`] trait:
//!
//! - **Token Bucket**: continuous refill, bursts up to capacity
//! - **Leaky Bucket**: occupancy that drains at a constant rate
//! - **Fixed Window Counter**: hard per-epoch budget
//! - **Sliding Window Counter**: two windows blended by elapsed time
//! - **Sliding Window Log**: exact window from a timestamp log
//!
//! Each algorithm is written once against a state backend. The in-process
//! [`MemoryBackend`](storage::MemoryBackend) keeps records behind one mutex
//! per instance. [`StoreBackend`](storage::StoreBackend) keeps them in a
//! [`SharedStore`](storage::SharedStore) so independent processes share one
//! budget per key, with every update applied atomically by the store.
//!
//! # Quick Start
//!
//! ```
//! use keygate::{RateLimiter, TokenBucket};
//!
//! #[tokio::main]
//! async fn main() -> keygate::Result<()> {
//!     // 10 tokens, refilled at 1 token per second
//!     let limiter = TokenBucket::new(10.0, 1.0)?;
//!
//!     let decision = limiter.check_and_record("acme:alice").await?;
//!     if decision.is_allowed() {
//!         println!("Request allowed! {} remaining", decision.info().remaining);
//!     } else {
//!         println!("Rate limited! Retry after {:?}", decision.info().retry_after);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Denials and faults
//!
//! Running out of budget is `Ok` with a denied [`Decision`]. `Err` means the
//! decision could not be made: the store is down, the call timed out, or a
//! stored record is corrupt. What a fault means for the request is up to the
//! caller; see [`guard::FailurePolicy`].
//!
//! # Feature Flags
//!
//! - `local-store` (default): in-process [`SharedStore`](storage::SharedStore)
//! - `redis`: Redis [`SharedStore`](storage::SharedStore) with connection pooling

pub mod algorithm;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod guard;
pub mod key;
pub mod storage;

// Re-export main types
pub use algorithm::{
    DynRateLimiter, FixedWindowCounter, LeakyBucket, RateLimiter, SlidingWindowCounter,
    SlidingWindowLog, TokenBucket,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BucketConfig, LimiterConfig, WindowConfig};
pub use decision::{Decision, RateLimitInfo};
pub use error::{ConfigError, ConnectionError, RateLimitError, Result, StorageError};
pub use guard::{FailurePolicy, RateLimiterExt};
pub use key::{KeySpace, SubjectKey};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::algorithm::{
        FixedWindowCounter, LeakyBucket, RateLimiter, SlidingWindowCounter, SlidingWindowLog,
        TokenBucket,
    };
    pub use crate::config::{BucketConfig, WindowConfig};
    pub use crate::decision::{Decision, RateLimitInfo};
    pub use crate::error::{RateLimitError, Result};
    pub use crate::guard::{FailurePolicy, RateLimiterExt};
    pub use crate::storage::{MemoryBackend, SharedStore, StoreBackend};

    #[cfg(feature = "local-store")]
    pub use crate::storage::LocalStore;

    #[cfg(feature = "redis")]
    pub use crate::storage::{RedisConfig, RedisStore};
}

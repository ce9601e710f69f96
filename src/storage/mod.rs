//! State backends and the shared-store contract.
//!
//! Every algorithm is written once against [`StateBackend`]. Two backends
//! implement it:
//!
//! - [`MemoryBackend`]: a per-instance table behind one mutex. The instance
//!   owns its records; nothing expires.
//! - [`StoreBackend`]: stateless client logic over a [`SharedStore`]. The store
//!   owns the records and expires them by TTL. Updates are optimistic
//!   compare-and-set; there is no plain read-then-write path.
//!
//! A store is anything that satisfies [`SharedStore`]: [`LocalStore`] runs in
//! process, [`RedisStore`] (feature `redis`) talks to Redis.

mod memory;
mod scripts;
mod shared;
mod state;

#[cfg(feature = "local-store")]
mod local_store;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryBackend;
pub use scripts::{AtomicScript, COMPARE_AND_SET_SCRIPT, ScriptEffect, TOKEN_BUCKET_SCRIPT};
pub use shared::{DEFAULT_MAX_ATTEMPTS, SharedStore, StoreBackend};
pub use state::{
    AlgorithmState, FixedWindowState, LeakyBucketState, SlidingWindowCounterState,
    SlidingWindowLogState, TokenBucketState,
};

#[cfg(feature = "local-store")]
pub use local_store::LocalStore;
#[cfg(feature = "redis")]
pub use redis_store::{RedisConfig, RedisStore};

use std::future::Future;
use std::time::Duration;

use crate::error::{Result, StorageError};

/// Where an algorithm keeps its per-key state records.
///
/// `update` is the only method algorithms need for correctness: it must run
/// the read-modify-write as one indivisible step with respect to every other
/// caller that shares the records.
pub trait StateBackend<S: AlgorithmState>: Send + Sync + 'static {
    /// Load the record for `key`, if one exists and has not expired.
    ///
    /// A record that exists but does not decode is an error, never `None`.
    fn load(&self, key: &str) -> impl Future<Output = Result<Option<S>>> + Send;

    /// Store a record, replacing whatever is there.
    fn save(&self, key: &str, state: &S, ttl: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Atomically replace the record for `key` with the one computed by
    /// `operation`.
    ///
    /// `operation` receives the current record (or `None`) and returns the new
    /// record and a result. Backends may call it more than once when a
    /// concurrent writer wins, so it must not have side effects.
    fn update<F, T>(
        &self,
        key: &str,
        ttl: Duration,
        operation: F,
    ) -> impl Future<Output = Result<T>> + Send
    where
        F: FnMut(Option<S>) -> (S, T) + Send,
        T: Send;

    /// Run a server-side atomic script against `key`.
    ///
    /// Returns `Ok(None)` when this backend cannot execute scripts; callers
    /// then fall back to [`update`](StateBackend::update).
    fn run_script(
        &self,
        script: &'static AtomicScript,
        key: &str,
        args: &[String],
    ) -> impl Future<Output = Result<Option<Vec<String>>>> + Send {
        let _ = (script, key, args);
        async { Ok(None) }
    }
}

impl<S: AlgorithmState, B: StateBackend<S>> StateBackend<S> for std::sync::Arc<B> {
    async fn load(&self, key: &str) -> Result<Option<S>> {
        (**self).load(key).await
    }

    async fn save(&self, key: &str, state: &S, ttl: Duration) -> Result<()> {
        (**self).save(key, state, ttl).await
    }

    async fn update<F, T>(&self, key: &str, ttl: Duration, operation: F) -> Result<T>
    where
        F: FnMut(Option<S>) -> (S, T) + Send,
        T: Send,
    {
        (**self).update(key, ttl, operation).await
    }

    async fn run_script(
        &self,
        script: &'static AtomicScript,
        key: &str,
        args: &[String],
    ) -> Result<Option<Vec<String>>> {
        (**self).run_script(script, key, args).await
    }
}

/// Encode a record in the persisted JSON format.
pub(crate) fn encode<S: AlgorithmState>(state: &S) -> Result<String> {
    serde_json::to_string(state).map_err(|e| StorageError::Serialization(e.to_string()).into())
}

/// Decode a persisted record, reporting corruption against its key.
pub(crate) fn decode<S: AlgorithmState>(key: &str, raw: &str) -> Result<S> {
    serde_json::from_str(raw).map_err(|e| StorageError::decode(key, e).into())
}

/// Clamp a TTL to the store's millisecond resolution.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

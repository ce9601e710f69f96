//! Shared-store contract and the compare-and-set backend built on it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::storage::{
    AlgorithmState, AtomicScript, COMPARE_AND_SET_SCRIPT, StateBackend, decode, encode,
    ttl_millis,
};

/// Default number of compare-and-set attempts before an update gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 32;

/// The external key-value store that shares state between processes.
///
/// Only this surface is required: plain reads and writes with per-key expiry,
/// plus server-side execution of an [`AtomicScript`] against one or more keys.
/// Records are opaque strings to the store.
pub trait SharedStore: Send + Sync + 'static {
    /// Read a key. Expired keys read as `None`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Write a key with an expiry.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Execute `script` atomically. No other caller's command interleaves with
    /// it.
    fn run_atomic(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> impl Future<Output = Result<Vec<String>>> + Send;
}

impl<C: SharedStore> SharedStore for Arc<C> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        (**self).set(key, value, ttl).await
    }

    async fn run_atomic(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<String>> {
        (**self).run_atomic(script, keys, args).await
    }
}

/// State backend over a [`SharedStore`].
///
/// Holds no state of its own and caches nothing: every call re-reads the
/// store. Updates read the raw record, compute the next one, and publish it
/// with [`COMPARE_AND_SET_SCRIPT`] against the exact bytes that were read. A
/// conflicting writer forces a re-read; after `max_attempts` conflicts the
/// update fails with [`StorageError::AtomicConflict`].
///
/// Store faults are returned as they are. Nothing here retries them.
pub struct StoreBackend<C> {
    store: Arc<C>,
    max_attempts: u32,
}

impl<C> Clone for StoreBackend<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            max_attempts: self.max_attempts,
        }
    }
}

impl<C> std::fmt::Debug for StoreBackend<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBackend")
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl<C: SharedStore> StoreBackend<C> {
    /// Wrap a store handle.
    pub fn new(store: Arc<C>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set how many compare-and-set conflicts an update tolerates.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<C> {
        &self.store
    }
}

impl<S: AlgorithmState, C: SharedStore> StateBackend<S> for StoreBackend<C> {
    async fn load(&self, key: &str) -> Result<Option<S>> {
        match self.store.get(key).await? {
            Some(raw) => decode(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, state: &S, ttl: Duration) -> Result<()> {
        self.store.set(key, &encode(state)?, ttl).await
    }

    async fn update<F, T>(&self, key: &str, ttl: Duration, mut operation: F) -> Result<T>
    where
        F: FnMut(Option<S>) -> (S, T) + Send,
        T: Send,
    {
        let keys = [key.to_owned()];
        let ttl_ms = ttl_millis(ttl).to_string();

        for attempt in 1..=self.max_attempts {
            let raw = self.store.get(key).await?;
            let current = raw.as_deref().map(|r| decode::<S>(key, r)).transpose()?;

            let unchanged = current.clone();
            let (next, result) = operation(current);
            if unchanged.as_ref() == Some(&next) {
                // Nothing to publish; the decision stands on the snapshot read.
                return Ok(result);
            }

            let args = match raw {
                Some(expected) => vec!["1".to_string(), expected, encode(&next)?, ttl_ms.clone()],
                None => vec!["0".to_string(), String::new(), encode(&next)?, ttl_ms.clone()],
            };
            let reply = self
                .store
                .run_atomic(&COMPARE_AND_SET_SCRIPT, &keys, &args)
                .await?;

            match reply.first().map(String::as_str) {
                Some("1") => return Ok(result),
                Some("0") => {
                    debug!(key, attempt, algorithm = S::ALGORITHM, "compare-and-set conflict");
                }
                _ => {
                    return Err(StorageError::MalformedReply {
                        script: COMPARE_AND_SET_SCRIPT.id(),
                        message: format!("{reply:?}"),
                    }
                    .into());
                }
            }
        }

        warn!(
            key,
            attempts = self.max_attempts,
            algorithm = S::ALGORITHM,
            "giving up on contended state update"
        );
        Err(StorageError::AtomicConflict {
            attempts: self.max_attempts,
        }
        .into())
    }

    async fn run_script(
        &self,
        script: &'static AtomicScript,
        key: &str,
        args: &[String],
    ) -> Result<Option<Vec<String>>> {
        let keys = [key.to_owned()];
        self.store.run_atomic(script, &keys, args).await.map(Some)
    }
}

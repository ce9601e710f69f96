//! In-process state table.
//!
//! One mutex guards the whole table of an algorithm instance, so every call on
//! that instance serializes through it regardless of key. Decay is lazy, so the
//! critical section is a lookup, a bit of arithmetic and an insert.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::Result;
use crate::storage::{AlgorithmState, StateBackend};

/// Per-instance in-memory state table.
///
/// Records are created on first use and live as long as the backend. TTLs
/// passed in by algorithms are ignored.
///
/// # Example
///
/// ```
/// use keygate::storage::{MemoryBackend, TokenBucketState};
///
/// let backend: MemoryBackend<TokenBucketState> = MemoryBackend::new();
/// assert!(backend.is_empty());
/// ```
pub struct MemoryBackend<S> {
    table: Mutex<HashMap<String, S>>,
}

impl<S> std::fmt::Debug for MemoryBackend<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entries", &self.table.lock().len())
            .finish()
    }
}

impl<S> Default for MemoryBackend<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> MemoryBackend<S> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys with a record.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether no key has a record yet.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

impl<S: AlgorithmState> StateBackend<S> for MemoryBackend<S> {
    async fn load(&self, key: &str) -> Result<Option<S>> {
        Ok(self.table.lock().get(key).cloned())
    }

    async fn save(&self, key: &str, state: &S, _ttl: Duration) -> Result<()> {
        self.table.lock().insert(key.to_owned(), state.clone());
        Ok(())
    }

    async fn update<F, T>(&self, key: &str, _ttl: Duration, mut operation: F) -> Result<T>
    where
        F: FnMut(Option<S>) -> (S, T) + Send,
        T: Send,
    {
        let mut table = self.table.lock();

        // The next record is computed in full before it replaces the old one.
        if let Some(slot) = table.get_mut(key) {
            let (next, result) = operation(Some(slot.clone()));
            *slot = next;
            return Ok(result);
        }

        let (next, result) = operation(None);
        trace!(key, algorithm = S::ALGORITHM, "created state record");
        table.insert(key.to_owned(), next);
        Ok(result)
    }
}

//! In-process implementation of the shared-store contract.
//!
//! Uses `DashMap` so independent limiter instances (standing in for separate
//! processes) can share records with per-key locking, honors TTLs against an
//! injected clock, and runs the natively implemented atomic scripts while
//! holding the key's shard lock.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::clock::{Clock, SharedClock, system_clock};
use crate::error::{Result, StorageError};
use crate::storage::{AtomicScript, SharedStore, ttl_millis};

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: u64,
}

/// In-process [`SharedStore`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use keygate::storage::LocalStore;
///
/// let store = Arc::new(LocalStore::new());
/// assert!(store.is_empty());
/// ```
pub struct LocalStore {
    data: DashMap<String, StoredValue>,
    clock: SharedClock,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("entries", &self.data.len())
            .finish()
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            clock: system_clock(),
        }
    }

    /// Create an empty store whose expiry follows `clock`.
    pub fn with_clock(clock: impl Clock) -> Self {
        Self {
            data: DashMap::new(),
            clock: Arc::new(clock),
        }
    }

    /// Number of stored keys, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.data.len();
        self.data.retain(|_, stored| stored.expires_at > now);
        before.saturating_sub(self.data.len())
    }

    fn expires_at(&self, ttl: Duration) -> u64 {
        self.clock.now_ms().saturating_add(ttl_millis(ttl))
    }
}

impl SharedStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_ms();
        if let Some(stored) = self.data.get(key) {
            if stored.expires_at > now {
                return Ok(Some(stored.value.clone()));
            }
            drop(stored);
            self.data.remove_if(key, |_, stored| stored.expires_at <= now);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = self.expires_at(ttl);
        self.data.insert(
            key.to_owned(),
            StoredValue {
                value: value.to_owned(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn run_atomic(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<String>> {
        let native = script
            .native()
            .ok_or_else(|| StorageError::UnknownScript(script.id().to_string()))?;
        let [key] = keys else {
            return Err(StorageError::operation_failed(
                format!("{}: expected exactly one key, got {}", script.id(), keys.len()),
                false,
            )
            .into());
        };

        let now = self.clock.now_ms();
        // The entry guard holds the shard lock until the script has finished.
        let entry = self.data.entry(key.clone());
        let current = match &entry {
            Entry::Occupied(o) if o.get().expires_at > now => Some(o.get().value.clone()),
            _ => None,
        };

        let effect = native(key, current.as_deref(), args)?;

        if let Some((value, ttl)) = effect.write {
            let stored = StoredValue {
                value,
                expires_at: now.saturating_add(ttl_millis(ttl)),
            };
            match entry {
                Entry::Occupied(mut o) => {
                    o.insert(stored);
                }
                Entry::Vacant(v) => {
                    v.insert(stored);
                }
            }
        }

        Ok(effect.reply)
    }
}

//! Redis implementation of the shared-store contract.
//!
//! Uses connection pooling. Atomic scripts run through `EVALSHA`, falling back
//! to `EVAL` when the server has not seen the script yet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::redis::{AsyncCommands, RedisError, Script, cmd};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, PoolError, Runtime};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ConnectionError, RateLimitError, Result, StorageError};
use crate::storage::{AtomicScript, SharedStore, ttl_millis};

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
    /// How long to wait for a pooled connection
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Create a new Redis configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    /// Set how long to wait for a pooled connection.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// Redis-backed [`SharedStore`].
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use keygate::storage::{RedisConfig, RedisStore};
/// use keygate::{BucketConfig, TokenBucket};
///
/// let config = RedisConfig::new("redis://localhost:6379").with_pool_size(20);
/// let store = Arc::new(RedisStore::new(config).await?);
///
/// let bucket = TokenBucket::shared(BucketConfig::new(10.0, 1.0), store);
/// ```
///
/// Keys are used as given; limiters already namespace them.
pub struct RedisStore {
    pool: Pool,
    timeout: Duration,
    scripts: Mutex<HashMap<&'static str, Arc<Script>>>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("timeout", &self.timeout)
            .field("scripts", &self.scripts.lock().len())
            .finish()
    }
}

impl RedisStore {
    /// Connect a pool and check the server answers.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let mut cfg = Config::from_url(&config.url);
        let mut pool_config = PoolConfig::new(config.pool_size.max(1));
        pool_config.timeouts.wait = Some(config.connection_timeout);
        pool_config.timeouts.create = Some(config.connection_timeout);
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
        let _: () = cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
        debug!(url = %config.url, pool_size = config.pool_size, "connected to redis");

        Ok(Self {
            pool,
            timeout: config.connection_timeout,
            scripts: Mutex::new(HashMap::new()),
        })
    }

    /// Connect with default settings.
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig::new(url)).await
    }

    async fn get_conn(&self) -> Result<Connection> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(_) => StorageError::PoolExhausted.into(),
            other => ConnectionError::ConnectionFailed(other.to_string()).into(),
        })
    }

    fn script(&self, script: &AtomicScript) -> Arc<Script> {
        let mut scripts = self.scripts.lock();
        Arc::clone(
            scripts
                .entry(script.id())
                .or_insert_with(|| Arc::new(Script::new(script.source()))),
        )
    }

    fn map_error(&self, key: &str, e: RedisError) -> RateLimitError {
        map_redis_error(key, e, self.timeout)
    }
}

/// Classify a Redis failure.
///
/// Scripts report an undecodable record with a `CORRUPT` error reply.
fn map_redis_error(key: &str, e: RedisError, timeout: Duration) -> RateLimitError {
    if e.code() == Some("CORRUPT") {
        let detail = e.detail().unwrap_or("record failed to decode").to_string();
        return StorageError::decode(key, detail).into();
    }
    if e.is_timeout() {
        return ConnectionError::Timeout(timeout).into();
    }
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        return ConnectionError::ConnectionFailed(e.to_string()).into();
    }
    StorageError::operation_failed(e.to_string(), false).into()
}

impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.get_conn().await?;
        conn.get(key).await.map_err(|e| self.map_error(key, e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await
            .map_err(|e| self.map_error(key, e))?;
        Ok(())
    }

    async fn run_atomic(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<String>> {
        let mut conn = self.get_conn().await?;
        let compiled = self.script(script);

        let mut invocation = compiled.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }

        invocation.invoke_async(&mut *conn).await.map_err(|e| {
            let key = keys.first().map(String::as_str).unwrap_or_default();
            if e.code() != Some("CORRUPT") {
                warn!(script = script.id(), key, error = %e, "redis script failed");
            }
            self.map_error(key, e)
        })
    }
}

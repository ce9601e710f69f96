//! Token Bucket rate limiting algorithm.

use std::sync::Arc;

use crate::algorithm::{RateLimiter, log_decision};
use crate::clock::{Clock, SharedClock, system_clock};
use crate::config::BucketConfig;
use crate::decision::{Decision, RateLimitInfo, secs_to_duration};
use crate::error::{Result, StorageError};
use crate::key::{KeySpace, TOKEN_BUCKET};
use crate::storage::{
    MemoryBackend, StateBackend, StoreBackend, TOKEN_BUCKET_SCRIPT, TokenBucketState,
};

/// Tokens consumed per admitted request.
const REQUESTED: f64 = 1.0;

/// Token Bucket rate limiting algorithm.
///
/// Holds up to `capacity` tokens and refills at `rate` tokens per second. A
/// request takes one token; with none left it is denied. The bucket starts
/// full, so a quiet key may burst up to `capacity` requests at once.
///
/// Backed by a shared store, the whole refill-check-take step runs as one
/// server-side script ([`TOKEN_BUCKET_SCRIPT`]) per call. Backends without
/// scripts run the same step through [`StateBackend::update`].
///
/// # Example
///
/// ```
/// use keygate::{RateLimiter, TokenBucket};
///
/// # tokio_test::block_on(async {
/// let bucket = TokenBucket::new(10.0, 1.0).unwrap();
/// assert!(bucket.allow_subject("acme", "u-1").await.unwrap());
/// # });
/// ```
pub struct TokenBucket<B = MemoryBackend<TokenBucketState>> {
    config: BucketConfig,
    space: KeySpace,
    backend: B,
    clock: SharedClock,
}

impl<B> std::fmt::Debug for TokenBucket<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("config", &self.config)
            .field("space", &self.space)
            .finish()
    }
}

impl TokenBucket {
    /// In-process bucket with `max_tokens` capacity refilled at
    /// `refill_rate` tokens per second.
    pub fn new(max_tokens: f64, refill_rate: f64) -> Result<Self> {
        Ok(Self::in_memory(BucketConfig::try_new(max_tokens, refill_rate)?))
    }

    /// In-process bucket from a validated configuration.
    pub fn in_memory(config: BucketConfig) -> Self {
        Self::with_backend(config, MemoryBackend::new())
    }
}

impl<C: crate::storage::SharedStore> TokenBucket<StoreBackend<C>> {
    /// Bucket whose state lives in a shared store.
    pub fn shared(config: BucketConfig, store: Arc<C>) -> Self {
        Self::with_backend(config, StoreBackend::new(store))
    }
}

impl<B> TokenBucket<B> {
    /// Bucket over any state backend.
    pub fn with_backend(config: BucketConfig, backend: B) -> Self {
        Self {
            config,
            space: KeySpace::with_default_namespace(TOKEN_BUCKET),
            backend,
            clock: system_clock(),
        }
    }

    /// Use a different key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Result<Self> {
        self.space = KeySpace::new(namespace, TOKEN_BUCKET)?;
        Ok(self)
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The bucket parameters.
    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// The state backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn decide(&self, take: Take) -> Decision {
        let remaining = take.tokens.floor() as u64;
        let info = RateLimitInfo::new(TOKEN_BUCKET, self.config.limit(), remaining);
        if take.allowed {
            Decision::allowed(info)
        } else {
            Decision::denied(info.with_retry_after(secs_to_duration(take.retry_after_secs)))
        }
    }
}

/// Outcome of one refill-check-take step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Take {
    pub allowed: bool,
    pub tokens: f64,
    pub retry_after_secs: f64,
}

/// Refill `current` up to `now`, then try to take `requested` tokens.
///
/// A missing record is a full bucket. Refill never moves `lastRefill`
/// backwards, so a caller with a slow clock cannot earn the same tokens twice.
pub(crate) fn refill_and_take(
    current: Option<TokenBucketState>,
    capacity: f64,
    refill_rate: f64,
    now: u64,
    requested: f64,
) -> (TokenBucketState, Take) {
    let (tokens, last_refill) = match current {
        Some(state) => (state.tokens, state.last_refill),
        None => (capacity, now),
    };

    let elapsed_secs = now.saturating_sub(last_refill) as f64 / 1000.0;
    let mut tokens = (tokens + elapsed_secs * refill_rate).min(capacity);

    let take = if tokens >= requested {
        tokens -= requested;
        Take {
            allowed: true,
            tokens,
            retry_after_secs: 0.0,
        }
    } else {
        Take {
            allowed: false,
            tokens,
            retry_after_secs: (requested - tokens).max(0.0) / refill_rate,
        }
    };

    let state = TokenBucketState {
        tokens,
        last_refill: now.max(last_refill),
    };
    (state, take)
}

/// Parse the `(allowed, tokensRemaining, retryAfterSeconds)` script reply.
fn parse_reply(reply: &[String]) -> Result<Take> {
    let malformed = |message: String| StorageError::MalformedReply {
        script: TOKEN_BUCKET_SCRIPT.id(),
        message,
    };

    let [allowed, tokens, retry_after] = reply else {
        return Err(malformed(format!("expected 3 values, got {}", reply.len())).into());
    };
    let allowed = match allowed.as_str() {
        "1" => true,
        "0" => false,
        other => return Err(malformed(format!("allowed flag {other:?}")).into()),
    };
    let number = |raw: &String| {
        raw.parse::<f64>()
            .map_err(|_| malformed(format!("not a number: {raw:?}")))
    };

    Ok(Take {
        allowed,
        tokens: number(tokens)?,
        retry_after_secs: number(retry_after)?,
    })
}

impl<B: StateBackend<TokenBucketState>> RateLimiter for TokenBucket<B> {
    fn name(&self) -> &'static str {
        TOKEN_BUCKET
    }

    async fn check_and_record(&self, key: &str) -> Result<Decision> {
        let store_key = self.space.resolve(key)?;
        let now = self.clock.now_ms();
        let capacity = self.config.capacity();
        let rate = self.config.rate();

        let args = [
            capacity.to_string(),
            rate.to_string(),
            now.to_string(),
            REQUESTED.to_string(),
        ];
        let take = match self
            .backend
            .run_script(&TOKEN_BUCKET_SCRIPT, &store_key, &args)
            .await?
        {
            Some(reply) => parse_reply(&reply)?,
            None => {
                self.backend
                    .update(&store_key, self.config.ttl(), |current| {
                        refill_and_take(current, capacity, rate, now, REQUESTED)
                    })
                    .await?
            }
        };

        let decision = self.decide(take);
        log_decision(&store_key, &decision);
        Ok(decision)
    }
}

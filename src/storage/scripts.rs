//! Server-side atomic scripts.
//!
//! A script has a Lua body for Redis and, for the scripts shipped here, an
//! equivalent native routine that [`LocalStore`](crate::storage::LocalStore)
//! runs under its per-key lock. Both read and write the same JSON record
//! shape as the Rust state types.

use std::time::Duration;

use crate::algorithm::token_bucket;
use crate::config::{MAX_RECORD_TTL, drain_ttl};
use crate::error::{Result, StorageError};
use crate::storage::{TokenBucketState, decode, encode};

/// Native stand-in for a script body: `(key, current record, args)`.
pub type NativeScript = fn(&str, Option<&str>, &[String]) -> Result<ScriptEffect>;

/// What a natively executed script does to its key.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptEffect {
    /// New record value and TTL, or `None` to leave the key untouched.
    pub write: Option<(String, Duration)>,
    /// Reply returned to the caller.
    pub reply: Vec<String>,
}

/// A named server-side routine run atomically against one key.
#[derive(Debug)]
pub struct AtomicScript {
    id: &'static str,
    source: &'static str,
    native: Option<NativeScript>,
}

impl AtomicScript {
    /// A script with only a Lua body. In-process stores will refuse it.
    pub const fn new(id: &'static str, source: &'static str) -> Self {
        Self {
            id,
            source,
            native: None,
        }
    }

    const fn with_native(id: &'static str, source: &'static str, native: NativeScript) -> Self {
        Self {
            id,
            source,
            native: Some(native),
        }
    }

    /// Stable script name.
    pub fn id(&self) -> &'static str {
        self.id
    }

    /// Lua source.
    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Native routine, if the script ships one.
    pub fn native(&self) -> Option<NativeScript> {
        self.native
    }
}

/// Refill, check and take tokens in one step.
///
/// `KEYS[1]` is the bucket. `ARGV` is `(capacity, refillRate, nowMs,
/// requested)`. Replies `(allowed 0|1, tokensRemaining, retryAfterSeconds)`
/// and refreshes the TTL to `ceil(capacity / refillRate) * 2` seconds.
pub static TOKEN_BUCKET_SCRIPT: AtomicScript =
    AtomicScript::with_native("token_bucket", TOKEN_BUCKET_LUA, token_bucket_native);

/// Replace a record only if it still holds the expected bytes.
///
/// `KEYS[1]` is the record. `ARGV` is `(present 0|1, expected, new, ttlMs)`
/// where `present = 0` means the key must not exist. Replies `("1")` when the
/// write happened and `("0")` on conflict.
pub static COMPARE_AND_SET_SCRIPT: AtomicScript =
    AtomicScript::with_native("compare_and_set", COMPARE_AND_SET_LUA, compare_and_set_native);

const TOKEN_BUCKET_LUA: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])

local tokens = capacity
local last_refill = now
local raw = redis.call('GET', key)
if raw then
    local ok, record = pcall(cjson.decode, raw)
    if not ok or type(record) ~= 'table'
        or type(record.tokens) ~= 'number'
        or type(record.lastRefill) ~= 'number' then
        return redis.error_reply('CORRUPT token bucket record at ' .. key)
    end
    tokens = record.tokens
    last_refill = record.lastRefill
end

local elapsed = math.max(0, now - last_refill) / 1000
tokens = math.min(capacity, tokens + elapsed * refill_rate)

local allowed = 0
local retry_after = 0
if tokens >= requested then
    tokens = tokens - requested
    allowed = 1
else
    retry_after = (requested - tokens) / refill_rate
end

local record = cjson.encode({tokens = tokens, lastRefill = math.max(now, last_refill)})
local ttl_ms = math.min(math.max(1, math.ceil(capacity / refill_rate)) * 2000, 3153600000000)
redis.call('SET', key, record, 'PX', ttl_ms)

return {tostring(allowed), tostring(tokens), tostring(retry_after)}
"#;

const COMPARE_AND_SET_LUA: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current ~= ARGV[2] then
        return {'0'}
    end
elseif current then
    return {'0'}
end
redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
return {'1'}
"#;

fn arg<'a>(script: &'static str, args: &'a [String], index: usize) -> Result<&'a str> {
    args.get(index).map(String::as_str).ok_or_else(|| {
        StorageError::operation_failed(format!("{script}: missing argument {}", index + 1), false)
            .into()
    })
}

fn number_arg(script: &'static str, args: &[String], index: usize) -> Result<f64> {
    let raw = arg(script, args, index)?;
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| {
            StorageError::operation_failed(
                format!("{script}: argument {} is not a number: {raw:?}", index + 1),
                false,
            )
            .into()
        })
}

fn token_bucket_native(key: &str, current: Option<&str>, args: &[String]) -> Result<ScriptEffect> {
    let id = TOKEN_BUCKET_SCRIPT.id;
    let capacity = number_arg(id, args, 0)?;
    let refill_rate = number_arg(id, args, 1)?;
    let now = number_arg(id, args, 2)?;
    let requested = number_arg(id, args, 3)?;
    if capacity <= 0.0 || refill_rate <= 0.0 || now < 0.0 {
        return Err(StorageError::operation_failed(
            format!("{id}: capacity, refill rate and time must be positive"),
            false,
        )
        .into());
    }

    let state = current
        .map(|raw| decode::<TokenBucketState>(key, raw))
        .transpose()?;
    let (next, take) =
        token_bucket::refill_and_take(state, capacity, refill_rate, now as u64, requested);

    Ok(ScriptEffect {
        write: Some((encode(&next)?, drain_ttl(capacity, refill_rate))),
        reply: vec![
            if take.allowed { "1" } else { "0" }.to_string(),
            take.tokens.to_string(),
            take.retry_after_secs.to_string(),
        ],
    })
}

fn compare_and_set_native(
    _key: &str,
    current: Option<&str>,
    args: &[String],
) -> Result<ScriptEffect> {
    let id = COMPARE_AND_SET_SCRIPT.id;
    let present = arg(id, args, 0)? == "1";
    let expected = arg(id, args, 1)?;
    let new = arg(id, args, 2)?;
    let ttl_ms = number_arg(id, args, 3)?;

    let matches = match current {
        Some(value) => present && value == expected,
        None => !present,
    };
    if !matches {
        return Ok(ScriptEffect {
            write: None,
            reply: vec!["0".to_string()],
        });
    }

    Ok(ScriptEffect {
        write: Some((new.to_string(), Duration::from_millis(ttl_ms.max(1.0) as u64))),
        reply: vec!["1".to_string()],
    })
}

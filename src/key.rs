//! Store key layout.
//!
//! Every record lives under `{namespace}:{algorithm}:{key}`. Callers usually
//! pass a tenant/user pair, which makes the full key
//! `{namespace}:{algorithm}:{tenantId}:{userId}`. The layout is stable so
//! shared-store state survives process restarts.
//!
//! ```
//! use keygate::key::{KeySpace, SubjectKey, TOKEN_BUCKET};
//!
//! let space = KeySpace::new("rate_limit", TOKEN_BUCKET).unwrap();
//! let subject = SubjectKey::new("acme", "u-42").unwrap();
//! assert_eq!(space.storage_key(&subject.to_string()), "rate_limit:token_bucket:acme:u-42");
//! ```

use std::fmt;

use crate::error::{ConfigError, RateLimitError, Result};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "rate_limit";

/// Algorithm segment for [`TokenBucket`](crate::TokenBucket).
pub const TOKEN_BUCKET: &str = "token_bucket";
/// Algorithm segment for [`LeakyBucket`](crate::LeakyBucket).
pub const LEAKY_BUCKET: &str = "leaky_bucket";
/// Algorithm segment for [`FixedWindowCounter`](crate::FixedWindowCounter).
pub const FIXED_WINDOW: &str = "fixed_window";
/// Algorithm segment for [`SlidingWindowCounter`](crate::SlidingWindowCounter).
pub const SLIDING_WINDOW: &str = "sliding_window";
/// Algorithm segment for [`SlidingWindowLog`](crate::SlidingWindowLog).
pub const SLIDING_LOG: &str = "sliding_log";

const SEPARATOR: char = ':';

/// The `{namespace}:{algorithm}` prefix owned by one limiter instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
    algorithm: &'static str,
}

impl KeySpace {
    /// Create a key space, rejecting an empty namespace.
    pub fn new(namespace: impl Into<String>, algorithm: &'static str) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.is_empty() {
            return Err(ConfigError::EmptyNamespace.into());
        }
        Ok(Self {
            namespace,
            algorithm,
        })
    }

    /// Key space under [`DEFAULT_NAMESPACE`].
    pub fn with_default_namespace(algorithm: &'static str) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            algorithm,
        }
    }

    /// The namespace segment.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The algorithm segment.
    pub fn algorithm(&self) -> &'static str {
        self.algorithm
    }

    /// Full store key for a caller key.
    pub fn storage_key(&self, key: &str) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.namespace, self.algorithm, key
        )
    }

    /// Validate a caller key and expand it to a store key.
    pub(crate) fn resolve(&self, key: &str) -> Result<String> {
        if key.is_empty() {
            return Err(RateLimitError::InvalidKey("key must not be empty".into()));
        }
        Ok(self.storage_key(key))
    }
}

/// A tenant/user pair rendered as `{tenantId}:{userId}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectKey<'a> {
    tenant: &'a str,
    user: &'a str,
}

impl<'a> SubjectKey<'a> {
    /// Create a subject key. Neither part may be empty, and the tenant may not
    /// contain the separator, otherwise two subjects could share a record.
    pub fn new(tenant: &'a str, user: &'a str) -> Result<Self> {
        if tenant.is_empty() {
            return Err(RateLimitError::InvalidKey("tenant id is empty".into()));
        }
        if user.is_empty() {
            return Err(RateLimitError::InvalidKey("user id is empty".into()));
        }
        if tenant.contains(SEPARATOR) {
            return Err(RateLimitError::InvalidKey(format!(
                "tenant id {tenant:?} contains '{SEPARATOR}'"
            )));
        }
        Ok(Self { tenant, user })
    }

    /// Tenant identifier.
    pub fn tenant(&self) -> &'a str {
        self.tenant
    }

    /// User identifier.
    pub fn user(&self) -> &'a str {
        self.user
    }
}

impl fmt::Display for SubjectKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.tenant, self.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_layout() {
        let space = KeySpace::new("api", SLIDING_WINDOW).unwrap();
        assert_eq!(space.storage_key("t1:u1"), "api:sliding_window:t1:u1");
        assert_eq!(space.namespace(), "api");
        assert_eq!(space.algorithm(), SLIDING_WINDOW);
    }

    #[test]
    fn test_default_namespace() {
        let space = KeySpace::with_default_namespace(LEAKY_BUCKET);
        assert_eq!(space.storage_key("k"), "rate_limit:leaky_bucket:k");
    }

    #[test]
    fn test_empty_namespace_rejected() {
        let err = KeySpace::new("", FIXED_WINDOW).unwrap_err();
        assert!(matches!(
            err,
            RateLimitError::Config(ConfigError::EmptyNamespace)
        ));
    }

    #[test]
    fn test_resolve_rejects_empty_key() {
        let space = KeySpace::with_default_namespace(TOKEN_BUCKET);
        assert!(matches!(space.resolve(""), Err(RateLimitError::InvalidKey(_))));
        assert_eq!(space.resolve("x").unwrap(), "rate_limit:token_bucket:x");
    }

    #[test]
    fn test_subject_key() {
        let subject = SubjectKey::new("acme", "user:7").unwrap();
        assert_eq!(subject.to_string(), "acme:user:7");
        assert_eq!(subject.tenant(), "acme");
        assert_eq!(subject.user(), "user:7");

        assert!(SubjectKey::new("", "u").is_err());
        assert!(SubjectKey::new("t", "").is_err());
        assert!(SubjectKey::new("a:b", "u").is_err());
    }
}

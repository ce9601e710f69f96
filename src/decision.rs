//! Decision types for rate limiting results.
//!
//! Every successful call to a limiter produces a `Decision`. A denial is a
//! regular value here, not an error.

use std::time::Duration;

/// The result of a rate limit check.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Whether the request is allowed.
    allowed: bool,
    /// Rate limit information.
    info: RateLimitInfo,
}

impl Decision {
    /// Create a new "allowed" decision.
    pub fn allowed(info: RateLimitInfo) -> Self {
        Self {
            allowed: true,
            info,
        }
    }

    /// Create a new "denied" decision.
    pub fn denied(info: RateLimitInfo) -> Self {
        Self {
            allowed: false,
            info,
        }
    }

    /// Check if the request is allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Check if the request is denied.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Get the rate limit info.
    pub fn info(&self) -> &RateLimitInfo {
        &self.info
    }

    /// Consume the decision and return the info.
    pub fn into_info(self) -> RateLimitInfo {
        self.info
    }
}

/// Budget state observed while making a decision.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitInfo {
    /// Configured budget (max tokens, max level or window capacity).
    pub limit: u64,
    /// Whole units of budget left after this decision.
    pub remaining: u64,
    /// How long to wait before a retry could succeed (only set when denied).
    pub retry_after: Option<Duration>,
    /// Name of the algorithm that made this decision.
    pub algorithm: &'static str,
}

impl RateLimitInfo {
    /// Create a new rate limit info.
    pub fn new(algorithm: &'static str, limit: u64, remaining: u64) -> Self {
        Self {
            limit,
            remaining,
            retry_after: None,
            algorithm,
        }
    }

    /// Set the retry-after duration.
    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }
}

/// Convert fractional seconds into a duration, clamping junk to zero and
/// saturating waits too long to represent.
pub(crate) fn secs_to_duration(secs: f64) -> Duration {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

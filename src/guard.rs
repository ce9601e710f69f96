//! Deadlines, cancellation and fault policy around a limiter call.
//!
//! A limiter never decides for itself what a store fault means for the
//! request. [`FailurePolicy`] is the caller's choice, applied by
//! [`RateLimiterExt::admit`]. A cancelled or timed-out call is a fault like
//! any other: it is never reported as an allow or a deny.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::algorithm::RateLimiter;
use crate::decision::Decision;
use crate::error::{RateLimitError, Result};

/// What to do with a request when the limiter faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Deny the request.
    #[default]
    Closed,
    /// Let the request through.
    Open,
}

impl FailurePolicy {
    /// Whether a faulted request proceeds.
    pub fn admits_on_fault(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Call-scoped controls for every [`RateLimiter`].
pub trait RateLimiterExt: RateLimiter {
    /// [`check_and_record`](RateLimiter::check_and_record) bounded by
    /// `deadline`. Running out of time yields [`RateLimitError::Timeout`].
    fn check_within(
        &self,
        key: &str,
        deadline: Duration,
    ) -> impl Future<Output = Result<Decision>> + Send {
        async move {
            tokio::time::timeout(deadline, self.check_and_record(key))
                .await
                .map_err(|_| RateLimitError::Timeout(deadline))?
        }
    }

    /// [`allow`](RateLimiter::allow) bounded by `deadline`.
    fn allow_within(
        &self,
        key: &str,
        deadline: Duration,
    ) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.check_within(key, deadline).await?.is_allowed()) }
    }

    /// [`check_and_record`](RateLimiter::check_and_record) abandoned as soon
    /// as `token` is cancelled, yielding [`RateLimitError::Cancelled`].
    fn check_or_cancel(
        &self,
        key: &str,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<Decision>> + Send {
        async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(RateLimitError::Cancelled),
                result = self.check_and_record(key) => result,
            }
        }
    }

    /// [`allow`](RateLimiter::allow) abandoned as soon as `token` is cancelled.
    fn allow_or_cancel(
        &self,
        key: &str,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.check_or_cancel(key, token).await?.is_allowed()) }
    }

    /// Collapse the outcome into admit or reject, resolving faults with
    /// `policy`. Faults are logged before the policy applies.
    fn admit(&self, key: &str, policy: FailurePolicy) -> impl Future<Output = bool> + Send {
        async move {
            match self.allow(key).await {
                Ok(allowed) => allowed,
                Err(e) => {
                    warn!(
                        key,
                        algorithm = self.name(),
                        error = %e,
                        policy = ?policy,
                        "rate limiter fault"
                    );
                    policy.admits_on_fault()
                }
            }
        }
    }
}

impl<L: RateLimiter> RateLimiterExt for L {}

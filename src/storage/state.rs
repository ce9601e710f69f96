//! Per-key state records, one type per algorithm.
//!
//! Field names are part of the persisted format: records already written to a
//! shared store must keep decoding after an upgrade, so renames go through
//! `#[serde(rename)]`, never through the Rust field name.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

/// A value record that an algorithm keeps per key.
pub trait AlgorithmState:
    Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{
    /// Algorithm segment this record belongs to.
    const ALGORITHM: &'static str;
}

/// Token bucket: tokens left and when they were last topped up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketState {
    /// Available tokens, `0 <= tokens <= max_tokens`.
    pub tokens: f64,
    /// Last refill, Unix milliseconds.
    #[serde(rename = "lastRefill")]
    pub last_refill: u64,
}

impl AlgorithmState for TokenBucketState {
    const ALGORITHM: &'static str = crate::key::TOKEN_BUCKET;
}

/// Leaky bucket: current occupancy and when it last drained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakyBucketState {
    /// Occupancy, never negative. The admission that reaches the maximum may
    /// overshoot it by less than one unit.
    pub level: f64,
    /// Last leak, Unix milliseconds.
    #[serde(rename = "lastLeak")]
    pub last_leak: u64,
}

impl AlgorithmState for LeakyBucketState {
    const ALGORITHM: &'static str = crate::key::LEAKY_BUCKET;
}

/// Fixed window: which epoch we are in and how much of it is left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowState {
    /// `floor(now / window)` of the epoch this record counts.
    #[serde(rename = "windowIndex")]
    pub window_index: u64,
    /// Requests still admissible in that epoch.
    pub remaining: u64,
}

impl AlgorithmState for FixedWindowState {
    const ALGORITHM: &'static str = crate::key::FIXED_WINDOW;
}

/// Sliding window counter: the current and previous window counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowCounterState {
    /// Requests admitted in the window starting at `window_start`.
    #[serde(rename = "currentCount")]
    pub current_count: u64,
    /// Requests admitted in the window before it.
    #[serde(rename = "previousCount")]
    pub previous_count: u64,
    /// Window boundary, Unix milliseconds, a multiple of the window length.
    #[serde(rename = "windowStart")]
    pub window_start: u64,
}

impl AlgorithmState for SlidingWindowCounterState {
    const ALGORITHM: &'static str = crate::key::SLIDING_WINDOW;
}

/// Sliding window log: timestamps of admitted requests, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowLogState {
    /// Unix milliseconds, ascending.
    pub entries: VecDeque<u64>,
}

impl AlgorithmState for SlidingWindowLogState {
    const ALGORITHM: &'static str = crate::key::SLIDING_LOG;
}

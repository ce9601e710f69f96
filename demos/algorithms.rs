//! Algorithm comparison demo.
//!
//! Run with:
//! ```text
//! cargo run --example algorithms
//! ```

use std::sync::Arc;
use std::time::Duration;

use keygate::storage::LocalStore;
use keygate::{
    BucketConfig, FailurePolicy, FixedWindowCounter, LeakyBucket, ManualClock, RateLimiter,
    RateLimiterExt, SlidingWindowCounter, SlidingWindowLog, TokenBucket, WindowConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bucket = BucketConfig::new(3.0, 5.0);
    let window = WindowConfig::new(3, Duration::from_secs(1));

    println!("=== Algorithm Comparison Demo ===\n");
    println!("Capacity: 3, rate: 5/second or one 1s window\n");

    let clock = ManualClock::new(1_700_000_000_000);
    let token_bucket = TokenBucket::in_memory(bucket).with_clock(clock.clone());
    run("Token Bucket", token_bucket, &clock).await?;
    let leaky_bucket = LeakyBucket::in_memory(bucket).with_clock(clock.clone());
    run("Leaky Bucket", leaky_bucket, &clock).await?;
    let fixed_window = FixedWindowCounter::in_memory(window).with_clock(clock.clone());
    run("Fixed Window", fixed_window, &clock).await?;
    let sliding_window = SlidingWindowCounter::in_memory(window).with_clock(clock.clone());
    run("Sliding Window", sliding_window, &clock).await?;
    let sliding_log = SlidingWindowLog::in_memory(window).with_clock(clock.clone());
    run("Sliding Log", sliding_log, &clock).await?;

    println!("\n=== Shared Store ===\n");
    let store = Arc::new(LocalStore::new());
    let gateway_a = TokenBucket::shared(bucket, Arc::clone(&store));
    let gateway_b = TokenBucket::shared(bucket, Arc::clone(&store));
    for (i, gateway) in [&gateway_a, &gateway_b, &gateway_a, &gateway_b].into_iter().enumerate() {
        let admitted = gateway.admit("acme:alice", FailurePolicy::Closed).await;
        let name = if i % 2 == 0 { "A" } else { "B" };
        println!("request {} via gateway {}: {}", i + 1, name, admitted);
    }

    println!("\n=== Algorithm Characteristics ===\n");
    println!("| Algorithm      | Memory   | Burst Handling     |");
    println!("|----------------|----------|--------------------|");
    println!("| Token Bucket   | O(1)     | Up to capacity     |");
    println!("| Leaky Bucket   | O(1)     | Up to max level    |");
    println!("| Fixed Window   | O(1)     | 2x at boundaries   |");
    println!("| Sliding Window | O(1)     | Smoothed           |");
    println!("| Sliding Log    | O(limit) | Exact              |");

    Ok(())
}

/// Eight requests, 100ms apart on a simulated clock.
async fn run<L: RateLimiter>(
    name: &str,
    limiter: L,
    clock: &ManualClock,
) -> Result<(), Box<dyn std::error::Error>> {
    print!("{:15} | ", name);

    let mut results = Vec::new();
    for _ in 0..8 {
        let decision = limiter.check_and_record("acme:alice").await?;
        results.push(if decision.is_allowed() { "✅" } else { "❌" });
        clock.advance(Duration::from_millis(100));
    }

    println!("{}", results.join(" "));
    Ok(())
}

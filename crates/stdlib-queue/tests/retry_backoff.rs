//! Scenario: a job fails with a retriable error three times then succeeds,
//! under an exponential-jitter retry policy. Verifies the computed backoff
//! delays land in the documented tolerance bands without ever sleeping —
//! the policy's `backoff` math is pure, so this drives it directly with a
//! seeded jitter source instead of running a live worker loop.

use std::time::Duration;

use stdlib_queue::{BackoffStrategy, RetryPolicy};
use stdlib_queue_testing::seeded_jitter;

#[test]
fn exponential_jitter_backoff_stays_within_documented_bands() {
    let policy = RetryPolicy {
        strategy: BackoffStrategy::ExponentialJitter,
        base: Duration::from_millis(100),
        cap: Duration::from_secs(60),
        factor: 2.0,
        jitter: 0.2,
        max_attempts: 5,
    };

    let bands = [
        (Duration::from_millis(80), Duration::from_millis(120)),
        (Duration::from_millis(160), Duration::from_millis(240)),
        (Duration::from_millis(320), Duration::from_millis(480)),
    ];

    for (attempt, (low, high)) in (1u32..=3).zip(bands) {
        // Exercise many seeds so the jitter draw's full [1-j, 1+j] range gets
        // covered rather than relying on one lucky sample.
        for seed in 0..64u64 {
            let mut rng = seeded_jitter(seed);
            let delay = policy.backoff(attempt, &mut rng);
            assert!(
                delay >= low && delay <= high,
                "attempt {attempt} seed {seed}: {delay:?} not in [{low:?}, {high:?}]"
            );
        }
    }
}

#[test]
fn fixed_and_linear_ignore_jitter_source() {
    let fixed = RetryPolicy::fixed(Duration::from_millis(50), 3);
    let mut rng = seeded_jitter(1);
    assert_eq!(fixed.backoff(1, &mut rng), Duration::from_millis(50));
    assert_eq!(fixed.backoff(5, &mut rng), Duration::from_millis(50));

    let linear = RetryPolicy {
        strategy: BackoffStrategy::Linear,
        base: Duration::from_millis(50),
        cap: Duration::from_secs(60),
        factor: 1.0,
        jitter: 0.0,
        max_attempts: 5,
    };
    assert_eq!(linear.backoff(3, &mut rng), Duration::from_millis(150));
}

#[test]
fn exponential_clamps_to_cap() {
    let policy = RetryPolicy::exponential(Duration::from_millis(100), 2.0, Duration::from_millis(300), 10);
    let mut rng = seeded_jitter(7);
    assert_eq!(policy.backoff(1, &mut rng), Duration::from_millis(100));
    assert_eq!(policy.backoff(2, &mut rng), Duration::from_millis(200));
    assert_eq!(policy.backoff(3, &mut rng), Duration::from_millis(300)); // would be 400, clamped
    assert_eq!(policy.backoff(10, &mut rng), Duration::from_millis(300));
}

#[test]
fn should_retry_respects_invalid_input_and_attempt_cap() {
    let policy = RetryPolicy::fixed(Duration::from_millis(10), 3);
    assert!(policy.should_retry(stdlib_queue::ErrorCategory::Transient, true, 1));
    assert!(!policy.should_retry(stdlib_queue::ErrorCategory::Transient, true, 3));
    assert!(!policy.should_retry(stdlib_queue::ErrorCategory::InvalidInput, true, 1));
}

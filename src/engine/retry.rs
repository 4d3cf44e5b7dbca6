//! Retry backoff computation
//!
//! Backoff is a sleep between attempts on the dispatching task. The caller
//! releases its resource slot before sleeping and reacquires it afterwards,
//! and races the sleep against cancellation so retries stay cancellable.

use std::time::Duration;

use rand::Rng;

use crate::error::EngineError;
use crate::graph::{BackoffStrategy, RetryPolicy};

/// Delay before retry attempt number `attempt` (1-based: the delay slept
/// after the first failure is `attempt == 1`).
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let base_ms = match policy.backoff_strategy {
        BackoffStrategy::Fixed => policy.initial_delay_ms,
        BackoffStrategy::Linear => policy.initial_delay_ms.saturating_mul(attempt as u64),
        BackoffStrategy::Exponential => {
            let shift = (attempt - 1).min(32);
            policy
                .initial_delay_ms
                .saturating_mul(1u64 << shift)
        }
    };
    let capped_ms = base_ms.min(policy.max_delay_ms.max(policy.initial_delay_ms));

    let final_ms = if policy.jitter && capped_ms > 0 {
        let jitter = rand::thread_rng().gen_range(0..=capped_ms / 10);
        capped_ms + jitter
    } else {
        capped_ms
    };
    Duration::from_millis(final_ms)
}

/// Whether `error` qualifies for a retry under `policy`. The error must be
/// retryable, and when the policy names specific codes, its code must be
/// among them.
pub fn is_retryable(policy: &RetryPolicy, error: &EngineError) -> bool {
    if !error.retryable {
        return false;
    }
    if policy.retryable_errors.is_empty() {
        return true;
    }
    policy
        .retryable_errors
        .iter()
        .any(|code| code == error.code())
}

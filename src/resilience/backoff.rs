//! Backoff schedules.
//!
//! - [`calculate_backoff`]: exponential with jitter, used between boot rounds.
//! - [`linear_backoff`]: `step × attempt`, capped, used between download attempts.

use rand::Rng;
use std::time::Duration;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Delay after the `attempt`-th failure (1-based): `step × min(attempt, cap_steps)`.
///
/// Non-decreasing in `attempt`.
pub fn linear_backoff(attempt: u32, step: Duration, cap_steps: u32) -> Duration {
    step.saturating_mul(attempt.min(cap_steps.max(1)))
}

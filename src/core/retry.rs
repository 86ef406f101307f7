//! Shared exponential backoff.

use std::time::Duration;

use rand::Rng;

/// Capped exponential backoff: `base * 2^(attempt - 1)`, clamped to `cap`.
///
/// `attempt` is 1-based; attempt 0 is treated as 1.
pub fn exponential_backoff(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay = base.saturating_mul(1u32 << exp);
    delay.min(cap)
}

/// Backoff with up to ±20% uniform jitter to avoid reconnect stampedes.
pub fn exponential_backoff_jittered(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let delay = exponential_backoff(base, cap, attempt);
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    delay.mul_f64(jitter)
}

//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::resilience::policy::RetryPolicy;

/// Calculate the delay before retry number `attempt` (1-indexed), using the
/// thread-local RNG for jitter.
pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    calculate_backoff_with(attempt, policy, &mut rand::thread_rng())
}

/// Same as [`calculate_backoff`] with an explicit random source.
pub fn calculate_backoff_with<R>(attempt: u32, policy: &RetryPolicy, rng: &mut R) -> Duration
where
    R: Rng + ?Sized,
{
    let bounded = bounded_delay(attempt, policy);
    if !policy.jitter || bounded.is_zero() {
        return bounded;
    }

    // Uniform over [0.75, 1.25] of the bounded delay.
    let base = bounded.as_nanos() as f64;
    let factor: f64 = rng.gen_range(0.75..=1.25);
    Duration::from_nanos((base * factor).round().max(0.0) as u64)
}

/// Unjittered delay: `initial * multiplier^(attempt - 1)`, capped at `max_delay`.
pub fn bounded_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let multiplier = policy.backoff_multiplier.max(1.0);
    let raw = policy.initial_delay.as_nanos() as f64 * multiplier.powi(exponent);
    let max_ns = policy.max_delay.as_nanos() as f64;

    // powi overflows to inf for large attempts; min() folds that into the cap.
    // The cast saturates for caps beyond u64 nanoseconds.
    Duration::from_nanos(raw.min(max_ns) as u64)
}

/// The unjittered delays between each of the policy's attempts.
pub fn schedule(policy: &RetryPolicy) -> Vec<Duration> {
    (1..policy.max_attempts)
        .map(|attempt| bounded_delay(attempt, policy))
        .collect()
}

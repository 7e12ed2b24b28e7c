//! Retry logic.
//!
//! # Responsibilities
//! - Invoke a fallible operation up to `max_attempts` times
//! - Classify each failure as retryable or terminal
//! - Sleep a jittered exponential backoff between attempts
//! - Enforce the per-attempt timeout
//!
//! # Design Decisions
//! - Attempts are strictly sequential: attempt k+1 starts only after attempt
//!   k has settled and its delay has elapsed
//! - A server-supplied retry-after replaces the computed backoff, capped at
//!   `max_delay` so a misbehaving server cannot park the caller indefinitely
//! - Circuit-open rejections are terminal here; the breaker's cool-down is
//!   the caller's business
//! - The RNG lock is never held across a suspension point

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff_with;
use crate::resilience::error::{OperationError, ResilienceError};
use crate::resilience::policy::RetryPolicy;
use crate::resilience::timeouts::run_attempt;

/// Executes operations under a [`RetryPolicy`].
pub struct RetryExecutor {
    policy: RetryPolicy,
    rng: Mutex<StdRng>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    /// Use a specific random source for jitter, e.g. a seeded one in tests.
    pub fn with_rng(policy: RetryPolicy, rng: StdRng) -> Self {
        Self {
            policy,
            rng: Mutex::new(rng),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` under this executor's policy.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        self.execute_with(&self.policy, op).await
    }

    /// Run `op` under an explicit policy, sharing this executor's RNG.
    pub async fn execute_with<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        mut op: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            tracing::debug!(attempt, max_attempts, "Executing attempt");

            let err = match run_attempt(policy.per_attempt_timeout, op()).await {
                Ok(value) => {
                    metrics::record_attempt(true);
                    if attempt > 1 {
                        tracing::info!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };
            metrics::record_attempt(false);

            if !policy.classify(&err, attempt) {
                tracing::debug!(attempt, kind = %err.kind(), error = %err, "Non-retryable failure");
                return Err(ResilienceError::NonRetryable {
                    attempts: attempt,
                    source: err,
                });
            }

            if attempt >= max_attempts {
                tracing::warn!(attempts = attempt, error = %err, "Retries exhausted");
                return Err(ResilienceError::Exhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = self.next_delay(policy, attempt, &err);
            policy.notify_retry(&err, attempt, delay);
            metrics::record_retry();
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                kind = %err.kind(),
                error = %err,
                "Attempt failed, retrying"
            );

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    fn next_delay(&self, policy: &RetryPolicy, attempt: u32, err: &OperationError) -> Duration {
        if policy.honor_retry_after {
            if let Some(retry_after) = err.retry_after() {
                if retry_after > policy.max_delay {
                    tracing::warn!(
                        retry_after_ms = retry_after.as_millis() as u64,
                        max_delay_ms = policy.max_delay.as_millis() as u64,
                        "Server retry-after exceeds max delay, clamping"
                    );
                }
                return retry_after.min(policy.max_delay);
            }
        }

        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        calculate_backoff_with(attempt, policy, &mut *rng)
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// Run `op` under `policy` with a throwaway executor.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, ResilienceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OperationError>>,
{
    RetryExecutor::new(policy.clone()).execute(op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_delays(Duration::from_millis(100), Duration::from_secs(5))
            .with_jitter(false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(fast_policy(3));
        let result: Result<(), _> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OperationError::network("connection refused")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err();
        assert!(matches!(err, ResilienceError::Exhausted { attempts: 3, .. }));
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.to_string().contains("3 attempt(s)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_attempted_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast_policy(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(OperationError::business("insufficient balance")) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err(),
            ResilienceError::NonRetryable { attempts: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy_never_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast_policy(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(OperationError::timeout("slow")) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_between_attempts() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let policy = fast_policy(4).with_on_retry(move |_, attempt, delay| {
            recorder.lock().unwrap().push((attempt, delay));
        });

        let start = Instant::now();
        let calls = AtomicU32::new(0);
        let value = retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(OperationError::network("reset"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (1, Duration::from_millis(100)),
                (2, Duration::from_millis(200)),
                (3, Duration::from_millis(400)),
            ]
        );
        assert!(start.elapsed() >= Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_preferred_and_capped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let policy = fast_policy(3).with_on_retry(move |_, _, delay| {
            recorder.lock().unwrap().push(delay);
        });

        let calls = AtomicU32::new(0);
        let _: Result<(), _> = retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let hint = if n == 0 {
                    Duration::from_millis(1500)
                } else {
                    Duration::from_secs(3600)
                };
                Err(OperationError::rate_limited("429", Some(hint)))
            }
        })
        .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Duration::from_millis(1500), Duration::from_secs(5)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_ignored_when_disabled() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let policy = fast_policy(2)
            .with_honor_retry_after(false)
            .with_on_retry(move |_, _, delay| recorder.lock().unwrap().push(delay));

        let _: Result<(), _> = retry(&policy, || async {
            Err(OperationError::rate_limited("429", Some(Duration::from_secs(2))))
        })
        .await;
        assert_eq!(*seen.lock().unwrap(), vec![Duration::from_millis(100)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_attempt_timeout_is_retried() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(3).with_per_attempt_timeout(Duration::from_millis(50));
        let value = retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_retries() {
        let policy = RetryPolicy::default()
            .with_max_attempts(5)
            .with_delays(Duration::ZERO, Duration::ZERO)
            .with_jitter(false);
        let start = Instant::now();
        let result: Result<(), _> =
            retry(&policy, || async { Err(OperationError::network("down")) }).await;
        assert_eq!(result.unwrap_err().attempts(), 5);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_open_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast_policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(OperationError::circuit_open("rpc", Duration::from_secs(30))) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::CircuitOpen);
    }
}

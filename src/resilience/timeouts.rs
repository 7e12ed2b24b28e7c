//! Timeout enforcement.
//!
//! # Responsibilities
//! - Race a single attempt against its per-attempt deadline
//! - Turn an elapsed deadline into a retryable timeout failure
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - A timed-out attempt is abandoned, not killed: the future is dropped at
//!   its last suspension point, but work it already handed off (a request
//!   written to a socket, a spawned task) keeps running and its outcome is
//!   discarded. Operations with side effects must be idempotent.
//! - Timeout errors carry the `ATTEMPT_TIMEOUT` code so they are distinct
//!   from timeouts reported by the remote

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::resilience::error::OperationError;

pub const ATTEMPT_TIMEOUT_CODE: &str = "ATTEMPT_TIMEOUT";

/// Run one attempt, bounded by `deadline` when set.
pub async fn run_attempt<T, Fut>(deadline: Option<Duration>, fut: Fut) -> Result<T, OperationError>
where
    Fut: Future<Output = Result<T, OperationError>>,
{
    let Some(deadline) = deadline else {
        return fut.await;
    };

    match timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(OperationError::timeout(format!(
            "attempt exceeded {}ms",
            deadline.as_millis()
        ))
        .with_code(ATTEMPT_TIMEOUT_CODE)),
    }
}

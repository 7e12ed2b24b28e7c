//! Circuit breaker for endpoint protection.
//!
//! # States
//! - Closed: normal operation, calls pass through, failures counted
//! - Open: resource assumed down, calls rejected locally
//! - Half-Open: a single probe call tests whether the resource recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures reaches failure_threshold
//! Open → Half-Open: reset_timeout elapsed since the opening failure
//!                   (evaluated lazily in is_allowed)
//! Half-Open → Closed: consecutive_successes reaches success_threshold
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - One breaker per resource, never shared state between resources
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open (prevents hammering a recovering resource);
//!   an unresolved probe lease lapses after reset_timeout
//! - A success while Closed clears the failure streak immediately
//! - State lives behind a synchronous mutex: check-then-mutate never spans
//!   an await point

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::schema::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::error::{OperationError, ResilienceError};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub remaining_cooldown_ms: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    probe_issued_at: Option<Instant>,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
            probe_issued_at: None,
        }
    }
}

/// Circuit breaker guarding one resource.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored state. Does not apply the lazy Open → Half-Open transition.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Whether a call may be attempted now.
    ///
    /// Mutates state only when an elapsed cool-down moves Open to Half-Open
    /// or when a half-open probe is handed out.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.lock();
        let now = Instant::now();
        let reset_timeout = self.config.reset_timeout();

        let state = inner.state;
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or(reset_timeout);
                if elapsed >= reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.probe_issued_at = Some(now);
                    drop(inner);
                    tracing::info!(breaker = %self.name, "Circuit half-open, allowing probe");
                    metrics::record_circuit_transition(&self.name, CircuitState::HalfOpen);
                    true
                } else {
                    drop(inner);
                    metrics::record_circuit_rejection(&self.name);
                    false
                }
            }
            CircuitState::HalfOpen => {
                let probe_in_flight = inner
                    .probe_issued_at
                    .is_some_and(|t| now.saturating_duration_since(t) < reset_timeout);
                if probe_in_flight {
                    drop(inner);
                    metrics::record_circuit_rejection(&self.name);
                    false
                } else {
                    inner.probe_issued_at = Some(now);
                    true
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                inner.probe_issued_at = None;
                if inner.consecutive_successes >= self.config.success_threshold {
                    *inner = BreakerInner::closed();
                    drop(inner);
                    tracing::info!(breaker = %self.name, "Circuit closed, resource recovered");
                    metrics::record_circuit_transition(&self.name, CircuitState::Closed);
                } else {
                    tracing::debug!(
                        breaker = %self.name,
                        successes = inner.consecutive_successes,
                        required = self.config.success_threshold,
                        "Half-open probe succeeded"
                    );
                }
            }
            // A straggler from before the circuit opened; the cool-down decides.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        let state = inner.state;
        match state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_failure = Some(now);
                    let failures = inner.consecutive_failures;
                    drop(inner);
                    tracing::warn!(
                        breaker = %self.name,
                        failures,
                        reset_timeout_ms = self.config.reset_timeout_ms,
                        "Circuit opened"
                    );
                    metrics::record_circuit_transition(&self.name, CircuitState::Open);
                } else {
                    inner.last_failure = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.consecutive_failures += 1;
                inner.consecutive_successes = 0;
                inner.last_failure = Some(now);
                inner.probe_issued_at = None;
                drop(inner);
                tracing::warn!(breaker = %self.name, "Half-open probe failed, circuit reopened");
                metrics::record_circuit_transition(&self.name, CircuitState::Open);
            }
            CircuitState::Open => {
                inner.consecutive_failures += 1;
            }
        }
    }

    /// Time until the breaker will let a call through, zero if it would now.
    pub fn remaining_cooldown(&self) -> Duration {
        let inner = self.lock();
        let now = Instant::now();
        let reset_timeout = self.config.reset_timeout();
        let since = match inner.state {
            CircuitState::Closed => return Duration::ZERO,
            CircuitState::Open => inner.last_failure,
            CircuitState::HalfOpen => inner.probe_issued_at,
        };
        since
            .map(|t| reset_timeout.saturating_sub(now.saturating_duration_since(t)))
            .unwrap_or(Duration::ZERO)
    }

    /// Run `op` through the breaker, recording its outcome.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        if !self.is_allowed() {
            return Err(ResilienceError::CircuitOpen {
                resource: self.name.clone(),
                remaining: self.remaining_cooldown(),
            });
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(ResilienceError::Failed(err))
            }
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let remaining = self.remaining_cooldown();
        let inner = self.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            remaining_cooldown_ms: remaining.as_millis() as u64,
        }
    }

    /// Return to Closed with cleared counters.
    pub fn reset(&self) {
        let previous = {
            let mut inner = self.lock();
            std::mem::replace(&mut *inner, BreakerInner::closed()).state
        };
        if previous != CircuitState::Closed {
            tracing::info!(breaker = %self.name, "Circuit manually reset");
            metrics::record_circuit_transition(&self.name, CircuitState::Closed);
        }
    }

    /// Open the circuit now, starting a full cool-down.
    pub fn force_open(&self) {
        {
            let mut inner = self.lock();
            inner.state = CircuitState::Open;
            inner.consecutive_failures = inner
                .consecutive_failures
                .max(self.config.failure_threshold);
            inner.consecutive_successes = 0;
            inner.last_failure = Some(Instant::now());
            inner.probe_issued_at = None;
        }
        tracing::warn!(breaker = %self.name, "Circuit forced open");
        metrics::record_circuit_transition(&self.name, CircuitState::Open);
    }
}

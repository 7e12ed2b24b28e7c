//! Error taxonomy for the resilience layer.
//!
//! Callers hand the layer operations that fail with [`OperationError`], a
//! closed set of categories with a retryable flag fixed at construction.
//! The layer answers with [`ResilienceError`], which keeps the last
//! underlying cause and tells "rejected without attempting" apart from
//! "attempted and failed".

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed cause attached to an [`OperationError`] for diagnostics.
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure category of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused, DNS failure, reset socket.
    Network,
    /// The attempt (or the remote) timed out.
    Timeout,
    /// The remote asked us to slow down.
    RateLimited,
    /// Local rejection by an open circuit breaker.
    CircuitOpen,
    /// Malformed input; retrying sends the same bad request.
    Validation,
    /// Missing or rejected credentials.
    Authorization,
    /// Domain rule failure such as a reverted call.
    Business,
    /// Anything the caller could not classify.
    Unknown,
}

impl ErrorKind {
    /// Whether failures of this kind are retried when no classifier says
    /// otherwise.
    pub fn is_retryable_by_default(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimited
        )
    }

    /// Stable lowercase name, also used for tag matching.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Validation => "validation",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Business => "business",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed attempt of a caller-supplied operation.
#[derive(Debug, Error)]
#[error("{kind} error: {message}")]
pub struct OperationError {
    kind: ErrorKind,
    message: String,
    code: Option<String>,
    retryable: bool,
    retry_after: Option<Duration>,
    #[source]
    source: Option<BoxedCause>,
}

impl OperationError {
    /// Create an error of the given kind. The retryable flag follows the kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            retryable: kind.is_retryable_by_default(),
            retry_after: None,
            source: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Rate-limit failure, optionally carrying the server's retry-after hint.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(ErrorKind::RateLimited, message)
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    pub fn business(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Business, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Local rejection by an open breaker. Never retryable.
    pub fn circuit_open(resource: &str, remaining: Duration) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!(
                "circuit for '{}' is open, retry in ~{}ms",
                resource,
                remaining.as_millis()
            ),
        )
        .with_retry_after(remaining)
    }

    /// Attach a short machine-readable name (e.g. `ECONNREFUSED`, `HTTP_503`).
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Override the retryable flag derived from the kind.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable && self.kind != ErrorKind::CircuitOpen;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Server-specified delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

impl From<std::io::Error> for OperationError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;

        let kind = match err.kind() {
            Io::TimedOut | Io::WouldBlock => ErrorKind::Timeout,
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::AddrNotAvailable
            | Io::BrokenPipe
            | Io::UnexpectedEof
            | Io::Interrupted => ErrorKind::Network,
            Io::PermissionDenied => ErrorKind::Authorization,
            Io::InvalidInput | Io::InvalidData => ErrorKind::Validation,
            _ => ErrorKind::Unknown,
        };
        let code = format!("{:?}", err.kind());
        Self::new(kind, err.to_string())
            .with_code(code)
            .with_source(err)
    }
}

/// Outcome of one endpoint inside a fallback chain that did not produce a
/// result.
#[derive(Debug)]
pub struct EndpointFailure {
    pub endpoint: String,
    pub error: ResilienceError,
}

impl fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.endpoint, self.error)
    }
}

/// Errors surfaced by the resilience layer.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// The last permitted attempt failed with a retryable error.
    #[error("operation failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: OperationError,
    },

    /// An attempt failed with an error classified as terminal.
    #[error("operation failed with non-retryable error on attempt {attempts}: {source}")]
    NonRetryable {
        attempts: u32,
        #[source]
        source: OperationError,
    },

    /// A single guarded attempt failed.
    #[error("operation failed: {0}")]
    Failed(#[source] OperationError),

    /// Rejected locally without invoking the operation.
    #[error("circuit for '{resource}' is open, retry in ~{}ms", .remaining.as_millis())]
    CircuitOpen { resource: String, remaining: Duration },

    /// Rejected by the rate limiter.
    #[error("rate limit exceeded for '{key}', retry after {}ms", .retry_after.as_millis())]
    RateLimited { key: String, retry_after: Duration },

    /// Every endpoint in a fallback chain was skipped or exhausted.
    #[error("all {} endpoint(s) failed: {}", .failures.len(), summarize(.failures))]
    AllEndpointsFailed { failures: Vec<EndpointFailure> },

    #[error("no endpoints configured")]
    NoEndpoints,
}

fn summarize(failures: &[EndpointFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ResilienceError {
    /// Number of times the underlying operation was actually invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            ResilienceError::Exhausted { attempts, .. }
            | ResilienceError::NonRetryable { attempts, .. } => *attempts,
            ResilienceError::Failed(_) => 1,
            ResilienceError::AllEndpointsFailed { failures } => {
                failures.iter().map(|f| f.error.attempts()).sum()
            }
            ResilienceError::CircuitOpen { .. }
            | ResilienceError::RateLimited { .. }
            | ResilienceError::NoEndpoints => 0,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ResilienceError::Exhausted { source, .. }
            | ResilienceError::NonRetryable { source, .. }
            | ResilienceError::Failed(source) => source.kind(),
            ResilienceError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ResilienceError::RateLimited { .. } => ErrorKind::RateLimited,
            ResilienceError::AllEndpointsFailed { failures } => failures
                .last()
                .map(|f| f.error.kind())
                .unwrap_or(ErrorKind::Unknown),
            ResilienceError::NoEndpoints => ErrorKind::Validation,
        }
    }

    /// Whether the caller may reasonably try again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResilienceError::Exhausted { source, .. } | ResilienceError::Failed(source) => {
                source.is_retryable()
            }
            ResilienceError::NonRetryable { .. } | ResilienceError::NoEndpoints => false,
            ResilienceError::CircuitOpen { .. }
            | ResilienceError::RateLimited { .. }
            | ResilienceError::AllEndpointsFailed { .. } => true,
        }
    }

    /// How long the caller should wait before trying again, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ResilienceError::RateLimited { retry_after, .. } => Some(*retry_after),
            ResilienceError::CircuitOpen { remaining, .. } => Some(*remaining),
            ResilienceError::Exhausted { source, .. } | ResilienceError::Failed(source) => {
                source.retry_after()
            }
            ResilienceError::AllEndpointsFailed { failures } => {
                failures.iter().filter_map(|f| f.error.retry_after()).min()
            }
            ResilienceError::NonRetryable { .. } | ResilienceError::NoEndpoints => None,
        }
    }

    /// False when the layer rejected the call without invoking the operation.
    pub fn was_attempted(&self) -> bool {
        self.attempts() > 0
    }

    /// The last underlying operation failure, if one was observed.
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            ResilienceError::Exhausted { source, .. }
            | ResilienceError::NonRetryable { source, .. }
            | ResilienceError::Failed(source) => Some(source),
            ResilienceError::AllEndpointsFailed { failures } => {
                failures.iter().rev().find_map(|f| f.error.operation_error())
            }
            _ => None,
        }
    }
}

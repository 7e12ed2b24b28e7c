//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Single endpoint:
//!     operation → retries.rs (classify, backoff.rs delay, timeouts.rs deadline)
//!
//! Multiple endpoints:
//!     fallback.rs → per endpoint: circuit_breaker.rs gate
//!                → retries.rs → success/failure recorded on the breaker
//!
//! Many items:
//!     batch.rs → chunks of `concurrency` → retries.rs per item
//! ```
//!
//! # Design Decisions
//! - Operations are closures returning futures; the layer never sees the
//!   request itself, only `OperationError` with a retryable flag
//! - Every attempt has an optional deadline; timeouts abandon the attempt
//! - Circuit breakers are per resource and composed, never shared
//! - Breaker and retry state is in-memory and process-local

pub mod backoff;
pub mod batch;
pub mod circuit_breaker;
pub mod error;
pub mod fallback;
pub mod policy;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use batch::{execute_batch, BatchExecutor, BatchItemOutcome, BatchOptions, BatchReport};
pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use error::{EndpointFailure, ErrorKind, OperationError, ResilienceError};
pub use fallback::{EndpointHealth, FallbackEndpointManager};
pub use policy::RetryPolicy;
pub use registry::CircuitBreakerRegistry;
pub use retries::{retry, RetryExecutor};

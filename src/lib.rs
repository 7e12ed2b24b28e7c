//! Resilience layer for unreliable remote calls (RPC nodes, HTTP APIs).
//!
//! Retry with backoff, per-resource circuit breakers, multi-endpoint
//! fallback, per-key rate limiting and bounded-concurrency batches.

pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod rate_limit;
pub mod resilience;
pub mod rpc;

pub use config::schema::ResilienceConfig;
pub use lifecycle::Shutdown;
pub use rate_limit::RateLimiter;
pub use resilience::{
    CircuitBreaker, CircuitBreakerRegistry, ErrorKind, FallbackEndpointManager, OperationError,
    ResilienceError, RetryExecutor, RetryPolicy,
};

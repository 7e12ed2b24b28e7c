//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated, immutable)
//!     → RetryPolicy / CircuitBreaker / RateLimiter / FallbackEndpointManager
//!
//! Per call site:
//!     RetryOverrides merged over [retry] → RetryPolicy for that call
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Plain data only: no environment or CLI coupling inside the layer
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BatchConfig, CircuitBreakerConfig, CustomLimit, FallbackConfig, ObservabilityConfig,
    RateLimitConfig, ResilienceConfig, RetryConfig, RetryOverrides, TokenBucketConfig,
};
pub use validation::ValidationError;

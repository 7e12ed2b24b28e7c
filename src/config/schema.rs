//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! resilience layer. All types derive Serde traits for deserialization from
//! config files. Durations are integer milliseconds on disk and are exposed
//! as [`Duration`] through accessor methods.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the resilience layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Process-wide default retry policy.
    pub retry: RetryConfig,

    /// Circuit breaker settings for standalone breakers and the registry.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Rate limiting settings.
    pub rate_limit: RateLimitConfig,

    /// Multi-endpoint fallback settings.
    pub fallback: FallbackConfig,

    /// Batch execution settings.
    pub batch: BatchConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound for any computed delay in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor applied per attempt (>= 1).
    pub backoff_multiplier: f64,

    /// Spread each delay uniformly over +/-25%.
    pub jitter: bool,

    /// Per-attempt deadline in milliseconds. Unset means no deadline.
    pub per_attempt_timeout_ms: Option<u64>,

    /// Error kinds, codes or message fragments that should be retried.
    /// Empty means the default classification applies.
    pub retryable_error_tags: Vec<String>,

    /// Prefer a server-supplied retry-after over the computed backoff.
    pub honor_retry_after: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
            per_attempt_timeout_ms: None,
            retryable_error_tags: Vec::new(),
            honor_retry_after: true,
        }
    }
}

/// Per-call-site retry overrides, merged over the process-wide [`RetryConfig`].
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryOverrides {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub jitter: Option<bool>,
    pub per_attempt_timeout_ms: Option<u64>,
    pub retryable_error_tags: Option<Vec<String>>,
    pub honor_retry_after: Option<bool>,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Cool-down before a probe is let through, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Consecutive half-open successes needed to close the circuit.
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            success_threshold: 2,
        }
    }
}

/// A per-key limit selected by regex match on the caller's key.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CustomLimit {
    /// Regular expression matched against the unprefixed key.
    pub pattern: String,

    /// Requests allowed per window for matching keys.
    pub max_requests: u32,

    /// Window length in milliseconds for matching keys.
    pub window_ms: u64,
}

/// Token bucket defaults for callers that do not pass their own parameters.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TokenBucketConfig {
    /// Bucket capacity (burst size).
    pub max_tokens: f64,

    /// Tokens restored per second.
    pub refill_per_sec: f64,
}

impl TokenBucketConfig {
    pub fn refill_rate_per_ms(&self) -> f64 {
        self.refill_per_sec / 1000.0
    }
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10.0,
            refill_per_sec: 1.0,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per window for keys without a custom limit.
    pub max_requests: u32,

    /// Default window length in milliseconds.
    pub window_ms: u64,

    /// Namespace prepended to every stored key.
    pub key_prefix: String,

    /// Keys that are never limited.
    pub whitelist: Vec<String>,

    /// Ordered per-key overrides; first match wins.
    pub custom_limits: Vec<CustomLimit>,

    /// How often stale entries are evicted, in milliseconds.
    pub sweep_interval_ms: u64,

    /// Token bucket defaults.
    pub token_bucket: TokenBucketConfig,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_ms: 60_000,
            key_prefix: "rl:".to_string(),
            whitelist: Vec::new(),
            custom_limits: Vec::new(),
            sweep_interval_ms: 60_000,
            token_bucket: TokenBucketConfig::default(),
        }
    }
}

/// Multi-endpoint fallback configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Endpoint URLs in priority order.
    pub endpoints: Vec<String>,

    /// Retry overrides applied to each endpoint.
    pub retry: RetryOverrides,

    /// Guard each endpoint with its own circuit breaker.
    pub use_circuit_breaker: bool,

    /// Breaker settings used when `use_circuit_breaker` is set.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://localhost:8545".to_string()],
            retry: RetryOverrides {
                max_attempts: Some(2),
                ..RetryOverrides::default()
            },
            use_circuit_breaker: true,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Batch execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items started together per chunk.
    pub concurrency: usize,

    /// Retry overrides applied to every item.
    pub retry: RetryOverrides,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry: RetryOverrides::default(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config: ResilienceConfig = toml::from_str("").unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(config.batch.concurrency, 5);
    }

    #[test]
    fn test_partial_sections() {
        let raw = r#"
            [retry]
            max_attempts = 5
            per_attempt_timeout_ms = 2500

            [rate_limit]
            max_requests = 10
            whitelist = ["health"]

            [[rate_limit.custom_limits]]
            pattern = "^payment:"
            max_requests = 3
            window_ms = 1000

            [fallback]
            endpoints = ["https://rpc-a.example", "https://rpc-b.example"]
            retry = { max_attempts = 1 }
        "#;
        let config: ResilienceConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.per_attempt_timeout_ms, Some(2500));
        assert_eq!(config.retry.initial_delay_ms, 1_000);
        assert_eq!(config.rate_limit.custom_limits.len(), 1);
        assert_eq!(config.rate_limit.key_prefix, "rl:");
        assert_eq!(config.fallback.endpoints.len(), 2);
        assert_eq!(config.fallback.retry.max_attempts, Some(1));
        assert!(config.fallback.use_circuit_breaker);
    }

    #[test]
    fn test_token_bucket_rate_conversion() {
        let bucket = TokenBucketConfig {
            max_tokens: 10.0,
            refill_per_sec: 1.0,
        };
        assert!((bucket.refill_rate_per_ms() - 0.001).abs() < f64::EPSILON);
    }
}

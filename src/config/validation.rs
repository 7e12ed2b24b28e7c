//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and references
//! (patterns compile, endpoints parse). Every problem is reported, not just
//! the first one.

use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::config::schema::{
    CircuitBreakerConfig, ResilienceConfig, RetryConfig, RetryOverrides,
};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a full configuration.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_retry(&config.retry, "retry", &mut errors);
    validate_breaker(&config.circuit_breaker, "circuit_breaker", &mut errors);

    let limits = &config.rate_limit;
    if limits.max_requests == 0 {
        errors.push(ValidationError::new("rate_limit.max_requests", "must be at least 1"));
    }
    if limits.window_ms == 0 {
        errors.push(ValidationError::new("rate_limit.window_ms", "must be greater than 0"));
    }
    if limits.sweep_interval_ms == 0 {
        errors.push(ValidationError::new(
            "rate_limit.sweep_interval_ms",
            "must be greater than 0",
        ));
    }
    for (i, custom) in limits.custom_limits.iter().enumerate() {
        let field = format!("rate_limit.custom_limits[{}]", i);
        if let Err(e) = Regex::new(&custom.pattern) {
            errors.push(ValidationError::new(
                format!("{}.pattern", field),
                format!("invalid regex '{}': {}", custom.pattern, e),
            ));
        }
        if custom.max_requests == 0 {
            errors.push(ValidationError::new(
                format!("{}.max_requests", field),
                "must be at least 1",
            ));
        }
        if custom.window_ms == 0 {
            errors.push(ValidationError::new(
                format!("{}.window_ms", field),
                "must be greater than 0",
            ));
        }
    }
    if limits.token_bucket.max_tokens < 1.0 {
        errors.push(ValidationError::new(
            "rate_limit.token_bucket.max_tokens",
            "must be at least 1",
        ));
    }
    if limits.token_bucket.refill_per_sec <= 0.0 {
        errors.push(ValidationError::new(
            "rate_limit.token_bucket.refill_per_sec",
            "must be greater than 0",
        ));
    }

    let fallback = &config.fallback;
    for (i, endpoint) in fallback.endpoints.iter().enumerate() {
        if let Err(e) = Url::parse(endpoint) {
            errors.push(ValidationError::new(
                format!("fallback.endpoints[{}]", i),
                format!("invalid URL '{}': {}", endpoint, e),
            ));
        }
    }
    let merged = apply_overrides(&config.retry, &fallback.retry);
    validate_retry(&merged, "fallback.retry", &mut errors);
    if fallback.use_circuit_breaker {
        validate_breaker(&fallback.circuit_breaker, "fallback.circuit_breaker", &mut errors);
    }

    if config.batch.concurrency == 0 {
        errors.push(ValidationError::new("batch.concurrency", "must be at least 1"));
    }
    let merged = apply_overrides(&config.retry, &config.batch.retry);
    validate_retry(&merged, "batch.retry", &mut errors);

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Merge call-site overrides over a base retry configuration.
pub fn apply_overrides(base: &RetryConfig, overrides: &RetryOverrides) -> RetryConfig {
    RetryConfig {
        max_attempts: overrides.max_attempts.unwrap_or(base.max_attempts),
        initial_delay_ms: overrides.initial_delay_ms.unwrap_or(base.initial_delay_ms),
        max_delay_ms: overrides.max_delay_ms.unwrap_or(base.max_delay_ms),
        backoff_multiplier: overrides
            .backoff_multiplier
            .unwrap_or(base.backoff_multiplier),
        jitter: overrides.jitter.unwrap_or(base.jitter),
        per_attempt_timeout_ms: overrides
            .per_attempt_timeout_ms
            .or(base.per_attempt_timeout_ms),
        retryable_error_tags: overrides
            .retryable_error_tags
            .clone()
            .unwrap_or_else(|| base.retryable_error_tags.clone()),
        honor_retry_after: overrides.honor_retry_after.unwrap_or(base.honor_retry_after),
    }
}

fn validate_retry(retry: &RetryConfig, section: &str, errors: &mut Vec<ValidationError>) {
    if retry.max_attempts == 0 {
        errors.push(ValidationError::new(
            format!("{}.max_attempts", section),
            "must be at least 1",
        ));
    }
    if !(retry.backoff_multiplier >= 1.0) {
        errors.push(ValidationError::new(
            format!("{}.backoff_multiplier", section),
            "must be at least 1.0",
        ));
    }
    if retry.max_delay_ms < retry.initial_delay_ms {
        errors.push(ValidationError::new(
            format!("{}.max_delay_ms", section),
            "must not be smaller than initial_delay_ms",
        ));
    }
    if retry.per_attempt_timeout_ms == Some(0) {
        errors.push(ValidationError::new(
            format!("{}.per_attempt_timeout_ms", section),
            "must be greater than 0 when set",
        ));
    }
}

fn validate_breaker(
    breaker: &CircuitBreakerConfig,
    section: &str,
    errors: &mut Vec<ValidationError>,
) {
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{}.failure_threshold", section),
            "must be at least 1",
        ));
    }
    if breaker.success_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{}.success_threshold", section),
            "must be at least 1",
        ));
    }
    if breaker.reset_timeout_ms == 0 {
        errors.push(ValidationError::new(
            format!("{}.reset_timeout_ms", section),
            "must be greater than 0",
        ));
    }
}

//! Retry policy.
//!
//! A [`RetryPolicy`] is a value object built per call site: start from the
//! process-wide default (the `[retry]` section), merge [`RetryOverrides`] over
//! it, attach callbacks, and hand it to the executor.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::{RetryConfig, RetryOverrides};
use crate::config::validation::apply_overrides;
use crate::resilience::error::{ErrorKind, OperationError};

/// Caller-supplied classifier: `(error, attempt) -> retry?`.
pub type ShouldRetry = Arc<dyn Fn(&OperationError, u32) -> bool + Send + Sync>;

/// Observer invoked before each retry sleep: `(error, attempt, delay)`.
pub type OnRetry = Arc<dyn Fn(&OperationError, u32, Duration) + Send + Sync>;

/// Retry policy for a single call site.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    pub per_attempt_timeout: Option<Duration>,
    /// Matched case-insensitively against the error kind, code and message.
    pub retryable_error_tags: Vec<String>,
    pub honor_retry_after: bool,
    should_retry: Option<ShouldRetry>,
    on_retry: Option<OnRetry>,
}

impl RetryPolicy {
    /// Replace the default classification with a callback.
    pub fn with_should_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&OperationError, u32) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(f));
        self
    }

    pub fn with_on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&OperationError, u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(f));
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max.max(initial);
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = Some(timeout);
        self
    }

    pub fn with_retryable_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_error_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_honor_retry_after(mut self, honor: bool) -> Self {
        self.honor_retry_after = honor;
        self
    }

    /// A new policy with the overrides applied. Callbacks are kept.
    pub fn merged(&self, overrides: &RetryOverrides) -> Self {
        let mut merged = Self::from(&apply_overrides(&self.to_config(), overrides));
        merged.should_retry = self.should_retry.clone();
        merged.on_retry = self.on_retry.clone();
        merged
    }

    /// Decide whether `err`, observed on `attempt`, should be retried.
    ///
    /// Circuit-open rejections are never retried. Otherwise the explicit
    /// callback wins, then the tag list, then the error's own flag.
    pub fn classify(&self, err: &OperationError, attempt: u32) -> bool {
        if err.kind() == ErrorKind::CircuitOpen {
            return false;
        }
        if let Some(should_retry) = &self.should_retry {
            return should_retry(err, attempt);
        }
        if !self.retryable_error_tags.is_empty() {
            return self.matches_tag(err);
        }
        err.is_retryable()
    }

    fn matches_tag(&self, err: &OperationError) -> bool {
        let message = err.message().to_ascii_lowercase();
        self.retryable_error_tags.iter().any(|tag| {
            let tag = tag.to_ascii_lowercase();
            err.kind().as_str() == tag
                || err.code().is_some_and(|c| c.eq_ignore_ascii_case(&tag))
                || message.contains(&tag)
        })
    }

    pub(crate) fn notify_retry(&self, err: &OperationError, attempt: u32, delay: Duration) {
        if let Some(on_retry) = &self.on_retry {
            on_retry(err, attempt, delay);
        }
    }

    fn to_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay_ms: self.initial_delay.as_millis() as u64,
            max_delay_ms: self.max_delay.as_millis() as u64,
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
            per_attempt_timeout_ms: self.per_attempt_timeout.map(|d| d.as_millis() as u64),
            retryable_error_tags: self.retryable_error_tags.clone(),
            honor_retry_after: self.honor_retry_after,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.initial_delay_ms)),
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
            per_attempt_timeout: config.per_attempt_timeout_ms.map(Duration::from_millis),
            retryable_error_tags: config.retryable_error_tags.clone(),
            honor_retry_after: config.honor_retry_after,
            should_retry: None,
            on_retry: None,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("per_attempt_timeout", &self.per_attempt_timeout)
            .field("retryable_error_tags", &self.retryable_error_tags)
            .field("honor_retry_after", &self.honor_retry_after)
            .field("should_retry", &self.should_retry.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

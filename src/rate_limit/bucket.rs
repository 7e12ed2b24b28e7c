//! Token bucket.

use std::time::Duration;

use tokio::time::Instant;

/// Outcome of a token-bucket check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketDecision {
    pub allowed: bool,
    /// Tokens left after this check.
    pub tokens: f64,
    /// Set when denied: time until one token is available.
    pub retry_after: Option<Duration>,
}

/// A token bucket refilled continuously, starting full.
#[derive(Debug, Clone)]
pub(crate) struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    max_tokens: f64,
    refill_rate_per_ms: f64,
}

impl TokenBucket {
    pub(crate) fn new(max_tokens: f64, refill_rate_per_ms: f64, now: Instant) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: now,
            max_tokens,
            refill_rate_per_ms,
        }
    }

    /// Adopt new parameters, keeping the current fill level within capacity.
    pub(crate) fn reconfigure(&mut self, max_tokens: f64, refill_rate_per_ms: f64) {
        self.max_tokens = max_tokens;
        self.refill_rate_per_ms = refill_rate_per_ms;
        self.tokens = self.tokens.min(max_tokens);
    }

    fn refilled(&self, now: Instant) -> f64 {
        let elapsed_ms = now.saturating_duration_since(self.last_refill).as_secs_f64() * 1000.0;
        (self.tokens + elapsed_ms * self.refill_rate_per_ms).min(self.max_tokens)
    }

    pub(crate) fn refill(&mut self, now: Instant) {
        self.tokens = self.refilled(now);
        self.last_refill = now;
    }

    pub(crate) fn try_acquire(&mut self, now: Instant) -> TokenBucketDecision {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            TokenBucketDecision {
                allowed: true,
                tokens: self.tokens,
                retry_after: None,
            }
        } else {
            TokenBucketDecision {
                allowed: false,
                tokens: self.tokens,
                retry_after: Some(self.time_until_token()),
            }
        }
    }

    /// Fill level at `now` without mutating the bucket.
    pub(crate) fn peek(&self, now: Instant) -> f64 {
        self.refilled(now)
    }

    fn time_until_token(&self) -> Duration {
        if self.refill_rate_per_ms <= 0.0 {
            return Duration::MAX;
        }
        let missing = (1.0 - self.tokens).max(0.0);
        Duration::from_millis((missing / self.refill_rate_per_ms).ceil() as u64)
    }

    /// Time to refill from empty to full.
    fn lifetime(&self) -> Duration {
        if self.refill_rate_per_ms <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_millis((self.max_tokens / self.refill_rate_per_ms).ceil() as u64)
    }

    /// Untouched for more than twice the refill lifetime.
    pub(crate) fn is_stale(&self, now: Instant) -> bool {
        let idle = now.saturating_duration_since(self.last_refill);
        idle > self.lifetime().saturating_mul(2)
    }
}

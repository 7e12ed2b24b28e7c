//! Fixed-length window counter.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Outcome of a sliding-window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the current window ends.
    pub reset_at: Instant,
    /// Set when denied: time until the window resets.
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    /// Decision for a key that is never limited.
    pub(crate) fn unlimited(limit: u32, now: Instant) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at: now,
            retry_after: None,
        }
    }
}

/// Serializable view of a key's window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowStatus {
    pub key: String,
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
    pub reset_in_ms: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct WindowEntry {
    pub(crate) count: u32,
    window_start: Instant,
    pub(crate) limit: u32,
    window: Duration,
    last_seen: Instant,
}

impl WindowEntry {
    pub(crate) fn new(limit: u32, window: Duration, now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            limit,
            window,
            last_seen: now,
        }
    }

    /// Start a fresh window if the current one has elapsed.
    pub(crate) fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) >= self.window {
            self.count = 0;
            self.window_start = now;
        }
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub(crate) fn has_room(&self) -> bool {
        self.count < self.limit
    }

    pub(crate) fn reset_at(&self) -> Instant {
        self.window_start + self.window
    }

    pub(crate) fn decision(&self, allowed: bool, now: Instant) -> RateLimitDecision {
        let reset_at = self.reset_at();
        RateLimitDecision {
            allowed,
            limit: self.limit,
            remaining: self.limit.saturating_sub(self.count),
            reset_at,
            retry_after: (!allowed).then(|| reset_at.saturating_duration_since(now)),
        }
    }

    /// Untouched for more than twice the window.
    pub(crate) fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > self.window * 2
    }
}

//! Rate limiter state and operations.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::loader::ConfigError;
use crate::config::schema::{RateLimitConfig, TokenBucketConfig};
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::observability::metrics;
use crate::rate_limit::bucket::{TokenBucket, TokenBucketDecision};
use crate::rate_limit::rules::{KeyRules, Resolution};
use crate::rate_limit::window::{RateLimitDecision, WindowEntry, WindowStatus};
use crate::resilience::error::ResilienceError;

/// Per-key rate limiter with sliding-window and token-bucket strategies.
///
/// Every read-modify-write on an entry happens while holding its map shard
/// guard, and no guard is held across an await.
#[derive(Debug)]
pub struct RateLimiter {
    rules: KeyRules,
    bucket_defaults: TokenBucketConfig,
    windows: DashMap<String, WindowEntry>,
    buckets: DashMap<String, TokenBucket>,
}

impl RateLimiter {
    /// Build a limiter. Fails if a custom-limit pattern does not compile.
    pub fn new(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            rules: KeyRules::new(config)?,
            bucket_defaults: config.token_bucket.clone(),
            windows: DashMap::new(),
            buckets: DashMap::new(),
        })
    }

    /// Whether `key` has room in its current window. Does not count.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        match self.rules.resolve(key) {
            Resolution::Whitelisted => RateLimitDecision::unlimited(self.rules.default_limit(), now),
            Resolution::Limited {
                storage_key,
                limit,
                window,
            } => match self.windows.get_mut(&storage_key) {
                Some(mut entry) => {
                    entry.roll(now);
                    let allowed = entry.has_room();
                    entry.decision(allowed, now)
                }
                None => WindowEntry::new(limit, window, now).decision(true, now),
            },
        }
    }

    /// Count one request against `key`, even if it is already over the limit.
    ///
    /// The returned decision says whether this request fit in the window.
    pub fn consume(&self, key: &str) -> RateLimitDecision {
        self.update_window(key, true)
    }

    /// Check and count atomically: only allowed requests are counted.
    pub fn is_allowed(&self, key: &str) -> RateLimitDecision {
        self.update_window(key, false)
    }

    fn update_window(&self, key: &str, count_denied: bool) -> RateLimitDecision {
        let now = Instant::now();
        let (storage_key, limit, window) = match self.rules.resolve(key) {
            Resolution::Whitelisted => {
                return RateLimitDecision::unlimited(self.rules.default_limit(), now)
            }
            Resolution::Limited {
                storage_key,
                limit,
                window,
            } => (storage_key, limit, window),
        };

        let decision = {
            let mut entry = self
                .windows
                .entry(storage_key)
                .or_insert_with(|| WindowEntry::new(limit, window, now));
            entry.roll(now);
            entry.touch(now);
            let allowed = entry.has_room();
            if allowed || count_denied {
                entry.count = entry.count.saturating_add(1);
            }
            entry.decision(allowed, now)
        };

        if !decision.allowed {
            tracing::warn!(
                key,
                limit = decision.limit,
                retry_after_ms = decision.retry_after.map(|d| d.as_millis() as u64),
                "Rate limit exceeded"
            );
            metrics::record_rate_limited("sliding_window");
        }
        decision
    }

    /// Gate a call: count it, or fail with the time to wait.
    pub fn acquire(&self, key: &str) -> Result<RateLimitDecision, ResilienceError> {
        let decision = self.is_allowed(key);
        if decision.allowed {
            Ok(decision)
        } else {
            Err(ResilienceError::RateLimited {
                key: key.to_string(),
                retry_after: decision.retry_after.unwrap_or_default(),
            })
        }
    }

    /// Wait until `key` is allowed, for at most `max_wait`.
    ///
    /// A `max_wait` too large to represent as a deadline waits indefinitely.
    pub async fn wait_for_allowance(
        &self,
        key: &str,
        max_wait: Duration,
    ) -> Result<RateLimitDecision, ResilienceError> {
        let deadline = Instant::now().checked_add(max_wait);
        loop {
            let decision = self.is_allowed(key);
            if decision.allowed {
                return Ok(decision);
            }

            let retry_after = decision.retry_after.unwrap_or_default();
            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    return Err(ResilienceError::RateLimited {
                        key: key.to_string(),
                        retry_after,
                    });
                }
                Some(deadline) => retry_after.min(deadline - now),
                None => retry_after,
            }
            .max(Duration::from_millis(1));

            tracing::debug!(key, pause_ms = pause.as_millis() as u64, "Waiting for rate limit allowance");
            time::sleep(pause).await;
        }
    }

    /// Take one token from `key`'s bucket, creating it full if missing.
    pub fn token_bucket_check(
        &self,
        key: &str,
        max_tokens: f64,
        refill_rate_per_ms: f64,
    ) -> TokenBucketDecision {
        if self.rules.resolve(key) == Resolution::Whitelisted {
            return TokenBucketDecision {
                allowed: true,
                tokens: max_tokens,
                retry_after: None,
            };
        }

        let now = Instant::now();
        let decision = {
            let mut bucket = self
                .buckets
                .entry(self.rules.storage_key(key))
                .or_insert_with(|| TokenBucket::new(max_tokens, refill_rate_per_ms, now));
            bucket.reconfigure(max_tokens, refill_rate_per_ms);
            bucket.try_acquire(now)
        };

        if !decision.allowed {
            tracing::warn!(
                key,
                tokens = decision.tokens,
                retry_after_ms = decision.retry_after.map(|d| d.as_millis() as u64),
                "Token bucket empty"
            );
            metrics::record_rate_limited("token_bucket");
        }
        decision
    }

    /// Token bucket check with the configured defaults.
    pub fn token_bucket(&self, key: &str) -> TokenBucketDecision {
        self.token_bucket_check(
            key,
            self.bucket_defaults.max_tokens,
            self.bucket_defaults.refill_rate_per_ms(),
        )
    }

    /// Current fill level of `key`'s bucket, if it exists.
    pub fn tokens(&self, key: &str) -> Option<f64> {
        let now = Instant::now();
        self.buckets
            .get(&self.rules.storage_key(key))
            .map(|b| b.peek(now))
    }

    /// Read-only view of `key`'s window. `None` if the key has no entry.
    pub fn status(&self, key: &str) -> Option<WindowStatus> {
        let now = Instant::now();
        let entry = self.windows.get(&self.rules.storage_key(key))?;
        let mut view = entry.value().clone();
        drop(entry);
        view.roll(now);
        Some(WindowStatus {
            key: key.to_string(),
            count: view.count,
            limit: view.limit,
            remaining: view.limit.saturating_sub(view.count),
            reset_in_ms: view.reset_at().saturating_duration_since(now).as_millis() as u64,
        })
    }

    /// Forget all state for `key`.
    pub fn reset(&self, key: &str) {
        let storage_key = self.rules.storage_key(key);
        self.windows.remove(&storage_key);
        self.buckets.remove(&storage_key);
        tracing::debug!(key, "Rate limit state reset");
    }

    /// Evict stale entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.len();
        self.windows.retain(|_, entry| !entry.is_stale(now));
        self.buckets.retain(|_, bucket| !bucket.is_stale(now));
        let after = self.len();
        metrics::set_rate_limit_entries(after);

        let evicted = before.saturating_sub(after);
        if evicted > 0 {
            tracing::debug!(evicted, remaining = after, "Swept stale rate limit entries");
        }
        evicted
    }

    /// Number of tracked entries across both strategies.
    pub fn len(&self) -> usize {
        self.windows.len() + self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep every `interval` until shutdown or until the limiter is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: ShutdownSignal,
    ) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(limiter) = limiter.upgrade() else {
                            tracing::debug!("Rate limiter dropped, sweeper exiting");
                            break;
                        };
                        limiter.sweep();
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Rate limit sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::CustomLimit;
    use crate::lifecycle::shutdown::Shutdown;
    use tokio::time::advance;

    fn limiter(max_requests: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            max_requests,
            window_ms,
            ..RateLimitConfig::default()
        })
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_exactness() {
        let rl = limiter(100, 60_000);
        for _ in 0..100 {
            assert!(rl.consume("k").allowed);
        }
        let denied = rl.check("k");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after.unwrap() > Duration::ZERO);

        advance(Duration::from_millis(60_000)).await;
        let fresh = rl.check("k");
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_does_not_count() {
        let rl = limiter(2, 1_000);
        for _ in 0..10 {
            assert!(rl.check("k").allowed);
        }
        assert!(rl.is_empty());
        assert!(rl.is_allowed("k").allowed);
        assert_eq!(rl.check("k").remaining, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_allowed_counts_only_allowed() {
        let rl = limiter(2, 1_000);
        assert!(rl.is_allowed("k").allowed);
        assert!(rl.is_allowed("k").allowed);
        assert!(!rl.is_allowed("k").allowed);
        assert_eq!(rl.status("k").unwrap().count, 2);

        // consume counts past the limit
        assert!(!rl.consume("k").allowed);
        assert_eq!(rl.status("k").unwrap().count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_reports_retry_after() {
        let rl = limiter(1, 10_000);
        rl.acquire("wallet").unwrap();
        advance(Duration::from_secs(4)).await;
        match rl.acquire("wallet").unwrap_err() {
            ResilienceError::RateLimited { key, retry_after } => {
                assert_eq!(key, "wallet");
                assert_eq!(retry_after, Duration::from_secs(6));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_allowance() {
        let rl = limiter(1, 1_000);
        rl.acquire("k").unwrap();

        let start = Instant::now();
        rl.wait_for_allowance("k", Duration::from_secs(5)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));

        let err = rl
            .wait_for_allowance("k", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::RateLimited { .. }));
        assert!(!err.was_attempted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_without_deadline() {
        let rl = limiter(1, 10);
        rl.acquire("k").unwrap();

        let start = Instant::now();
        let decision = rl.wait_for_allowance("k", Duration::MAX).await.unwrap();
        assert!(decision.allowed);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_limits_and_whitelist() {
        let rl = RateLimiter::new(&RateLimitConfig {
            max_requests: 100,
            whitelist: vec!["health".to_string()],
            custom_limits: vec![CustomLimit {
                pattern: "^payment:".to_string(),
                max_requests: 2,
                window_ms: 1_000,
            }],
            ..RateLimitConfig::default()
        })
        .unwrap();

        assert!(rl.is_allowed("payment:1").allowed);
        assert!(rl.is_allowed("payment:1").allowed);
        assert!(!rl.is_allowed("payment:1").allowed);
        assert!(rl.is_allowed("payment:2").allowed);
        assert_eq!(rl.is_allowed("balance:1").remaining, 99);

        for _ in 0..500 {
            assert!(rl.is_allowed("health").allowed);
        }
        assert!(rl.status("health").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_refill() {
        let rl = limiter(100, 60_000);
        for _ in 0..10 {
            assert!(rl.token_bucket_check("tb", 10.0, 1.0 / 1000.0).allowed);
        }
        let denied = rl.token_bucket_check("tb", 10.0, 1.0 / 1000.0);
        assert!(!denied.allowed);
        assert!(denied.retry_after.is_some());

        advance(Duration::from_millis(5_000)).await;
        let tokens = rl.tokens("tb").unwrap();
        assert!((tokens - 5.0).abs() < 1e-6);

        advance(Duration::from_secs(3_600)).await;
        assert!(rl.tokens("tb").unwrap() <= 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_sweep() {
        let rl = limiter(1, 1_000);
        rl.consume("a");
        rl.consume("b");
        rl.token_bucket_check("c", 1.0, 1.0);
        assert_eq!(rl.len(), 3);

        rl.reset("a");
        assert!(rl.status("a").is_none());
        assert_eq!(rl.len(), 2);

        advance(Duration::from_millis(1_500)).await;
        rl.consume("d");
        assert_eq!(rl.sweep(), 1); // bucket "c": lifetime 1ms
        advance(Duration::from_millis(600)).await;
        assert_eq!(rl.sweep(), 1); // window "b": idle 2100ms
        assert_eq!(rl.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_shutdown() {
        let rl = Arc::new(limiter(1, 100));
        let shutdown = Shutdown::new();
        let handle = rl.spawn_sweeper(Duration::from_millis(100), shutdown.subscribe());

        rl.consume("k");
        // Paused clock auto-advances through the sweeper's ticks.
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(rl.is_empty());

        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_when_limiter_dropped() {
        let rl = Arc::new(limiter(1, 100));
        let shutdown = Shutdown::new();
        let handle = rl.spawn_sweeper(Duration::from_millis(100), shutdown.subscribe());
        drop(rl);
        handle.await.unwrap();
        assert!(!shutdown.is_triggered());
    }
}

//! Multi-endpoint fallback.
//!
//! # Data Flow
//! ```text
//! execute(factory)
//!     → for each endpoint, in priority order:
//!         breaker open?            → record CircuitOpen, skip
//!         retries.rs(factory(ep))  → success: record_success, return
//!                                  → exhausted or terminal: record_failure,
//!                                    next endpoint
//!     → AllEndpointsFailed (every per-endpoint error, in order)
//! ```
//!
//! # Design Decisions
//! - Each endpoint owns its breaker; removing the endpoint drops it
//! - The breaker sees one outcome per endpoint visit, not per attempt
//! - A terminal (non-retryable) failure counts against that endpoint like
//!   exhausted retries: a node answering 401 must not block its fallbacks
//! - The endpoint list is snapshotted at the start of each call so runtime
//!   add/remove never races an in-flight iteration

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use url::Url;

use crate::config::loader::ConfigError;
use crate::config::schema::{CircuitBreakerConfig, FallbackConfig};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitSnapshot};
use crate::resilience::error::{EndpointFailure, OperationError, ResilienceError};
use crate::resilience::policy::RetryPolicy;
use crate::resilience::retries::RetryExecutor;

#[derive(Debug, Clone)]
struct Slot<E> {
    endpoint: E,
    breaker: Option<Arc<CircuitBreaker>>,
}

/// Health view of one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub endpoint: String,
    pub circuit: Option<CircuitSnapshot>,
}

/// Tries an ordered list of endpoints, each behind its own breaker.
pub struct FallbackEndpointManager<E> {
    slots: RwLock<Vec<Slot<E>>>,
    executor: RetryExecutor,
    breaker_config: Option<CircuitBreakerConfig>,
}

impl<E> FallbackEndpointManager<E>
where
    E: Clone + Display + PartialEq,
{
    /// Create a manager. `breaker_config: None` means every endpoint is
    /// always attempted.
    pub fn new(
        endpoints: Vec<E>,
        policy: RetryPolicy,
        breaker_config: Option<CircuitBreakerConfig>,
    ) -> Self {
        Self::with_executor(endpoints, RetryExecutor::new(policy), breaker_config)
    }

    pub fn with_executor(
        endpoints: Vec<E>,
        executor: RetryExecutor,
        breaker_config: Option<CircuitBreakerConfig>,
    ) -> Self {
        let manager = Self {
            slots: RwLock::new(Vec::with_capacity(endpoints.len())),
            executor,
            breaker_config,
        };
        for endpoint in endpoints {
            manager.add_endpoint(endpoint);
        }
        manager
    }

    fn slot_for(&self, endpoint: E) -> Slot<E> {
        let breaker = self
            .breaker_config
            .as_ref()
            .map(|config| Arc::new(CircuitBreaker::new(endpoint.to_string(), config.clone())));
        Slot { endpoint, breaker }
    }

    /// Append an endpoint at the lowest priority. Returns false if it is
    /// already present.
    pub fn add_endpoint(&self, endpoint: E) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.iter().any(|s| s.endpoint == endpoint) {
            return false;
        }
        tracing::debug!(endpoint = %endpoint, "Endpoint added");
        slots.push(self.slot_for(endpoint));
        true
    }

    /// Remove an endpoint and discard its breaker state.
    pub fn remove_endpoint(&self, endpoint: &E) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|s| &s.endpoint != endpoint);
        let removed = slots.len() != before;
        if removed {
            tracing::debug!(endpoint = %endpoint, "Endpoint removed");
        }
        removed
    }

    pub fn endpoints(&self) -> Vec<E> {
        self.read_slots().into_iter().map(|s| s.endpoint).collect()
    }

    pub fn breaker(&self, endpoint: &E) -> Option<Arc<CircuitBreaker>> {
        self.read_slots()
            .into_iter()
            .find(|s| &s.endpoint == endpoint)
            .and_then(|s| s.breaker)
    }

    pub fn health(&self) -> Vec<EndpointHealth> {
        self.read_slots()
            .into_iter()
            .map(|s| EndpointHealth {
                endpoint: s.endpoint.to_string(),
                circuit: s.breaker.map(|b| b.snapshot()),
            })
            .collect()
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.executor.policy()
    }

    fn read_slots(&self) -> Vec<Slot<E>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run `factory(endpoint)` against each endpoint in order until one
    /// succeeds.
    pub async fn execute<T, F, Fut>(&self, mut factory: F) -> Result<T, ResilienceError>
    where
        F: FnMut(&E) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let slots = self.read_slots();
        if slots.is_empty() {
            return Err(ResilienceError::NoEndpoints);
        }

        let total = slots.len();
        let mut failures = Vec::new();

        for (idx, slot) in slots.into_iter().enumerate() {
            let Slot { endpoint, breaker } = slot;

            if let Some(breaker) = &breaker {
                if !breaker.is_allowed() {
                    tracing::debug!(endpoint = %endpoint, "Circuit open, skipping endpoint");
                    failures.push(EndpointFailure {
                        endpoint: endpoint.to_string(),
                        error: ResilienceError::CircuitOpen {
                            resource: breaker.name().to_string(),
                            remaining: breaker.remaining_cooldown(),
                        },
                    });
                    continue;
                }
            }

            match self.executor.execute(|| factory(&endpoint)).await {
                Ok(value) => {
                    if let Some(breaker) = &breaker {
                        breaker.record_success();
                    }
                    if idx > 0 {
                        tracing::info!(endpoint = %endpoint, endpoint_idx = idx, "Served by fallback endpoint");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if let Some(breaker) = &breaker {
                        breaker.record_failure();
                    }
                    tracing::warn!(
                        endpoint = %endpoint,
                        endpoint_idx = idx,
                        attempts = err.attempts(),
                        error = %err,
                        "Endpoint failed"
                    );
                    if idx + 1 < total {
                        metrics::record_failover();
                    }
                    failures.push(EndpointFailure {
                        endpoint: endpoint.to_string(),
                        error: err,
                    });
                }
            }
        }

        tracing::error!(endpoints = total, "All endpoints failed");
        Err(ResilienceError::AllEndpointsFailed { failures })
    }
}

impl FallbackEndpointManager<Url> {
    /// Build a manager from the `[fallback]` section, merging its retry
    /// overrides over `base`.
    pub fn from_config(config: &FallbackConfig, base: &RetryPolicy) -> Result<Self, ConfigError> {
        let endpoints = config
            .endpoints
            .iter()
            .map(|raw| {
                Url::parse(raw).map_err(|source| ConfigError::InvalidEndpoint {
                    url: raw.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let breaker_config = config
            .use_circuit_breaker
            .then(|| config.circuit_breaker.clone());

        Ok(Self::new(endpoints, base.merged(&config.retry), breaker_config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::resilience::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_delays(Duration::from_millis(10), Duration::from_millis(100))
            .with_jitter(false)
    }

    fn breaker_config(failure_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            reset_timeout_ms: 60_000,
            success_threshold: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_open_endpoint() {
        let manager = FallbackEndpointManager::new(
            vec!["a".to_string(), "b".to_string()],
            policy(2),
            Some(breaker_config(5)),
        );
        manager.breaker(&"a".to_string()).unwrap().force_open();

        let visited = Mutex::new(Vec::new());
        let result = manager
            .execute(|ep| {
                visited.lock().unwrap().push(ep.clone());
                let ep = ep.clone();
                async move { Ok::<_, OperationError>(format!("from {ep}")) }
            })
            .await
            .unwrap();

        assert_eq!(result, "from b");
        assert_eq!(*visited.lock().unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_over_after_exhaustion() {
        let manager = FallbackEndpointManager::new(
            vec!["a".to_string(), "b".to_string()],
            policy(3),
            Some(breaker_config(1)),
        );
        let calls_a = AtomicU32::new(0);

        let result = manager
            .execute(|ep| {
                let failing = ep == "a";
                if failing {
                    calls_a.fetch_add(1, Ordering::SeqCst);
                }
                async move {
                    if failing {
                        Err(OperationError::network("refused"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls_a.load(Ordering::SeqCst), 3);
        let a = manager.breaker(&"a".to_string()).unwrap();
        assert_eq!(a.state(), CircuitState::Open);
        assert_eq!(a.snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregate_failure_lists_every_endpoint() {
        let manager = FallbackEndpointManager::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            policy(2),
            Some(breaker_config(5)),
        );
        manager.breaker(&"c".to_string()).unwrap().force_open();

        let err = manager
            .execute(|_| async { Err::<(), _>(OperationError::timeout("deadline")) })
            .await
            .unwrap_err();

        match &err {
            ResilienceError::AllEndpointsFailed { failures } => {
                let names: Vec<_> = failures.iter().map(|f| f.endpoint.as_str()).collect();
                assert_eq!(names, vec!["a", "b", "c"]);
                assert!(matches!(failures[0].error, ResilienceError::Exhausted { attempts: 2, .. }));
                assert!(matches!(failures[2].error, ResilienceError::CircuitOpen { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_fails_over_and_opens_breaker() {
        let manager = FallbackEndpointManager::new(
            vec!["a".to_string(), "b".to_string()],
            policy(3),
            Some(breaker_config(1)),
        );
        let calls_a = AtomicU32::new(0);
        let calls_b = AtomicU32::new(0);

        for _ in 0..3 {
            let result = manager
                .execute(|ep| {
                    let rejected = ep == "a";
                    if rejected {
                        calls_a.fetch_add(1, Ordering::SeqCst);
                    } else {
                        calls_b.fetch_add(1, Ordering::SeqCst);
                    }
                    async move {
                        if rejected {
                            Err(OperationError::authorization("HTTP 401"))
                        } else {
                            Ok("from b")
                        }
                    }
                })
                .await;
            assert_eq!(result.unwrap(), "from b");
        }

        // One attempt on the first round, then the open breaker skips it.
        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 3);
        let a = manager.breaker(&"a".to_string()).unwrap();
        assert_eq!(a.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_errors_on_every_endpoint_aggregate() {
        let manager = FallbackEndpointManager::new(
            vec!["a".to_string(), "b".to_string()],
            policy(3),
            None,
        );
        let calls = AtomicU32::new(0);
        let err = manager
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(OperationError::validation("bad params")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match &err {
            ResilienceError::AllEndpointsFailed { failures } => {
                assert!(failures
                    .iter()
                    .all(|f| matches!(f.error, ResilienceError::NonRetryable { attempts: 1, .. })));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_breakers_all_endpoints_attempted() {
        let manager = FallbackEndpointManager::new(vec![1u16, 2, 3], policy(1), None);
        assert!(manager.breaker(&1).is_none());
        let visited = Mutex::new(Vec::new());
        let _ = manager
            .execute(|ep| {
                visited.lock().unwrap().push(*ep);
                async { Err::<(), _>(OperationError::network("down")) }
            })
            .await;
        let _ = manager
            .execute(|ep| {
                visited.lock().unwrap().push(*ep);
                async { Err::<(), _>(OperationError::network("down")) }
            })
            .await;
        assert_eq!(*visited.lock().unwrap(), vec![1, 2, 3, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_add_remove() {
        let manager = FallbackEndpointManager::new(vec!["a".to_string()], policy(1), Some(breaker_config(1)));
        assert!(manager.add_endpoint("b".to_string()));
        assert!(!manager.add_endpoint("b".to_string()));
        assert_eq!(manager.endpoints(), vec!["a".to_string(), "b".to_string()]);

        manager.breaker(&"b".to_string()).unwrap().force_open();
        assert!(manager.remove_endpoint(&"b".to_string()));
        assert!(manager.add_endpoint("b".to_string()));
        assert_eq!(
            manager.breaker(&"b".to_string()).unwrap().state(),
            CircuitState::Closed
        );

        assert!(manager.remove_endpoint(&"a".to_string()));
        assert!(manager.remove_endpoint(&"b".to_string()));
        let err = manager
            .execute(|_| async { Ok::<_, OperationError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::NoEndpoints));
    }

    #[test]
    fn test_from_config() {
        let config = FallbackConfig {
            endpoints: vec![
                "https://rpc-a.example".to_string(),
                "https://rpc-b.example".to_string(),
            ],
            ..FallbackConfig::default()
        };
        let manager = FallbackEndpointManager::from_config(&config, &RetryPolicy::default()).unwrap();
        assert_eq!(manager.endpoints().len(), 2);
        assert_eq!(manager.policy().max_attempts, 2);
        assert_eq!(manager.health().len(), 2);
        assert!(manager.health().iter().all(|h| h.circuit.is_some()));

        let bad = FallbackConfig {
            endpoints: vec!["::not a url".to_string()],
            ..FallbackConfig::default()
        };
        assert!(matches!(
            FallbackEndpointManager::from_config(&bad, &RetryPolicy::default()),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }
}

//! Keyed circuit breaker registry.
//!
//! Call sites that guard many resources (one breaker per RPC node, per
//! contract, per API host) look their breaker up by name. Each registry owns
//! its breakers; [`global`] is a lazily built default instance for call sites
//! that do not carry one around.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::config::schema::CircuitBreakerConfig;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitSnapshot};

/// Registry of circuit breakers keyed by resource name.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose new breakers use `config`.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Fetch the breaker for `name`, creating it with the registry's config.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(name, self.config.clone()))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    /// Drop the breaker for `name`, discarding its state.
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(name).map(|(_, b)| b)
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Snapshots of every breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}

static GLOBAL: OnceLock<CircuitBreakerRegistry> = OnceLock::new();

/// Process-wide registry with default breaker settings.
pub fn global() -> &'static CircuitBreakerRegistry {
    GLOBAL.get_or_init(CircuitBreakerRegistry::default)
}

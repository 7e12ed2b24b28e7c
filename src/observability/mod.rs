//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! retries / circuit breaker / fallback / rate limiter / batch produce:
//!     → tracing events (structured fields: attempt, delay_ms, endpoint, key)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout)
//!     → Metrics endpoint (Prometheus scrape), when enabled
//! ```
//!
//! # Design Decisions
//! - The library emits; only the binary installs a subscriber or recorder
//! - Metrics are cheap (atomic increments) and no-ops without a recorder

pub mod logging;
pub mod metrics;

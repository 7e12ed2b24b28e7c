//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the logging subsystem for the binary
//! - Configure log level from config, overridable by `RUST_LOG`
//!
//! # Design Decisions
//! - Uses the tracing crate for structured logging; the library only emits
//!   events and never installs a subscriber itself
//! - Level precedence: `RUST_LOG` > `observability.log_level`

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::ObservabilityConfig;

/// Install a global fmt subscriber filtered by `RUST_LOG` or the configured
/// level.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(default_filter(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rpc_resilience={level},{level}").into())
}

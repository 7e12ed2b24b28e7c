//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → every ShutdownSignal resolves → background loops exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger shutdown
//! ```
//!
//! # Design Decisions
//! - Background tasks (rate-limit sweeper, CLI probe loop) never outlive
//!   the coordinator: dropping it counts as a trigger
//! - Late subscribers still observe an earlier trigger

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};

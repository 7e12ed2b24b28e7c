//! Rate limiting subsystem.
//!
//! # Data Flow
//! ```text
//! Caller, before submitting work:
//!     → rules.rs (whitelist? custom limit by pattern? prefix the key)
//!     → limiter.rs
//!         sliding window: window.rs (roll expired window, count, decide)
//!         token bucket:   bucket.rs (refill by elapsed time, take a token)
//!     → allowed: proceed / denied: retry_after tells how long to wait
//!
//! Background:
//!     sweeper task → evict entries idle for more than twice their window
//! ```
//!
//! # Design Decisions
//! - A gate, not a wrapper: callers call `acquire` before the operation
//! - Entries are created lazily on first use of a key
//! - Check-and-count is atomic per key (map shard guard held, never across
//!   an await)
//! - State is process-local and best-effort

pub mod bucket;
pub mod limiter;
pub mod rules;
pub mod window;

pub use bucket::TokenBucketDecision;
pub use limiter::RateLimiter;
pub use window::{RateLimitDecision, WindowStatus};

//! Resilience subsystem.
//!
//! # Design Decisions
//! - Upstream connects are never retried; a failed connect ends that client
//! - Only the accept loop backs off, so transient OS errors cannot spin it

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};

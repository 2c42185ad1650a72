//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, per-connection spans)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Diagnostics never reach the relayed byte stream
//! - Connection ID flows through every log line of a relay via its span
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

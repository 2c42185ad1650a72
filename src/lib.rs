//! Engine API relay library.
//!
//! Listens on TCP, opens one daemon Unix-socket connection per client, and
//! relays bytes both ways while rewriting version markers in request heads.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod relay;
pub mod resilience;
pub mod supervisor;

pub use config::RelayConfig;
pub use lifecycle::Shutdown;
pub use relay::{Relay, RelaySettings, Rewriter};
pub use supervisor::Supervisor;

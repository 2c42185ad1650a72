//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection ceiling, shedding)
//!     → connection.rs (connection ID, live-connection tracking)
//!     → upstream.rs (fresh Unix-socket connection to the daemon)
//!     → Hand off to the relay
//! ```
//!
//! # Design Decisions
//! - Bounded admission prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - One upstream connection per client, never reused

pub mod connection;
pub mod listener;
pub mod upstream;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Admission, ConnectionPermit, Listener, ListenerError};
pub use upstream::{UpstreamConnector, UpstreamError};

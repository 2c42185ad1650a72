//! Per-connection relay between a TCP client and the daemon socket.
//!
//! # Data Flow
//! ```text
//! client ──read──▶ framing.rs ──▶ rewrite.rs ──write──▶ daemon   (outbound)
//! client ◀──write──────────── verbatim ◀──────read──── daemon    (inbound)
//! ```
//!
//! Connection states:
//! ```text
//! Accepted ──connect ok──▶ Active (outbound ∥ inbound) ──both ended──▶ Closed
//!     └──────connect failed──────────────────────────────────────────▶ Closed
//! ```
//!
//! # Design Decisions
//! - The two directions are joined, not raced: the connection closes only
//!   after both have finished, so a late response is never truncated
//! - Each direction half-closes its peer when its source ends
//! - Nothing is ever written to the client that the daemon did not send

pub mod framing;
pub mod pump;
pub mod rewrite;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::{RelayConfig, RewritePolicy};
use crate::net::connection::ConnectionId;
use crate::net::upstream::{UpstreamConnector, UpstreamError};

pub use framing::{ChunkTransform, Passthrough, RequestFramer};
pub use pump::{Activity, Direction, DirectionEnd, DirectionReport, PumpOptions};
pub use rewrite::{RewriteError, RewriteScope, Rewriter};

/// Immutable settings shared by every relay.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub rewriter: Arc<Rewriter>,
    pub policy: RewritePolicy,
    pub max_head_bytes: usize,
    pub buffer_size: usize,
    /// `None` disables the idle deadline.
    pub idle_timeout: Option<Duration>,
}

impl RelaySettings {
    pub fn from_config(config: &RelayConfig) -> Result<Self, RewriteError> {
        let idle_timeout = match config.timeouts.idle_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Ok(Self {
            rewriter: Arc::new(Rewriter::new(config.rewrite.target_version.clone())?),
            policy: config.rewrite.policy,
            max_head_bytes: config.rewrite.max_head_bytes,
            buffer_size: config.relay.buffer_size,
            idle_timeout,
        })
    }

    fn pump_options(&self) -> PumpOptions {
        PumpOptions {
            buffer_size: self.buffer_size,
            idle_timeout: self.idle_timeout,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            rewriter: Arc::new(Rewriter::default()),
            policy: RewritePolicy::default(),
            max_head_bytes: 64 * 1024,
            buffer_size: 16 * 1024,
            idle_timeout: None,
        }
    }
}

/// What happened on a finished connection.
#[derive(Debug)]
pub struct RelayReport {
    pub outbound: DirectionReport,
    pub inbound: DirectionReport,
    /// Request heads seen on the outbound stream.
    pub requests: u64,
}

/// One accepted client connection.
pub struct Relay {
    id: ConnectionId,
    client: TcpStream,
    settings: Arc<RelaySettings>,
}

impl Relay {
    pub fn new(id: ConnectionId, client: TcpStream, settings: Arc<RelaySettings>) -> Self {
        if let Err(e) = client.set_nodelay(true) {
            tracing::debug!(connection_id = %id, error = %e, "Failed to set TCP_NODELAY");
        }
        Self { id, client, settings }
    }

    /// Connect upstream and relay until both directions finish.
    ///
    /// If the daemon is unreachable the client socket is closed without
    /// a single byte written to it.
    pub async fn run(self, connector: &UpstreamConnector) -> Result<RelayReport, UpstreamError> {
        let upstream = connector.connect().await?;
        tracing::trace!(connection_id = %self.id, upstream = ?connector.socket_path(), "Upstream connected");
        Ok(relay_streams(self.client, upstream, &self.settings).await)
    }
}

/// Relay between any client and upstream stream pair.
///
/// Both streams are dropped (fully closed) when this returns.
pub async fn relay_streams<C, U>(client: C, upstream: U, settings: &RelaySettings) -> RelayReport
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (client_rx, client_tx) = tokio::io::split(client);
    let (upstream_rx, upstream_tx) = tokio::io::split(upstream);

    let activity = Activity::new();
    let options = settings.pump_options();
    let mut framer = RequestFramer::new(
        Arc::clone(&settings.rewriter),
        settings.policy,
        settings.max_head_bytes,
    );
    let mut passthrough = Passthrough;

    let (outbound, inbound) = tokio::join!(
        pump::pump(Direction::Outbound, client_rx, upstream_tx, &mut framer, &activity, options),
        pump::pump(Direction::Inbound, upstream_rx, client_tx, &mut passthrough, &activity, options)
    );

    RelayReport {
        outbound,
        inbound,
        requests: framer.requests(),
    }
}

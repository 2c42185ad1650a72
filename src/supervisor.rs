//! Accept loop and per-connection relay spawning.
//!
//! # Responsibilities
//! - Accept clients from the bounded listener
//! - Spawn one independent relay task per admitted connection
//! - Keep accepting through transient accept errors
//! - Stop accepting when shutdown is signalled
//!
//! # Design Decisions
//! - Relays share nothing but immutable settings and the connector
//! - The loop never waits for a relay to finish
//! - Relays keep running after the loop stops; lifecycle drains them

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::net::{Admission, ConnectionPermit, ConnectionTracker, Listener, ListenerError, UpstreamConnector};
use crate::observability::metrics;
use crate::relay::{Relay, RelayReport, RelaySettings};
use crate::resilience::Backoff;

/// Accept-error backoff bounds.
const ACCEPT_BACKOFF_BASE_MS: u64 = 5;
const ACCEPT_BACKOFF_MAX_MS: u64 = 1000;

/// Owns the listener and spawns relays.
pub struct Supervisor {
    listener: Listener,
    connector: Arc<UpstreamConnector>,
    settings: Arc<RelaySettings>,
    tracker: ConnectionTracker,
}

impl Supervisor {
    pub fn new(listener: Listener, connector: UpstreamConnector, settings: RelaySettings) -> Self {
        Self {
            listener,
            connector: Arc::new(connector),
            settings: Arc::new(settings),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Handle for waiting on in-flight relays after [`Supervisor::run`] returns.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// Only a closed connection limiter ends the loop with an error; accept
    /// failures are logged and retried after a backoff.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        let mut backoff = Backoff::new(ACCEPT_BACKOFF_BASE_MS, ACCEPT_BACKOFF_MAX_MS);

        tracing::info!(
            upstream = ?self.connector.socket_path(),
            target_version = self.settings.rewriter.target_version(),
            policy = ?self.settings.policy,
            "Relay accepting connections"
        );

        loop {
            let admission = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(active = self.tracker.active_count(), "Stopped accepting connections");
                    return Ok(());
                }
                admission = self.listener.accept() => admission,
            };

            match admission {
                Ok(Admission::Admitted(stream, peer, permit)) => {
                    backoff.reset();
                    self.spawn_relay(stream, peer, permit);
                }
                Ok(Admission::Shed(peer)) => {
                    backoff.reset();
                    metrics::connection_rejected();
                    tracing::warn!(
                        peer_addr = %peer,
                        max_connections = self.listener.max_connections(),
                        "Connection limit reached, shedding connection"
                    );
                }
                Err(ListenerError::Accept(e)) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        consecutive_failures = backoff.failures(),
                        delay = ?delay,
                        "Accept failed"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn spawn_relay(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let guard = self.tracker.track();
        let id = guard.id();
        let connector = Arc::clone(&self.connector);
        let relay = Relay::new(id, stream, Arc::clone(&self.settings));
        let span = tracing::info_span!("relay", connection_id = %id, peer = %peer);

        tokio::spawn(
            async move {
                let _permit = permit;
                let _guard = guard;
                tracing::debug!("Connection opened");
                match relay.run(&connector).await {
                    Ok(report) => log_report(&report),
                    Err(e) => {
                        metrics::upstream_connect_failed();
                        tracing::warn!(error = %e, "Upstream unavailable, closing client connection");
                    }
                }
            }
            .instrument(span),
        );
    }
}

fn log_report(report: &RelayReport) {
    metrics::record_direction(&report.outbound);
    metrics::record_direction(&report.inbound);

    if report.outbound.end.is_error() || report.inbound.end.is_error() {
        tracing::debug!(
            outbound_end = %report.outbound.end,
            inbound_end = %report.inbound.end,
            "Connection ended with an I/O error"
        );
    }
    tracing::debug!(
        requests = report.requests,
        bytes_to_daemon = report.outbound.bytes_written,
        bytes_to_client = report.inbound.bytes_written,
        outbound_end = report.outbound.end.reason(),
        inbound_end = report.inbound.end.reason(),
        "Connection closed"
    );
}

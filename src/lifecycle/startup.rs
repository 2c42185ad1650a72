//! Startup orchestration.
//!
//! # Design Decisions
//! - Fail fast: a bad rewrite target or an unbindable address is fatal
//! - Metrics start before the listener, so the first connection is counted
//! - A missing daemon socket is only a warning; the daemon may start later

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::config::RelayConfig;
use crate::lifecycle::{signals, Shutdown};
use crate::net::{Listener, ListenerError, UpstreamConnector};
use crate::observability::metrics;
use crate::relay::{RelaySettings, RewriteError};
use crate::supervisor::Supervisor;

/// Fatal errors while bringing the relay up or running it.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid rewrite settings: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),
}

/// Build a supervisor from configuration and bind its listener.
pub async fn prepare(config: &RelayConfig) -> Result<Supervisor, StartupError> {
    let settings = RelaySettings::from_config(config)?;
    let connector = UpstreamConnector::from_config(config);

    if !connector.socket_path().exists() {
        tracing::warn!(
            socket_path = ?connector.socket_path(),
            "Daemon socket does not exist yet; connections will fail until it appears"
        );
    }

    let listener = Listener::bind(&config.listener).await?;
    Ok(Supervisor::new(listener, connector, settings))
}

/// Run the relay until a termination signal, then drain in-flight connections.
pub async fn run(config: RelayConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let supervisor = prepare(&config).await?;
    let tracker = supervisor.tracker();

    let shutdown = Shutdown::new();
    let accept_shutdown = shutdown.subscribe();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            signals::wait_for_termination().await;
            shutdown.trigger();
        }
    });

    supervisor.run(accept_shutdown).await?;

    let grace = Duration::from_secs(config.timeouts.shutdown_grace_secs);
    let remaining = tracker.drain(grace).await;
    tracing::info!(abandoned_connections = remaining, "Shutdown complete");
    Ok(())
}

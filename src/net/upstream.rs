//! Connections to the engine daemon's control socket.
//!
//! One fresh Unix-socket connection per accepted client. No pooling, no
//! retries: a failed connect abandons that client connection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UnixStream;

use crate::config::RelayConfig;

/// Error type for upstream connects.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to connect to {path:?}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {path:?} timed out after {after:?}")]
    Timeout { path: PathBuf, after: Duration },
}

/// Opens connections to a fixed Unix socket path.
#[derive(Debug, Clone)]
pub struct UpstreamConnector {
    socket_path: PathBuf,
    connect_timeout: Duration,
}

impl UpstreamConnector {
    pub fn new(socket_path: impl Into<PathBuf>, connect_timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            &config.upstream.socket_path,
            Duration::from_secs(config.timeouts.connect_secs),
        )
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Open one new connection to the daemon.
    pub async fn connect(&self) -> Result<UnixStream, UpstreamError> {
        match tokio::time::timeout(self.connect_timeout, UnixStream::connect(&self.socket_path)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(UpstreamError::Connect {
                path: self.socket_path.clone(),
                source,
            }),
            Err(_) => Err(UpstreamError::Timeout {
                path: self.socket_path.clone(),
                after: self.connect_timeout,
            }),
        }
    }
}

//! TCP listener implementation with a connection ceiling.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections via semaphore, waiting or shedding at the limit
//! - Surface accept errors without tearing down the listener

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::config::{ListenerConfig, OverloadPolicy};

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
    /// The connection limiter was closed.
    Closed,
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
            ListenerError::Closed => write!(f, "Connection limiter closed"),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind(e) | ListenerError::Accept(e) => Some(e),
            ListenerError::Closed => None,
        }
    }
}

/// Result of one accept call.
#[derive(Debug)]
pub enum Admission {
    /// Connection admitted; the permit must live as long as the relay.
    Admitted(TcpStream, SocketAddr, ConnectionPermit),
    /// Connection accepted and closed because every slot was taken.
    Shed(SocketAddr),
}

/// A bounded TCP listener that limits concurrent connections.
///
/// With [`OverloadPolicy::Wait`] new connections stay in the kernel backlog
/// until a slot frees up. With [`OverloadPolicy::Shed`] they are accepted and
/// closed straight away.
#[derive(Debug)]
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
    overload: OverloadPolicy,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        Self::from_tcp(listener, config.max_connections, config.overload)
    }

    /// Wrap an already bound listener.
    pub fn from_tcp(
        listener: TcpListener,
        max_connections: usize,
        overload: OverloadPolicy,
    ) -> Result<Self, ListenerError> {
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections,
            overload = ?overload,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            overload,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    pub async fn accept(&self) -> Result<Admission, ListenerError> {
        match self.overload {
            OverloadPolicy::Wait => {
                // Acquire permit first (backpressure)
                let permit = self
                    .connection_limit
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| ListenerError::Closed)?;

                let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
                self.admitted(stream, addr, permit)
            }
            OverloadPolicy::Shed => {
                let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
                match self.connection_limit.clone().try_acquire_owned() {
                    Ok(permit) => self.admitted(stream, addr, permit),
                    Err(tokio::sync::TryAcquireError::Closed) => Err(ListenerError::Closed),
                    Err(tokio::sync::TryAcquireError::NoPermits) => {
                        drop(stream);
                        Ok(Admission::Shed(addr))
                    }
                }
            }
        }
    }

    fn admitted(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) -> Result<Admission, ListenerError> {
        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );
        Ok(Admission::Admitted(stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool,
/// even if the relay task panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn local(max: usize, overload: OverloadPolicy) -> Listener {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Listener::from_tcp(tcp, max, overload).unwrap()
    }

    #[tokio::test]
    async fn permit_released_on_drop() {
        let listener = local(2, OverloadPolicy::Wait).await;
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();

        let admission = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 1);
        drop(admission);
        assert_eq!(listener.available_permits(), 2);
        assert_eq!(listener.max_connections(), 2);
    }

    #[tokio::test]
    async fn sheds_when_full() {
        let listener = local(1, OverloadPolicy::Shed).await;
        let addr = listener.local_addr().unwrap();

        let _first = TcpStream::connect(addr).await.unwrap();
        let held = listener.accept().await.unwrap();
        assert!(matches!(held, Admission::Admitted(..)));

        let mut second = TcpStream::connect(addr).await.unwrap();
        let shed = listener.accept().await.unwrap();
        assert!(matches!(shed, Admission::Shed(_)));

        let mut buf = [0u8; 8];
        let read = second.read(&mut buf).await;
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn bind_rejects_bad_address() {
        let config = ListenerConfig {
            bind_address: "localhost-ish".into(),
            ..ListenerConfig::default()
        };
        assert!(matches!(Listener::bind(&config).await, Err(ListenerError::Bind(_))));
    }
}

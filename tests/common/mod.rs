//! Shared utilities for relay integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use engine_relay::config::OverloadPolicy;
use engine_relay::net::{ConnectionTracker, Listener, UpstreamConnector};
use engine_relay::{RelaySettings, Shutdown, Supervisor};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc;

/// A relay running on an ephemeral port.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub tracker: ConnectionTracker,
}

/// A fresh directory and a socket path inside it.
pub fn temp_socket() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daemon.sock");
    (dir, path)
}

/// Start a relay in front of `socket_path`.
pub async fn start_relay(
    socket_path: &Path,
    settings: RelaySettings,
    max_connections: usize,
    overload: OverloadPolicy,
) -> TestRelay {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = Listener::from_tcp(tcp, max_connections, overload).unwrap();
    let connector = UpstreamConnector::new(socket_path, Duration::from_secs(2));
    let supervisor = Supervisor::new(listener, connector, settings);

    let addr = supervisor.local_addr().unwrap();
    let tracker = supervisor.tracker();
    let shutdown = Shutdown::new();
    let accept_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = supervisor.run(accept_shutdown).await;
    });

    TestRelay {
        addr,
        shutdown,
        tracker,
    }
}

/// Relay with default settings and a generous ceiling.
pub async fn start_default_relay(socket_path: &Path) -> TestRelay {
    start_relay(socket_path, RelaySettings::default(), 1024, OverloadPolicy::Wait).await
}

/// Daemon that records everything a connection sends (until the client
/// half-closes), then answers with `response` and closes.
pub fn start_recording_daemon(path: &Path, response: &'static [u8]) -> mpsc::UnboundedReceiver<Vec<u8>> {
    let listener = UnixListener::bind(path).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut received = Vec::new();
                let _ = stream.read_to_end(&mut received).await;
                let _ = tx.send(received);
                let _ = stream.write_all(response).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    rx
}

/// Daemon that echoes every byte back and half-closes after the client does.
pub fn start_echo_daemon(path: &Path) {
    let listener = UnixListener::bind(path).unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rx, mut tx) = stream.into_split();
                let _ = tokio::io::copy(&mut rx, &mut tx).await;
                let _ = tx.shutdown().await;
            });
        }
    });
}

/// Daemon that reads until EOF and never writes.
pub fn start_silent_daemon(path: &Path) {
    let listener = UnixListener::bind(path).unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut sink = Vec::new();
                let _ = stream.read_to_end(&mut sink).await;
            });
        }
    });
}

/// Daemon with custom per-connection behaviour.
pub fn start_programmable_daemon<F, Fut>(path: &Path, handler: F)
where
    F: Fn(UnixStream) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = UnixListener::bind(path).unwrap();
    let handler = std::sync::Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move { handler(stream).await });
        }
    });
}

/// Send `request`, half-close, and collect everything until the relay closes.
///
/// Writing and reading run concurrently so large echoed payloads cannot
/// deadlock on full socket buffers.
pub async fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut rx, mut tx) = stream.into_split();

    let request = request.to_vec();
    let writer = tokio::spawn(async move {
        tx.write_all(&request).await.unwrap();
        tx.shutdown().await.unwrap();
        tx
    });

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), rx.read_to_end(&mut response))
        .await
        .expect("relay did not close the connection")
        .unwrap();
    let _tx = writer.await.unwrap();
    response
}

/// Read from `stream` until a blank line ends a request head.
pub async fn read_head(stream: &mut UnixStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.unwrap() == 0 {
            break;
        }
        head.push(byte[0]);
    }
    head
}

/// Poll until `check` holds or two seconds pass.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

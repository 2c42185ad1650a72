//! One direction of a relayed connection.
//!
//! # Responsibilities
//! - Copy bytes from one socket half to the other through a [`ChunkTransform`]
//! - Half-close the peer when the source ends, fails, or goes idle
//! - Record why the direction ended, for diagnostics
//!
//! # Design Decisions
//! - Errors are treated like EOF for propagation but reported distinctly
//! - The idle deadline is shared by both directions of a connection, so a
//!   quiet side does not time out while the other side is busy

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::relay::framing::ChunkTransform;

/// Which way bytes flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client → daemon (rewritten).
    Outbound,
    /// Daemon → client (verbatim).
    Inbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outbound => "outbound",
            Direction::Inbound => "inbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a direction stopped.
#[derive(Debug)]
pub enum DirectionEnd {
    /// The source sent EOF.
    Eof,
    /// Neither direction moved a byte for the whole idle deadline.
    Idle,
    /// Reading from the source failed.
    ReadFailed(io::Error),
    /// Writing to the destination failed.
    WriteFailed(io::Error),
}

impl DirectionEnd {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            DirectionEnd::Eof => "eof",
            DirectionEnd::Idle => "idle",
            DirectionEnd::ReadFailed(_) => "read_error",
            DirectionEnd::WriteFailed(_) => "write_error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DirectionEnd::ReadFailed(_) | DirectionEnd::WriteFailed(_))
    }
}

impl fmt::Display for DirectionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectionEnd::Eof => write!(f, "end of stream"),
            DirectionEnd::Idle => write!(f, "idle timeout"),
            DirectionEnd::ReadFailed(e) => write!(f, "read failed: {}", e),
            DirectionEnd::WriteFailed(e) => write!(f, "write failed: {}", e),
        }
    }
}

/// Outcome of one direction.
#[derive(Debug)]
pub struct DirectionReport {
    pub direction: Direction,
    /// Bytes read from the source.
    pub bytes_read: u64,
    /// Bytes written to the destination (after rewriting).
    pub bytes_written: u64,
    pub end: DirectionEnd,
}

/// Last time either direction of a connection moved data.
#[derive(Debug)]
pub struct Activity {
    origin: Instant,
    last_millis: AtomicU64,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_millis: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_millis.fetch_max(now, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_millis.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Read once, waiting no longer than the connection's idle deadline.
///
/// Returns `Ok(None)` when the connection went idle.
async fn read_or_idle<R>(
    reader: &mut R,
    buf: &mut [u8],
    activity: &Activity,
    idle: Option<Duration>,
) -> io::Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    let Some(limit) = idle else {
        return reader.read(buf).await.map(Some);
    };
    loop {
        let remaining = limit.saturating_sub(activity.idle_for());
        if remaining.is_zero() {
            return Ok(None);
        }
        // Reads are cancel safe; on expiry re-check whether the other side kept the connection alive.
        if let Ok(result) = tokio::time::timeout(remaining, reader.read(buf)).await {
            return result.map(Some);
        }
    }
}

async fn write_or_idle<W>(writer: &mut W, data: &[u8], idle: Option<Duration>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match idle {
        None => writer.write_all(data).await,
        Some(limit) => tokio::time::timeout(limit, writer.write_all(data))
            .await
            .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "peer stopped reading"))),
    }
}

/// Parameters shared by both directions of one connection.
#[derive(Debug, Clone, Copy)]
pub struct PumpOptions {
    pub buffer_size: usize,
    pub idle_timeout: Option<Duration>,
}

/// Copy `reader` into `writer` until the source ends, then half-close `writer`.
pub async fn pump<R, W, T>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    transform: &mut T,
    activity: &Activity,
    options: PumpOptions,
) -> DirectionReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    T: ChunkTransform + ?Sized,
{
    let mut buf = vec![0u8; options.buffer_size];
    let mut out = BytesMut::new();
    let mut bytes_read = 0u64;
    let mut bytes_written = 0u64;

    let mut end = loop {
        let n = match read_or_idle(&mut reader, &mut buf, activity, options.idle_timeout).await {
            Ok(Some(0)) => break DirectionEnd::Eof,
            Ok(Some(n)) => n,
            Ok(None) => break DirectionEnd::Idle,
            Err(e) => break DirectionEnd::ReadFailed(e),
        };
        activity.touch();
        bytes_read += n as u64;

        let data = transform.transform(&buf[..n], &mut out);
        if data.is_empty() {
            continue;
        }
        if let Err(e) = write_or_idle(&mut writer, data, options.idle_timeout).await {
            break DirectionEnd::WriteFailed(e);
        }
        activity.touch();
        bytes_written += data.len() as u64;
    };

    if !matches!(end, DirectionEnd::WriteFailed(_)) {
        let tail = transform.finish(&mut out);
        if !tail.is_empty() {
            match write_or_idle(&mut writer, tail, options.idle_timeout).await {
                Ok(()) => bytes_written += tail.len() as u64,
                Err(e) => end = DirectionEnd::WriteFailed(e),
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::trace!(%direction, error = %e, "Half-close failed");
    }

    tracing::trace!(%direction, bytes_read, bytes_written, end = %end, "Direction finished");

    DirectionReport {
        direction,
        bytes_read,
        bytes_written,
        end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::framing::Passthrough;
    use tokio::io::duplex;

    const OPTIONS: PumpOptions = PumpOptions {
        buffer_size: 64,
        idle_timeout: None,
    };

    #[tokio::test]
    async fn copies_until_eof_and_half_closes() {
        let (mut src_far, src) = duplex(256);
        let (dst, mut dst_far) = duplex(256);
        let activity = Activity::new();

        let writer = tokio::spawn(async move {
            src_far.write_all(b"hello relay").await.unwrap();
            src_far.shutdown().await.unwrap();
            src_far
        });

        let report = pump(Direction::Inbound, src, dst, &mut Passthrough, &activity, OPTIONS).await;
        let _src_far = writer.await.unwrap();

        let mut received = Vec::new();
        dst_far.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello relay");
        assert_eq!(report.bytes_read, 11);
        assert_eq!(report.bytes_written, 11);
        assert!(matches!(report.end, DirectionEnd::Eof));
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let (mut src_far, src) = duplex(256);
        let (dst, dst_far) = duplex(256);
        drop(dst_far);
        let activity = Activity::new();

        src_far.write_all(b"data").await.unwrap();
        let report = pump(Direction::Outbound, src, dst, &mut Passthrough, &activity, OPTIONS).await;
        assert!(matches!(report.end, DirectionEnd::WriteFailed(_)));
        assert!(report.end.is_error());
        assert_eq!(report.bytes_written, 0);
    }

    #[tokio::test]
    async fn idle_source_ends_direction() {
        let (_src_far, src) = duplex(64);
        let (dst, mut dst_far) = duplex(64);
        let activity = Activity::new();
        let options = PumpOptions {
            buffer_size: 64,
            idle_timeout: Some(Duration::from_millis(50)),
        };

        let report = pump(Direction::Outbound, src, dst, &mut Passthrough, &activity, options).await;
        assert!(matches!(report.end, DirectionEnd::Idle));

        let mut received = Vec::new();
        dst_far.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn activity_elsewhere_keeps_direction_open() {
        let (_src_far, src) = duplex(64);
        let (dst, _dst_far) = duplex(64);
        let activity = Activity::new();
        let options = PumpOptions {
            buffer_size: 64,
            idle_timeout: Some(Duration::from_millis(80)),
        };

        let mut passthrough = Passthrough;
        let start = Instant::now();
        let keepalive = async {
            for _ in 0..4 {
                tokio::time::sleep(Duration::from_millis(40)).await;
                activity.touch();
            }
        };
        let (report, ()) = tokio::join!(
            pump(Direction::Inbound, src, dst, &mut passthrough, &activity, options),
            keepalive
        );
        assert!(matches!(report.end, DirectionEnd::Idle));
        assert!(start.elapsed() >= Duration::from_millis(160));
    }

    #[test]
    fn end_reasons() {
        assert_eq!(DirectionEnd::Eof.reason(), "eof");
        assert_eq!(DirectionEnd::Idle.reason(), "idle");
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(DirectionEnd::ReadFailed(err).reason(), "read_error");
    }
}

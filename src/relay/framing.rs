//! Incremental request-head framing for the client → daemon stream.
//!
//! Reads from the client socket can split a request line or header block at
//! any byte. The framer buffers until a whole head is available, rewrites it
//! once, and passes body bytes through untouched.
//!
//! ```text
//!          ┌──────── head complete ────────┐
//!          │                                ▼
//!   ┌──────┴─┐  Content-Length: N    ┌──────────┐
//!   │  Head  │ ────────────────────▶ │ Body(N)  │ ── N bytes ──▶ Head
//!   └──────┬─┘                       └──────────┘
//!          │ not a request / too large / Upgrade / Transfer-Encoding
//!          ▼
//!   ┌──────────┐
//!   │  Tunnel  │  verbatim until EOF
//!   └──────────┘
//! ```

use std::sync::Arc;

use bytes::BytesMut;

use crate::config::RewritePolicy;
use crate::relay::rewrite::{RewriteScope, Rewriter};

/// Longest method token accepted at the start of a request line.
const MAX_METHOD_LEN: usize = 16;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Converts bytes read from one side into bytes written to the other.
pub trait ChunkTransform: Send {
    /// Transform `chunk`, returning the bytes to forward now.
    ///
    /// `out` is scratch space owned by the caller.
    fn transform<'a>(&mut self, chunk: &'a [u8], out: &'a mut BytesMut) -> &'a [u8];

    /// Flush anything still buffered at end of stream.
    fn finish<'a>(&mut self, out: &'a mut BytesMut) -> &'a [u8];
}

/// Forwards every byte unchanged (daemon → client).
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl ChunkTransform for Passthrough {
    fn transform<'a>(&mut self, chunk: &'a [u8], _out: &'a mut BytesMut) -> &'a [u8] {
        chunk
    }

    fn finish<'a>(&mut self, _out: &'a mut BytesMut) -> &'a [u8] {
        &[]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Head,
    Body(u64),
    Tunnel,
}

/// Splits the client stream into request heads (rewritten) and everything
/// else (verbatim).
#[derive(Debug)]
pub struct RequestFramer {
    rewriter: Arc<Rewriter>,
    policy: RewritePolicy,
    max_head_bytes: usize,
    state: FrameState,
    pending: BytesMut,
    /// Offset in `pending` already searched for the head terminator.
    scanned: usize,
    requests: u64,
}

impl RequestFramer {
    pub fn new(rewriter: Arc<Rewriter>, policy: RewritePolicy, max_head_bytes: usize) -> Self {
        Self {
            rewriter,
            policy,
            max_head_bytes,
            state: FrameState::Head,
            pending: BytesMut::new(),
            scanned: 0,
            requests: 0,
        }
    }

    /// Number of request heads rewritten so far.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// True once the framer has given up on parsing and forwards raw bytes.
    pub fn is_tunnel(&self) -> bool {
        self.state == FrameState::Tunnel
    }

    fn scope_for_next(&self) -> RewriteScope {
        match self.policy {
            RewritePolicy::EveryRequest => RewriteScope::Full,
            RewritePolicy::FirstRequest if self.requests == 0 => RewriteScope::Full,
            RewritePolicy::FirstRequest => RewriteScope::PathOnly,
        }
    }

    fn emit_head(&mut self, head: &[u8], out: &mut BytesMut) {
        let scope = self.scope_for_next();
        out.extend_from_slice(&self.rewriter.rewrite(head, scope));
        self.requests += 1;
        crate::observability::metrics::request_rewritten(scope);
    }

    fn drain(&mut self, out: &mut BytesMut) {
        loop {
            match self.state {
                FrameState::Tunnel => {
                    out.extend_from_slice(&self.pending);
                    self.pending.clear();
                    return;
                }
                FrameState::Body(remaining) => {
                    let take = remaining.min(self.pending.len() as u64) as usize;
                    out.extend_from_slice(&self.pending.split_to(take));
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        FrameState::Head
                    } else {
                        FrameState::Body(remaining)
                    };
                    if self.pending.is_empty() {
                        return;
                    }
                }
                FrameState::Head => {
                    if self.pending.is_empty() {
                        return;
                    }
                    let blank = leading_line_breaks(&self.pending);
                    if blank > 0 {
                        out.extend_from_slice(&self.pending.split_to(blank));
                        self.scanned = 0;
                        continue;
                    }
                    if !could_start_request(&self.pending) {
                        tracing::trace!("Client bytes are not a request head, tunnelling");
                        self.state = FrameState::Tunnel;
                        continue;
                    }
                    let from = self.scanned.saturating_sub(HEAD_TERMINATOR.len() - 1);
                    match find_head_end(&self.pending, from) {
                        Some(end) => {
                            let head = self.pending.split_to(end);
                            self.scanned = 0;
                            self.emit_head(&head, out);
                            self.state = next_state(&head);
                        }
                        None if self.pending.len() > self.max_head_bytes => {
                            tracing::debug!(
                                buffered = self.pending.len(),
                                max_head_bytes = self.max_head_bytes,
                                "Request head too large, tunnelling"
                            );
                            self.scanned = 0;
                            self.state = FrameState::Tunnel;
                        }
                        None => {
                            self.scanned = self.pending.len();
                            return;
                        }
                    }
                }
            }
        }
    }
}

impl ChunkTransform for RequestFramer {
    fn transform<'a>(&mut self, chunk: &'a [u8], out: &'a mut BytesMut) -> &'a [u8] {
        out.clear();
        if self.state == FrameState::Tunnel && self.pending.is_empty() {
            return chunk;
        }
        self.pending.extend_from_slice(chunk);
        self.drain(out);
        &out[..]
    }

    fn finish<'a>(&mut self, out: &'a mut BytesMut) -> &'a [u8] {
        out.clear();
        if !self.pending.is_empty() {
            let partial = self.pending.split();
            if self.state == FrameState::Head {
                self.emit_head(&partial, out);
            } else {
                out.extend_from_slice(&partial);
            }
        }
        self.state = FrameState::Tunnel;
        &out[..]
    }
}

/// Count of CR and LF bytes before a request line. Empty lines between
/// requests are forwarded as-is.
fn leading_line_breaks(buf: &[u8]) -> usize {
    buf.iter().take_while(|&&b| b == b'\r' || b == b'\n').count()
}

/// Whether `buf` can still be the start of `METHOD SP ...`.
fn could_start_request(buf: &[u8]) -> bool {
    let method_len = buf.iter().take_while(|b| b.is_ascii_uppercase()).count();
    match buf.get(method_len) {
        None => method_len <= MAX_METHOD_LEN,
        Some(b' ') => (1..=MAX_METHOD_LEN).contains(&method_len),
        Some(_) => false,
    }
}

/// Index just past the blank line ending the head.
fn find_head_end(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
        .map(|pos| from + pos + HEAD_TERMINATOR.len())
}

/// Header lines of a head as `(name, value)` with whitespace trimmed.
fn header_fields(head: &[u8]) -> impl Iterator<Item = (&[u8], &[u8])> {
    head.split(|&b| b == b'\n').skip(1).filter_map(|line| {
        let colon = line.iter().position(|&b| b == b':')?;
        let (name, value) = line.split_at(colon);
        Some((name.trim_ascii(), value[1..].trim_ascii()))
    })
}

/// Decide what follows a complete head.
fn next_state(head: &[u8]) -> FrameState {
    let mut body = 0u64;
    for (name, value) in header_fields(head) {
        if name.eq_ignore_ascii_case(b"transfer-encoding") || name.eq_ignore_ascii_case(b"upgrade") {
            return FrameState::Tunnel;
        }
        if name.eq_ignore_ascii_case(b"connection")
            && value
                .split(|&b| b == b',')
                .any(|token| token.trim_ascii().eq_ignore_ascii_case(b"upgrade"))
        {
            return FrameState::Tunnel;
        }
        if name.eq_ignore_ascii_case(b"content-length") {
            match std::str::from_utf8(value).ok().and_then(|v| v.parse::<u64>().ok()) {
                Some(len) => body = len,
                None => return FrameState::Tunnel,
            }
        }
    }
    if body > 0 {
        FrameState::Body(body)
    } else {
        FrameState::Head
    }
}

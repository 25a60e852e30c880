// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `TransportSocket`: the opaque handle exposing connect/accept/send/recv/
//! disconnect as async operations (§1, "platform-specific socket
//! primitives"). The rest of the network core only ever talks to this
//! trait, never to `tokio::net::TcpStream` directly, mirroring the
//! teacher's own split of `ClientConnection`'s reader/writer halves behind
//! a `Mutex` in `client/client.rs`.

use std::fmt::Debug;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

/// An established, bidirectional, framed-byte-stream transport.
///
/// Implementations must uphold the "one outstanding recv / one outstanding
/// send" constraint from §3 — the trait itself only guarantees they *can*
/// be upheld by serializing access with an internal lock; callers must
/// still avoid concurrent `recv` calls against the same instance (the
/// session state machine in `net/session.rs` is the only caller and already
/// respects this).
#[async_trait::async_trait]
pub trait TransportSocket: Send + Sync + Debug {
    /// Reads at least one byte into `buf`, returning the number of bytes
    /// read, or `0` on clean EOF.
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Writes every buffer in `bufs` to the wire as a single logical send.
    async fn send_vectored(&self, bufs: &[Bytes]) -> std::io::Result<()>;

    /// Half-closes the write side (sends FIN). Idempotent.
    async fn shutdown(&self) -> std::io::Result<()>;

    /// The remote peer's address, if known.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// The concrete, production [`TransportSocket`] backed by a split
/// `tokio::net::TcpStream`.
#[derive(Debug)]
pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    peer_addr: Option<SocketAddr>,
}

impl TcpTransport {
    /// Wraps an already-connected or already-accepted stream.
    pub fn from_stream(stream: TcpStream) -> std::io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr().ok();
        let (r, w) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(r),
            writer: Mutex::new(w),
            peer_addr,
        })
    }

    /// Connects to `addr` and wraps the resulting stream.
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream)
    }
}

#[async_trait::async_trait]
impl TransportSocket for TcpTransport {
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut r = self.reader.lock().await;
        r.read(buf).await
    }

    async fn send_vectored(&self, bufs: &[Bytes]) -> std::io::Result<()> {
        let mut w = self.writer.lock().await;
        for b in bufs {
            w.write_all(b).await?;
        }
        Ok(())
    }

    async fn shutdown(&self) -> std::io::Result<()> {
        let mut w = self.writer.lock().await;
        w.shutdown().await
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

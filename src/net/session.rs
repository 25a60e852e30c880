// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The per-connection lifecycle state machine (§4.3): `New -> Init ->
//! {Connecting|Accepted} -> Connected -> Closing -> Closed`, plus the recv
//! loop that turns raw bytes into framed packets routed onto the reactor's
//! global queue.

use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use anyhow::Result;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::codec::packet::Packet;
use crate::net::multi_sender::MultiSender;
use crate::net::perf::PerfCounters;
use crate::net::receive_buffer::ReceiveBuffer;
use crate::net::transport::TransportSocket;

/// Process-global, monotonically increasing session id source.
static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

pub fn next_session_id() -> u32 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle states from §4.3, encoded as a `u8` so reads don't need a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    New = 0,
    Init = 1,
    Connecting = 2,
    Accepted = 3,
    Connected = 4,
    Closing = 5,
    Closed = 6,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::New,
            1 => Self::Init,
            2 => Self::Connecting,
            3 => Self::Accepted,
            4 => Self::Connected,
            5 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// A packet freshly parsed off one session's recv loop, tagged with the
/// session it arrived on so the reactor can route it to the right section.
#[derive(Debug, Clone)]
pub struct InboundPacket {
    pub session_id: u32,
    pub packet: Arc<Packet>,
}

/// A registered handler: invoked with the owning session and the decoded
/// packet. Handlers are installed during `Init` and the map is immutable
/// once the session reaches `Connected` (§3 invariant).
pub type HandlerFn = dyn Fn(Arc<Session>, Arc<Packet>) + Send + Sync;

/// One established TCP connection (§3 `Session`).
#[derive(Debug)]
pub struct Session {
    id: u32,
    remote_addr: Option<SocketAddr>,
    transport: Arc<dyn TransportSocket>,
    recv_buffer: Mutex<ReceiveBuffer>,
    sender: MultiSender,
    handlers: DashMap<u16, Arc<HandlerFn>>,
    state: AtomicU8,
    section_id: Mutex<Option<u32>>,
    /// §9: opt-in strict dispatch — disconnect instead of log-and-ignore on
    /// an unregistered protocol id.
    strict_protocol_dispatch: bool,
    perf: Arc<PerfCounters>,
}

impl Session {
    pub fn new(
        transport: Arc<dyn TransportSocket>,
        strict_protocol_dispatch: bool,
        perf: Arc<PerfCounters>,
    ) -> Arc<Self> {
        let remote_addr = transport.peer_addr();
        Arc::new(Self {
            id: next_session_id(),
            remote_addr,
            sender: MultiSender::new(transport.clone(), perf.clone()),
            transport,
            recv_buffer: Mutex::new(ReceiveBuffer::default()),
            handlers: DashMap::new(),
            state: AtomicU8::new(SessionState::New as u8),
            section_id: Mutex::new(None),
            strict_protocol_dispatch,
            perf,
        })
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    fn set_state(&self, s: SessionState) {
        self.state.store(s as u8, Ordering::Release);
    }

    /// Registers a handler for `protocol_no`. Callers must finish all
    /// registration before the session transitions to `Connected`.
    pub fn register_handler<F>(&self, protocol_no: u16, handler: F)
    where F: Fn(Arc<Session>, Arc<Packet>) + Send + Sync + 'static {
        self.handlers.insert(protocol_no, Arc::new(handler));
        if self.state() == SessionState::New {
            self.set_state(SessionState::Init);
        }
    }

    /// Server-side entry: the accept already delivered the peer address, so
    /// `Connected` is entered directly (§4.3).
    pub fn mark_accepted(&self) {
        self.set_state(SessionState::Accepted);
        self.set_state(SessionState::Connected);
    }

    /// Client-side entry: call once the underlying connect future resolves.
    pub fn mark_connecting_then_connected(&self) {
        self.set_state(SessionState::Connecting);
        self.set_state(SessionState::Connected);
    }

    pub async fn set_section(&self, section_id: u32) {
        *self.section_id.lock().await = Some(section_id);
    }

    pub async fn section(&self) -> Option<u32> {
        *self.section_id.lock().await
    }

    pub async fn clear_section(&self) {
        *self.section_id.lock().await = None;
    }

    /// Enqueues `packet` for send via this session's [`MultiSender`].
    pub async fn send_packet(&self, packet: Arc<Packet>) {
        self.sender.register_packet(packet).await;
    }

    /// Idempotent: `Closed -> Closed` is a no-op; `Closing -> Closed` and
    /// `Connected -> Closing -> Closed` run exactly once (testable property
    /// 5).
    pub async fn disconnect(&self) {
        loop {
            let cur = self.state.load(Ordering::Acquire);
            if cur == SessionState::Closed as u8 {
                return;
            }
            if cur == SessionState::Closing as u8 {
                break;
            }
            if self
                .state
                .compare_exchange(
                    cur,
                    SessionState::Closing as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break;
            }
        }
        self.sender.clear().await;
        if let Err(e) = self.transport.shutdown().await {
            debug!("session {} shutdown error (ignored): {e}", self.id);
        }
        self.set_state(SessionState::Closed);
    }

    /// Looks up and invokes the handler registered for `packet.protocol_no()`
    /// (§4.3 "Handler dispatch"). On a miss, logs and returns by default,
    /// unless `strict_protocol_dispatch` is set, in which case the session
    /// disconnects.
    pub async fn execute_packet(self: &Arc<Self>, packet: Arc<Packet>) {
        let protocol_no = packet.protocol_no();
        let Some(handler) = self.handlers.get(&protocol_no).map(|h| h.clone()) else {
            if self.strict_protocol_dispatch {
                warn!(
                    "session {} disconnecting: unregistered protocol_no={protocol_no}",
                    self.id
                );
                self.disconnect().await;
            } else {
                debug!(
                    "session {} ignoring unregistered protocol_no={protocol_no}",
                    self.id
                );
            }
            return;
        };
        handler(self.clone(), packet);
    }

    /// Drives the recv loop: reads bytes off the transport, frames as many
    /// whole packets as are available, and forwards each onto `packet_tx` for
    /// the reactor to route. Runs until EOF, an I/O error, a framing
    /// violation, or the queue's receiver is gone.
    pub async fn recv_loop(
        self: Arc<Self>,
        packet_tx: tokio::sync::mpsc::Sender<InboundPacket>,
    ) -> Result<()> {
        loop {
            if !self.is_connected() {
                return Ok(());
            }

            let n = {
                let mut buf = self.recv_buffer.lock().await;
                if buf.remaining() == 0 {
                    warn!("session {} recv buffer full, disconnecting", self.id);
                    self.disconnect().await;
                    return Ok(());
                }
                self.transport.recv(buf.writable_mut()).await?
            };

            if n == 0 {
                debug!("session {} EOF", self.id);
                self.disconnect().await;
                return Ok(());
            }

            let mut consumed_total = 0usize;
            {
                let mut buf = self.recv_buffer.lock().await;
                buf.on_write(n);

                loop {
                    match Packet::try_parse_one(buf.readable()) {
                        Ok(Some((packet, consumed))) => {
                            consumed_total += consumed;
                            buf.on_read(consumed);
                            self.perf.record_recv();
                            let envelope = InboundPacket {
                                session_id: self.id,
                                packet: Arc::new(packet),
                            };
                            if packet_tx.send(envelope).await.is_err() {
                                // Reactor is gone: §4.3 "null owning reactor"
                                // disconnects and drops the rest in flight.
                                drop(buf);
                                self.disconnect().await;
                                return Ok(());
                            }
                        },
                        Ok(None) => break,
                        Err(e) => {
                            warn!("session {} framing violation: {e}", self.id);
                            drop(buf);
                            self.disconnect().await;
                            return Ok(());
                        },
                    }
                }
            }
            let _ = consumed_total;
        }
    }
}

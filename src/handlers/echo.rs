// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `TestEcho` handler (§8 S1): a synchronous reply, no database involved.
//! Registered directly on the session's section worker task.

use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use crate::codec::message::Message;
use crate::codec::packet::Packet;
use crate::messages::EchoMessage;
use crate::net::session::Session;

pub fn register(session: &Arc<Session>) {
    session.register_handler(EchoMessage::protocol_no(), |session, packet| {
        let body: &Bytes = packet.body();
        let request = match EchoMessage::decode(body) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("session {}: malformed TestEcho body: {e}", session.id());
                return;
            },
        };

        let reply = EchoMessage {
            session_id: session.id(),
            rand_number: request.rand_number,
        };
        let Ok(encoded) = reply.encode() else {
            warn!("session {}: failed to encode TestEcho reply", session.id());
            return;
        };
        let packet = Arc::new(Packet::new(EchoMessage::protocol_no(), encoded));

        tokio::spawn(async move { session.send_packet(packet).await });
    });
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::net::transport::TransportSocket;

    #[derive(Debug, Default)]
    struct RecordingTransport {
        sent: std::sync::Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl TransportSocket for RecordingTransport {
        async fn recv(&self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        async fn send_vectored(&self, bufs: &[Bytes]) -> std::io::Result<()> {
            self.sent.lock().expect("lock").extend_from_slice(bufs);
            Ok(())
        }

        async fn shutdown(&self) -> std::io::Result<()> {
            Ok(())
        }

        fn peer_addr(&self) -> Option<SocketAddr> {
            None
        }
    }

    #[tokio::test]
    async fn replies_with_assigned_session_id() {
        let transport = Arc::new(RecordingTransport::default());
        let session = Session::new(
            transport.clone(),
            false,
            Arc::new(crate::net::perf::PerfCounters::default()),
        );
        session.mark_accepted();
        register(&session);

        let (_tx, _rx) = mpsc::channel(1);
        let request = EchoMessage {
            session_id: 0,
            rand_number: 42,
        };
        let packet = Arc::new(Packet::new(EchoMessage::protocol_no(), request.encode().expect("encode")));
        session.execute_packet(packet).await;

        for _ in 0..50 {
            if !transport.sent.lock().expect("lock").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let sent = transport.sent.lock().expect("lock");
        assert_eq!(sent.len(), 1);
        let wire = &sent[0];
        let body = &wire[crate::codec::header::HEADER_LEN..];
        let reply = EchoMessage::decode(body).expect("decode reply");
        assert_eq!(reply.session_id, session.id());
        assert_eq!(reply.rand_number, 42);
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Property 1: a complete packet framed with its header survives being
//! split across reads at *every* possible byte boundary, not just the one
//! midpoint case covered at the unit level in `net::session`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use netdb_core::codec::packet::Packet;
use netdb_core::net::perf::PerfCounters;
use netdb_core::net::session::Session;
use netdb_core::net::transport::TransportSocket;

#[derive(Debug, Default)]
struct ScriptedTransport {
    chunks: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl TransportSocket for ScriptedTransport {
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut chunks = self.chunks.lock().expect("lock poisoned");
        if chunks.is_empty() {
            return Ok(0);
        }
        let chunk = chunks.remove(0);
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    async fn send_vectored(&self, _bufs: &[Bytes]) -> std::io::Result<()> {
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
async fn every_split_point_still_delivers_the_frame_intact() {
    let packet = Packet::new(11, Bytes::from_static(b"a somewhat longer body than usual"));
    let wire = packet.to_wire_bytes();

    for split_at in 1..wire.len() {
        let transport = Arc::new(ScriptedTransport {
            chunks: Mutex::new(vec![wire[..split_at].to_vec(), wire[split_at..].to_vec()]),
        });
        let session = Session::new(transport, false, Arc::new(PerfCounters::default()));
        session.mark_accepted();

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let handle = tokio::spawn(session.clone().recv_loop(tx));

        let inbound = rx.recv().await.unwrap_or_else(|| panic!("no packet delivered for split_at={split_at}"));
        assert_eq!(inbound.packet.protocol_no(), 11, "split_at={split_at}");
        assert_eq!(inbound.packet.body().as_ref(), b"a somewhat longer body than usual", "split_at={split_at}");

        handle.await.expect("recv loop joined").expect("no error");
    }
}

#[tokio::test]
async fn two_frames_delivered_back_to_back_in_one_read_both_arrive() {
    let a = Packet::new(1, Bytes::from_static(b"first"));
    let b = Packet::new(2, Bytes::from_static(b"second"));
    let mut wire = a.to_wire_bytes().to_vec();
    wire.extend_from_slice(&b.to_wire_bytes());

    let transport = Arc::new(ScriptedTransport {
        chunks: Mutex::new(vec![wire]),
    });
    let session = Session::new(transport, false, Arc::new(PerfCounters::default()));
    session.mark_accepted();

    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    let handle = tokio::spawn(session.clone().recv_loop(tx));

    let first = rx.recv().await.expect("first packet delivered");
    let second = rx.recv().await.expect("second packet delivered");
    assert_eq!(first.packet.protocol_no(), 1);
    assert_eq!(second.packet.protocol_no(), 2);

    handle.await.expect("recv loop joined").expect("no error");
}

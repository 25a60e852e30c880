// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! S1: a client connects, sends `TestEcho{rand_number: 42}`, and the
//! server replies on the same protocol id with the session id it assigned.

use netdb_core::codec::message::Message;
use netdb_core::codec::packet::Packet;
use netdb_core::messages::EchoMessage;
use tokio::net::TcpStream;

use crate::integration_tests::common::{TestServer, read_packet, write_packet};

#[tokio::test]
async fn echoes_back_with_the_assigned_session_id() {
    let server = TestServer::start(19101).await;

    let mut stream = TcpStream::connect(server.addr).await.expect("connect to test server");

    let request = EchoMessage {
        session_id: 0,
        rand_number: 42,
    };
    let packet = Packet::new(EchoMessage::protocol_no(), request.encode().expect("encode"));
    write_packet(&mut stream, &packet).await.expect("write request");

    let reply_packet = read_packet(&mut stream).await.expect("read reply");
    assert_eq!(reply_packet.protocol_no(), EchoMessage::protocol_no());

    let reply = EchoMessage::decode(reply_packet.body()).expect("decode reply");
    assert_eq!(reply.rand_number, 42);
    assert_ne!(reply.session_id, 0);
}

#[tokio::test]
async fn two_sessions_get_distinct_assigned_ids() {
    let server = TestServer::start(19102).await;

    let mut a = TcpStream::connect(server.addr).await.expect("connect a");
    let mut b = TcpStream::connect(server.addr).await.expect("connect b");

    let request = EchoMessage {
        session_id: 0,
        rand_number: 7,
    };
    let packet = Packet::new(EchoMessage::protocol_no(), request.encode().expect("encode"));
    write_packet(&mut a, &packet).await.expect("write a");
    write_packet(&mut b, &packet).await.expect("write b");

    let reply_a = EchoMessage::decode(read_packet(&mut a).await.expect("read a").body()).expect("decode a");
    let reply_b = EchoMessage::decode(read_packet(&mut b).await.expect("read b").body()).expect("decode b");

    assert_ne!(reply_a.session_id, reply_b.session_id);
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! S2–S4 end to end over a real TCP connection: register succeeds, the
//! same registration is then rejected as a duplicate, and logging in with
//! the wrong password is rejected.

use netdb_core::codec::message::Message;
use netdb_core::codec::packet::Packet;
use netdb_core::messages::{
    AccountLoginMessage, AccountLoginResult, AccountRegisterMessage, AccountRegisterResult,
};
use tokio::net::TcpStream;

use crate::integration_tests::common::{TestServer, read_packet, write_packet};

#[tokio::test]
async fn register_duplicate_then_login_mismatch() {
    let server = TestServer::start(19103).await;
    let mut stream = TcpStream::connect(server.addr).await.expect("connect");

    // S2: first registration succeeds.
    let register = AccountRegisterMessage::request("a", "p");
    let packet = Packet::new(AccountRegisterMessage::protocol_no(), register.encode().expect("encode"));
    write_packet(&mut stream, &packet).await.expect("write register");
    let reply = AccountRegisterMessage::decode(read_packet(&mut stream).await.expect("read reply").body())
        .expect("decode reply");
    assert_eq!(reply.result, AccountRegisterResult::Success);

    // S3: the same registration the second time is rejected as a duplicate.
    let packet = Packet::new(AccountRegisterMessage::protocol_no(), register.encode().expect("encode"));
    write_packet(&mut stream, &packet).await.expect("write duplicate register");
    let reply = AccountRegisterMessage::decode(read_packet(&mut stream).await.expect("read reply").body())
        .expect("decode reply");
    assert_eq!(reply.result, AccountRegisterResult::IdAlreadyExists);

    // S4: logging in with the wrong password is rejected, not disconnected.
    let login = AccountLoginMessage::request("a", "wrong");
    let packet = Packet::new(AccountLoginMessage::protocol_no(), login.encode().expect("encode"));
    write_packet(&mut stream, &packet).await.expect("write login");
    let reply =
        AccountLoginMessage::decode(read_packet(&mut stream).await.expect("read reply").body()).expect("decode reply");
    assert_eq!(reply.result, AccountLoginResult::IdOrPasswordWrong);

    // The session is still alive: a correct login now succeeds.
    let login = AccountLoginMessage::request("a", "p");
    let packet = Packet::new(AccountLoginMessage::protocol_no(), login.encode().expect("encode"));
    write_packet(&mut stream, &packet).await.expect("write login");
    let reply =
        AccountLoginMessage::decode(read_packet(&mut stream).await.expect("read reply").body()).expect("decode reply");
    assert_eq!(reply.result, AccountLoginResult::Success);
}

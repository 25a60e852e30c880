// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `TestEcho` (§8 S1): the smallest possible round trip, used to exercise
//! framing and dispatch without touching the database at all.

use anyhow::{Result, anyhow};
use bytes::Bytes;

use crate::codec::message::Message;
use crate::messages::PROTOCOL_TEST_ECHO;

/// Both the request and reply shape: a client sends `session_id=0`, the
/// server echoes back with `session_id` set to the one it assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoMessage {
    pub session_id: u32,
    pub rand_number: u32,
}

impl Message for EchoMessage {
    fn protocol_no() -> u16 {
        PROTOCOL_TEST_ECHO
    }

    fn encode(&self) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(8);
        buf.extend_from_slice(&self.session_id.to_le_bytes());
        buf.extend_from_slice(&self.rand_number.to_le_bytes());
        Ok(Bytes::from(buf))
    }

    fn decode(body: &[u8]) -> Result<Self> {
        if body.len() != 8 {
            return Err(anyhow!("EchoMessage body must be 8 bytes, got {}", body.len()));
        }
        let session_id = u32::from_le_bytes(body[0..4].try_into().expect("checked length"));
        let rand_number = u32::from_le_bytes(body[4..8].try_into().expect("checked length"));
        Ok(Self {
            session_id,
            rand_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let msg = EchoMessage {
            session_id: 7,
            rand_number: 42,
        };
        let encoded = msg.encode().expect("encode");
        let decoded = EchoMessage::decode(&encoded).expect("decode");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(EchoMessage::decode(&[0u8; 3]).is_err());
    }
}

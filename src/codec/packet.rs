// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A framed, length-prefixed packet: header + body, immutable once built so
//! it can be shared (via `Arc`) across a broadcast without copying.

use bytes::Bytes;

use crate::codec::header::{HEADER_LEN, PacketHeader};
use crate::errors::NetError;

/// A fully framed packet: a parsed [`PacketHeader`] plus its body bytes.
///
/// Packets are built once (either by encoding an outbound message or by
/// slicing an inbound frame out of a [`crate::net::receive_buffer::ReceiveBuffer`])
/// and are immutable afterwards. [`crate::net::multi_sender::MultiSender`]
/// shares the same `Arc<Packet>` across every session a broadcast targets.
#[derive(Debug, Clone)]
pub struct Packet {
    header: PacketHeader,
    body: Bytes,
}

impl Packet {
    /// Builds a packet by framing `body` under `protocol_no`.
    pub fn new(protocol_no: u16, body: Bytes) -> Self {
        Self {
            header: PacketHeader::new(body.len(), protocol_no),
            body,
        }
    }

    /// The protocol id carried by this packet's header.
    #[inline]
    pub fn protocol_no(&self) -> u16 {
        self.header.protocol_no()
    }

    /// The body bytes (excluding the header).
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The complete wire representation: header bytes followed by the body.
    ///
    /// Used by [`crate::net::multi_sender::MultiSender`] to build the
    /// scatter-gather buffer list for a coalesced send.
    pub fn to_wire_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.body.len());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.body);
        Bytes::from(buf)
    }

    /// Extracts exactly one framed packet from the front of `buf`, returning
    /// the packet and the number of bytes it consumed.
    ///
    /// Returns `Ok(None)` if `buf` does not yet contain a whole frame.
    /// Returns `Err` if the declared `packet_size` is smaller than the
    /// header itself, which is always a framing violation.
    pub fn try_parse_one(buf: &[u8]) -> Result<Option<(Self, usize)>, NetError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = PacketHeader::parse(buf);
        let total = header.packet_size();
        if total < HEADER_LEN {
            return Err(NetError::Framing(format!(
                "declared packet_size {total} is smaller than header length \
                 {HEADER_LEN}"
            )));
        }
        if buf.len() < total {
            return Ok(None);
        }
        let body = Bytes::copy_from_slice(&buf[HEADER_LEN..total]);
        Ok(Some((Self { header, body }, total)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exactly_one_frame_and_reports_consumed_len() {
        let p = Packet::new(7, Bytes::from_static(b"hello"));
        let wire = p.to_wire_bytes();

        let (parsed, consumed) = Packet::try_parse_one(&wire)
            .expect("no framing error")
            .expect("a full frame is present");
        assert_eq!(consumed, wire.len());
        assert_eq!(parsed.protocol_no(), 7);
        assert_eq!(parsed.body().as_ref(), b"hello");
    }

    #[test]
    fn reports_incomplete_frame() {
        let p = Packet::new(7, Bytes::from_static(b"hello"));
        let wire = p.to_wire_bytes();
        let partial = &wire[..wire.len() - 1];
        assert!(Packet::try_parse_one(partial).expect("no error").is_none());
    }

    #[test]
    fn rejects_undersized_packet_size() {
        let mut bogus = vec![0u8; HEADER_LEN];
        bogus[0] = 1; // packet_size = 1, smaller than HEADER_LEN
        assert!(Packet::try_parse_one(&bogus).is_err());
    }
}

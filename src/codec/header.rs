// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The 4-byte frame header: `packet_size` (total bytes, including the
//! header) and `protocol_no`, both little-endian (§4.1, §9 byte-order
//! resolution).

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, byteorder::little_endian::U16,
};

/// Size in bytes of [`PacketHeader`] on the wire.
pub const HEADER_LEN: usize = 4;

/// The fixed-size frame header preceding every packet body.
#[repr(C)]
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable,
)]
pub struct PacketHeader {
    /// Total frame size in bytes, including this 4-byte header.
    pub packet_size: U16,
    /// Protocol id used to look up the registered message type.
    pub protocol_no: U16,
}

impl PacketHeader {
    /// Builds a header for a body of `body_len` bytes carrying `protocol_no`.
    pub fn new(body_len: usize, protocol_no: u16) -> Self {
        Self {
            packet_size: U16::new((HEADER_LEN + body_len) as u16),
            protocol_no: U16::new(protocol_no),
        }
    }

    /// Parses a header out of the first [`HEADER_LEN`] bytes of `buf`.
    ///
    /// # Panics
    /// Panics if `buf` is shorter than [`HEADER_LEN`]; callers are expected
    /// to have already checked `buf.len() >= HEADER_LEN`.
    pub fn parse(buf: &[u8]) -> Self {
        Self::read_from_bytes(&buf[..HEADER_LEN])
            .unwrap_or_else(|_| unreachable!("fixed-size header read cannot fail"))
    }

    /// Serializes the header into its 4-byte wire form.
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out.copy_from_slice(self.as_bytes());
        out
    }

    #[inline]
    pub fn packet_size(&self) -> usize {
        self.packet_size.get() as usize
    }

    #[inline]
    pub fn protocol_no(&self) -> u16 {
        self.protocol_no.get()
    }
}

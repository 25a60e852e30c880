// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `MessageCodec`: the boundary to the (out-of-scope) schema registry.
//!
//! The login application and its wire-generated types are external
//! collaborators (§1). This crate only needs a numeric protocol id ↔
//! serializable-message mapping; [`MessageCodec`] is the trait a concrete
//! schema registry would implement, and [`MessageRegistry`] is a minimal
//! in-memory implementation good enough to drive the example handlers and
//! the integration tests.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;

use anyhow::Result;
use bytes::Bytes;

/// A message that can be encoded to/decoded from a packet body.
pub trait Message: Debug + Send + Sync + Any {
    /// The protocol id this message type is registered under.
    fn protocol_no() -> u16
    where Self: Sized;

    /// Serializes this message into its wire body.
    fn encode(&self) -> Result<Bytes>;

    /// Deserializes a wire body into this message type.
    fn decode(body: &[u8]) -> Result<Self>
    where Self: Sized;
}

/// Encodes/decodes messages by protocol id, decoupling the framing layer
/// from any particular schema representation.
pub trait MessageCodec: Send + Sync {
    /// Encodes a boxed message, returning its protocol id and wire body.
    fn encode_dyn(&self, protocol_no: u16, body: &dyn Any) -> Result<Bytes>;

    /// Decodes a wire body for the given protocol id into a boxed value.
    fn decode_dyn(&self, protocol_no: u16, body: &[u8]) -> Result<Box<dyn Any + Send>>;
}

type EncodeFn = Box<dyn Fn(&dyn Any) -> Result<Bytes> + Send + Sync>;
type DecodeFn = Box<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send>> + Send + Sync>;

/// A small in-memory protocol-id ↔ message-type registry.
///
/// Register concrete [`Message`] implementors with [`MessageRegistry::register`]
/// at startup, before any session reaches the `Connected` state (mirroring
/// the invariant that the handler map is immutable once connected, §5).
#[derive(Default)]
pub struct MessageRegistry {
    encoders: HashMap<u16, EncodeFn>,
    decoders: HashMap<u16, DecodeFn>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `M` under its own [`Message::protocol_no`].
    pub fn register<M: Message + 'static>(&mut self) {
        let protocol_no = M::protocol_no();
        self.encoders.insert(
            protocol_no,
            Box::new(|any: &dyn Any| {
                let msg = any
                    .downcast_ref::<M>()
                    .ok_or_else(|| anyhow::anyhow!("type mismatch during encode"))?;
                msg.encode()
            }),
        );
        self.decoders.insert(
            protocol_no,
            Box::new(|body: &[u8]| {
                let msg = M::decode(body)?;
                Ok(Box::new(msg) as Box<dyn Any + Send>)
            }),
        );
    }
}

impl MessageCodec for MessageRegistry {
    fn encode_dyn(&self, protocol_no: u16, body: &dyn Any) -> Result<Bytes> {
        let f = self
            .encoders
            .get(&protocol_no)
            .ok_or_else(|| anyhow::anyhow!("no encoder registered for {protocol_no}"))?;
        f(body)
    }

    fn decode_dyn(&self, protocol_no: u16, body: &[u8]) -> Result<Box<dyn Any + Send>> {
        let f = self
            .decoders
            .get(&protocol_no)
            .ok_or_else(|| anyhow::anyhow!("no decoder registered for {protocol_no}"))?;
        f(body)
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `AccountRegister` / `AccountLogin` (§8 S2–S4): the two example handlers
//! that actually touch the database, by way of [`crate::db::async_context::AsyncDbContext`].
//!
//! Both messages share one wire shape for request and reply: a client sends
//! `id`/`password` with `result = Pending`; the server replies on the same
//! `protocol_no` with `result` set and `id`/`password` cleared. §229 of the
//! source material: these handlers reply with a structured result code
//! rather than disconnecting on failure, unlike the core's default policy.

use anyhow::{Result, anyhow};
use bytes::Bytes;

use crate::codec::message::Message;
use crate::messages::{PROTOCOL_ACCOUNT_LOGIN, PROTOCOL_ACCOUNT_REGISTER};

fn encode_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = u32::try_from(bytes.len()).expect("string length fits in u32");
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn decode_string(body: &[u8], offset: &mut usize) -> Result<String> {
    if body.len() < *offset + 4 {
        return Err(anyhow!("truncated string length prefix"));
    }
    let len = u32::from_le_bytes(body[*offset..*offset + 4].try_into().expect("checked length")) as usize;
    *offset += 4;
    if body.len() < *offset + len {
        return Err(anyhow!("truncated string body"));
    }
    let s = String::from_utf8(body[*offset..*offset + len].to_vec())?;
    *offset += len;
    Ok(s)
}

/// Outcome of an `AccountRegister` round trip (§8 S2/S3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountRegisterResult {
    /// Set by the client on the outbound request; never a valid reply value.
    Pending,
    Success,
    IdAlreadyExists,
    /// A core or driver failure below the application layer — reported as
    /// a result code rather than a disconnect (§229).
    ServerError,
}

impl AccountRegisterResult {
    fn to_tag(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Success => 1,
            Self::IdAlreadyExists => 2,
            Self::ServerError => 3,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Success),
            2 => Ok(Self::IdAlreadyExists),
            3 => Ok(Self::ServerError),
            other => Err(anyhow!("unknown AccountRegisterResult tag {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRegisterMessage {
    pub id: String,
    pub password: String,
    pub result: AccountRegisterResult,
}

impl AccountRegisterMessage {
    pub fn request(id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            password: password.into(),
            result: AccountRegisterResult::Pending,
        }
    }

    pub fn reply(result: AccountRegisterResult) -> Self {
        Self {
            id: String::new(),
            password: String::new(),
            result,
        }
    }
}

impl Message for AccountRegisterMessage {
    fn protocol_no() -> u16 {
        PROTOCOL_ACCOUNT_REGISTER
    }

    fn encode(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        buf.push(self.result.to_tag());
        encode_string(&mut buf, &self.id);
        encode_string(&mut buf, &self.password);
        Ok(Bytes::from(buf))
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let tag = *body.first().ok_or_else(|| anyhow!("empty AccountRegister body"))?;
        let result = AccountRegisterResult::from_tag(tag)?;
        let mut offset = 1;
        let id = decode_string(body, &mut offset)?;
        let password = decode_string(body, &mut offset)?;
        Ok(Self { id, password, result })
    }
}

/// Outcome of an `AccountLogin` round trip (§8 S4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountLoginResult {
    Pending,
    Success,
    IdOrPasswordWrong,
    ServerError,
}

impl AccountLoginResult {
    fn to_tag(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Success => 1,
            Self::IdOrPasswordWrong => 2,
            Self::ServerError => 3,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Success),
            2 => Ok(Self::IdOrPasswordWrong),
            3 => Ok(Self::ServerError),
            other => Err(anyhow!("unknown AccountLoginResult tag {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLoginMessage {
    pub id: String,
    pub password: String,
    pub result: AccountLoginResult,
}

impl AccountLoginMessage {
    pub fn request(id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            password: password.into(),
            result: AccountLoginResult::Pending,
        }
    }

    pub fn reply(result: AccountLoginResult) -> Self {
        Self {
            id: String::new(),
            password: String::new(),
            result,
        }
    }
}

impl Message for AccountLoginMessage {
    fn protocol_no() -> u16 {
        PROTOCOL_ACCOUNT_LOGIN
    }

    fn encode(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        buf.push(self.result.to_tag());
        encode_string(&mut buf, &self.id);
        encode_string(&mut buf, &self.password);
        Ok(Bytes::from(buf))
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let tag = *body.first().ok_or_else(|| anyhow!("empty AccountLogin body"))?;
        let result = AccountLoginResult::from_tag(tag)?;
        let mut offset = 1;
        let id = decode_string(body, &mut offset)?;
        let password = decode_string(body, &mut offset)?;
        Ok(Self { id, password, result })
    }
}

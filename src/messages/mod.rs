// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Example wire messages for the login/account service the core is hosted
//! for (§8's testable scenarios S1–S4). These are stand-ins for the
//! out-of-scope schema registry (§1) — concrete enough to register on a
//! [`crate::codec::message::MessageRegistry`] and drive the example
//! handlers and integration tests, nothing more.

pub mod account;
pub mod echo;

pub use account::{AccountLoginMessage, AccountLoginResult, AccountRegisterMessage, AccountRegisterResult};
pub use echo::EchoMessage;

use crate::codec::message::MessageRegistry;

/// Protocol ids the example handlers speak.
pub const PROTOCOL_TEST_ECHO: u16 = 1;
pub const PROTOCOL_ACCOUNT_REGISTER: u16 = 2;
pub const PROTOCOL_ACCOUNT_LOGIN: u16 = 3;

/// Builds the registry the example login handlers and their tests share.
pub fn default_registry() -> MessageRegistry {
    let mut registry = MessageRegistry::new();
    registry.register::<EchoMessage>();
    registry.register::<AccountRegisterMessage>();
    registry.register::<AccountLoginMessage>();
    registry
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `netdb-core`: a multi-threaded TCP server framework with an integrated
//! relational-database connection pool (§1–§5), plus the example
//! login/account handlers used to exercise it end to end (§8).

pub mod cfg;
pub mod codec;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod messages;
pub mod net;


// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The database subsystem (§3, §4.8–§4.10): a blocking driver boundary, a
//! single-connection API on top of it, a bounded connection pool, and the
//! async bridge handlers use to call into it from tokio tasks.

pub mod async_context;
pub mod connection;
pub mod driver;
pub mod pool;
pub mod value;

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Typed leaf errors for the database and network subsystems.
//!
//! Leaf errors are kept small and matched on by callers that need to make a
//! policy decision (e.g. "reply with an error code" vs. "disconnect").
//! Everywhere else, `anyhow::Result` with `.context(...)` is used, matching
//! the rest of this crate.

use thiserror::Error;

/// Errors surfaced by the database connection and pool layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Transport or DB connectivity failure (bad config, driver connect
    /// failure, pool not initialized).
    #[error("connection error: {0}")]
    Connection(String),

    /// Driver execution or result decoding failure.
    #[error("query error: {0}")]
    Query(String),

    /// Commit/rollback/autocommit toggle failure.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// `acquire_connection` timed out or the pool is at `max_size`.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The pool is shutting down and no longer accepts new acquisitions.
    #[error("pool is shutting down")]
    ShuttingDown,
}

/// Errors surfaced by the network/framing layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// Header overflow or truncated payload.
    #[error("framing error: {0}")]
    Framing(String),

    /// Unknown protocol id on a frame.
    #[error("protocol error: unknown protocol_no={0}")]
    Protocol(u16),

    /// Underlying transport I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `AsyncDbContext<S>` (§4.10): bridges a blocking DB call, run on a
//! [`HardTaskPool`] worker thread, back to the tokio-side session that
//! asked for it. Handlers construct one with a success and an error
//! closure, submit it with the work to run, and the result (or failure)
//! is delivered once the pooled connection call returns — never from the
//! section's own worker task.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::db::connection::DBConnection;
use crate::db::pool::DBConnectionPool;
use crate::errors::DbError;
use crate::net::server::HardTaskPool;
use crate::net::session::Session;

/// Holds the (success, error) callback pair plus a weak back-reference to
/// the session that requested the work (§3 "void-pointer `user_data`
/// replaced with a type parameter").
///
/// Callbacks run on the hard-task thread that executed the blocking call,
/// not on the session's section worker task. They MUST limit themselves to
/// operations safe from any thread — principally `Session::send_packet`,
/// whose `MultiSender` is its own synchronization primitive — and must not
/// touch section-task-affine state directly.
pub struct AsyncDbContext<S> {
    session: Weak<Session>,
    on_success: Box<dyn FnOnce(Arc<Session>, S) + Send>,
    on_error: Box<dyn FnOnce(Arc<Session>, DbError) + Send>,
}

impl<S: Send + 'static> AsyncDbContext<S> {
    pub fn new(
        session: &Arc<Session>,
        on_success: impl FnOnce(Arc<Session>, S) + Send + 'static,
        on_error: impl FnOnce(Arc<Session>, DbError) + Send + 'static,
    ) -> Self {
        Self {
            session: Arc::downgrade(session),
            on_success: Box::new(on_success),
            on_error: Box::new(on_error),
        }
    }

    /// Invokes the success callback, but only if the session is still alive
    /// and `Connected` (§4.10: "the session back-reference MUST be checked
    /// for `is_connected()` before responding").
    pub fn deliver_success(self, result: S) {
        if let Some(session) = self.session.upgrade()
            && session.is_connected()
        {
            (self.on_success)(session, result);
        }
    }

    /// Same liveness check as [`Self::deliver_success`], for the failure
    /// path.
    pub fn deliver_error(self, cause: DbError) {
        if let Some(session) = self.session.upgrade()
            && session.is_connected()
        {
            (self.on_error)(session, cause);
        }
    }

    /// Submits `work` to `hard_tasks`: acquires a pooled connection, runs
    /// the blocking call against it, and delivers success or error back
    /// through this context — all on the hard-task worker thread (§4.10,
    /// §5 "database calls MUST be posted as hard tasks").
    pub fn submit<F>(
        self,
        hard_tasks: &HardTaskPool,
        pool: Arc<DBConnectionPool>,
        acquire_timeout: Duration,
        work: F,
    ) where
        F: FnOnce(&mut DBConnection) -> Result<S, DbError> + Send + 'static,
    {
        hard_tasks.submit(move || match pool.acquire_connection(acquire_timeout) {
            Ok(mut conn) => match work(&mut conn) {
                Ok(result) => self.deliver_success(result),
                Err(e) => self.deliver_error(e),
            },
            Err(e) => self.deliver_error(e),
        });
    }
}

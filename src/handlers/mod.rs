// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Example login/account handlers (§8 S1–S4) and the [`SessionFactory`]
//! that wires them onto every accepted session. The login application
//! itself is an external collaborator (§1) — this module is the minimal
//! worked example the integration tests drive the rest of the crate
//! through.

pub mod account;
pub mod echo;

use std::sync::Arc;
use std::time::Duration;

use crate::db::pool::DBConnectionPool;
use crate::net::server::{HardTaskPool, SessionFactory};
use crate::net::session::Session;

/// Shared application state every accepted session's handlers close over.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<DBConnectionPool>,
    pub hard_tasks: Arc<HardTaskPool>,
    pub acquire_timeout: Duration,
}

/// Installs the example `TestEcho` / `AccountRegister` / `AccountLogin`
/// handlers on every session the server accepts.
pub struct LoginSessionFactory {
    app: AppState,
}

impl LoginSessionFactory {
    pub fn new(app: AppState) -> Arc<Self> {
        Arc::new(Self { app })
    }
}

impl SessionFactory for LoginSessionFactory {
    fn configure(&self, session: &Arc<Session>) {
        echo::register(session);
        account::register(session, self.app.clone());
    }
}

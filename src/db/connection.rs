// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `DBConnection`, `PreparedStatement`, and `Transaction` (§4.8): the
//! single-connection API sitting on top of a [`DriverConnection`].

use std::time::Instant;

use tracing::warn;

use crate::cfg::config::DbConfig;
use crate::db::driver::{DriverConnection, PreparedDriverStatement};
use crate::db::value::{QueryResult, Value};
use crate::errors::DbError;

/// One underlying driver connection plus liveness bookkeeping (§3).
/// Non-copyable; ownership moves through the pool.
pub struct DBConnection {
    driver: Box<dyn DriverConnection>,
    config: DbConfig,
    connected: bool,
    last_activity: Instant,
}

impl std::fmt::Debug for DBConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DBConnection")
            .field("connected", &self.connected)
            .field("host", &self.config.host)
            .finish_non_exhaustive()
    }
}

impl DBConnection {
    pub fn new(driver: Box<dyn DriverConnection>, config: DbConfig) -> Self {
        Self {
            driver,
            config,
            connected: false,
            last_activity: Instant::now(),
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn connect(&mut self) -> Result<(), DbError> {
        self.driver.connect()?;
        self.connected = true;
        self.touch();
        Ok(())
    }

    /// Idempotent; swallowed during destruction (§4.8).
    pub fn disconnect(&mut self) {
        if self.connected {
            self.driver.disconnect();
            self.connected = false;
        }
    }

    pub fn is_valid(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        let ok = self.driver.is_valid();
        if ok {
            self.touch();
        }
        ok
    }

    pub fn execute_query(&mut self, sql: &str) -> Result<QueryResult, DbError> {
        self.touch();
        self.driver.execute_query(sql)
    }

    pub fn execute_update(&mut self, sql: &str) -> Result<u64, DbError> {
        self.touch();
        self.driver.execute_update(sql)
    }

    /// Relies on exclusive ownership of this connection while the insert
    /// runs — the pool never hands out the same `DBConnection` twice
    /// (§9, "execute_insert race-freedom").
    pub fn execute_insert(&mut self, sql: &str) -> Result<u64, DbError> {
        self.touch();
        self.driver.execute_insert(sql)
    }

    pub fn prepare(&mut self, sql: &str) -> Result<PreparedStatement<'_>, DbError> {
        self.touch();
        let stmt = self.driver.prepare(sql)?;
        Ok(PreparedStatement { stmt })
    }

    pub fn escape_string(&self, s: &[u8]) -> Vec<u8> {
        self.driver.escape_string(s)
    }

    /// Begins a transaction scope: disables autocommit and returns a guard
    /// that rolls back on drop unless `commit()`/`rollback()` was already
    /// called (§4.8).
    pub fn begin_transaction(&mut self) -> Result<Transaction<'_>, DbError> {
        self.driver
            .set_autocommit(false)
            .map_err(|e| DbError::Transaction(e.to_string()))?;
        Ok(Transaction {
            driver: &mut *self.driver,
            finished: false,
        })
    }
}

impl Drop for DBConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// A prepared statement bound by ordinal index (§4.8).
pub struct PreparedStatement<'a> {
    stmt: Box<dyn PreparedDriverStatement + 'a>,
}

impl PreparedStatement<'_> {
    pub fn bind(&mut self, index: usize, value: Value) -> Result<(), DbError> {
        self.stmt.bind(index, value)
    }

    pub fn clear_bindings(&mut self) {
        self.stmt.clear_bindings();
    }

    pub fn execute_query(&mut self) -> Result<QueryResult, DbError> {
        self.stmt.execute_query()
    }

    pub fn execute_update(&mut self) -> Result<u64, DbError> {
        self.stmt.execute_update()
    }

    pub fn execute_insert(&mut self) -> Result<u64, DbError> {
        self.stmt.execute_insert()
    }
}

/// A transaction scope borrowed exclusively from its owning connection.
/// Scope exit rolls back if neither `commit()` nor `rollback()` ran; errors
/// during the implicit rollback are swallowed and logged (§7).
pub struct Transaction<'a> {
    driver: &'a mut dyn DriverConnection,
    finished: bool,
}

impl Transaction<'_> {
    pub fn commit(mut self) -> Result<(), DbError> {
        self.driver
            .commit()
            .map_err(|e| DbError::Transaction(e.to_string()))?;
        self.finished = true;
        self.reenable_autocommit();
        Ok(())
    }

    pub fn rollback(mut self) -> Result<(), DbError> {
        self.driver
            .rollback()
            .map_err(|e| DbError::Transaction(e.to_string()))?;
        self.finished = true;
        self.reenable_autocommit();
        Ok(())
    }

    fn reenable_autocommit(&mut self) {
        if let Err(e) = self.driver.set_autocommit(true) {
            warn!("failed to re-enable autocommit after transaction: {e}");
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.driver.rollback() {
            warn!("implicit transaction rollback failed (swallowed): {e}");
        }
        self.reenable_autocommit();
    }
}

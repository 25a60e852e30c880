// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! An in-memory [`DriverConnection`] used by integration tests so the DB
//! subsystem can be exercised end to end without a live MySQL server
//! (§10.4). It understands exactly the handful of statement shapes the
//! example account handlers issue — it is a test double, not a SQL engine.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::cfg::config::DbConfig;
use crate::db::driver::{DriverConnection, PreparedDriverStatement};
use crate::db::value::{QueryResult, Row, Value};
use crate::errors::DbError;

#[derive(Debug, Clone)]
struct Account {
    id: i64,
    username: String,
    password_hash: String,
}

/// Shared backing store: multiple `FakeDriver` connections created against
/// the same `FakeDatabase` see each other's writes, mirroring a real server.
#[derive(Debug, Default)]
pub struct FakeDatabase {
    accounts: Mutex<Vec<Account>>,
    next_id: AtomicI64,
}

impl FakeDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            accounts: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        })
    }
}

/// A `DriverConnection` over a shared [`FakeDatabase`].
pub struct FakeDriver {
    db: Arc<FakeDatabase>,
    connected: bool,
}

impl FakeDriver {
    pub fn new(db: Arc<FakeDatabase>) -> Self {
        Self {
            db,
            connected: false,
        }
    }

    /// Builds a [`super::super::pool::DriverFactory`] that hands out
    /// connections sharing `db`.
    pub fn factory(db: Arc<FakeDatabase>) -> crate::db::pool::DriverFactory {
        Arc::new(move |_cfg: &DbConfig| Box::new(FakeDriver::new(db.clone())) as Box<dyn DriverConnection>)
    }
}

impl DriverConnection for FakeDriver {
    fn connect(&mut self) -> Result<(), DbError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_valid(&mut self) -> bool {
        self.connected
    }

    fn execute_query(&mut self, _sql: &str) -> Result<QueryResult, DbError> {
        Ok(QueryResult::default())
    }

    fn execute_update(&mut self, _sql: &str) -> Result<u64, DbError> {
        Ok(0)
    }

    fn execute_insert(&mut self, _sql: &str) -> Result<u64, DbError> {
        Err(DbError::Query("use prepare() on the fake driver".to_string()))
    }

    fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedDriverStatement>, DbError> {
        if sql.contains("INSERT INTO accounts") {
            Ok(Box::new(InsertAccountStatement {
                db: self.db.clone(),
                username: None,
                password_hash: None,
            }))
        } else if sql.contains("SELECT") && sql.contains("FROM accounts") {
            Ok(Box::new(SelectAccountStatement {
                db: self.db.clone(),
                username: None,
            }))
        } else {
            Err(DbError::Query(format!("fake driver cannot prepare: {sql}")))
        }
    }

    fn set_autocommit(&mut self, _enabled: bool) -> Result<(), DbError> {
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DbError> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        Ok(())
    }

    fn escape_string(&self, s: &[u8]) -> Vec<u8> {
        s.to_vec()
    }
}

struct InsertAccountStatement {
    db: Arc<FakeDatabase>,
    username: Option<String>,
    password_hash: Option<String>,
}

impl PreparedDriverStatement for InsertAccountStatement {
    fn bind(&mut self, index: usize, value: Value) -> Result<(), DbError> {
        let as_text = |v: Value| match v {
            Value::Text(s) => Ok(s),
            other => Err(DbError::Query(format!("expected text binding, got {other:?}"))),
        };
        match index {
            0 => self.username = Some(as_text(value)?),
            1 => self.password_hash = Some(as_text(value)?),
            _ => return Err(DbError::Query(format!("bind index {index} out of range"))),
        }
        Ok(())
    }

    fn clear_bindings(&mut self) {
        self.username = None;
        self.password_hash = None;
    }

    fn execute_query(&mut self) -> Result<QueryResult, DbError> {
        Err(DbError::Query("INSERT statement cannot be queried".to_string()))
    }

    fn execute_update(&mut self) -> Result<u64, DbError> {
        self.execute_insert().map(|_| 1)
    }

    fn execute_insert(&mut self) -> Result<u64, DbError> {
        let username = self
            .username
            .clone()
            .ok_or_else(|| DbError::Query("username not bound".to_string()))?;
        let password_hash = self
            .password_hash
            .clone()
            .ok_or_else(|| DbError::Query("password_hash not bound".to_string()))?;

        let mut accounts = self.db.accounts.lock().expect("fake db lock poisoned");
        if accounts.iter().any(|a| a.username == username) {
            return Err(DbError::Query(format!("duplicate username {username:?}")));
        }
        let id = self.db.next_id.fetch_add(1, Ordering::Relaxed);
        accounts.push(Account {
            id,
            username,
            password_hash,
        });
        Ok(id as u64)
    }
}

struct SelectAccountStatement {
    db: Arc<FakeDatabase>,
    username: Option<String>,
}

impl PreparedDriverStatement for SelectAccountStatement {
    fn bind(&mut self, index: usize, value: Value) -> Result<(), DbError> {
        match (index, value) {
            (0, Value::Text(s)) => {
                self.username = Some(s);
                Ok(())
            },
            (0, other) => Err(DbError::Query(format!("expected text binding, got {other:?}"))),
            (idx, _) => Err(DbError::Query(format!("bind index {idx} out of range"))),
        }
    }

    fn clear_bindings(&mut self) {
        self.username = None;
    }

    fn execute_query(&mut self) -> Result<QueryResult, DbError> {
        let username = self
            .username
            .clone()
            .ok_or_else(|| DbError::Query("username not bound".to_string()))?;
        let accounts = self.db.accounts.lock().expect("fake db lock poisoned");
        let rows = accounts
            .iter()
            .filter(|a| a.username == username)
            .map(|a| {
                Row::new(
                    vec!["id".to_string(), "username".to_string(), "password_hash".to_string()],
                    vec![
                        Value::I64(a.id),
                        Value::Text(a.username.clone()),
                        Value::Text(a.password_hash.clone()),
                    ],
                )
            })
            .collect();
        Ok(QueryResult::new(rows))
    }

    fn execute_update(&mut self) -> Result<u64, DbError> {
        Err(DbError::Query("SELECT statement cannot be executed as an update".to_string()))
    }

    fn execute_insert(&mut self) -> Result<u64, DbError> {
        Err(DbError::Query("SELECT statement cannot be executed as an insert".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_select_round_trips() {
        let db = FakeDatabase::new();
        let mut driver = FakeDriver::new(db);
        driver.connect().expect("connect");

        let mut insert = driver.prepare("INSERT INTO accounts (username, password_hash) VALUES (?, ?)").expect("prepare insert");
        insert.bind(0, Value::Text("alice".to_string())).expect("bind username");
        insert.bind(1, Value::Text("hash".to_string())).expect("bind hash");
        let id = insert.execute_insert().expect("insert");
        assert_eq!(id, 1);

        let mut select = driver.prepare("SELECT id, username, password_hash FROM accounts WHERE username = ?").expect("prepare select");
        select.bind(0, Value::Text("alice".to_string())).expect("bind username");
        let result = select.execute_query().expect("select");
        let row = result.fetch_one().expect("one row");
        assert_eq!(row.get_string_required("password_hash").expect("hash"), "hash");
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let db = FakeDatabase::new();
        let mut driver = FakeDriver::new(db);
        driver.connect().expect("connect");

        for _ in 0..2 {
            let mut insert = driver
                .prepare("INSERT INTO accounts (username, password_hash) VALUES (?, ?)")
                .expect("prepare insert");
            insert.bind(0, Value::Text("bob".to_string())).expect("bind username");
            insert.bind(1, Value::Text("hash".to_string())).expect("bind hash");
            let _ = insert.execute_insert();
        }

        let accounts = driver.db.accounts.lock().expect("lock");
        assert_eq!(accounts.len(), 1);
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The production [`DriverConnection`] adapter, backed by the `mysql`
//! crate's blocking client. This crate owns the `DriverConnection`
//! boundary, not MySQL's wire protocol (§1 Non-goals) — everything below
//! just marshals between our typed [`Value`]/[`QueryResult`] model and the
//! `mysql` crate's own types.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Statement, Value as MysqlValue};

use crate::cfg::config::DbConfig;
use crate::db::driver::{DriverConnection, PreparedDriverStatement};
use crate::db::value::{QueryResult, Row, Value};
use crate::errors::DbError;

fn to_db_error(e: mysql::Error) -> DbError {
    DbError::Query(e.to_string())
}

fn from_mysql_value(v: MysqlValue) -> Value {
    match v {
        MysqlValue::NULL => Value::Null,
        MysqlValue::Bytes(bytes) => match String::from_utf8(bytes.clone()) {
            Ok(s) => Value::Text(s),
            Err(_) => Value::Bytes(bytes),
        },
        MysqlValue::Int(i) => Value::I64(i),
        MysqlValue::UInt(u) => Value::I64(u as i64),
        MysqlValue::Float(f) => Value::F64(f as f64),
        MysqlValue::Double(d) => Value::F64(d),
        MysqlValue::Date(year, month, day, hour, minute, second, _micros) => {
            chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, second as u32))
                .map(|naive| Value::Timestamp(naive.and_utc()))
                .unwrap_or(Value::Null)
        },
        // TIME-typed columns without a date component aren't modeled by
        // this crate's `Value` (§1 Non-goal: no dedicated duration type).
        MysqlValue::Time(..) => Value::Null,
    }
}

fn to_mysql_value(v: &Value) -> MysqlValue {
    match v {
        Value::Null => MysqlValue::NULL,
        Value::Text(s) => MysqlValue::Bytes(s.as_bytes().to_vec()),
        Value::I64(i) => MysqlValue::Int(*i),
        Value::F64(f) => MysqlValue::Double(*f),
        Value::Bytes(b) => MysqlValue::Bytes(b.clone()),
        Value::Timestamp(ts) => MysqlValue::Bytes(Value::format_timestamp(ts).into_bytes()),
    }
}

fn row_from_mysql(row: mysql::Row) -> Row {
    let columns: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect();
    let values = (0..columns.len())
        .map(|idx| {
            row.as_ref(idx)
                .cloned()
                .map(from_mysql_value)
                .unwrap_or(Value::Null)
        })
        .collect();
    Row::new(columns, values)
}

/// A `DriverConnection` backed by a real, blocking `mysql::Conn`.
///
/// The connection is kept behind an `Arc<Mutex<_>>` so prepared statements
/// (which must outlive the `&mut self` borrow used to create them) can
/// still reach it — `DriverConnection::prepare` returns an owned,
/// `'static` boxed statement.
pub struct MysqlDriverConnection {
    conn: Option<Arc<Mutex<Conn>>>,
    config: DbConfig,
}

impl MysqlDriverConnection {
    pub fn new(config: DbConfig) -> Self {
        Self { conn: None, config }
    }
}

impl DriverConnection for MysqlDriverConnection {
    fn connect(&mut self) -> Result<(), DbError> {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(self.config.host.clone()))
            .tcp_port(self.config.port)
            .user(Some(self.config.user.clone()))
            .pass(Some(self.config.password.clone()))
            .db_name(Some(self.config.database.clone()))
            .read_timeout(Some(Duration::from_secs(self.config.read_timeout_secs)))
            .write_timeout(Some(Duration::from_secs(self.config.write_timeout_secs)))
            .tcp_connect_timeout(Some(Duration::from_secs(self.config.connection_timeout_secs)));

        let conn = Conn::new(opts).map_err(|e| DbError::Connection(e.to_string()))?;
        self.conn = Some(Arc::new(Mutex::new(conn)));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.conn = None;
    }

    fn is_valid(&mut self) -> bool {
        let Some(conn) = &self.conn else { return false };
        let mut conn = conn.lock().expect("mysql connection mutex poisoned");
        conn.query_drop("SELECT 1").is_ok()
    }

    fn execute_query(&mut self, sql: &str) -> Result<QueryResult, DbError> {
        let conn = self.conn.as_ref().ok_or_else(|| DbError::Connection("not connected".to_string()))?;
        let mut conn = conn.lock().expect("mysql connection mutex poisoned");
        let rows: Vec<mysql::Row> = conn.query(sql).map_err(to_db_error)?;
        Ok(QueryResult::new(rows.into_iter().map(row_from_mysql).collect()))
    }

    fn execute_update(&mut self, sql: &str) -> Result<u64, DbError> {
        let conn = self.conn.as_ref().ok_or_else(|| DbError::Connection("not connected".to_string()))?;
        let mut conn = conn.lock().expect("mysql connection mutex poisoned");
        conn.query_drop(sql).map_err(to_db_error)?;
        Ok(conn.affected_rows())
    }

    fn execute_insert(&mut self, sql: &str) -> Result<u64, DbError> {
        let conn = self.conn.as_ref().ok_or_else(|| DbError::Connection("not connected".to_string()))?;
        let mut conn = conn.lock().expect("mysql connection mutex poisoned");
        conn.query_drop(sql).map_err(to_db_error)?;
        Ok(conn.last_insert_id())
    }

    fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedDriverStatement>, DbError> {
        let conn_arc = self
            .conn
            .as_ref()
            .ok_or_else(|| DbError::Connection("not connected".to_string()))?
            .clone();
        let stmt = {
            let mut conn = conn_arc.lock().expect("mysql connection mutex poisoned");
            conn.prep(sql).map_err(to_db_error)?
        };
        let param_count = stmt.num_params() as usize;
        Ok(Box::new(MysqlPreparedStatement {
            conn: conn_arc,
            stmt,
            params: vec![MysqlValue::NULL; param_count],
        }))
    }

    fn set_autocommit(&mut self, enabled: bool) -> Result<(), DbError> {
        let conn = self.conn.as_ref().ok_or_else(|| DbError::Connection("not connected".to_string()))?;
        let mut conn = conn.lock().expect("mysql connection mutex poisoned");
        conn.query_drop(if enabled { "SET autocommit=1" } else { "SET autocommit=0" })
            .map_err(to_db_error)
    }

    fn commit(&mut self) -> Result<(), DbError> {
        let conn = self.conn.as_ref().ok_or_else(|| DbError::Connection("not connected".to_string()))?;
        let mut conn = conn.lock().expect("mysql connection mutex poisoned");
        conn.query_drop("COMMIT").map_err(to_db_error)
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        let conn = self.conn.as_ref().ok_or_else(|| DbError::Connection("not connected".to_string()))?;
        let mut conn = conn.lock().expect("mysql connection mutex poisoned");
        conn.query_drop("ROLLBACK").map_err(to_db_error)
    }

    fn escape_string(&self, s: &[u8]) -> Vec<u8> {
        // The `mysql` crate always binds parameters rather than interpolating
        // escaped literals; this exists only for callers building ad-hoc
        // SQL text outside of `prepare()`, and performs the same quoting
        // MySQL's own `mysql_real_escape_string` does for the bytes we
        // actually see in practice (backslash, single quote, NUL).
        let mut out = Vec::with_capacity(s.len());
        for &b in s {
            match b {
                b'\\' | b'\'' | b'"' | 0 => {
                    out.push(b'\\');
                    out.push(b);
                },
                other => out.push(other),
            }
        }
        out
    }
}

struct MysqlPreparedStatement {
    conn: Arc<Mutex<Conn>>,
    stmt: Statement,
    params: Vec<MysqlValue>,
}

impl PreparedDriverStatement for MysqlPreparedStatement {
    fn bind(&mut self, index: usize, value: Value) -> Result<(), DbError> {
        let slot = self
            .params
            .get_mut(index)
            .ok_or_else(|| DbError::Query(format!("bind index {index} out of range")))?;
        *slot = to_mysql_value(&value);
        Ok(())
    }

    fn clear_bindings(&mut self) {
        for slot in &mut self.params {
            *slot = MysqlValue::NULL;
        }
    }

    fn execute_query(&mut self) -> Result<QueryResult, DbError> {
        let mut conn = self.conn.lock().expect("mysql connection mutex poisoned");
        let rows: Vec<mysql::Row> = conn
            .exec(&self.stmt, self.params.clone())
            .map_err(to_db_error)?;
        Ok(QueryResult::new(rows.into_iter().map(row_from_mysql).collect()))
    }

    fn execute_update(&mut self) -> Result<u64, DbError> {
        let mut conn = self.conn.lock().expect("mysql connection mutex poisoned");
        conn.exec_drop(&self.stmt, self.params.clone())
            .map_err(to_db_error)?;
        Ok(conn.affected_rows())
    }

    fn execute_insert(&mut self) -> Result<u64, DbError> {
        let mut conn = self.conn.lock().expect("mysql connection mutex poisoned");
        conn.exec_drop(&self.stmt, self.params.clone())
            .map_err(to_db_error)?;
        Ok(conn.last_insert_id())
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A tagged value type plus the row/result-set cursor returned from queries
//! (§9: replaces the original's `void*` + `static_cast` row accessors).

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::errors::DbError;

/// One column value. `Null` is distinct from every other variant so typed
/// accessors can distinguish "absent" from "wrong type" (§4.8).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    I64(i64),
    F64(f64),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Formats a timestamp the way the driver layer expects bound
    /// parameters to look, fixed to UTC (§9 open-question resolution).
    pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// Parses a driver-returned `YYYY-MM-DD HH:MM:SS` string as UTC.
    pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DbError> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .map(|naive| naive.and_utc())
            .map_err(|e| DbError::Query(format!("invalid timestamp {s:?}: {e}")))
    }
}

/// One row of a [`QueryResult`], indexable by column name or ordinal.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    fn index_of(&self, name: &str) -> Result<usize, DbError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DbError::Query(format!("unknown column {name:?}")))
    }

    pub fn get(&self, name: &str) -> Result<&Value, DbError> {
        let idx = self.index_of(name)?;
        Ok(&self.values[idx])
    }

    pub fn get_ordinal(&self, idx: usize) -> Result<&Value, DbError> {
        self.values
            .get(idx)
            .ok_or_else(|| DbError::Query(format!("column ordinal {idx} out of range")))
    }

    pub fn get_string(&self, name: &str) -> Result<Option<String>, DbError> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s.clone())),
            Value::I64(i) => Ok(Some(i.to_string())),
            Value::F64(f) => Ok(Some(f.to_string())),
            Value::Bytes(b) => Ok(Some(String::from_utf8_lossy(b).into_owned())),
            Value::Timestamp(ts) => Ok(Some(Value::format_timestamp(ts))),
        }
    }

    pub fn get_string_required(&self, name: &str) -> Result<String, DbError> {
        self.get_string(name)?
            .ok_or_else(|| DbError::Query(format!("column {name:?} is NULL")))
    }

    pub fn get_i64(&self, name: &str) -> Result<Option<i64>, DbError> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::I64(i) => Ok(Some(*i)),
            Value::Text(s) => s
                .parse::<i64>()
                .map(Some)
                .map_err(|e| DbError::Query(format!("column {name:?} not an integer: {e}"))),
            other => Err(DbError::Query(format!(
                "column {name:?} is not integer-typed: {other:?}"
            ))),
        }
    }

    pub fn get_i64_required(&self, name: &str) -> Result<i64, DbError> {
        self.get_i64(name)?
            .ok_or_else(|| DbError::Query(format!("column {name:?} is NULL")))
    }

    pub fn get_f64(&self, name: &str) -> Result<Option<f64>, DbError> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::F64(f) => Ok(Some(*f)),
            Value::I64(i) => Ok(Some(*i as f64)),
            Value::Text(s) => s
                .parse::<f64>()
                .map(Some)
                .map_err(|e| DbError::Query(format!("column {name:?} not a float: {e}"))),
            other => Err(DbError::Query(format!(
                "column {name:?} is not float-typed: {other:?}"
            ))),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<Option<bool>, DbError> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::I64(i) => Ok(Some(*i != 0)),
            Value::Text(s) => match s.as_str() {
                "1" | "true" | "TRUE" => Ok(Some(true)),
                "0" | "false" | "FALSE" => Ok(Some(false)),
                other => Err(DbError::Query(format!("column {name:?} not a bool: {other:?}"))),
            },
            other => Err(DbError::Query(format!(
                "column {name:?} is not bool-convertible: {other:?}"
            ))),
        }
    }

    pub fn get_timestamp(&self, name: &str) -> Result<Option<DateTime<Utc>>, DbError> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Timestamp(ts) => Ok(Some(*ts)),
            Value::Text(s) => Value::parse_timestamp(s).map(Some),
            other => Err(DbError::Query(format!(
                "column {name:?} is not timestamp-typed: {other:?}"
            ))),
        }
    }
}

/// An iterable, random-access cursor over the rows returned by a query
/// (§4.8 `QueryResult`).
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    rows: Vec<Row>,
}

impl QueryResult {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn fetch_all(&self) -> &[Row] {
        &self.rows
    }

    pub fn fetch_one(&self) -> Result<&Row, DbError> {
        self.rows
            .first()
            .ok_or_else(|| DbError::Query("query returned no rows".to_string()))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl IntoIterator for QueryResult {
    type IntoIter = std::vec::IntoIter<Row>;
    type Item = Row;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// A name -> ordinal lookup used by [`crate::db::connection::PreparedStatement`]
/// callers that prefer binding by name over ordinal.
pub type ColumnIndex = HashMap<String, usize>;

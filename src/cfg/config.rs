// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Database connection and pool parameters (§6).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    pub port: u16,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default = "default_pool_min_size")]
    pub pool_min_size: u32,
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,
    #[serde(default = "default_pool_validation_interval_secs")]
    pub pool_validation_interval_secs: u64,
}

fn default_connection_timeout_secs() -> u64 {
    10
}
fn default_read_timeout_secs() -> u64 {
    30
}
fn default_write_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_charset() -> String {
    "utf8mb4".to_string()
}
fn default_pool_min_size() -> u32 {
    2
}
fn default_pool_max_size() -> u32 {
    16
}
fn default_pool_idle_timeout_secs() -> u64 {
    300
}
fn default_pool_validation_interval_secs() -> u64 {
    30
}

/// Transport/reactor parameters (§6).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TransportConfig {
    pub bind_address: String,
    #[serde(default = "default_accept_backlog")]
    pub accept_backlog: usize,
    #[serde(default = "default_section_count")]
    pub section_count: u32,
    #[serde(default = "default_iocp_thread_count")]
    pub iocp_thread_count: usize,
    #[serde(default = "default_hard_task_thread_count")]
    pub hard_task_thread_count: usize,
    /// §9: opt-in `strict_protocol_dispatch`; defaults to the original's
    /// log-and-ignore behavior.
    #[serde(default)]
    pub strict_protocol_dispatch: bool,
}

fn default_accept_backlog() -> usize {
    1024
}
fn default_section_count() -> u32 {
    4
}
fn default_iocp_thread_count() -> usize {
    1
}
fn default_hard_task_thread_count() -> usize {
    1
}

/// The top-level configuration document (§6), loaded from a single JSON
/// file named by `resolve_config_path`.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub transport: TransportConfig,
}

impl Config {
    /// Loads the configuration from JSON, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_json::from_str(&s).context("failed to parse config JSON")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates the invariants from §6: non-empty identity fields and a
    /// positive port.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.db.host.is_empty(), "db.host must not be empty");
        ensure!(!self.db.user.is_empty(), "db.user must not be empty");
        ensure!(!self.db.database.is_empty(), "db.database must not be empty");
        ensure!(self.db.port > 0, "db.port must be > 0");
        ensure!(
            self.db.pool_min_size <= self.db.pool_max_size,
            "db.pool_min_size must be <= db.pool_max_size"
        );
        ensure!(self.db.pool_max_size > 0, "db.pool_max_size must be > 0");

        ensure!(
            !self.transport.bind_address.is_empty(),
            "transport.bind_address must not be empty"
        );
        ensure!(
            self.transport.section_count > 0,
            "transport.section_count must be > 0"
        );

        Ok(())
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use netdb_core::cfg::cli::resolve_config_path;
use netdb_core::cfg::config::Config;
use netdb_core::cfg::logger::init_logger;
use netdb_core::db::driver::mysql_driver::MysqlDriverConnection;
use netdb_core::db::pool::DBConnectionPool;
use netdb_core::handlers::{AppState, LoginSessionFactory};
use netdb_core::net::core::NetworkCore;
use netdb_core::net::server::{HardTaskPool, ServerBase};
use tracing::info;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const SECTION_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[tokio::main]
async fn main() -> Result<()> {
    let _logger_guard = init_logger("config/logger.json")?;

    let config = resolve_config_path("config/app.json")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let driver_factory = Arc::new(|cfg: &netdb_core::cfg::config::DbConfig| {
        Box::new(MysqlDriverConnection::new(cfg.clone())) as Box<dyn netdb_core::db::driver::DriverConnection>
    });
    let pool = DBConnectionPool::new(config.db.clone(), driver_factory);
    pool.initialize().context("failed to initialize connection pool")?;
    info!("connection pool initialized: {:?}", pool.statistics());

    let hard_tasks = Arc::new(HardTaskPool::new(config.transport.hard_task_thread_count));

    let core = NetworkCore::new(netdb_core::net::core::DEFAULT_QUEUE_CAPACITY);
    let dispatchers = core.spawn_dispatchers(config.transport.iocp_thread_count);

    let app = AppState {
        pool: pool.clone(),
        hard_tasks: hard_tasks.clone(),
        acquire_timeout: ACQUIRE_TIMEOUT,
    };
    let factory = LoginSessionFactory::new(app);

    let server = ServerBase::new(
        core,
        hard_tasks,
        factory,
        config.transport.section_count,
        SECTION_POLL_INTERVAL,
        config.transport.strict_protocol_dispatch,
    );

    let bind_addr = config
        .transport
        .bind_address
        .parse()
        .context("invalid transport.bind_address")?;

    let shutdown_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_server.stop();
        }
    });

    let result = server.listen(bind_addr).await;

    pool.shutdown();
    for handle in dispatchers {
        handle.abort();
    }

    result
}

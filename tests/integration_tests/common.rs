// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use netdb_core::cfg::config::DbConfig;
use netdb_core::db::driver::fake::{FakeDatabase, FakeDriver};
use netdb_core::db::pool::DBConnectionPool;
use netdb_core::handlers::{AppState, LoginSessionFactory};
use netdb_core::net::core::{DEFAULT_QUEUE_CAPACITY, NetworkCore};
use netdb_core::net::server::{HardTaskPool, ServerBase};
use netdb_core::codec::packet::Packet;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub fn fake_db_config() -> DbConfig {
    DbConfig {
        host: "localhost".to_string(),
        user: "root".to_string(),
        password: String::new(),
        database: "test".to_string(),
        port: 3306,
        connection_timeout_secs: 5,
        read_timeout_secs: 5,
        write_timeout_secs: 5,
        auto_reconnect: true,
        charset: "utf8mb4".to_string(),
        pool_min_size: 1,
        pool_max_size: 4,
        pool_idle_timeout_secs: 3600,
        pool_validation_interval_secs: 3600,
    }
}

/// A server wired up exactly the way `main.rs` wires one, but over a
/// loopback address the test chooses and backed by the in-memory fake
/// driver instead of a live MySQL server (§10.4).
pub struct TestServer {
    pub addr: SocketAddr,
    pub pool: Arc<DBConnectionPool>,
}

impl TestServer {
    pub async fn start(port: u16) -> Self {
        let pool = DBConnectionPool::new(fake_db_config(), FakeDriver::factory(FakeDatabase::new()));
        pool.initialize().expect("pool initializes against the fake driver");

        let hard_tasks = Arc::new(HardTaskPool::new(2));
        let core = NetworkCore::new(DEFAULT_QUEUE_CAPACITY);
        let _dispatchers = core.spawn_dispatchers(1);

        let app = AppState {
            pool: pool.clone(),
            hard_tasks: hard_tasks.clone(),
            acquire_timeout: Duration::from_secs(2),
        };
        let factory = LoginSessionFactory::new(app);
        let server = ServerBase::new(core, hard_tasks, factory, 2, Duration::from_millis(1), false);

        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("valid loopback addr");
        let listen_addr = addr;
        tokio::spawn(async move {
            let _ = server.listen(listen_addr).await;
        });

        // The accept loop binds almost immediately; give it a moment before
        // any test dials in.
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self { addr, pool }
    }
}

pub async fn write_packet(stream: &mut TcpStream, packet: &Packet) -> Result<()> {
    stream.write_all(&packet.to_wire_bytes()).await?;
    Ok(())
}

pub async fn read_packet(stream: &mut TcpStream) -> Result<Packet> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some((packet, consumed)) = Packet::try_parse_one(&buf)? {
            buf.drain(..consumed);
            return Ok(packet);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            bail!("peer closed before a full packet arrived");
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

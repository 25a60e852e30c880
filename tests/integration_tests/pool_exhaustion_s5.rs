// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! S5: pool configured `min=1,max=2`. Three concurrent callers each run a
//! ~1-second query. The first two succeed; the third's
//! `acquire_connection(timeout=500ms)` times out with `ResourceExhausted`.
//! All three participants observe the pool still healthy afterwards.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use netdb_core::db::driver::{DriverConnection, PreparedDriverStatement};
use netdb_core::db::pool::{DBConnectionPool, DriverFactory};
use netdb_core::db::value::{QueryResult, Value};
use netdb_core::errors::DbError;

use crate::integration_tests::common::fake_db_config;

/// A driver whose queries take about a second, so three concurrent callers
/// reliably exercise a `min=1,max=2` pool's exhaustion path.
struct SlowDriver {
    connected: bool,
}

impl DriverConnection for SlowDriver {
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
        thread::sleep(Duration::from_millis(900));
        Ok(QueryResult::default())
    }

    fn execute_update(&mut self, _sql: &str) -> Result<u64, DbError> {
        thread::sleep(Duration::from_millis(900));
        Ok(0)
    }

    fn execute_insert(&mut self, _sql: &str) -> Result<u64, DbError> {
        thread::sleep(Duration::from_millis(900));
        Ok(1)
    }

    fn prepare(&mut self, _sql: &str) -> Result<Box<dyn PreparedDriverStatement>, DbError> {
        Err(DbError::Query("SlowDriver does not support prepare".to_string()))
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

fn slow_driver_factory() -> DriverFactory {
    Arc::new(|_cfg| Box::new(SlowDriver { connected: false }) as Box<dyn DriverConnection>)
}

#[test]
fn third_concurrent_query_is_rejected_while_the_pool_is_saturated() {
    let mut config = fake_db_config();
    config.pool_min_size = 1;
    config.pool_max_size = 2;

    let pool = DBConnectionPool::new(config, slow_driver_factory());
    pool.initialize().expect("pool initializes");

    // Lines up all three threads' acquisitions so the timing is
    // deterministic rather than racing thread start-up latency.
    let barrier = Arc::new(Barrier::new(3));
    let mut handles = Vec::new();

    for i in 0..2 {
        let pool = pool.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            let mut conn = pool.acquire_connection(Duration::from_secs(2)).expect("acquires within budget");
            let result = conn.execute_query("SELECT 1");
            (i, result.is_ok())
        }));
    }

    let third_pool = pool.clone();
    let third_barrier = barrier.clone();
    let third = thread::spawn(move || {
        third_barrier.wait();
        // Give the first two threads a head start into `acquire_connection`
        // so the pool is actually saturated by the time this one tries.
        thread::sleep(Duration::from_millis(50));
        third_pool.acquire_connection(Duration::from_millis(500))
    });

    for h in handles {
        let (_idx, ok) = h.join().expect("thread panicked");
        assert!(ok, "a query within pool capacity should succeed");
    }

    let third_result = third.join().expect("thread panicked");
    assert!(matches!(third_result, Err(DbError::ResourceExhausted(_))));

    assert!(pool.is_healthy());
    let stats = pool.statistics();
    assert_eq!(stats.active, 0);
    assert!(stats.total <= 2);
}

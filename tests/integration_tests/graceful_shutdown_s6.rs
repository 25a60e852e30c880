// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! S6: a hard task is executing a 200ms query when `shutdown()` is
//! invoked. The in-flight task completes and its success callback fires;
//! no new acquisitions are accepted once shutdown begins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use netdb_core::db::driver::fake::{FakeDatabase, FakeDriver};
use netdb_core::db::pool::DBConnectionPool;
use netdb_core::errors::DbError;
use netdb_core::net::server::HardTaskPool;

use crate::integration_tests::common::fake_db_config;

#[test]
fn in_flight_query_completes_and_new_acquisitions_are_rejected_once_shutdown_begins() {
    let pool = DBConnectionPool::new(fake_db_config(), FakeDriver::factory(FakeDatabase::new()));
    pool.initialize().expect("pool initializes");

    let hard_tasks = HardTaskPool::new(1);
    let completed = Arc::new(AtomicBool::new(false));

    let in_flight_pool = pool.clone();
    let completed_for_task = completed.clone();
    hard_tasks.submit(move || {
        let conn = in_flight_pool
            .acquire_connection(Duration::from_secs(1))
            .expect("acquires before shutdown begins");
        thread::sleep(Duration::from_millis(200));
        drop(conn);
        completed_for_task.store(true, Ordering::SeqCst);
    });

    // Give the hard task a moment to acquire its connection before shutdown
    // is requested, mirroring "a hard task is executing a query".
    thread::sleep(Duration::from_millis(20));
    pool.shutdown();

    for _ in 0..50 {
        if completed.load(Ordering::SeqCst) {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(completed.load(Ordering::SeqCst), "the in-flight task must run to completion");

    let rejected = pool.acquire_connection(Duration::from_millis(50));
    assert!(matches!(rejected, Err(DbError::ShuttingDown)));
}

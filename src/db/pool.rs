// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `DBConnectionPool`: a bounded, validated connection pool with lazy
//! growth and idle eviction (§4.9), guarded by one `std::sync::Mutex` plus
//! one `std::sync::Condvar` per §5's shared-resource policy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cfg::config::DbConfig;
use crate::db::connection::DBConnection;
use crate::db::driver::DriverConnection;
use crate::errors::DbError;

/// Builds a fresh, unconnected driver instance for a given `DbConfig`. The
/// pool owns connection lifecycle but not driver construction, so tests can
/// substitute `db::driver::fake::FakeDriver::new` here.
pub type DriverFactory = Arc<dyn Fn(&DbConfig) -> Box<dyn DriverConnection> + Send + Sync>;

struct PoolInner {
    idle: VecDeque<DBConnection>,
    active_ids: std::collections::HashSet<u64>,
}

/// Atomic counters exposed via [`DBConnectionPool::statistics`] (§4.9).
#[derive(Debug, Default)]
pub struct PoolStatistics {
    pub total: u64,
    pub active: u64,
    pub idle: u64,
    pub pending: u64,
    pub acquired: u64,
    pub created: u64,
    pub destroyed: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    total: AtomicU64,
    pending: AtomicU64,
    acquired: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
}

pub struct DBConnectionPool {
    config: DbConfig,
    driver_factory: DriverFactory,
    inner: Mutex<PoolInner>,
    condvar: Condvar,
    counters: PoolCounters,
    next_id: AtomicU64,
    initialized: AtomicBool,
    shutting_down: AtomicBool,
    validator: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for DBConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DBConnectionPool")
            .field("host", &self.config.host)
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// A scoped borrow of a [`DBConnection`], returned to the pool on `Drop`
/// (§3 `PooledConnection`).
pub struct PooledConnection {
    conn: Option<DBConnection>,
    id: u64,
    pool: Arc<DBConnectionPool>,
}

impl std::ops::Deref for PooledConnection {
    type Target = DBConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection taken before drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_connection(self.id, conn);
        }
    }
}

impl DBConnectionPool {
    pub fn new(config: DbConfig, driver_factory: DriverFactory) -> Arc<Self> {
        Arc::new(Self {
            config,
            driver_factory,
            inner: Mutex::new(PoolInner {
                idle: VecDeque::new(),
                active_ids: std::collections::HashSet::new(),
            }),
            condvar: Condvar::new(),
            counters: PoolCounters::default(),
            next_id: AtomicU64::new(1),
            initialized: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            validator: Mutex::new(None),
        })
    }

    /// Eagerly creates `min_size` connections and starts the validator
    /// thread (§4.9 "Initialize").
    pub fn initialize(self: &Arc<Self>) -> Result<(), DbError> {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        for _ in 0..self.config.pool_min_size {
            match self.create_connection() {
                Ok(conn) => inner.idle.push_back(conn),
                Err(e) => {
                    // roll back any partial allocations (§4.9)
                    inner.idle.clear();
                    self.counters.total.store(0, Ordering::Relaxed);
                    return Err(DbError::Connection(format!(
                        "failed to initialize pool: {e}"
                    )));
                },
            }
        }
        drop(inner);

        self.initialized.store(true, Ordering::Release);

        let pool = self.clone();
        let handle = std::thread::Builder::new()
            .name("db-pool-validator".to_string())
            .spawn(move || pool.validator_loop())
            .expect("failed to spawn pool validator thread");
        *self.validator.lock().expect("validator mutex poisoned") = Some(handle);

        Ok(())
    }

    fn create_connection(&self) -> Result<DBConnection, DbError> {
        let driver = (self.driver_factory)(&self.config);
        let mut conn = DBConnection::new(driver, self.config.clone());
        conn.connect()?;
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    /// `acquire_connection(timeout)` (§4.9).
    pub fn acquire_connection(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<PooledConnection, DbError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(DbError::Connection("pool is not initialized".to_string()));
        }
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(DbError::ShuttingDown);
        }

        self.counters.pending.fetch_add(1, Ordering::Relaxed);
        let result = self.acquire_inner(timeout);
        self.counters.pending.fetch_sub(1, Ordering::Relaxed);
        result
    }

    fn acquire_inner(self: &Arc<Self>, timeout: Duration) -> Result<PooledConnection, DbError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock().expect("pool mutex poisoned");

        loop {
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(DbError::ShuttingDown);
            }

            if let Some(mut conn) = guard.idle.pop_front() {
                if !conn.is_valid() {
                    self.counters.total.fetch_sub(1, Ordering::Relaxed);
                    self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
                    drop(conn);
                    continue;
                }
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                guard.active_ids.insert(id);
                self.counters.acquired.fetch_add(1, Ordering::Relaxed);
                return Ok(PooledConnection {
                    conn: Some(conn),
                    id,
                    pool: self.clone(),
                });
            }

            let total = self.counters.total.load(Ordering::Relaxed) as u32;
            if total < self.config.pool_max_size {
                drop(guard);
                let conn = self.create_connection()?;
                guard = self.inner.lock().expect("pool mutex poisoned");
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                guard.active_ids.insert(id);
                self.counters.acquired.fetch_add(1, Ordering::Relaxed);
                return Ok(PooledConnection {
                    conn: Some(conn),
                    id,
                    pool: self.clone(),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DbError::ResourceExhausted(format!(
                    "no idle connection within {timeout:?} and pool at max_size={}",
                    self.config.pool_max_size
                )));
            }

            let wait_for = deadline - now;
            let (g, wait_result) = self
                .condvar
                .wait_timeout(guard, wait_for)
                .expect("pool mutex poisoned");
            guard = g;
            if wait_result.timed_out() && guard.idle.is_empty() {
                let total = self.counters.total.load(Ordering::Relaxed) as u32;
                if total >= self.config.pool_max_size {
                    return Err(DbError::ResourceExhausted(format!(
                        "acquire_connection timed out after {timeout:?}"
                    )));
                }
            }
        }
    }

    fn return_connection(&self, id: u64, mut conn: DBConnection) {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        guard.active_ids.remove(&id);

        let still_valid = conn.is_valid();
        if still_valid && (guard.idle.len() as u32) < self.config.pool_max_size {
            guard.idle.push_back(conn);
        } else {
            conn.disconnect();
            self.counters.total.fetch_sub(1, Ordering::Relaxed);
            self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
        }
        drop(guard);
        self.condvar.notify_one();
    }

    pub fn statistics(&self) -> PoolStatistics {
        let guard = self.inner.lock().expect("pool mutex poisoned");
        PoolStatistics {
            total: self.counters.total.load(Ordering::Relaxed),
            active: guard.active_ids.len() as u64,
            idle: guard.idle.len() as u64,
            pending: self.counters.pending.load(Ordering::Relaxed),
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            created: self.counters.created.load(Ordering::Relaxed),
            destroyed: self.counters.destroyed.load(Ordering::Relaxed),
        }
    }

    /// `is_healthy()`: initialized, not shutting down, at or above
    /// `min_size`, and not over-subscribed on pending requests (§4.9).
    pub fn is_healthy(&self) -> bool {
        if !self.initialized.load(Ordering::Acquire) || self.shutting_down.load(Ordering::Acquire)
        {
            return false;
        }
        let stats = self.statistics();
        stats.total >= self.config.pool_min_size as u64
            && stats.pending <= self.config.pool_max_size as u64
    }

    fn validator_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.pool_validation_interval_secs.max(1));
        let idle_timeout = Duration::from_secs(self.config.pool_idle_timeout_secs);

        while !self.shutting_down.load(Ordering::Acquire) {
            std::thread::sleep(interval);
            if self.shutting_down.load(Ordering::Acquire) {
                return;
            }
            self.run_validation_cycle(idle_timeout);
        }
    }

    /// One validator pass (§4.9): evict stale/invalid idle connections, then
    /// top back up to `min_size`.
    fn run_validation_cycle(self: &Arc<Self>, idle_timeout: Duration) {
        let mut evicted = 0u32;
        {
            let mut guard = self.inner.lock().expect("pool mutex poisoned");
            let now = Instant::now();
            let mut kept = VecDeque::with_capacity(guard.idle.len());
            while let Some(mut conn) = guard.idle.pop_front() {
                let stale = now.duration_since(conn.last_activity()) > idle_timeout;
                if stale || !conn.is_valid() {
                    conn.disconnect();
                    evicted += 1;
                } else {
                    kept.push_back(conn);
                }
            }
            guard.idle = kept;
        }
        if evicted > 0 {
            self.counters
                .total
                .fetch_sub(evicted as u64, Ordering::Relaxed);
            self.counters
                .destroyed
                .fetch_add(evicted as u64, Ordering::Relaxed);
            debug!("pool validator evicted {evicted} idle connection(s)");
        }

        let total = self.counters.total.load(Ordering::Relaxed) as u32;
        if total < self.config.pool_min_size {
            for _ in total..self.config.pool_min_size {
                match self.create_connection() {
                    Ok(conn) => {
                        let mut guard = self.inner.lock().expect("pool mutex poisoned");
                        guard.idle.push_back(conn);
                    },
                    Err(e) => {
                        warn!("pool validator failed to top up min_size: {e}");
                        break;
                    },
                }
            }
            self.condvar.notify_all();
        }
    }

    /// Sets the shutting-down flag, wakes the validator, joins it, and
    /// drops all idle connections. Active connections finish their current
    /// borrow and are destroyed on return (§4.9).
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.condvar.notify_all();

        if let Some(handle) = self.validator.lock().expect("validator mutex poisoned").take() {
            let _ = handle.join();
        }

        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        let dropped = guard.idle.len() as u64;
        guard.idle.clear();
        self.counters.total.fetch_sub(dropped, Ordering::Relaxed);
        self.counters
            .destroyed
            .fetch_add(dropped, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::db::driver::PreparedDriverStatement;
    use crate::db::value::{QueryResult, Value};

    #[derive(Default)]
    struct CountingDriver {
        valid: bool,
    }

    impl DriverConnection for CountingDriver {
        fn connect(&mut self) -> Result<(), DbError> {
            self.valid = true;
            Ok(())
        }

        fn disconnect(&mut self) {
            self.valid = false;
        }

        fn is_valid(&mut self) -> bool {
            self.valid
        }

        fn execute_query(&mut self, _sql: &str) -> Result<QueryResult, DbError> {
            Ok(QueryResult::default())
        }

        fn execute_update(&mut self, _sql: &str) -> Result<u64, DbError> {
            Ok(0)
        }

        fn execute_insert(&mut self, _sql: &str) -> Result<u64, DbError> {
            Ok(0)
        }

        fn prepare(
            &mut self,
            _sql: &str,
        ) -> Result<Box<dyn PreparedDriverStatement>, DbError> {
            Err(DbError::Query("prepare not supported in test driver".to_string()))
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

    fn test_config(min: u32, max: u32) -> DbConfig {
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
            pool_min_size: min,
            pool_max_size: max,
            pool_idle_timeout_secs: 3600,
            pool_validation_interval_secs: 3600,
        }
    }

    fn counting_factory() -> DriverFactory {
        Arc::new(|_cfg: &DbConfig| Box::new(CountingDriver::default()) as Box<dyn DriverConnection>)
    }

    #[test]
    fn acquire_on_uninitialized_pool_errors() {
        let pool = DBConnectionPool::new(test_config(1, 2), counting_factory());
        let res = pool.acquire_connection(Duration::from_millis(10));
        assert!(matches!(res, Err(DbError::Connection(_))));
    }

    #[test]
    fn full_pool_with_zero_timeout_returns_resource_exhausted_immediately() {
        let pool = DBConnectionPool::new(test_config(0, 1), counting_factory());
        pool.initialize().expect("init");

        let _held = pool
            .acquire_connection(Duration::from_secs(1))
            .expect("first acquire succeeds");

        let start = Instant::now();
        let res = pool.acquire_connection(Duration::ZERO);
        assert!(matches!(res, Err(DbError::ResourceExhausted(_))));
        assert!(start.elapsed() < Duration::from_millis(200));

        pool.shutdown();
    }

    #[test]
    fn returning_a_connection_makes_it_available_again() {
        let pool = DBConnectionPool::new(test_config(0, 1), counting_factory());
        pool.initialize().expect("init");

        {
            let _held = pool.acquire_connection(Duration::from_secs(1)).expect("acquire");
        }

        let second = pool.acquire_connection(Duration::from_millis(200));
        assert!(second.is_ok());

        pool.shutdown();
    }

    #[test]
    fn pool_accounting_holds_after_acquire_and_return() {
        let pool = DBConnectionPool::new(test_config(2, 4), counting_factory());
        pool.initialize().expect("init");

        let held: Vec<_> = (0..3)
            .map(|_| pool.acquire_connection(Duration::from_secs(1)).expect("acquire"))
            .collect();

        let stats = pool.statistics();
        assert_eq!(stats.idle + stats.active, stats.total);
        assert!(stats.total <= pool.config.pool_max_size as u64);

        drop(held);
        let stats = pool.statistics();
        assert_eq!(stats.idle + stats.active, stats.total);

        pool.shutdown();
    }

    #[test]
    fn invalid_idle_connections_are_skipped_on_acquire() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_for_factory = counter.clone();
        let factory: DriverFactory = Arc::new(move |_cfg: &DbConfig| {
            counter_for_factory.fetch_add(1, Ordering::Relaxed);
            Box::new(CountingDriver::default()) as Box<dyn DriverConnection>
        });

        let pool = DBConnectionPool::new(test_config(1, 2), factory);
        pool.initialize().expect("init");

        // poison the single idle connection
        {
            let mut guard = pool.inner.lock().expect("lock");
            if let Some(conn) = guard.idle.front_mut() {
                conn.disconnect();
            }
        }

        let acquired = pool.acquire_connection(Duration::from_secs(1)).expect("acquire");
        assert!(acquired.conn.is_some());
        assert!(counter.load(Ordering::Relaxed) >= 2);

        pool.shutdown();
    }
}

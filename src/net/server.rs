// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `ServerBase` / `ClientBase`: bootstrap, accept/connect loop, section
//! placement, and the blocking "hard task" worker pool (§4.7).

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::net::core::NetworkCore;
use crate::net::perf::PerfCounters;
use crate::net::section::{FewestSessionsSelector, NetworkSection, SectionSelector};
use crate::net::session::Session;
use crate::net::transport::TcpTransport;

/// Tick interval for the background perf/section-metrics logging tasks (§2).
const PERF_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Installs protocol handlers on a freshly constructed session, before it
/// joins a section or reaches `Connected` (§3 invariant: handlers are
/// registered before `Connected`).
pub trait SessionFactory: Send + Sync {
    fn configure(&self, session: &Arc<Session>);
}

/// A pool of real OS threads dedicated to blocking work — principally
/// database calls submitted through an `AsyncDBContext` (§4.7, §9: the
/// network subsystem stays on tokio tasks, but the DB driver boundary is
/// synchronous, so its callers get real threads instead).
pub struct HardTaskPool {
    tx: std::sync::mpsc::Sender<Box<dyn FnOnce() + Send + 'static>>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl std::fmt::Debug for HardTaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardTaskPool")
            .field("worker_count", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl HardTaskPool {
    pub fn new(thread_count: usize) -> Self {
        let (tx, rx) = std::sync::mpsc::channel::<Box<dyn FnOnce() + Send + 'static>>();
        let rx = Arc::new(StdMutex::new(rx));
        let mut workers = Vec::with_capacity(thread_count.max(1));
        for idx in 0..thread_count.max(1) {
            let rx = rx.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("hard-task-{idx}"))
                    .spawn(move || {
                        loop {
                            let job = {
                                let rx = rx.lock().expect("hard task queue lock poisoned");
                                rx.recv()
                            };
                            match job {
                                Ok(job) => job(),
                                Err(_) => return,
                            }
                        }
                    })
                    .expect("failed to spawn hard task worker thread"),
            );
        }
        Self { tx, workers }
    }

    /// Submits a blocking closure to the pool. Dropped silently if every
    /// worker has already exited (shutdown in progress).
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            warn!("hard task pool is shut down; task dropped");
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// Listens, accepts, and routes new sessions into sections (§4.7).
pub struct ServerBase {
    core: Arc<NetworkCore>,
    hard_tasks: Arc<HardTaskPool>,
    selector: Box<dyn SectionSelector>,
    factory: Arc<dyn SessionFactory>,
    strict_protocol_dispatch: bool,
    cancel: CancellationToken,
    perf: Arc<PerfCounters>,
}

impl ServerBase {
    pub fn new(
        core: Arc<NetworkCore>,
        hard_tasks: Arc<HardTaskPool>,
        factory: Arc<dyn SessionFactory>,
        section_count: u32,
        section_poll_interval: std::time::Duration,
        strict_protocol_dispatch: bool,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let perf = Arc::new(PerfCounters::default());

        for id in 0..section_count.max(1) {
            let section = NetworkSection::new(id, section_poll_interval);
            core.register_section(section.clone());
            tokio::spawn(section.run());
        }

        tokio::spawn(perf.clone().run(PERF_TICK_INTERVAL, cancel.clone()));

        let metrics_core = core.clone();
        let metrics_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = metrics_cancel.cancelled() => return,
                    _ = tokio::time::sleep(PERF_TICK_INTERVAL) => {},
                }
                for entry in metrics_core.sections().iter() {
                    let snapshot = entry.value().metrics_snapshot();
                    info!(
                        section_id = entry.key(),
                        tasks_executed = snapshot.tasks_executed,
                        packets_broadcast = snapshot.packets_broadcast,
                        "section metrics tick"
                    );
                }
            }
        });

        Arc::new(Self {
            core,
            hard_tasks,
            selector: Box::new(FewestSessionsSelector),
            factory,
            strict_protocol_dispatch,
            cancel,
            perf,
        })
    }

    pub fn hard_tasks(&self) -> &Arc<HardTaskPool> {
        &self.hard_tasks
    }

    pub fn core(&self) -> &Arc<NetworkCore> {
        &self.core
    }

    pub fn perf(&self) -> &Arc<PerfCounters> {
        &self.perf
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        self.core.stop();
        for entry in self.core.sections().iter() {
            entry.value().stop();
        }
    }

    /// Binds `addr` and runs the accept loop until `stop()` is called.
    pub async fn listen(self: &Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!("listening on {addr}");

        loop {
            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("accept loop stopping");
                    return Ok(());
                }
                res = listener.accept() => res,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                },
            };

            let transport = match TcpTransport::from_stream(stream) {
                Ok(t) => Arc::new(t),
                Err(e) => {
                    warn!("failed to wrap accepted stream from {peer}: {e}");
                    continue;
                },
            };

            self.perf.record_accept();
            let session = Session::new(transport, self.strict_protocol_dispatch, self.perf.clone());
            self.factory.configure(&session);
            session.mark_accepted();

            let Some(section) = self.selector.select(self.core.sections()) else {
                warn!("no sections configured; disconnecting accepted session");
                session.disconnect().await;
                continue;
            };

            self.core.bind_session(session.id(), section.id());
            section.enter_section(session.clone()).await;

            let packet_tx = self.core.packet_sender();
            tokio::spawn(async move {
                if let Err(e) = session.recv_loop(packet_tx).await {
                    warn!("recv loop for session {} exited with error: {e}", session.id());
                }
            });
        }
    }
}

/// Client-side counterpart: no sections, a single job task dispatches
/// packets straight to their session's handler (§4.7).
pub struct ClientBase {
    sessions: dashmap::DashMap<u32, Arc<Session>>,
    strict_protocol_dispatch: bool,
    perf: Arc<PerfCounters>,
}

impl ClientBase {
    pub fn new(strict_protocol_dispatch: bool) -> Arc<Self> {
        Arc::new(Self {
            sessions: dashmap::DashMap::new(),
            strict_protocol_dispatch,
            perf: Arc::new(PerfCounters::default()),
        })
    }

    pub fn perf(&self) -> &Arc<PerfCounters> {
        &self.perf
    }

    /// Connects to `addr`, installs handlers via `factory`, and spawns its
    /// recv loop. Returns the new session.
    pub async fn connect(
        self: &Arc<Self>,
        addr: SocketAddr,
        factory: &dyn SessionFactory,
        packet_tx: tokio::sync::mpsc::Sender<crate::net::session::InboundPacket>,
    ) -> Result<Arc<Session>> {
        let transport = TcpTransport::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        let session = Session::new(Arc::new(transport), self.strict_protocol_dispatch, self.perf.clone());
        factory.configure(&session);
        session.mark_connecting_then_connected();
        self.sessions.insert(session.id(), session.clone());

        let recv_session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = recv_session.recv_loop(packet_tx).await {
                warn!("client recv loop exited with error: {e}");
            }
        });

        Ok(session)
    }

    /// The single job task: pulls packets off `rx` and dispatches directly
    /// to the owning session's handler (no section indirection client-side).
    pub async fn run_job_task(
        self: Arc<Self>,
        mut rx: tokio::sync::mpsc::Receiver<crate::net::session::InboundPacket>,
    ) {
        while let Some(envelope) = rx.recv().await {
            let Some(session) = self.sessions.get(&envelope.session_id).map(|s| s.clone())
            else {
                warn!("dropping packet for unknown client session {}", envelope.session_id);
                continue;
            };
            session.execute_packet(envelope.packet).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn hard_task_pool_runs_submitted_jobs() {
        let pool = HardTaskPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}

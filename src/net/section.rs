// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `NetworkSection`: a shard of the session set with a dedicated worker task
//! driving a delayed-task priority queue (§4.6).

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::packet::Packet;
use crate::net::session::Session;

/// Default interval the section worker sleeps for when its queue is empty
/// (§9: kept configurable rather than hardcoded).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A future boxed up for storage in [`ITask`]; lets the section worker
/// `.await` a task's work to completion instead of merely starting it.
type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A scheduled unit of work (§3 `iTask`): ordered by `execute_time`
/// ascending, optionally re-armed after running. The worker `.await`s `work`
/// to completion before considering the task done (§4.6, §5: one session's
/// tasks run in order, to completion, on their section's worker).
pub struct ITask {
    execute_time: Instant,
    delay: Duration,
    repeat: bool,
    work: Box<dyn FnMut() -> BoxFuture + Send>,
    post_processing: Option<Box<dyn FnMut() + Send>>,
}

impl ITask {
    pub fn once(execute_time: Instant, mut work: impl FnMut() + Send + 'static) -> Self {
        Self {
            execute_time,
            delay: Duration::ZERO,
            repeat: false,
            work: Box::new(move || {
                work();
                Box::pin(std::future::ready(()))
            }),
            post_processing: None,
        }
    }

    pub fn repeating(
        execute_time: Instant,
        delay: Duration,
        mut work: impl FnMut() + Send + 'static,
    ) -> Self {
        Self {
            execute_time,
            delay,
            repeat: true,
            work: Box::new(move || {
                work();
                Box::pin(std::future::ready(()))
            }),
            post_processing: None,
        }
    }

    /// Schedules asynchronous work: the section worker awaits the returned
    /// future to completion before popping the next due task. Used to route
    /// a session's packet through its owning section without detaching it
    /// onto an independent tokio task (§5 ordering invariant).
    pub fn once_async<F>(execute_time: Instant, mut work: impl FnMut() -> F + Send + 'static) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            execute_time,
            delay: Duration::ZERO,
            repeat: false,
            work: Box::new(move || Box::pin(work()) as BoxFuture),
            post_processing: None,
        }
    }

    /// Attaches an optional post-processing closure, run immediately after
    /// `work` completes on the section worker thread (§4.6).
    pub fn with_post_processing(mut self, post_processing: impl FnMut() + Send + 'static) -> Self {
        self.post_processing = Some(Box::new(post_processing));
        self
    }
}

impl std::fmt::Debug for ITask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ITask")
            .field("execute_time", &self.execute_time)
            .field("delay", &self.delay)
            .field("repeat", &self.repeat)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ITask {
    fn eq(&self, other: &Self) -> bool {
        self.execute_time == other.execute_time
    }
}
impl Eq for ITask {}
impl PartialOrd for ITask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ITask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.execute_time.cmp(&other.execute_time)
    }
}

/// Aggregate per-section counters (§2 "Performance counters").
#[derive(Debug, Default)]
pub struct SectionMetrics {
    pub tasks_executed: AtomicU64,
    pub packets_broadcast: AtomicU64,
}

/// Point-in-time copy of a section's [`SectionMetrics`], returned by value so
/// callers (logging ticks, diagnostics endpoints) don't hold a reference onto
/// the section's internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionMetricsSnapshot {
    pub tasks_executed: u64,
    pub packets_broadcast: u64,
}

/// A shard owning a disjoint subset of sessions plus its own task queue
/// (§3 `NetworkSection`).
#[derive(Debug)]
pub struct NetworkSection {
    id: u32,
    sessions: DashMap<u32, Arc<Session>>,
    queue: Mutex<BinaryHeap<Reverse<TaskEntry>>>,
    poll_interval: Duration,
    metrics: SectionMetrics,
    cancel: CancellationToken,
}

/// Wraps [`ITask`] for heap ordering; `BinaryHeap` is a max-heap so entries
/// are stored `Reverse`d to pop the earliest `execute_time` first.
struct TaskEntry(ITask);

impl PartialEq for TaskEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq(&other.0)
    }
}
impl Eq for TaskEntry {}
impl PartialOrd for TaskEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TaskEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl NetworkSection {
    pub fn new(id: u32, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            id,
            sessions: DashMap::new(),
            queue: Mutex::new(BinaryHeap::new()),
            poll_interval,
            metrics: SectionMetrics::default(),
            cancel: CancellationToken::new(),
        })
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Snapshots this section's task/broadcast counters (§2).
    pub fn metrics_snapshot(&self) -> SectionMetricsSnapshot {
        SectionMetricsSnapshot {
            tasks_executed: self.metrics.tasks_executed.load(Ordering::Relaxed),
            packets_broadcast: self.metrics.packets_broadcast.load(Ordering::Relaxed),
        }
    }

    /// `enter_section(s)`: rejects (disconnects) a session id already
    /// present, otherwise inserts and sets the session's back-pointer.
    pub async fn enter_section(self: &Arc<Self>, session: Arc<Session>) {
        let id = session.id();
        if self.sessions.contains_key(&id) {
            warn!("session {id} already present in section {}; disconnecting", self.id);
            session.disconnect().await;
            return;
        }
        session.set_section(self.id).await;
        self.sessions.insert(id, session);
    }

    /// `exit_section(id)`: clears the back-pointer and removes the entry.
    pub async fn exit_section(&self, session_id: u32) {
        if let Some((_, session)) = self.sessions.remove(&session_id) {
            session.clear_section().await;
        }
    }

    pub fn session(&self, session_id: u32) -> Option<Arc<Session>> {
        self.sessions.get(&session_id).map(|s| s.clone())
    }

    /// Schedules `task` onto this section's queue.
    pub async fn schedule(&self, task: ITask) {
        self.queue.lock().await.push(Reverse(TaskEntry(task)));
    }

    /// Broadcasts `packet` to every session in the section, optionally
    /// skipping `exclude`. The same `Arc<Packet>` is shared across every
    /// session's `MultiSender`, never copied (§4.6).
    pub async fn broadcast(&self, packet: Arc<Packet>, exclude: Option<u32>) {
        for entry in self.sessions.iter() {
            if Some(*entry.key()) == exclude {
                continue;
            }
            entry.value().send_packet(packet.clone()).await;
        }
        self.metrics
            .packets_broadcast
            .fetch_add(1, Ordering::Relaxed);
    }

    /// The section's dedicated worker loop (§4.6): pop due tasks, run them to
    /// completion (no preemption), re-arm repeats.
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                debug!("section {} worker stopping", self.id);
                return;
            }

            let due = {
                let mut q = self.queue.lock().await;
                match q.peek() {
                    None => None,
                    Some(Reverse(entry)) => {
                        if Instant::now() < entry.0.execute_time {
                            None
                        } else {
                            q.pop().map(|Reverse(e)| e)
                        }
                    },
                }
            };

            let Some(TaskEntry(mut task)) = due else {
                sleep(self.poll_interval).await;
                continue;
            };

            (task.work)().await;
            if let Some(post_processing) = task.post_processing.as_mut() {
                (post_processing)();
            }
            self.metrics.tasks_executed.fetch_add(1, Ordering::Relaxed);

            if task.repeat {
                task.execute_time = Instant::now() + task.delay;
                self.queue.lock().await.push(Reverse(TaskEntry(task)));
            }
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Selects which section a newly accepted session should join (§4.7).
pub trait SectionSelector: Send + Sync {
    fn select(&self, sections: &DashMap<u32, Arc<NetworkSection>>) -> Option<Arc<NetworkSection>>;
}

/// Default policy: the section currently owning the fewest sessions. This
/// strengthens the original's unspecified "head of the map" placeholder
/// (§9 Design Notes).
#[derive(Debug, Default)]
pub struct FewestSessionsSelector;

impl SectionSelector for FewestSessionsSelector {
    fn select(&self, sections: &DashMap<u32, Arc<NetworkSection>>) -> Option<Arc<NetworkSection>> {
        sections
            .iter()
            .min_by_key(|entry| entry.value().session_count())
            .map(|entry| entry.value().clone())
    }
}

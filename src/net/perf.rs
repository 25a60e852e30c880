// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Aggregate performance counters: FPS, RX/TX, and accept throughput (§2).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::info;

/// Frames-per-second / accepts-per-second counters, reset on every tick.
#[derive(Debug, Default)]
pub struct PerfCounters {
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    accepts: AtomicU64,
}

impl PerfCounters {
    pub fn record_recv(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accept(&self) {
        self.accepts.fetch_add(1, Ordering::Relaxed);
    }

    fn take_tick(&self) -> (u64, u64, u64) {
        (
            self.frames_received.swap(0, Ordering::Relaxed),
            self.frames_sent.swap(0, Ordering::Relaxed),
            self.accepts.swap(0, Ordering::Relaxed),
        )
    }

    /// Runs until `cancel` fires, logging a snapshot every `interval`.
    pub async fn run(
        self: std::sync::Arc<Self>,
        interval: Duration,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {},
            }
            let (rx, tx, accepts) = self.take_tick();
            info!(frames_rx = rx, frames_tx = tx, accepts, "perf tick");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_tick_resets_the_counters() {
        let perf = PerfCounters::default();
        perf.record_recv();
        perf.record_recv();
        perf.record_send();
        perf.record_accept();

        let (rx, tx, accepts) = perf.take_tick();
        assert_eq!((rx, tx, accepts), (2, 1, 1));
        assert_eq!(perf.take_tick(), (0, 0, 0));
    }
}

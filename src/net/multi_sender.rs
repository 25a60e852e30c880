// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-session coalescing outbound pipeline with a single-flight send
//! invariant (§4.4).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use crate::codec::packet::Packet;
use crate::net::perf::PerfCounters;
use crate::net::transport::TransportSocket;

/// Coalesces `register_packet` calls into scatter-gather sends, guaranteeing
/// at most one send is ever outstanding for the owning session (§4.4's
/// "at-most-one-send" invariant).
#[derive(Debug)]
pub struct MultiSender {
    transport: Arc<dyn TransportSocket>,
    pending_tx: mpsc::UnboundedSender<Arc<Packet>>,
    pending_rx: Mutex<mpsc::UnboundedReceiver<Arc<Packet>>>,
    sending: AtomicBool,
    perf: Arc<PerfCounters>,
}

impl MultiSender {
    pub fn new(transport: Arc<dyn TransportSocket>, perf: Arc<PerfCounters>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            transport,
            pending_tx: tx,
            pending_rx: Mutex::new(rx),
            sending: AtomicBool::new(false),
            perf,
        }
    }

    /// Enqueues `packet` for send; if no send is currently in flight, drives
    /// one (possibly several, if more packets arrive while draining).
    pub async fn register_packet(&self, packet: Arc<Packet>) {
        if self.pending_tx.send(packet).is_err() {
            warn!("multi-sender channel closed; packet dropped");
            return;
        }
        if self
            .sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.drain_and_send().await;
        }
    }

    /// Drains every currently-pending packet into one vectored write, then
    /// either re-enters (more arrived meanwhile) or releases the flag.
    ///
    /// This loop *is* `send()` + `on_send_completion()` from §4.4 collapsed
    /// into one call: with an async write there is no separate completion
    /// notification to react to, so draining and awaiting the write happen
    /// back to back under the same `sending` guard.
    async fn drain_and_send(&self) {
        loop {
            let batch = {
                let mut rx = self.pending_rx.lock().await;
                let mut batch = Vec::new();
                while let Ok(p) = rx.try_recv() {
                    batch.push(p);
                }

                if batch.is_empty() {
                    // Relinquish ownership, but keep holding the receiver
                    // lock while doing so: if a concurrent `register_packet`
                    // call's `send()` landed right after our last
                    // `try_recv()` above, its CAS may already have failed
                    // against the still-`true` flag before we get here.
                    // Clearing the flag and re-checking the channel under
                    // the same lock acquisition closes that gap. No other
                    // task can start its own drain loop until we release
                    // this guard, so reclaiming ownership here can never
                    // race with a second drainer (§4.4 invariants (a)/(b)).
                    self.sending.store(false, Ordering::Release);
                    while let Ok(p) = rx.try_recv() {
                        batch.push(p);
                    }
                    if !batch.is_empty() {
                        self.sending.store(true, Ordering::Release);
                    }
                }

                batch
            };

            if batch.is_empty() {
                return;
            }

            let wire: Vec<Bytes> = batch.iter().map(|p| p.to_wire_bytes()).collect();
            if let Err(e) = self.transport.send_vectored(&wire).await {
                warn!("send failed, dropping {} in-flight packet(s): {e}", batch.len());
                self.sending.store(false, Ordering::Release);
                return;
            }
            for _ in &batch {
                self.perf.record_send();
            }
            // loop again: more packets may have been registered while we were
            // awaiting the write.
        }
    }

    /// Drops every packet currently queued, without sending them. Used when
    /// a session transitions to `Closing`.
    pub async fn clear(&self) {
        let mut rx = self.pending_rx.lock().await;
        while rx.try_recv().is_ok() {}
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The network core subsystem (§2, §4.1-4.7): framing, transport, the
//! session state machine, the coalescing sender, the reactor, and the
//! sharded per-section scheduler.

pub mod core;
pub mod multi_sender;
pub mod perf;
pub mod receive_buffer;
pub mod section;
pub mod server;
pub mod session;
pub mod transport;

pub use core::NetworkCore;
pub use perf::PerfCounters;
pub use section::{ITask, NetworkSection, SectionMetricsSnapshot, SectionSelector};
pub use server::{ClientBase, HardTaskPool, ServerBase, SessionFactory};
pub use session::{InboundPacket, Session, SessionState};
pub use transport::{TcpTransport, TransportSocket};

//! # weir-controller
//!
//! The long-lived OpenFlow 1.3 control plane. One reader/writer thread pair
//! per switch session feeds a single compute worker that owns the topology
//! graph, host map and flow installer; periodic threads poll port counters,
//! flush the capture ring and reload the classification table.
//!
//! ```text
//! [switch] ──OF──▶ [session] ──events──▶ [compute worker] ──FLOW_MOD──▶ [switch]
//!                      ▲                    │        │
//!                [stats poller]       [capture ring] [classification
//!                                          │          table (arc-swap)]
//!                                     [flusher] ──▶ snapshot files
//! ```
//!
//! ## Crate structure
//!
//! - [`session`] — per-switch handshake and message IO
//! - [`events`] — the event sum type feeding the compute worker
//! - [`topology`] — link-state graph, utilisation sampling, FPLF weights
//! - [`router`] — baseline vs FPLF path decisions
//! - [`installer`] — path → flow-rule fan-out, reroutes, retries
//! - [`capture`] — bounded packet ring and snapshot flusher
//! - [`monitor`] — port-statistics polling
//! - [`reload`] — classification table refresh
//! - [`worker`] — the compute worker event loop

pub mod capture;
pub mod errors;
pub mod events;
pub mod installer;
pub mod monitor;
pub mod reload;
pub mod router;
pub mod session;
pub mod topology;
pub mod worker;

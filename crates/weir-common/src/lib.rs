//! Shared types for the weir control plane.
//!
//! This crate contains:
//! - **Typed ids** — datapath ids, port numbers, MAC addresses ([`ids`])
//! - **Traffic classes** — the closed class set, priorities and the
//!   well-known-port override table ([`class`])
//! - **Host map** — the pre-seeded MAC → (dpid, port) attachment map ([`hostmap`])
//! - **Snapshot records** — the captured-packet schema shared by the
//!   controller's flusher and the offline pipeline ([`snapshot`])
//! - **Classification table** — the host-pair → class table the router reads
//!   and the offline pipeline writes ([`table`])
//! - **Configuration** — TOML config for the daemon and offline tools ([`config`])

pub mod class;
pub mod config;
pub mod hostmap;
pub mod ids;
pub mod snapshot;
pub mod table;

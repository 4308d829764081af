//! Controller error kinds.
//!
//! Everything here is recovered as locally as possible: a routing failure
//! drops one packet, an install failure schedules a retry, a protocol error
//! closes one session. Only startup errors terminate the process, and those
//! live in `main`.

use thiserror::Error;

use weir_common::ids::{Dpid, MacAddr};

/// Route computation failures. Callers treat both as transient: unknown
/// hosts are flooded, missing paths retried on the next PACKET_IN.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    #[error("no host map entry for {0}")]
    UnknownHost(MacAddr),
    #[error("no route between {src} and {dst}")]
    NoRoute { src: Dpid, dst: Dpid },
}

/// Flow installation failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InstallError {
    /// The target datapath disconnected mid-operation.
    #[error("switch {0} is gone")]
    SwitchGone(Dpid),
    /// A FLOW_MOD could not be delivered after the retry.
    #[error("flow installation failed on {0}")]
    Failed(Dpid),
    /// The route-and-install budget expired; outstanding mods cancelled.
    #[error("install budget exceeded after {sent} of {total} flow mods")]
    BudgetExceeded { sent: usize, total: usize },
}

//! Events delivered to the compute worker.
//!
//! Every mutation of the topology, host table or installer state travels
//! through this type on one bounded channel, so the worker sees a single
//! serialised stream: PACKET_INs from a given switch arrive in order
//! (one reader thread per switch, FIFO channel), and the router always
//! computes against a consistent graph snapshot.

use weir_common::ids::{Dpid, PortNo};
use weir_proto::messages::{PacketIn, PortStatsEntry, PortStatus};

/// One end of a link: a port on a datapath.
pub type LinkEnd = (Dpid, PortNo);

#[derive(Debug, Clone)]
pub enum Event {
    /// Handshake complete; the switch is registered and carries a fresh
    /// table-miss rule.
    SwitchUp {
        dpid: Dpid,
        ports: Vec<PortNo>,
    },
    SwitchDown {
        dpid: Dpid,
    },
    PacketIn {
        dpid: Dpid,
        packet: PacketIn,
    },
    /// A port-stats sample from the poller round-trip.
    PortStats {
        dpid: Dpid,
        entries: Vec<PortStatsEntry>,
    },
    PortStatus {
        dpid: Dpid,
        status: PortStatus,
    },
    /// Link discovered (externally supplied, or static config).
    LinkAdd {
        a: LinkEnd,
        b: LinkEnd,
        capacity_mbps: Option<f64>,
    },
    LinkDelete {
        a: LinkEnd,
        b: LinkEnd,
    },
    /// Periodic heartbeat from the stats poller; drives retry drains.
    Tick,
    Shutdown,
}

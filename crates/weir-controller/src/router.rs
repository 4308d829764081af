//! # Route decisions
//!
//! `route` resolves both MACs through the host map, derives the flow's
//! class and priority from the current classification snapshot, and
//! computes two paths over the same graph state: the hop-count baseline
//! and the FPLF path over priority-scaled weights. The decision records
//! both, so every reroute log can say whether load feedback actually
//! changed the outcome.

use tracing::debug;

use weir_common::class::TrafficClass;
use weir_common::hostmap::HostMap;
use weir_common::ids::{Dpid, MacAddr, PortNo};
use weir_common::table::ClassificationTable;

use crate::errors::RouteError;
use crate::topology::{EdgeWeights, Topology};

/// One switch on an installed path with its ingress and egress ports.
/// `in_port` on the first hop and `out_port` on the last are host-facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathHop {
    pub dpid: Dpid,
    pub in_port: PortNo,
    pub out_port: PortNo,
}

/// A computed route for a (src, dst) host pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub src: MacAddr,
    pub dst: MacAddr,
    pub class: TrafficClass,
    pub priority: u8,
    pub confidence: f64,
    pub hops: Vec<PathHop>,
    /// Hop-count shortest path, for comparison only.
    pub baseline: Vec<Dpid>,
    /// The path actually installed.
    pub fplf: Vec<Dpid>,
    pub cost: f64,
    pub edges: Vec<EdgeWeights>,
    pub route_changed: bool,
}

impl RouteDecision {
    pub fn dpids(&self) -> Vec<Dpid> {
        self.hops.iter().map(|h| h.dpid).collect()
    }
}

/// Compute the FPLF route between two hosts.
pub fn route(
    topology: &Topology,
    hosts: &HostMap,
    table: &ClassificationTable,
    src: MacAddr,
    dst: MacAddr,
) -> Result<RouteDecision, RouteError> {
    let (src_dpid, src_port) = hosts.locate(src).ok_or(RouteError::UnknownHost(src))?;
    let (dst_dpid, dst_port) = hosts.locate(dst).ok_or(RouteError::UnknownHost(dst))?;

    // Classification only applies when both MACs map to named hosts;
    // otherwise the flow routes as Unknown at priority 0.
    let entry = match (hosts.host_id(src), hosts.host_id(dst)) {
        (Some(src_host), Some(dst_host)) => table.lookup(src_host, dst_host),
        _ => weir_common::table::ClassEntry::UNKNOWN,
    };
    let class = entry.class;
    let priority = class.priority();

    // Hosts on one switch route locally, without touching the graph.
    if src_dpid == dst_dpid {
        return Ok(RouteDecision {
            src,
            dst,
            class,
            priority,
            confidence: entry.confidence,
            hops: vec![PathHop {
                dpid: src_dpid,
                in_port: src_port,
                out_port: dst_port,
            }],
            baseline: vec![src_dpid],
            fplf: vec![src_dpid],
            cost: 0.0,
            edges: Vec::new(),
            route_changed: false,
        });
    }

    let no_route = RouteError::NoRoute {
        src: src_dpid,
        dst: dst_dpid,
    };
    let baseline = topology
        .baseline_path(src_dpid, dst_dpid)
        .ok_or(no_route)?;
    let (fplf, cost, edges) = topology
        .fplf_path(src_dpid, dst_dpid, class.weight_factor())
        .ok_or(no_route)?;

    let mut hops = Vec::with_capacity(fplf.len());
    for (i, &dpid) in fplf.iter().enumerate() {
        let in_port = if i == 0 {
            src_port
        } else {
            topology.egress_port(dpid, fplf[i - 1]).ok_or(no_route)?
        };
        let out_port = if i == fplf.len() - 1 {
            dst_port
        } else {
            topology.egress_port(dpid, fplf[i + 1]).ok_or(no_route)?
        };
        hops.push(PathHop {
            dpid,
            in_port,
            out_port,
        });
    }

    let route_changed = baseline != fplf;
    debug!(
        %src, %dst, %class, priority, cost,
        baseline = ?baseline, fplf = ?fplf, route_changed,
        "route computed"
    );
    Ok(RouteDecision {
        src,
        dst,
        class,
        priority,
        confidence: entry.confidence,
        hops,
        baseline,
        fplf,
        cost,
        edges,
        route_changed,
    })
}

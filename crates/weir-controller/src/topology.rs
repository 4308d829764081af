//! # Topology graph and FPLF weight engine
//!
//! An undirected link-state graph keyed by dpid. Edges carry the port pair,
//! the configured capacity and the last sampled utilisation; weights are
//! derived on demand:
//!
//! ```text
//! u == 0           w = 500
//! 0 < u < T        w = 499 - (T - u)
//! u >= T           w = 1000
//! ```
//!
//! Idle links deliberately weigh more than lightly used ones so Dijkstra
//! packs flows onto paths already carrying traffic instead of fragmenting
//! capacity across many nearly-idle links. Congested links cost roughly
//! twice idle: any uncongested alternative wins, but a congested link
//! remains usable when it is the only one.
//!
//! All path computations iterate neighbours in dpid order and break cost
//! ties lexicographically, so identical graph state yields identical paths.

use std::collections::{BTreeSet, BinaryHeap, HashMap, VecDeque};

use petgraph::graph::{NodeIndex, UnGraph};
use quanta::Instant;
use tracing::{debug, trace};

use weir_common::ids::{Dpid, PortNo};
use weir_proto::messages::PortStatsEntry;

// ─── Weights ────────────────────────────────────────────────────────────────

/// Weight of a completely idle link.
pub const IDLE_WEIGHT: f64 = 500.0;
/// Base for lightly loaded links; actual weight is `499 - (T - u)`.
pub const BUSY_BASE: f64 = 499.0;
/// Penalty weight once utilisation crosses the congestion threshold.
pub const CONGESTED_WEIGHT: f64 = 1000.0;

/// The FPLF base weight for a link at utilisation `u`.
pub fn base_weight(u: f64, threshold: f64) -> f64 {
    if u == 0.0 {
        IDLE_WEIGHT
    } else if u < threshold {
        BUSY_BASE - (threshold - u)
    } else {
        CONGESTED_WEIGHT
    }
}

/// Utilisation of a port that moved `delta_bytes` in `elapsed_secs`.
pub fn utilisation(delta_bytes: u64, elapsed_secs: f64, capacity_mbps: f64) -> f64 {
    if elapsed_secs <= 0.0 || capacity_mbps <= 0.0 {
        return 0.0;
    }
    let mbps = (delta_bytes as f64 * 8.0) / (elapsed_secs * 1e6);
    (mbps / capacity_mbps).min(1.0)
}

/// Per-edge weight pair reported with every FPLF decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeWeights {
    pub a: Dpid,
    pub b: Dpid,
    pub base: f64,
    pub adjusted: f64,
}

// ─── Link state ─────────────────────────────────────────────────────────────

/// State carried on each graph edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkState {
    pub a: (Dpid, PortNo),
    pub b: (Dpid, PortNo),
    /// Last sampled utilisation, clamped to [0, 1].
    pub utilisation: f64,
    pub capacity_mbps: f64,
}

impl LinkState {
    /// The egress port on `from` toward the other end.
    fn port_on(&self, from: Dpid) -> Option<PortNo> {
        if self.a.0 == from {
            Some(self.a.1)
        } else if self.b.0 == from {
            Some(self.b.1)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PortSample {
    total_bytes: u64,
    at: Instant,
}

// ─── Topology ───────────────────────────────────────────────────────────────

/// The link-state graph, owned by the compute worker.
pub struct Topology {
    graph: UnGraph<Dpid, LinkState>,
    nodes: HashMap<Dpid, NodeIndex>,
    /// (dpid, port) → the far end of the learned link.
    neighbours: HashMap<(Dpid, PortNo), (Dpid, PortNo)>,
    /// Previous counter sample per port.
    samples: HashMap<(Dpid, PortNo), PortSample>,
    /// Last computed per-port utilisation.
    port_util: HashMap<(Dpid, PortNo), f64>,
    /// Known ports per switch.
    ports: HashMap<Dpid, BTreeSet<PortNo>>,
    threshold: f64,
    default_capacity_mbps: f64,
}

impl Topology {
    pub fn new(threshold: f64, default_capacity_mbps: f64) -> Self {
        Topology {
            graph: UnGraph::new_undirected(),
            nodes: HashMap::new(),
            neighbours: HashMap::new(),
            samples: HashMap::new(),
            port_util: HashMap::new(),
            ports: HashMap::new(),
            threshold,
            default_capacity_mbps,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn node(&mut self, dpid: Dpid) -> NodeIndex {
        match self.nodes.get(&dpid) {
            Some(&idx) => idx,
            None => {
                let idx = self.graph.add_node(dpid);
                self.nodes.insert(dpid, idx);
                idx
            }
        }
    }

    pub fn contains(&self, dpid: Dpid) -> bool {
        self.nodes.contains_key(&dpid)
    }

    // ─── Switch lifecycle ───────────────────────────────────────────────

    pub fn add_switch(&mut self, dpid: Dpid, ports: impl IntoIterator<Item = PortNo>) {
        self.node(dpid);
        let set = self.ports.entry(dpid).or_default();
        set.extend(ports);
        debug!(%dpid, ports = set.len(), "switch added to topology");
    }

    /// Drop a switch with all its ports, links and samples.
    pub fn remove_switch(&mut self, dpid: Dpid) {
        if let Some(idx) = self.nodes.remove(&dpid) {
            self.graph.remove_node(idx);
            // remove_node swaps another node into the vacated index.
            self.nodes.clear();
            for idx in self.graph.node_indices() {
                self.nodes.insert(self.graph[idx], idx);
            }
        }
        self.ports.remove(&dpid);
        self.neighbours
            .retain(|(d, _), (peer, _)| *d != dpid && *peer != dpid);
        self.samples.retain(|(d, _), _| *d != dpid);
        self.port_util.retain(|(d, _), _| *d != dpid);
        debug!(%dpid, "switch removed from topology");
    }

    // ─── Links ──────────────────────────────────────────────────────────

    pub fn add_link(
        &mut self,
        a: (Dpid, PortNo),
        b: (Dpid, PortNo),
        capacity_mbps: Option<f64>,
    ) {
        let capacity = capacity_mbps.unwrap_or(self.default_capacity_mbps);
        let na = self.node(a.0);
        let nb = self.node(b.0);
        let utilisation = self
            .graph
            .find_edge(na, nb)
            .map(|e| self.graph[e].utilisation)
            .unwrap_or(0.0);
        let state = LinkState {
            a,
            b,
            utilisation,
            capacity_mbps: capacity,
        };
        match self.graph.find_edge(na, nb) {
            Some(e) => self.graph[e] = state,
            None => {
                self.graph.add_edge(na, nb, state);
            }
        }
        self.neighbours.insert(a, b);
        self.neighbours.insert(b, a);
        self.ports.entry(a.0).or_default().insert(a.1);
        self.ports.entry(b.0).or_default().insert(b.1);
        debug!(a = %a.0, a_port = %a.1, b = %b.0, b_port = %b.1, capacity, "link added");
    }

    pub fn remove_link(&mut self, a: (Dpid, PortNo), b: (Dpid, PortNo)) {
        if let (Some(&na), Some(&nb)) = (self.nodes.get(&a.0), self.nodes.get(&b.0)) {
            if let Some(e) = self.graph.find_edge(na, nb) {
                self.graph.remove_edge(e);
            }
        }
        self.neighbours.remove(&a);
        self.neighbours.remove(&b);
        debug!(a = %a.0, b = %b.0, "link removed");
    }

    pub fn has_link(&self, a: Dpid, b: Dpid) -> bool {
        match (self.nodes.get(&a), self.nodes.get(&b)) {
            (Some(&na), Some(&nb)) => self.graph.find_edge(na, nb).is_some(),
            _ => false,
        }
    }

    /// The far end of (dpid, port), if a link is learned there.
    pub fn neighbour(&self, end: (Dpid, PortNo)) -> Option<(Dpid, PortNo)> {
        self.neighbours.get(&end).copied()
    }

    /// Ports with no learned neighbour are host-facing.
    pub fn is_host_port(&self, dpid: Dpid, port: PortNo) -> bool {
        !self.neighbours.contains_key(&(dpid, port))
    }

    /// The egress port on `from` toward adjacent switch `to`.
    pub fn egress_port(&self, from: Dpid, to: Dpid) -> Option<PortNo> {
        let na = self.nodes.get(&from)?;
        let nb = self.nodes.get(&to)?;
        let edge = self.graph.find_edge(*na, *nb)?;
        self.graph[edge].port_on(from)
    }

    /// Copy of the current link set (for logs and observers).
    pub fn links(&self) -> Vec<LinkState> {
        self.graph.edge_indices().map(|e| self.graph[e]).collect()
    }

    /// Force a link's utilisation (manual topologies and tests).
    pub fn set_utilisation(&mut self, a: Dpid, b: Dpid, u: f64) {
        if let (Some(&na), Some(&nb)) = (self.nodes.get(&a), self.nodes.get(&b)) {
            if let Some(e) = self.graph.find_edge(na, nb) {
                self.graph[e].utilisation = u.clamp(0.0, 1.0);
            }
        }
    }

    pub fn link_utilisation(&self, a: Dpid, b: Dpid) -> Option<f64> {
        let na = self.nodes.get(&a)?;
        let nb = self.nodes.get(&b)?;
        let edge = self.graph.find_edge(*na, *nb)?;
        Some(self.graph[edge].utilisation)
    }

    // ─── Counter sampling ───────────────────────────────────────────────

    /// Fold a port-stats reply into per-port and per-link utilisation.
    ///
    /// The very first sample of a port only primes the counter: u stays 0
    /// and no link weight moves until a byte delta exists.
    pub fn apply_port_stats(&mut self, dpid: Dpid, entries: &[PortStatsEntry], now: Instant) {
        for entry in entries {
            if !entry.port_no.is_physical() {
                continue;
            }
            let key = (dpid, entry.port_no);
            self.ports.entry(dpid).or_default().insert(entry.port_no);
            let total_bytes = entry.tx_bytes.wrapping_add(entry.rx_bytes);
            let prev = self.samples.insert(
                key,
                PortSample {
                    total_bytes,
                    at: now,
                },
            );
            let Some(prev) = prev else {
                self.port_util.insert(key, 0.0);
                continue;
            };

            let delta = total_bytes.saturating_sub(prev.total_bytes);
            let elapsed = now.saturating_duration_since(prev.at);
            let capacity = self.port_capacity(key);
            let u = utilisation(delta, elapsed.as_secs_f64(), capacity);
            self.port_util.insert(key, u);
            trace!(%dpid, port = %entry.port_no, delta, u, "port sampled");

            if let Some(peer) = self.neighbours.get(&key).copied() {
                let peer_u = self.port_util.get(&peer).copied().unwrap_or(0.0);
                self.set_utilisation(dpid, peer.0, u.max(peer_u));
            }
        }
    }

    fn port_capacity(&self, end: (Dpid, PortNo)) -> f64 {
        self.neighbours
            .get(&end)
            .and_then(|peer| {
                let na = self.nodes.get(&end.0)?;
                let nb = self.nodes.get(&peer.0)?;
                let edge = self.graph.find_edge(*na, *nb)?;
                Some(self.graph[edge].capacity_mbps)
            })
            .unwrap_or(self.default_capacity_mbps)
    }

    // ─── Paths ──────────────────────────────────────────────────────────

    /// Unweighted shortest path by hop count (the baseline for FPLF
    /// comparison). Deterministic: neighbours expand in dpid order.
    pub fn baseline_path(&self, src: Dpid, dst: Dpid) -> Option<Vec<Dpid>> {
        if src == dst {
            return Some(vec![src]);
        }
        self.nodes.get(&src)?;
        self.nodes.get(&dst)?;

        let mut pred: HashMap<Dpid, Dpid> = HashMap::new();
        let mut queue = VecDeque::from([src]);
        while let Some(current) = queue.pop_front() {
            if current == dst {
                return Some(self.reconstruct(&pred, src, dst));
            }
            for next in self.sorted_neighbours(current) {
                if next != src && !pred.contains_key(&next) {
                    pred.insert(next, current);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Weighted shortest path with per-class scaling: each edge costs
    /// `base_weight(u, T) * factor`. Returns the dpid path, its total cost
    /// and the per-edge weight vector.
    pub fn fplf_path(
        &self,
        src: Dpid,
        dst: Dpid,
        factor: f64,
    ) -> Option<(Vec<Dpid>, f64, Vec<EdgeWeights>)> {
        if src == dst {
            return Some((vec![src], 0.0, Vec::new()));
        }
        self.nodes.get(&src)?;
        self.nodes.get(&dst)?;

        let mut dist: HashMap<Dpid, f64> = HashMap::from([(src, 0.0)]);
        let mut pred: HashMap<Dpid, Dpid> = HashMap::new();
        let mut heap = BinaryHeap::new();
        heap.push(QueueEntry {
            cost: 0.0,
            dpid: src,
        });

        while let Some(QueueEntry { cost, dpid }) = heap.pop() {
            if dpid == dst {
                break;
            }
            if cost > dist.get(&dpid).copied().unwrap_or(f64::INFINITY) {
                continue;
            }
            for next in self.sorted_neighbours(dpid) {
                let edge_cost = self.adjusted_weight(dpid, next, factor)?;
                let candidate = cost + edge_cost;
                if candidate < dist.get(&next).copied().unwrap_or(f64::INFINITY) {
                    dist.insert(next, candidate);
                    pred.insert(next, dpid);
                    heap.push(QueueEntry {
                        cost: candidate,
                        dpid: next,
                    });
                }
            }
        }

        let total = *dist.get(&dst)?;
        let path = self.reconstruct(&pred, src, dst);
        let edges = path
            .windows(2)
            .map(|pair| {
                let u = self.link_utilisation(pair[0], pair[1]).unwrap_or(0.0);
                let base = base_weight(u, self.threshold);
                EdgeWeights {
                    a: pair[0],
                    b: pair[1],
                    base,
                    adjusted: base * factor,
                }
            })
            .collect();
        Some((path, total, edges))
    }

    fn adjusted_weight(&self, a: Dpid, b: Dpid, factor: f64) -> Option<f64> {
        let u = self.link_utilisation(a, b)?;
        Some(base_weight(u, self.threshold) * factor)
    }

    fn sorted_neighbours(&self, dpid: Dpid) -> Vec<Dpid> {
        let Some(&idx) = self.nodes.get(&dpid) else {
            return Vec::new();
        };
        let mut out: Vec<Dpid> = self.graph.neighbors(idx).map(|n| self.graph[n]).collect();
        out.sort_unstable();
        out
    }

    fn reconstruct(&self, pred: &HashMap<Dpid, Dpid>, src: Dpid, dst: Dpid) -> Vec<Dpid> {
        let mut path = vec![dst];
        let mut current = dst;
        while current != src {
            current = pred[&current];
            path.push(current);
        }
        path.reverse();
        path
    }
}

/// Min-heap entry ordered by (cost, dpid) so ties break on the lower dpid.
#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    cost: f64,
    dpid: Dpid,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost.total_cmp(&other.cost).is_eq() && self.dpid == other.dpid
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the cheapest first.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.dpid.cmp(&self.dpid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const T: f64 = 0.9;

    fn triangle() -> Topology {
        let mut topo = Topology::new(T, 100.0);
        for d in 1..=3u64 {
            topo.add_switch(Dpid(d), [PortNo(1), PortNo(2), PortNo(3)]);
        }
        // A=1, B=2, C=3; port 2 toward the next dpid, port 3 toward the
        // previous one, port 1 host-facing.
        topo.add_link((Dpid(1), PortNo(2)), (Dpid(2), PortNo(3)), None);
        topo.add_link((Dpid(2), PortNo(2)), (Dpid(3), PortNo(3)), None);
        topo.add_link((Dpid(1), PortNo(3)), (Dpid(3), PortNo(2)), None);
        topo
    }

    #[test]
    fn weight_function_ranges() {
        assert_eq!(base_weight(0.0, T), 500.0);
        assert_eq!(base_weight(T, T), 1000.0);
        assert_eq!(base_weight(0.95, T), 1000.0);
        // 0 < u < T lands in [499 - T, 499).
        for u in [0.001, 0.1, 0.5, 0.89] {
            let w = base_weight(u, T);
            assert!((BUSY_BASE - T..BUSY_BASE).contains(&w), "u={u} w={w}");
            assert!(w < IDLE_WEIGHT, "lightly used must beat idle");
        }
        assert!((base_weight(0.5, T) - 498.6).abs() < 1e-9);
    }

    #[test]
    fn utilisation_formula_and_clamp() {
        // 125_000 bytes in 1s = 1 Mbit/s.
        assert!((utilisation(125_000, 1.0, 100.0) - 0.01).abs() < 1e-9);
        // Clamped at 1.
        assert_eq!(utilisation(u64::MAX / 2, 1.0, 10.0), 1.0);
        assert_eq!(utilisation(1000, 0.0, 100.0), 0.0);
    }

    #[test]
    fn first_sample_emits_no_weight() {
        let mut topo = triangle();
        let now = Instant::now();
        let entry = PortStatsEntry {
            port_no: PortNo(2),
            tx_bytes: 5_000_000,
            rx_bytes: 5_000_000,
            ..PortStatsEntry::default()
        };
        topo.apply_port_stats(Dpid(1), &[entry], now);
        assert_eq!(topo.link_utilisation(Dpid(1), Dpid(2)), Some(0.0));
    }

    #[test]
    fn byte_delta_moves_link_utilisation() {
        let mut topo = triangle();
        let t0 = Instant::now();
        let mk = |bytes: u64| PortStatsEntry {
            port_no: PortNo(2),
            tx_bytes: bytes,
            rx_bytes: 0,
            ..PortStatsEntry::default()
        };
        topo.apply_port_stats(Dpid(1), &[mk(0)], t0);
        // 1_250_000 bytes in 1s = 10 Mbit/s = 0.1 of a 100 Mbit/s link.
        topo.apply_port_stats(Dpid(1), &[mk(1_250_000)], t0 + Duration::from_secs(1));
        let u = topo.link_utilisation(Dpid(1), Dpid(2)).unwrap();
        assert!((u - 0.1).abs() < 1e-6, "u = {u}");
    }

    #[test]
    fn link_takes_max_of_endpoint_ports() {
        let mut topo = triangle();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(1);
        let sample = |port: u32, bytes: u64| PortStatsEntry {
            port_no: PortNo(port),
            tx_bytes: bytes,
            rx_bytes: 0,
            ..PortStatsEntry::default()
        };
        // Both ends primed, then one end busier than the other.
        topo.apply_port_stats(Dpid(1), &[sample(2, 0)], t0);
        topo.apply_port_stats(Dpid(2), &[sample(3, 0)], t0);
        topo.apply_port_stats(Dpid(1), &[sample(2, 1_250_000)], t1);
        topo.apply_port_stats(Dpid(2), &[sample(3, 2_500_000)], t1);
        let u = topo.link_utilisation(Dpid(1), Dpid(2)).unwrap();
        assert!((u - 0.2).abs() < 1e-6, "u = {u}");
    }

    #[test]
    fn counter_reset_counts_as_zero_delta() {
        let mut topo = triangle();
        let t0 = Instant::now();
        let mk = |bytes: u64| PortStatsEntry {
            port_no: PortNo(2),
            tx_bytes: bytes,
            rx_bytes: 0,
            ..PortStatsEntry::default()
        };
        topo.apply_port_stats(Dpid(1), &[mk(9_999_999)], t0);
        topo.apply_port_stats(Dpid(1), &[mk(100)], t0 + Duration::from_secs(1));
        assert_eq!(topo.link_utilisation(Dpid(1), Dpid(2)), Some(0.0));
    }

    #[test]
    fn host_ports_have_no_neighbour() {
        let topo = triangle();
        assert!(topo.is_host_port(Dpid(1), PortNo(1)));
        assert!(!topo.is_host_port(Dpid(1), PortNo(2)));
        assert_eq!(
            topo.neighbour((Dpid(1), PortNo(2))),
            Some((Dpid(2), PortNo(3)))
        );
    }

    #[test]
    fn egress_ports_follow_link_endpoints() {
        let topo = triangle();
        assert_eq!(topo.egress_port(Dpid(1), Dpid(2)), Some(PortNo(2)));
        assert_eq!(topo.egress_port(Dpid(2), Dpid(1)), Some(PortNo(3)));
        assert_eq!(topo.egress_port(Dpid(1), Dpid(99)), None);
    }

    #[test]
    fn idle_triangle_prefers_direct_path() {
        // Scenario: all links idle; the one-hop path wins on hop weight.
        let topo = triangle();
        let (path, cost, edges) = topo.fplf_path(Dpid(1), Dpid(3), 1.0).unwrap();
        assert_eq!(path, vec![Dpid(1), Dpid(3)]);
        assert_eq!(cost, 500.0);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].base, 500.0);
        assert_eq!(topo.baseline_path(Dpid(1), Dpid(3)).unwrap(), path);
    }

    #[test]
    fn congested_shortcut_is_avoided_by_high_priority() {
        // Scenario: the direct link is congested; a priority-4 flow takes
        // the two-hop detour.
        let mut topo = triangle();
        topo.set_utilisation(Dpid(1), Dpid(3), 0.95);
        topo.set_utilisation(Dpid(1), Dpid(2), 0.1);
        topo.set_utilisation(Dpid(2), Dpid(3), 0.1);

        let factor = 0.25; // priority 4
        let (path, cost, _) = topo.fplf_path(Dpid(1), Dpid(3), factor).unwrap();
        assert_eq!(path, vec![Dpid(1), Dpid(2), Dpid(3)]);
        let expected = (BUSY_BASE - (T - 0.1)) * factor * 2.0;
        assert!((cost - expected).abs() < 1e-9, "cost = {cost}");
        // The baseline still points at the congested shortcut.
        assert_eq!(
            topo.baseline_path(Dpid(1), Dpid(3)).unwrap(),
            vec![Dpid(1), Dpid(3)]
        );
    }

    #[test]
    fn lightly_used_direct_beats_busy_detour() {
        // Scenario: priority-1 flow, direct link barely used — no detour.
        let mut topo = triangle();
        topo.set_utilisation(Dpid(1), Dpid(3), 0.02);
        topo.set_utilisation(Dpid(1), Dpid(2), 0.5);
        topo.set_utilisation(Dpid(2), Dpid(3), 0.5);

        let (path, cost, _) = topo.fplf_path(Dpid(1), Dpid(3), 1.0).unwrap();
        assert_eq!(path, vec![Dpid(1), Dpid(3)]);
        assert!((cost - (BUSY_BASE - (T - 0.02))).abs() < 1e-9);
    }

    #[test]
    fn congested_link_remains_usable_when_only_option() {
        let mut topo = Topology::new(T, 100.0);
        topo.add_link((Dpid(1), PortNo(2)), (Dpid(2), PortNo(2)), None);
        topo.set_utilisation(Dpid(1), Dpid(2), 1.0);
        let (path, cost, _) = topo.fplf_path(Dpid(1), Dpid(2), 1.0).unwrap();
        assert_eq!(path, vec![Dpid(1), Dpid(2)]);
        assert_eq!(cost, CONGESTED_WEIGHT);
    }

    #[test]
    fn paths_are_deterministic_on_equal_cost() {
        // Two equal-cost detours; repeated runs must agree.
        let mut topo = Topology::new(T, 100.0);
        topo.add_link((Dpid(1), PortNo(1)), (Dpid(2), PortNo(1)), None);
        topo.add_link((Dpid(2), PortNo(2)), (Dpid(4), PortNo(1)), None);
        topo.add_link((Dpid(1), PortNo(2)), (Dpid(3), PortNo(1)), None);
        topo.add_link((Dpid(3), PortNo(2)), (Dpid(4), PortNo(2)), None);
        let first = topo.fplf_path(Dpid(1), Dpid(4), 1.0).unwrap().0;
        for _ in 0..10 {
            assert_eq!(topo.fplf_path(Dpid(1), Dpid(4), 1.0).unwrap().0, first);
        }
        // Lexicographic tie-break: the lower middle dpid wins.
        assert_eq!(first, vec![Dpid(1), Dpid(2), Dpid(4)]);
    }

    #[test]
    fn consecutive_path_dpids_share_a_link() {
        let mut topo = triangle();
        topo.set_utilisation(Dpid(1), Dpid(3), 0.95);
        let (path, _, _) = topo.fplf_path(Dpid(1), Dpid(3), 0.25).unwrap();
        for pair in path.windows(2) {
            assert!(topo.has_link(pair[0], pair[1]));
        }
    }

    #[test]
    fn empty_or_disconnected_graph_has_no_route() {
        let topo = Topology::new(T, 100.0);
        assert!(topo.fplf_path(Dpid(1), Dpid(2), 1.0).is_none());
        assert!(topo.baseline_path(Dpid(1), Dpid(2)).is_none());

        let mut topo = Topology::new(T, 100.0);
        topo.add_switch(Dpid(1), []);
        topo.add_switch(Dpid(2), []);
        assert!(topo.fplf_path(Dpid(1), Dpid(2), 1.0).is_none());
    }

    #[test]
    fn removing_a_switch_drops_its_links() {
        let mut topo = triangle();
        topo.remove_switch(Dpid(2));
        assert!(!topo.contains(Dpid(2)));
        assert!(!topo.has_link(Dpid(1), Dpid(2)));
        assert!(topo.has_link(Dpid(1), Dpid(3)));
        // Node-index compaction must keep the survivors addressable.
        assert_eq!(topo.egress_port(Dpid(1), Dpid(3)), Some(PortNo(3)));
    }

    #[test]
    fn removing_a_link_forces_the_detour() {
        let mut topo = triangle();
        topo.remove_link((Dpid(1), PortNo(3)), (Dpid(3), PortNo(2)));
        let (path, _, _) = topo.fplf_path(Dpid(1), Dpid(3), 1.0).unwrap();
        assert_eq!(path, vec![Dpid(1), Dpid(2), Dpid(3)]);
        assert!(topo.is_host_port(Dpid(1), PortNo(3)));
    }
}

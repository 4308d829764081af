//! # Compute worker
//!
//! The single thread that owns the topology graph, host map and installer
//! state. Every mutation arrives as an [`Event`] on one bounded channel,
//! so graph updates, host learning and path computations are serialised:
//! the router always sees a consistent snapshot, and installs for a given
//! (src, dst) pair finish before the next one starts.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::Receiver;
use quanta::Instant;
use tracing::{debug, info, warn};

use weir_common::config::Config;
use weir_common::hostmap::{HostEntry, HostMap};
use weir_common::ids::{Dpid, MacAddr, PortNo};
use weir_proto::messages::{PacketIn, PortReason};
use weir_proto::packet::{EthPayload, EthernetFrame};

use crate::capture::{record_packet, CaptureRing};
use crate::errors::RouteError;
use crate::events::Event;
use crate::installer::{FlowInstaller, InstallerConfig, Trigger};
use crate::reload::SharedTable;
use crate::router;
use crate::session::SessionRegistry;
use crate::topology::Topology;

pub struct ComputeWorker {
    topology: Topology,
    hosts: HostMap,
    table: SharedTable,
    registry: Arc<SessionRegistry>,
    installer: FlowInstaller,
    ring: Arc<CaptureRing>,
}

impl ComputeWorker {
    pub fn new(
        config: &Config,
        hosts: HostMap,
        table: SharedTable,
        registry: Arc<SessionRegistry>,
        ring: Arc<CaptureRing>,
    ) -> Self {
        let mut topology = Topology::new(
            config.monitor.congestion_threshold,
            config.monitor.default_capacity_mbps,
        );
        // Static links stand in for discovery when it is disabled.
        for link in &config.links {
            let (a, b) = link.endpoints();
            topology.add_link(a, b, link.capacity_mbps);
        }
        info!(
            seeded_hosts = hosts.len(),
            static_links = config.links.len(),
            "compute worker initialised"
        );
        ComputeWorker {
            topology,
            hosts,
            table,
            registry,
            installer: FlowInstaller::new(InstallerConfig::from(&config.flows)),
            ring,
        }
    }

    /// Consume events until `Shutdown` (or every sender is gone).
    pub fn run(mut self, events: Receiver<Event>) {
        for event in events {
            if matches!(event, Event::Shutdown) {
                break;
            }
            self.handle_event(event);
        }
        info!("compute worker stopped");
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::SwitchUp { dpid, ports } => {
                self.topology.add_switch(dpid, ports);
            }
            Event::SwitchDown { dpid } => {
                self.topology.remove_switch(dpid);
                self.installer.purge_switch(dpid);
            }
            Event::LinkAdd { a, b, capacity_mbps } => {
                self.topology.add_link(a, b, capacity_mbps);
            }
            Event::LinkDelete { a, b } => {
                self.topology.remove_link(a, b);
                self.installer.purge_link(a.0, b.0);
            }
            Event::PortStats { dpid, entries } => {
                self.topology.apply_port_stats(dpid, &entries, Instant::now());
            }
            Event::PortStatus { dpid, status } => {
                let port = status.desc.port_no;
                match status.reason {
                    PortReason::Delete => {
                        if let Some(peer) = self.topology.neighbour((dpid, port)) {
                            self.topology.remove_link((dpid, port), peer);
                            self.installer.purge_link(dpid, peer.0);
                        }
                    }
                    PortReason::Add | PortReason::Modify => {
                        if port.is_physical() {
                            self.topology.add_switch(dpid, [port]);
                        }
                    }
                }
            }
            Event::Tick => {
                self.installer.retry_pending(&self.registry);
            }
            Event::PacketIn { dpid, packet } => {
                self.handle_packet_in(dpid, packet);
            }
            Event::Shutdown => {}
        }
    }

    // ─── PACKET_IN ──────────────────────────────────────────────────────

    fn handle_packet_in(&mut self, dpid: Dpid, packet: PacketIn) {
        let Some(in_port) = packet.in_port() else {
            debug!(%dpid, "packet-in without an ingress port");
            return;
        };
        let Some(frame) = EthernetFrame::parse(&packet.data) else {
            debug!(%dpid, %in_port, "unparsable frame");
            return;
        };
        // Discovery frames feed the link-event source, not host routing.
        if frame.is_lldp() {
            return;
        }

        if in_port.is_physical() {
            let length = if packet.total_len > 0 {
                u32::from(packet.total_len)
            } else {
                packet.data.len() as u32
            };
            self.ring
                .push(record_packet(dpid, in_port, &frame, length, unix_now()));
        }

        if !frame.src.is_multicast() {
            self.learn(frame.src, dpid, in_port, &frame);
        }

        if frame.dst.is_multicast() {
            self.flood(dpid, in_port, &packet);
            return;
        }

        let table = self.table.load();
        match router::route(&self.topology, &self.hosts, &table, frame.src, frame.dst) {
            Ok(decision) => {
                let trigger = Trigger {
                    frame: &frame,
                    data: &packet.data,
                };
                if let Err(e) =
                    self.installer
                        .install(&self.registry, &decision, Some(trigger))
                {
                    debug!(src = %frame.src, dst = %frame.dst, "install incomplete: {e}");
                }
            }
            Err(RouteError::UnknownHost(mac)) => {
                debug!(%mac, %dpid, "unknown host, flooding on ingress");
                self.flood(dpid, in_port, &packet);
            }
            Err(e @ RouteError::NoRoute { .. }) => {
                // Transient during link flap; the next PACKET_IN retries.
                debug!(%dpid, "dropping packet: {e}");
            }
        }
    }

    /// MAC learning with seeded-port protection: an observation that
    /// contradicts a known attachment is logged and ignored, so transient
    /// loops during rerouting cannot corrupt the map.
    fn learn(&mut self, src: MacAddr, dpid: Dpid, in_port: PortNo, frame: &EthernetFrame) {
        let observed_ip = match &frame.payload {
            EthPayload::Arp(arp) if arp.sender_mac == src => Some(arp.sender_ip),
            EthPayload::Ipv4(ip) => Some(ip.src),
            _ => None,
        };
        match self.hosts.entry(src) {
            Some(entry) => {
                if (entry.dpid, entry.port) != (dpid, in_port) {
                    warn!(
                        mac = %src, seeded_dpid = %entry.dpid, seeded_port = %entry.port,
                        seen_dpid = %dpid, seen_port = %in_port,
                        "ignoring MAC observation that contradicts the host map"
                    );
                    return;
                }
            }
            None => {
                info!(mac = %src, %dpid, port = %in_port, "learned host");
                self.hosts.insert(HostEntry {
                    mac: src,
                    dpid,
                    port: in_port,
                    host_id: None,
                    ip: None,
                });
            }
        }
        if let Some(ip) = observed_ip {
            self.hosts.set_ip(src, ip);
        }
    }

    fn flood(&self, dpid: Dpid, in_port: PortNo, packet: &PacketIn) {
        if let Err(e) = self
            .installer
            .flood(&self.registry, dpid, in_port, packet.data.clone())
        {
            debug!(%dpid, "flood failed: {e}");
        }
    }

    /// Test/observability access to the learned host map.
    pub fn hosts(&self) -> &HostMap {
        &self.hosts
    }

    /// Test/observability access to the topology.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn installer(&self) -> &FlowInstaller {
        &self.installer
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arc_swap::ArcSwap;
    use bytes::Bytes;
    use crossbeam_channel::{bounded, Receiver};
    use std::collections::HashMap;
    use std::io::Cursor;
    use weir_common::table::ClassificationTable;
    use weir_proto::messages::{read_message, OfMessage};

    use crate::session::SessionHandle;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0, 0, 0, 0, 0, last])
    }

    fn arp_frame(src: MacAddr, src_ip: [u8; 4]) -> Bytes {
        let mut raw = Vec::new();
        raw.extend_from_slice(&MacAddr::BROADCAST.octets());
        raw.extend_from_slice(&src.octets());
        raw.extend_from_slice(&0x0806u16.to_be_bytes());
        raw.extend_from_slice(&1u16.to_be_bytes());
        raw.extend_from_slice(&0x0800u16.to_be_bytes());
        raw.push(6);
        raw.push(4);
        raw.extend_from_slice(&1u16.to_be_bytes());
        raw.extend_from_slice(&src.octets());
        raw.extend_from_slice(&src_ip);
        raw.extend_from_slice(&[0; 6]);
        raw.extend_from_slice(&[10, 0, 0, 99]);
        Bytes::from(raw)
    }

    fn l2_frame(src: MacAddr, dst: MacAddr) -> Bytes {
        let mut raw = Vec::new();
        raw.extend_from_slice(&dst.octets());
        raw.extend_from_slice(&src.octets());
        raw.extend_from_slice(&0x86ddu16.to_be_bytes()); // IPv6: opaque here
        raw.extend_from_slice(&[0; 30]);
        Bytes::from(raw)
    }

    fn packet_in(in_port: u32, data: Bytes) -> PacketIn {
        PacketIn::table_miss(PortNo(in_port), data)
    }

    fn worker_with(
        hosts_text: &str,
        links: &str,
        dpids: &[u64],
    ) -> (ComputeWorker, HashMap<Dpid, Receiver<bytes::BytesMut>>) {
        let config: Config = toml::from_str(links).unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let mut rxs = HashMap::new();
        for &d in dpids {
            let (tx, rx) = bounded(64);
            registry.register(SessionHandle::new(Dpid(d), tx));
            rxs.insert(Dpid(d), rx);
        }
        let (ring, _flush_rx) = CaptureRing::new(128);
        let table = Arc::new(ArcSwap::from_pointee(ClassificationTable::default()));
        let worker = ComputeWorker::new(
            &config,
            HostMap::parse(hosts_text),
            table,
            registry,
            ring,
        );
        (worker, rxs)
    }

    fn drain(rx: &Receiver<bytes::BytesMut>) -> Vec<OfMessage> {
        let mut out = Vec::new();
        while let Ok(buf) = rx.try_recv() {
            let (_, msg) = read_message(&mut Cursor::new(buf.to_vec())).unwrap();
            out.push(msg);
        }
        out
    }

    const TWO_SWITCHES: &str = r#"
        [[links]]
        a_dpid = 1
        a_port = 2
        b_dpid = 2
        b_port = 2
    "#;

    const HOSTS: &str = "\
00:00:00:00:00:01 1 1 h1 10.0.0.1
00:00:00:00:00:03 2 1 h3 10.0.0.3
";

    #[test]
    fn packet_between_known_hosts_installs_the_path() {
        let (mut worker, rxs) = worker_with(HOSTS, TWO_SWITCHES, &[1, 2]);
        worker.handle_event(Event::PacketIn {
            dpid: Dpid(1),
            packet: packet_in(1, l2_frame(mac(1), mac(3))),
        });

        let ingress = drain(&rxs[&Dpid(1)]);
        assert!(
            matches!(ingress[0], OfMessage::PacketOut(_)),
            "trigger packet must go out first"
        );
        assert_eq!(
            ingress
                .iter()
                .filter(|m| matches!(m, OfMessage::FlowMod(_)))
                .count(),
            2
        );
        let egress = drain(&rxs[&Dpid(2)]);
        assert_eq!(
            egress
                .iter()
                .filter(|m| matches!(m, OfMessage::FlowMod(_)))
                .count(),
            2
        );
        assert!(worker.installer().installed_path(mac(1), mac(3)).is_some());
    }

    #[test]
    fn unknown_destination_floods_the_ingress_switch() {
        let (mut worker, rxs) = worker_with(HOSTS, TWO_SWITCHES, &[1, 2]);
        worker.handle_event(Event::PacketIn {
            dpid: Dpid(1),
            packet: packet_in(1, l2_frame(mac(1), mac(0x42))),
        });

        let msgs = drain(&rxs[&Dpid(1)]);
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            OfMessage::PacketOut(out) => {
                assert_eq!(
                    out.actions,
                    vec![weir_proto::messages::Action::output(PortNo::FLOOD)]
                );
            }
            other => panic!("expected flood, got {other:?}"),
        }
        assert!(drain(&rxs[&Dpid(2)]).is_empty(), "no cross-switch flooding");
    }

    #[test]
    fn broadcast_frames_flood_without_routing() {
        let (mut worker, rxs) = worker_with(HOSTS, TWO_SWITCHES, &[1, 2]);
        worker.handle_event(Event::PacketIn {
            dpid: Dpid(1),
            packet: packet_in(1, arp_frame(mac(1), [10, 0, 0, 1])),
        });
        let msgs = drain(&rxs[&Dpid(1)]);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0], OfMessage::PacketOut(_)));
    }

    #[test]
    fn learning_respects_the_seeded_port() {
        let (mut worker, _rxs) = worker_with(HOSTS, TWO_SWITCHES, &[1, 2]);
        // h1 is seeded at (1, 1); an observation from port 3 is a loop
        // artefact and must not move the host.
        worker.handle_event(Event::PacketIn {
            dpid: Dpid(1),
            packet: packet_in(3, arp_frame(mac(1), [10, 0, 0, 1])),
        });
        assert_eq!(
            worker.hosts().locate(mac(1)),
            Some((Dpid(1), PortNo(1)))
        );
    }

    #[test]
    fn unseeded_hosts_are_learned_with_their_ip() {
        let (mut worker, _rxs) = worker_with(HOSTS, TWO_SWITCHES, &[1, 2]);
        worker.handle_event(Event::PacketIn {
            dpid: Dpid(2),
            packet: packet_in(4, arp_frame(mac(7), [10, 0, 0, 7])),
        });
        assert_eq!(worker.hosts().locate(mac(7)), Some((Dpid(2), PortNo(4))));
        let by_ip = worker
            .hosts()
            .entry_by_ip("10.0.0.7".parse().unwrap())
            .unwrap();
        assert_eq!(by_ip.mac, mac(7));
    }

    #[test]
    fn switch_down_clears_topology_and_ledger() {
        let (mut worker, rxs) = worker_with(HOSTS, TWO_SWITCHES, &[1, 2]);
        worker.handle_event(Event::PacketIn {
            dpid: Dpid(1),
            packet: packet_in(1, l2_frame(mac(1), mac(3))),
        });
        assert!(worker.installer().installed_path(mac(1), mac(3)).is_some());
        drain(&rxs[&Dpid(1)]);

        worker.handle_event(Event::SwitchDown { dpid: Dpid(2) });
        assert!(!worker.topology().contains(Dpid(2)));
        assert!(worker.installer().installed_path(mac(1), mac(3)).is_none());

        // With the far switch gone there is no route; the packet drops.
        worker.handle_event(Event::PacketIn {
            dpid: Dpid(1),
            packet: packet_in(1, l2_frame(mac(1), mac(3))),
        });
        assert!(drain(&rxs[&Dpid(1)])
            .iter()
            .all(|m| !matches!(m, OfMessage::FlowMod(_))));
    }

    #[test]
    fn lldp_is_ignored() {
        let (mut worker, rxs) = worker_with(HOSTS, TWO_SWITCHES, &[1, 2]);
        let mut raw = Vec::new();
        raw.extend_from_slice(&[0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e]);
        raw.extend_from_slice(&mac(1).octets());
        raw.extend_from_slice(&0x88ccu16.to_be_bytes());
        worker.handle_event(Event::PacketIn {
            dpid: Dpid(1),
            packet: packet_in(2, Bytes::from(raw)),
        });
        assert!(drain(&rxs[&Dpid(1)]).is_empty());
    }
}

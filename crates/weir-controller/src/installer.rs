//! # Flow installer
//!
//! Turns a route decision into FLOW_MODs along the path: a forward rule
//! per switch plus the symmetric reverse rule, so the return direction
//! follows the same path. The triggering packet goes out via PACKET_OUT
//! before any rule is written, so no user packet sits between decision
//! and installation.
//!
//! Reroutes modify switches in ingress-first order — a packet must never
//! reach a switch that forwards "the new way" while its next hop still
//! points the old way — and switches leaving the path get their rules
//! deleted only after every survivor has converged.
//!
//! The ledger of installed paths makes reinstalling an unchanged path a
//! flow-table no-op and gives reroutes their diff.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;
use tracing::{debug, info, warn};

use weir_common::config::FlowConfig;
use weir_common::ids::{Dpid, MacAddr, PortNo};
use weir_proto::messages::{FlowMod, OfMessage, PacketOut};
use weir_proto::oxm::Match;
use weir_proto::packet::EthernetFrame;

use crate::errors::InstallError;
use crate::router::{PathHop, RouteDecision};
use crate::session::SessionRegistry;

/// Priority of (eth_src, eth_dst) rules, above the table-miss.
pub const L2_RULE_PRIORITY: u16 = 10;
/// Priority of 5-tuple rules, above the L2 layer.
pub const FINE_RULE_PRIORITY: u16 = 20;

/// The triggering packet of an install: its parsed frame (for fine
/// matches) and raw bytes (for the PACKET_OUT).
#[derive(Debug, Clone, Copy)]
pub struct Trigger<'a> {
    pub frame: &'a EthernetFrame,
    pub data: &'a Bytes,
}

#[derive(Debug, Clone)]
struct InstalledPath {
    hops: Vec<PathHop>,
    fields: Match,
    priority: u16,
}

#[derive(Debug)]
struct PendingRetry {
    decision: RouteDecision,
    fields: Match,
    priority: u16,
}

/// Install parameters derived from config.
#[derive(Debug, Clone, Copy)]
pub struct InstallerConfig {
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub fine_match: bool,
    pub budget: Duration,
}

impl From<&FlowConfig> for InstallerConfig {
    fn from(cfg: &FlowConfig) -> Self {
        InstallerConfig {
            idle_timeout: cfg.idle_timeout_secs,
            hard_timeout: cfg.hard_timeout_secs,
            fine_match: cfg.fine_match,
            budget: Duration::from_millis(cfg.install_budget_ms),
        }
    }
}

/// Per-(src, dst) flow installation with reroute diffing.
///
/// Lives on the compute worker, so installs for one pair are naturally
/// serialised: a decision completes (or fails) before the next event for
/// the same pair is looked at.
pub struct FlowInstaller {
    config: InstallerConfig,
    installed: HashMap<(MacAddr, MacAddr), InstalledPath>,
    pending: Vec<PendingRetry>,
}

impl FlowInstaller {
    pub fn new(config: InstallerConfig) -> Self {
        FlowInstaller {
            config,
            installed: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Install (or re-install, or reroute) the decision's path. A delivery
    /// failure schedules one background retry; a budget overrun cancels
    /// the remaining FLOW_MODs and lets the next PACKET_IN start over.
    pub fn install(
        &mut self,
        registry: &SessionRegistry,
        decision: &RouteDecision,
        trigger: Option<Trigger<'_>>,
    ) -> Result<(), InstallError> {
        let (fields, priority) = self.forward_match(decision, trigger);
        let result = self.try_install(registry, decision, &fields, priority, trigger);
        if let Err(InstallError::Failed(dpid)) = result {
            warn!(%dpid, src = %decision.src, dst = %decision.dst, "scheduling install retry");
            self.pending.push(PendingRetry {
                decision: decision.clone(),
                fields,
                priority,
            });
        }
        result
    }

    /// Flood the packet out of its ingress switch (unknown destination).
    pub fn flood(
        &self,
        registry: &SessionRegistry,
        dpid: Dpid,
        in_port: PortNo,
        data: Bytes,
    ) -> Result<(), InstallError> {
        registry
            .send_to(
                dpid,
                &OfMessage::PacketOut(PacketOut::single(in_port, PortNo::FLOOD, data)),
            )
            .map_err(|gone| InstallError::SwitchGone(gone.0))
    }

    /// Re-attempt installs that failed delivery. Runs on the poller tick;
    /// a second failure drops the entry — the next PACKET_IN recomputes.
    pub fn retry_pending(&mut self, registry: &SessionRegistry) {
        for retry in std::mem::take(&mut self.pending) {
            let outcome = self.try_install(
                registry,
                &retry.decision,
                &retry.fields,
                retry.priority,
                None,
            );
            if let Err(e) = outcome {
                warn!(
                    src = %retry.decision.src,
                    dst = %retry.decision.dst,
                    "install retry failed, dropping: {e}"
                );
            }
        }
    }

    /// Forget paths that traverse a dead switch.
    pub fn purge_switch(&mut self, dpid: Dpid) {
        self.installed
            .retain(|_, path| !path.hops.iter().any(|h| h.dpid == dpid));
        self.pending
            .retain(|r| !r.decision.hops.iter().any(|h| h.dpid == dpid));
    }

    /// Forget paths that traverse a removed link; the next PACKET_IN for
    /// each pair re-resolves against the updated graph.
    pub fn purge_link(&mut self, a: Dpid, b: Dpid) {
        let crosses = |hops: &[PathHop]| {
            hops.windows(2).any(|pair| {
                (pair[0].dpid == a && pair[1].dpid == b)
                    || (pair[0].dpid == b && pair[1].dpid == a)
            })
        };
        self.installed.retain(|_, path| !crosses(&path.hops));
        self.pending.retain(|r| !crosses(&r.decision.hops));
    }

    /// The currently recorded path for a pair (observability and tests).
    pub fn installed_path(&self, src: MacAddr, dst: MacAddr) -> Option<&[PathHop]> {
        self.installed.get(&(src, dst)).map(|p| p.hops.as_slice())
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn forward_match(
        &self,
        decision: &RouteDecision,
        trigger: Option<Trigger<'_>>,
    ) -> (Match, u16) {
        if self.config.fine_match {
            if let Some(tuple) = trigger.and_then(|t| t.frame.five_tuple()) {
                let (src_ip, src_port, dst_ip, dst_port, proto) = tuple;
                return (
                    Match::five_tuple(src_ip, dst_ip, proto, src_port, dst_port),
                    FINE_RULE_PRIORITY,
                );
            }
        }
        (Match::l2(decision.src, decision.dst), L2_RULE_PRIORITY)
    }

    fn try_install(
        &mut self,
        registry: &SessionRegistry,
        decision: &RouteDecision,
        fields: &Match,
        priority: u16,
        trigger: Option<Trigger<'_>>,
    ) -> Result<(), InstallError> {
        let started = Instant::now();
        let key = (decision.src, decision.dst);
        let previous = self.installed.get(&key).cloned();

        let unchanged = previous
            .as_ref()
            .is_some_and(|p| p.hops == decision.hops && &p.fields == fields);

        // The first packet of the flow must not wait for rule convergence.
        if let (Some(trigger), Some(first)) = (trigger, decision.hops.first()) {
            let out = PacketOut::single(first.in_port, first.out_port, trigger.data.clone());
            self.send(registry, first.dpid, &OfMessage::PacketOut(out))?;
        }
        if unchanged {
            debug!(src = %decision.src, dst = %decision.dst, "path unchanged, install skipped");
            return Ok(());
        }

        let plan = self.plan(decision, fields, priority, previous.as_ref());
        let total = plan.len();
        for (sent, (dpid, msg)) in plan.into_iter().enumerate() {
            if started.elapsed() > self.config.budget {
                warn!(
                    src = %decision.src, dst = %decision.dst, sent, total,
                    "slow path: install budget exceeded, cancelling outstanding flow mods"
                );
                self.installed.remove(&key);
                return Err(InstallError::BudgetExceeded { sent, total });
            }
            if let Err(e) = self.send(registry, dpid, &msg) {
                if sent > 0 {
                    warn!(%dpid, sent, total, "partial install on {dpid}: {e}");
                }
                self.installed.remove(&key);
                return Err(e);
            }
        }

        if previous.is_some() {
            info!(
                src = %decision.src, dst = %decision.dst, path = ?decision.fplf,
                "rerouted flow"
            );
        }
        self.installed.insert(
            key,
            InstalledPath {
                hops: decision.hops.clone(),
                fields: fields.clone(),
                priority,
            },
        );
        Ok(())
    }

    /// One FLOW_MOD delivery with a single retry.
    fn send(
        &self,
        registry: &SessionRegistry,
        dpid: Dpid,
        msg: &OfMessage,
    ) -> Result<(), InstallError> {
        let handle = registry
            .get(dpid)
            .ok_or(InstallError::SwitchGone(dpid))?;
        handle
            .send(msg)
            .or_else(|_| handle.send(msg))
            .map_err(|_| InstallError::Failed(dpid))
    }

    /// Build the ordered FLOW_MOD sequence for this transition.
    fn plan(
        &self,
        decision: &RouteDecision,
        fields: &Match,
        priority: u16,
        previous: Option<&InstalledPath>,
    ) -> Vec<(Dpid, OfMessage)> {
        let reverse_fields = fields.reversed();
        let old_dpids: HashSet<Dpid> = previous
            .map(|p| p.hops.iter().map(|h| h.dpid).collect())
            .unwrap_or_default();
        let new_dpids: HashSet<Dpid> = decision.hops.iter().map(|h| h.dpid).collect();

        let mut plan = Vec::with_capacity(decision.hops.len() * 2 + 2);
        // Ingress-first over the new path; switches already on the old
        // path get MODIFY_STRICT, newcomers get ADD.
        for hop in &decision.hops {
            let rewrite = old_dpids.contains(&hop.dpid);
            let forward = self.rule(fields.clone(), hop.out_port, priority, rewrite);
            let reverse = self.rule(reverse_fields.clone(), hop.in_port, priority, rewrite);
            plan.push((hop.dpid, OfMessage::FlowMod(forward)));
            plan.push((hop.dpid, OfMessage::FlowMod(reverse)));
        }
        // Rules on switches that left the path go last, and use the match
        // they were installed with.
        if let Some(previous) = previous {
            for hop in &previous.hops {
                if !new_dpids.contains(&hop.dpid) {
                    plan.push((
                        hop.dpid,
                        OfMessage::FlowMod(FlowMod::delete_strict(
                            previous.fields.clone(),
                            previous.priority,
                        )),
                    ));
                    plan.push((
                        hop.dpid,
                        OfMessage::FlowMod(FlowMod::delete_strict(
                            previous.fields.reversed(),
                            previous.priority,
                        )),
                    ));
                }
            }
        }
        plan
    }

    fn rule(&self, fields: Match, out_port: PortNo, priority: u16, rewrite: bool) -> FlowMod {
        let actions = vec![weir_proto::messages::Action::output(out_port)];
        if rewrite {
            FlowMod::modify_strict(
                fields,
                actions,
                priority,
                self.config.idle_timeout,
                self.config.hard_timeout,
            )
        } else {
            FlowMod::add(
                fields,
                actions,
                priority,
                self.config.idle_timeout,
                self.config.hard_timeout,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use crossbeam_channel::{bounded, Receiver};
    use std::io::Cursor;
    use weir_common::class::TrafficClass;
    use weir_proto::messages::{read_message, FlowModCommand};
    use weir_proto::wire::HEADER_LEN;

    use crate::session::SessionHandle;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0, 0, 0, 0, 0, last])
    }

    fn config() -> InstallerConfig {
        InstallerConfig {
            idle_timeout: 30,
            hard_timeout: 300,
            fine_match: false,
            budget: Duration::from_millis(250),
        }
    }

    fn hop(dpid: u64, in_port: u32, out_port: u32) -> PathHop {
        PathHop {
            dpid: Dpid(dpid),
            in_port: PortNo(in_port),
            out_port: PortNo(out_port),
        }
    }

    fn decision(hops: Vec<PathHop>) -> RouteDecision {
        let fplf: Vec<Dpid> = hops.iter().map(|h| h.dpid).collect();
        RouteDecision {
            src: mac(1),
            dst: mac(3),
            class: TrafficClass::Video,
            priority: 4,
            confidence: 1.0,
            hops,
            baseline: fplf.clone(),
            fplf,
            cost: 500.0,
            edges: Vec::new(),
            route_changed: false,
        }
    }

    fn registry_with(dpids: &[u64]) -> (SessionRegistry, HashMap<Dpid, Receiver<BytesMut>>) {
        let registry = SessionRegistry::new();
        let mut rxs = HashMap::new();
        for &d in dpids {
            let (tx, rx) = bounded(64);
            registry.register(SessionHandle::new(Dpid(d), tx));
            rxs.insert(Dpid(d), rx);
        }
        (registry, rxs)
    }

    fn drain(rx: &Receiver<BytesMut>) -> Vec<OfMessage> {
        let mut out = Vec::new();
        while let Ok(buf) = rx.try_recv() {
            let mut cursor = Cursor::new(buf.to_vec());
            let (header, msg) = read_message(&mut cursor).unwrap();
            assert_eq!(header.length as usize, buf.len());
            assert!(buf.len() >= HEADER_LEN);
            out.push(msg);
        }
        out
    }

    fn flow_mods(msgs: &[OfMessage]) -> Vec<&FlowMod> {
        msgs.iter()
            .filter_map(|m| match m {
                OfMessage::FlowMod(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn fresh_install_writes_forward_and_reverse_on_every_hop() {
        let (registry, rxs) = registry_with(&[1, 2, 3]);
        let mut installer = FlowInstaller::new(config());
        let d = decision(vec![hop(1, 1, 2), hop(2, 3, 2), hop(3, 3, 1)]);

        installer.install(&registry, &d, None).unwrap();

        for h in &d.hops {
            let msgs = drain(&rxs[&h.dpid]);
            let mods = flow_mods(&msgs);
            assert_eq!(mods.len(), 2, "forward + reverse on {}", h.dpid);

            let forward = mods
                .iter()
                .find(|f| f.fields.eth_src == Some(mac(1)))
                .expect("forward rule");
            assert_eq!(forward.command, FlowModCommand::Add);
            assert_eq!(
                forward.actions,
                vec![weir_proto::messages::Action::output(h.out_port)]
            );
            assert_eq!(forward.idle_timeout, 30);
            assert_eq!(forward.hard_timeout, 300);

            let reverse = mods
                .iter()
                .find(|f| f.fields.eth_src == Some(mac(3)))
                .expect("reverse rule");
            assert_eq!(
                reverse.actions,
                vec![weir_proto::messages::Action::output(h.in_port)]
            );
        }
    }

    #[test]
    fn reinstalling_the_same_path_is_a_no_op() {
        let (registry, rxs) = registry_with(&[1, 3]);
        let mut installer = FlowInstaller::new(config());
        let d = decision(vec![hop(1, 1, 3), hop(3, 2, 1)]);

        installer.install(&registry, &d, None).unwrap();
        drain(&rxs[&Dpid(1)]);
        drain(&rxs[&Dpid(3)]);

        installer.install(&registry, &d, None).unwrap();
        assert!(flow_mods(&drain(&rxs[&Dpid(1)])).is_empty());
        assert!(flow_mods(&drain(&rxs[&Dpid(3)])).is_empty());
    }

    #[test]
    fn trigger_packet_goes_out_before_any_flow_mod() {
        let (registry, rxs) = registry_with(&[1, 3]);
        let mut installer = FlowInstaller::new(config());
        let d = decision(vec![hop(1, 1, 3), hop(3, 2, 1)]);

        let raw = Bytes::from_static(&[0u8; 64]);
        let frame = EthernetFrame::parse(&[0u8; 14]).unwrap();
        installer
            .install(
                &registry,
                &d,
                Some(Trigger {
                    frame: &frame,
                    data: &raw,
                }),
            )
            .unwrap();

        let ingress = drain(&rxs[&Dpid(1)]);
        match &ingress[0] {
            OfMessage::PacketOut(out) => {
                assert_eq!(out.in_port, PortNo(1));
                assert_eq!(
                    out.actions,
                    vec![weir_proto::messages::Action::output(PortNo(3))]
                );
            }
            other => panic!("expected PACKET_OUT first, got {other:?}"),
        }
        assert_eq!(flow_mods(&ingress).len(), 2);
    }

    #[test]
    fn reroute_modifies_ingress_first_and_deletes_last() {
        let (registry, rxs) = registry_with(&[1, 2, 3]);
        let mut installer = FlowInstaller::new(config());

        // Old path 1 → 3 direct.
        installer
            .install(&registry, &decision(vec![hop(1, 1, 3), hop(3, 2, 1)]), None)
            .unwrap();
        drain(&rxs[&Dpid(1)]);
        drain(&rxs[&Dpid(3)]);

        // New path 1 → 2 → 3.
        let new = decision(vec![hop(1, 1, 2), hop(2, 3, 2), hop(3, 3, 1)]);
        installer.install(&registry, &new, None).unwrap();

        let on_ingress = flow_mods(&drain(&rxs[&Dpid(1)]))
            .into_iter()
            .map(|f| f.command)
            .collect::<Vec<_>>();
        assert_eq!(
            on_ingress,
            vec![FlowModCommand::ModifyStrict, FlowModCommand::ModifyStrict]
        );
        let on_new = flow_mods(&drain(&rxs[&Dpid(2)]))
            .into_iter()
            .map(|f| f.command)
            .collect::<Vec<_>>();
        assert_eq!(on_new, vec![FlowModCommand::Add, FlowModCommand::Add]);
    }

    #[test]
    fn switches_leaving_the_path_get_strict_deletes_last() {
        let (registry, rxs) = registry_with(&[1, 2, 3]);
        let mut installer = FlowInstaller::new(config());

        installer
            .install(
                &registry,
                &decision(vec![hop(1, 1, 2), hop(2, 3, 2), hop(3, 3, 1)]),
                None,
            )
            .unwrap();
        for d in [1u64, 2, 3] {
            drain(&rxs[&Dpid(d)]);
        }

        let shortcut = decision(vec![hop(1, 1, 3), hop(3, 2, 1)]);
        installer.install(&registry, &shortcut, None).unwrap();

        let leaver = flow_mods(&drain(&rxs[&Dpid(2)]))
            .into_iter()
            .map(|f| f.command)
            .collect::<Vec<_>>();
        assert_eq!(
            leaver,
            vec![FlowModCommand::DeleteStrict, FlowModCommand::DeleteStrict]
        );
        assert_eq!(
            installer.installed_path(mac(1), mac(3)).unwrap(),
            shortcut.hops.as_slice()
        );
    }

    #[test]
    fn dead_switch_aborts_with_switch_gone() {
        let (registry, _rxs) = registry_with(&[1]);
        let mut installer = FlowInstaller::new(config());
        let d = decision(vec![hop(1, 1, 2), hop(9, 3, 1)]);

        let err = installer.install(&registry, &d, None).unwrap_err();
        assert_eq!(err, InstallError::SwitchGone(Dpid(9)));
        assert!(installer.installed_path(mac(1), mac(3)).is_none());
    }

    #[test]
    fn delivery_failure_schedules_one_retry() {
        let registry = SessionRegistry::new();
        // A session whose queue is gone: sends fail, switch still "known".
        let (tx, rx) = bounded(64);
        registry.register(SessionHandle::new(Dpid(1), tx));
        drop(rx);

        let mut installer = FlowInstaller::new(config());
        let d = decision(vec![hop(1, 1, 2)]);
        let err = installer.install(&registry, &d, None).unwrap_err();
        assert_eq!(err, InstallError::Failed(Dpid(1)));

        // The switch reconnects; the pending retry lands the rules.
        let (registry2, rxs2) = registry_with(&[1]);
        installer.retry_pending(&registry2);
        assert_eq!(flow_mods(&drain(&rxs2[&Dpid(1)])).len(), 2);
        assert!(installer.installed_path(mac(1), mac(3)).is_some());
    }

    #[test]
    fn zero_budget_cancels_outstanding_mods() {
        let (registry, rxs) = registry_with(&[1, 3]);
        let mut installer = FlowInstaller::new(InstallerConfig {
            budget: Duration::ZERO,
            ..config()
        });
        let d = decision(vec![hop(1, 1, 3), hop(3, 2, 1)]);
        let err = installer.install(&registry, &d, None).unwrap_err();
        assert!(matches!(err, InstallError::BudgetExceeded { sent: 0, .. }));
        assert!(flow_mods(&drain(&rxs[&Dpid(1)])).is_empty());
        assert!(installer.installed_path(mac(1), mac(3)).is_none());
    }

    #[test]
    fn purge_link_forgets_paths_crossing_it() {
        let (registry, _rxs) = registry_with(&[1, 2, 3]);
        let mut installer = FlowInstaller::new(config());
        installer
            .install(
                &registry,
                &decision(vec![hop(1, 1, 2), hop(2, 3, 2), hop(3, 3, 1)]),
                None,
            )
            .unwrap();

        installer.purge_link(Dpid(2), Dpid(3));
        assert!(installer.installed_path(mac(1), mac(3)).is_none());
    }

    #[test]
    fn fine_match_uses_the_five_tuple() {
        let (registry, rxs) = registry_with(&[1]);
        let mut installer = FlowInstaller::new(InstallerConfig {
            fine_match: true,
            ..config()
        });

        // A real TCP frame so the five-tuple is extractable.
        let mut raw = Vec::new();
        raw.extend_from_slice(&mac(3).octets());
        raw.extend_from_slice(&mac(1).octets());
        raw.extend_from_slice(&0x0800u16.to_be_bytes());
        raw.push(0x45);
        raw.push(0);
        raw.extend_from_slice(&40u16.to_be_bytes());
        raw.extend_from_slice(&[0; 4]);
        raw.push(64);
        raw.push(6);
        raw.extend_from_slice(&[0; 2]);
        raw.extend_from_slice(&[10, 0, 0, 1]);
        raw.extend_from_slice(&[10, 0, 0, 3]);
        raw.extend_from_slice(&40000u16.to_be_bytes());
        raw.extend_from_slice(&22u16.to_be_bytes());
        raw.extend_from_slice(&[0; 12]);
        let frame = EthernetFrame::parse(&raw).unwrap();
        let data = Bytes::from(raw.clone());

        installer
            .install(
                &registry,
                &decision(vec![hop(1, 1, 2)]),
                Some(Trigger {
                    frame: &frame,
                    data: &data,
                }),
            )
            .unwrap();

        let msgs = drain(&rxs[&Dpid(1)]);
        let mods = flow_mods(&msgs);
        let forward = mods
            .iter()
            .find(|f| f.fields.tcp_dst == Some(22))
            .expect("fine forward rule");
        assert_eq!(forward.priority, FINE_RULE_PRIORITY);
        assert_eq!(forward.fields.ipv4_src, Some("10.0.0.1".parse().unwrap()));
        // Reverse shares the granularity with endpoints swapped.
        let reverse = mods
            .iter()
            .find(|f| f.fields.tcp_src == Some(22))
            .expect("fine reverse rule");
        assert_eq!(reverse.fields.ipv4_dst, Some("10.0.0.1".parse().unwrap()));
    }
}

//! # Switch sessions
//!
//! One logical session per connected switch: a reader thread that drives
//! the handshake and turns messages into worker events, and a writer
//! thread draining a bounded queue of encoded messages. The handshake is
//!
//! ```text
//! connect ──HELLO──▶ ──FEATURES_REQUEST──▶ FeaturesReply(dpid)
//!         ──PORT_DESC──▶ PortDescReply ──▶ delete-all + table-miss ──▶ SWITCH_UP
//! ```
//!
//! Handlers never block on the switch socket: writes go through the queue
//! and a full or closed queue surfaces as `SwitchGone`, which callers treat
//! as transient. A protocol error closes the session; reconnect is driven
//! by the switch.

use std::collections::HashMap;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use bytes::BytesMut;
use crossbeam_channel::{bounded, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use weir_common::ids::Dpid;
use weir_proto::messages::{
    read_message, FlowMod, MultipartReply, MultipartReplyBody, MultipartRequest, OfMessage,
    PortDescEntry,
};
use weir_proto::wire::WireError;

use crate::events::Event;

/// Outstanding writes tolerated per switch before sends fail.
const WRITE_QUEUE_DEPTH: usize = 256;

static SESSION_TOKENS: AtomicU64 = AtomicU64::new(1);

/// The target datapath has disconnected (or its write queue is gone).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("switch {0} is gone")]
pub struct SwitchGone(pub Dpid);

// ─── Handle & registry ──────────────────────────────────────────────────────

/// Cloneable sender half of a switch session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    dpid: Dpid,
    token: u64,
    tx: Sender<BytesMut>,
    xid: Arc<AtomicU32>,
}

impl SessionHandle {
    pub fn new(dpid: Dpid, tx: Sender<BytesMut>) -> Self {
        SessionHandle {
            dpid,
            token: SESSION_TOKENS.fetch_add(1, Ordering::Relaxed),
            tx,
            xid: Arc::new(AtomicU32::new(1)),
        }
    }

    pub fn dpid(&self) -> Dpid {
        self.dpid
    }

    /// Enqueue a message with a fresh xid. Fails fast instead of blocking
    /// when the switch stops draining its queue.
    pub fn send(&self, msg: &OfMessage) -> Result<(), SwitchGone> {
        self.send_with_xid(msg, self.xid.fetch_add(1, Ordering::Relaxed))
    }

    /// Enqueue a message echoing a specific xid (ECHO replies).
    pub fn send_with_xid(&self, msg: &OfMessage, xid: u32) -> Result<(), SwitchGone> {
        self.tx
            .try_send(msg.encode(xid))
            .map_err(|_| SwitchGone(self.dpid))
    }
}

/// Live sessions keyed by dpid, shared by the compute worker and the
/// stats poller.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<Dpid, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: SessionHandle) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        if inner.insert(handle.dpid, handle).is_some() {
            warn!("replaced a live session during reconnect");
        }
    }

    /// Remove the session only if `token` still owns the slot — a
    /// reconnect may already have replaced it.
    pub fn unregister(&self, dpid: Dpid, token: u64) -> bool {
        let mut inner = self.inner.lock().expect("registry poisoned");
        match inner.get(&dpid) {
            Some(current) if current.token == token => {
                inner.remove(&dpid);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, dpid: Dpid) -> Option<SessionHandle> {
        self.inner.lock().expect("registry poisoned").get(&dpid).cloned()
    }

    /// Connected dpids in stable order.
    pub fn dpids(&self) -> Vec<Dpid> {
        let mut out: Vec<Dpid> = self
            .inner
            .lock()
            .expect("registry poisoned")
            .keys()
            .copied()
            .collect();
        out.sort_unstable();
        out
    }

    pub fn send_to(&self, dpid: Dpid, msg: &OfMessage) -> Result<(), SwitchGone> {
        self.get(dpid).ok_or(SwitchGone(dpid))?.send(msg)
    }
}

// ─── Handshake state machine ────────────────────────────────────────────────

/// What the reader should do after feeding a message to the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeAction {
    None,
    /// FEATURES_REPLY landed; ask for the port list.
    RequestPortDesc,
    /// Port enumeration finished; bring the switch up.
    Complete {
        dpid: Dpid,
        ports: Vec<PortDescEntry>,
    },
}

/// Pure OF 1.3 handshake tracker: FEATURES_REPLY carries the dpid, a
/// PORT_DESC round-trip carries the ports (possibly in several segments).
#[derive(Debug, Default)]
pub struct Handshake {
    dpid: Option<Dpid>,
    ports: Vec<PortDescEntry>,
    complete: bool,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn on_message(&mut self, msg: &OfMessage) -> HandshakeAction {
        if self.complete {
            return HandshakeAction::None;
        }
        match msg {
            OfMessage::FeaturesReply(reply) => {
                self.dpid = Some(reply.datapath_id);
                HandshakeAction::RequestPortDesc
            }
            OfMessage::MultipartReply(reply) => {
                let (Some(dpid), MultipartReplyBody::PortDesc(entries)) =
                    (self.dpid, &reply.body)
                else {
                    return HandshakeAction::None;
                };
                self.ports.extend(entries.iter().cloned());
                if reply.has_more() {
                    HandshakeAction::None
                } else {
                    self.complete = true;
                    HandshakeAction::Complete {
                        dpid,
                        ports: std::mem::take(&mut self.ports),
                    }
                }
            }
            _ => HandshakeAction::None,
        }
    }
}

// ─── Session threads ────────────────────────────────────────────────────────

/// Spawn the reader/writer pair for one accepted connection.
pub fn spawn_session(stream: TcpStream, registry: Arc<SessionRegistry>, events: Sender<Event>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    if let Err(e) = thread::Builder::new()
        .name(format!("of-session-{peer}"))
        .spawn(move || run_session(stream, registry, events))
    {
        error!(%peer, "failed to spawn session thread: {e}");
    }
}

fn run_session(stream: TcpStream, registry: Arc<SessionRegistry>, events: Sender<Event>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    info!(%peer, "switch connected");

    let writer_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            error!(%peer, "cannot clone switch socket: {e}");
            return;
        }
    };
    let (write_tx, write_rx) = bounded::<BytesMut>(WRITE_QUEUE_DEPTH);
    let writer = {
        let peer = peer.clone();
        thread::Builder::new()
            .name(format!("of-writer-{peer}"))
            .spawn(move || run_writer(writer_stream, write_rx, peer))
    };
    if writer.is_err() {
        error!(%peer, "failed to spawn writer thread");
        return;
    }

    let mut reader = stream;
    let handle = SessionHandle::new(Dpid(0), write_tx.clone());
    // Pre-handshake messages ride the same queue; the handle is re-keyed
    // to the real dpid once FEATURES_REPLY lands.
    let _ = handle.send(&OfMessage::Hello);
    let _ = handle.send(&OfMessage::FeaturesRequest);

    let mut handshake = Handshake::new();
    let mut session: Option<SessionHandle> = None;

    loop {
        let (header, msg) = match read_message(&mut reader) {
            Ok(x) => x,
            Err(WireError::Io(e)) => {
                info!(%peer, "switch disconnected: {e}");
                break;
            }
            Err(e) => {
                error!(%peer, "protocol error, closing session: {e}");
                break;
            }
        };

        // Inline replies that never touch the compute worker.
        if let OfMessage::EchoRequest(payload) = &msg {
            let reply = OfMessage::EchoReply(payload.clone());
            let target = session.as_ref().unwrap_or(&handle);
            let _ = target.send_with_xid(&reply, header.xid);
            continue;
        }

        if session.is_none() {
            match handshake.on_message(&msg) {
                HandshakeAction::RequestPortDesc => {
                    let _ = handle.send(&OfMessage::MultipartRequest(MultipartRequest::PortDesc));
                    continue;
                }
                HandshakeAction::Complete { dpid, ports } => {
                    let live = SessionHandle::new(dpid, write_tx.clone());
                    // Reconnect semantics: wipe whatever the switch still
                    // carries, reinstall the table-miss, then announce.
                    let _ = live.send(&OfMessage::FlowMod(FlowMod::delete_all()));
                    let _ = live.send(&OfMessage::FlowMod(FlowMod::table_miss()));
                    registry.register(live.clone());
                    let port_nos = ports
                        .iter()
                        .filter(|p| p.port_no.is_physical())
                        .map(|p| p.port_no)
                        .collect();
                    info!(%peer, %dpid, "switch up");
                    let _ = events.send(Event::SwitchUp {
                        dpid,
                        ports: port_nos,
                    });
                    session = Some(live);
                    continue;
                }
                HandshakeAction::None => {
                    debug!(%peer, msg_type = msg.msg_type(), "pre-handshake message");
                    continue;
                }
            }
        }

        let Some(live) = &session else { continue };
        let dpid = live.dpid();
        match msg {
            OfMessage::PacketIn(packet) => {
                let _ = events.send(Event::PacketIn { dpid, packet });
            }
            OfMessage::MultipartReply(MultipartReply {
                body: MultipartReplyBody::PortStats(entries),
                ..
            }) => {
                let _ = events.send(Event::PortStats { dpid, entries });
            }
            OfMessage::PortStatus(status) => {
                let _ = events.send(Event::PortStatus { dpid, status });
            }
            OfMessage::Error(err) => {
                warn!(%peer, %dpid, err_type = err.err_type, code = err.code, "switch reported an error");
            }
            OfMessage::Hello | OfMessage::EchoReply(_) => {}
            other => {
                debug!(%peer, %dpid, msg_type = other.msg_type(), "ignoring message");
            }
        }
    }

    if let Some(live) = session {
        let dpid = live.dpid();
        if registry.unregister(dpid, live.token) {
            let _ = events.send(Event::SwitchDown { dpid });
        }
        info!(%peer, %dpid, "switch down");
    }
    // All senders drop here, which stops the writer thread.
}

fn run_writer(mut stream: TcpStream, rx: Receiver<BytesMut>, peer: String) {
    for buf in rx {
        if let Err(e) = stream.write_all(&buf) {
            warn!(%peer, "write to switch failed: {e}");
            break;
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}

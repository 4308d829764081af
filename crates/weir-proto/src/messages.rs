//! # Typed OpenFlow 1.3 message bodies
//!
//! Each body carries an `encode_body` / `decode_body` pair over `bytes`
//! buffers; [`OfMessage`] ties them to the header and provides the stream
//! framing (`read_message`). Message types the controller has no handler
//! for decode to [`OfMessage::Unhandled`] rather than erroring — a switch
//! sending BARRIER_REPLY is noisy, not malicious.

use std::io::Read;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use weir_common::ids::{Dpid, MacAddr, PortNo};

use crate::oxm::Match;
use crate::wire::{
    need, Header, MsgType, WireError, CONTROLLER_MAX_LEN, GROUP_ANY, HEADER_LEN, NO_BUFFER,
    OFP_VERSION,
};

// ─── Actions ────────────────────────────────────────────────────────────────

/// `OFPAT_OUTPUT` — the only action type the controller installs.
pub const ACTION_OUTPUT: u16 = 0;

/// `OFPIT_APPLY_ACTIONS`.
pub const INSTRUCTION_APPLY_ACTIONS: u16 = 4;

/// `OFPTT_ALL` — wildcard table for flow deletes.
pub const TABLE_ALL: u8 = 0xff;

/// A flow or packet-out action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Output { port: PortNo, max_len: u16 },
}

impl Action {
    /// Forward out a port, truncating nothing on the way to the controller.
    pub fn output(port: PortNo) -> Self {
        Action::Output {
            port,
            max_len: CONTROLLER_MAX_LEN,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match *self {
            Action::Output { port, max_len } => {
                buf.put_u16(ACTION_OUTPUT);
                buf.put_u16(16);
                buf.put_u32(port.0);
                buf.put_u16(max_len);
                buf.put_bytes(0, 6);
            }
        }
    }
}

fn encode_actions(actions: &[Action]) -> BytesMut {
    let mut buf = BytesMut::new();
    for action in actions {
        action.encode(&mut buf);
    }
    buf
}

/// Decode a run of actions occupying exactly `len` bytes. Unknown action
/// types are skipped by their self-declared length.
fn decode_actions(buf: &mut impl Buf, len: usize) -> Result<Vec<Action>, WireError> {
    need(buf, len)?;
    let mut region = buf.copy_to_bytes(len);
    let mut actions = Vec::new();
    while region.has_remaining() {
        need(&region, 4)?;
        let action_type = region.get_u16();
        let action_len = region.get_u16() as usize;
        if action_len < 4 {
            return Err(WireError::Malformed("action length underflow"));
        }
        need(&region, action_len - 4)?;
        if action_type == ACTION_OUTPUT {
            if action_len != 16 {
                return Err(WireError::Malformed("OUTPUT action length"));
            }
            let port = PortNo(region.get_u32());
            let max_len = region.get_u16();
            region.advance(6);
            actions.push(Action::Output { port, max_len });
        } else {
            region.advance(action_len - 4);
        }
    }
    Ok(actions)
}

// ─── Error ──────────────────────────────────────────────────────────────────

/// OFPT_ERROR from the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub err_type: u16,
    pub code: u16,
    /// At least the first 64 bytes of the offending message.
    pub data: Bytes,
}

impl ErrorMsg {
    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u16(self.err_type);
        buf.put_u16(self.code);
        buf.put_slice(&self.data);
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self, WireError> {
        need(buf, 4)?;
        let err_type = buf.get_u16();
        let code = buf.get_u16();
        let data = buf.copy_to_bytes(buf.remaining());
        Ok(ErrorMsg {
            err_type,
            code,
            data,
        })
    }
}

// ─── Features ───────────────────────────────────────────────────────────────

/// OFPT_FEATURES_REPLY. OF 1.3 dropped the port list from this message;
/// ports are fetched with a PORT_DESC multipart right after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeaturesReply {
    pub datapath_id: Dpid,
    pub n_buffers: u32,
    pub n_tables: u8,
    pub auxiliary_id: u8,
    pub capabilities: u32,
}

impl FeaturesReply {
    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u64(self.datapath_id.0);
        buf.put_u32(self.n_buffers);
        buf.put_u8(self.n_tables);
        buf.put_u8(self.auxiliary_id);
        buf.put_bytes(0, 2);
        buf.put_u32(self.capabilities);
        buf.put_u32(0); // reserved
    }

    fn decode_body(buf: &mut impl Buf) -> Result<Self, WireError> {
        need(buf, 24)?;
        let datapath_id = Dpid(buf.get_u64());
        let n_buffers = buf.get_u32();
        let n_tables = buf.get_u8();
        let auxiliary_id = buf.get_u8();
        buf.advance(2);
        let capabilities = buf.get_u32();
        buf.advance(4);
        Ok(FeaturesReply {
            datapath_id,
            n_buffers,
            n_tables,
            auxiliary_id,
            capabilities,
        })
    }
}

// ─── Port description ───────────────────────────────────────────────────────

/// `OFPPS_LINK_DOWN` bit in `PortDescEntry::state`.
pub const PORT_STATE_LINK_DOWN: u32 = 1 << 0;

/// One `ofp_port` structure (64 bytes on the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescEntry {
    pub port_no: PortNo,
    pub hw_addr: MacAddr,
    pub name: String,
    pub config: u32,
    pub state: u32,
    pub curr: u32,
    pub advertised: u32,
    pub supported: u32,
    pub peer: u32,
    pub curr_speed: u32,
    pub max_speed: u32,
}

impl PortDescEntry {
    pub const ENCODED_LEN: usize = 64;

    pub fn link_up(&self) -> bool {
        self.state & PORT_STATE_LINK_DOWN == 0
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.port_no.0);
        buf.put_bytes(0, 4);
        buf.put_slice(&self.hw_addr.octets());
        buf.put_bytes(0, 2);
        let mut name = [0u8; 16];
        let bytes = self.name.as_bytes();
        let n = bytes.len().min(15);
        name[..n].copy_from_slice(&bytes[..n]);
        buf.put_slice(&name);
        buf.put_u32(self.config);
        buf.put_u32(self.state);
        buf.put_u32(self.curr);
        buf.put_u32(self.advertised);
        buf.put_u32(self.supported);
        buf.put_u32(self.peer);
        buf.put_u32(self.curr_speed);
        buf.put_u32(self.max_speed);
    }

    fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        need(buf, Self::ENCODED_LEN)?;
        let port_no = PortNo(buf.get_u32());
        buf.advance(4);
        let mut octets = [0u8; 6];
        buf.copy_to_slice(&mut octets);
        buf.advance(2);
        let mut name_bytes = [0u8; 16];
        buf.copy_to_slice(&mut name_bytes);
        let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(16);
        let name = String::from_utf8_lossy(&name_bytes[..end]).into_owned();
        Ok(PortDescEntry {
            port_no,
            hw_addr: MacAddr(octets),
            name,
            config: buf.get_u32(),
            state: buf.get_u32(),
            curr: buf.get_u32(),
            advertised: buf.get_u32(),
            supported: buf.get_u32(),
            peer: buf.get_u32(),
            curr_speed: buf.get_u32(),
            max_speed: buf.get_u32(),
        })
    }
}

// ─── Port status ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PortReason {
    Add = 0,
    Delete = 1,
    Modify = 2,
}

impl PortReason {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(PortReason::Add),
            1 => Some(PortReason::Delete),
            2 => Some(PortReason::Modify),
            _ => None,
        }
    }
}

/// OFPT_PORT_STATUS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    pub reason: PortReason,
    pub desc: PortDescEntry,
}

impl PortStatus {
    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u8(self.reason as u8);
        buf.put_bytes(0, 7);
        self.desc.encode(buf);
    }

    fn decode_body(buf: &mut impl Buf) -> Result<Self, WireError> {
        need(buf, 8)?;
        let reason = PortReason::from_byte(buf.get_u8())
            .ok_or(WireError::Malformed("port status reason"))?;
        buf.advance(7);
        let desc = PortDescEntry::decode(buf)?;
        Ok(PortStatus { reason, desc })
    }
}

// ─── Packet in / out ────────────────────────────────────────────────────────

/// PACKET_IN reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketInReason {
    NoMatch = 0,
    Action = 1,
    InvalidTtl = 2,
}

impl PacketInReason {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(PacketInReason::NoMatch),
            1 => Some(PacketInReason::Action),
            2 => Some(PacketInReason::InvalidTtl),
            _ => None,
        }
    }
}

/// OFPT_PACKET_IN.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketIn {
    pub buffer_id: u32,
    pub total_len: u16,
    pub reason: PacketInReason,
    pub table_id: u8,
    pub cookie: u64,
    pub fields: Match,
    pub data: Bytes,
}

impl PacketIn {
    /// Build a table-miss PACKET_IN (used by the test harness switch).
    pub fn table_miss(in_port: PortNo, data: Bytes) -> Self {
        PacketIn {
            buffer_id: NO_BUFFER,
            total_len: data.len() as u16,
            reason: PacketInReason::NoMatch,
            table_id: 0,
            cookie: 0,
            fields: Match {
                in_port: Some(in_port.0),
                ..Match::default()
            },
            data,
        }
    }

    /// The ingress port carried in the match.
    pub fn in_port(&self) -> Option<PortNo> {
        self.fields.in_port()
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.buffer_id);
        buf.put_u16(self.total_len);
        buf.put_u8(self.reason as u8);
        buf.put_u8(self.table_id);
        buf.put_u64(self.cookie);
        self.fields.encode(buf);
        buf.put_bytes(0, 2);
        buf.put_slice(&self.data);
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self, WireError> {
        need(buf, 16)?;
        let buffer_id = buf.get_u32();
        let total_len = buf.get_u16();
        let reason = PacketInReason::from_byte(buf.get_u8())
            .ok_or(WireError::Malformed("packet-in reason"))?;
        let table_id = buf.get_u8();
        let cookie = buf.get_u64();
        let fields = Match::decode(buf)?;
        need(buf, 2)?;
        buf.advance(2);
        let data = buf.copy_to_bytes(buf.remaining());
        Ok(PacketIn {
            buffer_id,
            total_len,
            reason,
            table_id,
            cookie,
            fields,
            data,
        })
    }
}

/// OFPT_PACKET_OUT.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketOut {
    pub buffer_id: u32,
    pub in_port: PortNo,
    pub actions: Vec<Action>,
    pub data: Bytes,
}

impl PacketOut {
    /// Emit an unbuffered packet out a single port.
    pub fn single(in_port: PortNo, out_port: PortNo, data: Bytes) -> Self {
        PacketOut {
            buffer_id: NO_BUFFER,
            in_port,
            actions: vec![Action::output(out_port)],
            data,
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        let actions = encode_actions(&self.actions);
        buf.put_u32(self.buffer_id);
        buf.put_u32(self.in_port.0);
        buf.put_u16(actions.len() as u16);
        buf.put_bytes(0, 6);
        buf.put_slice(&actions);
        buf.put_slice(&self.data);
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self, WireError> {
        need(buf, 16)?;
        let buffer_id = buf.get_u32();
        let in_port = PortNo(buf.get_u32());
        let actions_len = buf.get_u16() as usize;
        buf.advance(6);
        let actions = decode_actions(buf, actions_len)?;
        let data = buf.copy_to_bytes(buf.remaining());
        Ok(PacketOut {
            buffer_id,
            in_port,
            actions,
            data,
        })
    }
}

// ─── Flow mod ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlowModCommand {
    Add = 0,
    Modify = 1,
    ModifyStrict = 2,
    Delete = 3,
    DeleteStrict = 4,
}

impl FlowModCommand {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(FlowModCommand::Add),
            1 => Some(FlowModCommand::Modify),
            2 => Some(FlowModCommand::ModifyStrict),
            3 => Some(FlowModCommand::Delete),
            4 => Some(FlowModCommand::DeleteStrict),
            _ => None,
        }
    }
}

/// OFPT_FLOW_MOD. Actions are carried in a single APPLY_ACTIONS
/// instruction; an empty action list encodes no instruction at all (the
/// form deletes use).
#[derive(Debug, Clone, PartialEq)]
pub struct FlowMod {
    pub cookie: u64,
    pub cookie_mask: u64,
    pub table_id: u8,
    pub command: FlowModCommand,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub priority: u16,
    pub buffer_id: u32,
    pub out_port: PortNo,
    pub out_group: u32,
    pub flags: u16,
    pub fields: Match,
    pub actions: Vec<Action>,
}

impl FlowMod {
    fn base(command: FlowModCommand, fields: Match, priority: u16) -> Self {
        FlowMod {
            cookie: 0,
            cookie_mask: 0,
            table_id: 0,
            command,
            idle_timeout: 0,
            hard_timeout: 0,
            priority,
            buffer_id: NO_BUFFER,
            out_port: PortNo::ANY,
            out_group: GROUP_ANY,
            flags: 0,
            fields,
            actions: Vec::new(),
        }
    }

    pub fn add(
        fields: Match,
        actions: Vec<Action>,
        priority: u16,
        idle_timeout: u16,
        hard_timeout: u16,
    ) -> Self {
        FlowMod {
            idle_timeout,
            hard_timeout,
            actions,
            ..Self::base(FlowModCommand::Add, fields, priority)
        }
    }

    pub fn modify_strict(
        fields: Match,
        actions: Vec<Action>,
        priority: u16,
        idle_timeout: u16,
        hard_timeout: u16,
    ) -> Self {
        FlowMod {
            idle_timeout,
            hard_timeout,
            actions,
            ..Self::base(FlowModCommand::ModifyStrict, fields, priority)
        }
    }

    pub fn delete_strict(fields: Match, priority: u16) -> Self {
        Self::base(FlowModCommand::DeleteStrict, fields, priority)
    }

    /// Wipe every flow in every table — issued once per handshake so a
    /// reconnecting switch starts from a clean slate.
    pub fn delete_all() -> Self {
        FlowMod {
            table_id: TABLE_ALL,
            ..Self::base(FlowModCommand::Delete, Match::any(), 0)
        }
    }

    /// The priority-0 catch-all that punts unmatched packets, whole, to
    /// the controller. Pinned: no timeouts.
    pub fn table_miss() -> Self {
        FlowMod {
            actions: vec![Action::Output {
                port: PortNo::CONTROLLER,
                max_len: CONTROLLER_MAX_LEN,
            }],
            ..Self::base(FlowModCommand::Add, Match::any(), 0)
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u64(self.cookie);
        buf.put_u64(self.cookie_mask);
        buf.put_u8(self.table_id);
        buf.put_u8(self.command as u8);
        buf.put_u16(self.idle_timeout);
        buf.put_u16(self.hard_timeout);
        buf.put_u16(self.priority);
        buf.put_u32(self.buffer_id);
        buf.put_u32(self.out_port.0);
        buf.put_u32(self.out_group);
        buf.put_u16(self.flags);
        buf.put_bytes(0, 2);
        self.fields.encode(buf);
        if !self.actions.is_empty() {
            let actions = encode_actions(&self.actions);
            buf.put_u16(INSTRUCTION_APPLY_ACTIONS);
            buf.put_u16(8 + actions.len() as u16);
            buf.put_bytes(0, 4);
            buf.put_slice(&actions);
        }
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self, WireError> {
        need(buf, 40)?;
        let cookie = buf.get_u64();
        let cookie_mask = buf.get_u64();
        let table_id = buf.get_u8();
        let command = FlowModCommand::from_byte(buf.get_u8())
            .ok_or(WireError::Malformed("flow-mod command"))?;
        let idle_timeout = buf.get_u16();
        let hard_timeout = buf.get_u16();
        let priority = buf.get_u16();
        let buffer_id = buf.get_u32();
        let out_port = PortNo(buf.get_u32());
        let out_group = buf.get_u32();
        let flags = buf.get_u16();
        buf.advance(2);
        let fields = Match::decode(buf)?;

        let mut actions = Vec::new();
        while buf.has_remaining() {
            need(buf, 4)?;
            let instr_type = buf.get_u16();
            let instr_len = buf.get_u16() as usize;
            if instr_len < 4 {
                return Err(WireError::Malformed("instruction length underflow"));
            }
            if instr_type == INSTRUCTION_APPLY_ACTIONS {
                if instr_len < 8 {
                    return Err(WireError::Malformed("apply-actions length"));
                }
                need(buf, 4)?;
                buf.advance(4);
                actions.extend(decode_actions(buf, instr_len - 8)?);
            } else {
                need(buf, instr_len - 4)?;
                buf.advance(instr_len - 4);
            }
        }

        Ok(FlowMod {
            cookie,
            cookie_mask,
            table_id,
            command,
            idle_timeout,
            hard_timeout,
            priority,
            buffer_id,
            out_port,
            out_group,
            flags,
            fields,
            actions,
        })
    }
}

// ─── Multipart ──────────────────────────────────────────────────────────────

/// `OFPMP_PORT_STATS`.
pub const MULTIPART_PORT_STATS: u16 = 4;
/// `OFPMP_PORT_DESC`.
pub const MULTIPART_PORT_DESC: u16 = 13;
/// `OFPMPF_REPLY_MORE` — more reply segments follow.
pub const MULTIPART_REPLY_MORE: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartRequest {
    /// Counters for one port, or all with `PortNo::ANY`.
    PortStats { port_no: PortNo },
    /// Enumerate the switch's ports.
    PortDesc,
}

impl MultipartRequest {
    fn encode_body(&self, buf: &mut BytesMut) {
        match *self {
            MultipartRequest::PortStats { port_no } => {
                buf.put_u16(MULTIPART_PORT_STATS);
                buf.put_u16(0);
                buf.put_bytes(0, 4);
                buf.put_u32(port_no.0);
                buf.put_bytes(0, 4);
            }
            MultipartRequest::PortDesc => {
                buf.put_u16(MULTIPART_PORT_DESC);
                buf.put_u16(0);
                buf.put_bytes(0, 4);
            }
        }
    }

    fn decode_body(buf: &mut impl Buf) -> Result<Self, WireError> {
        need(buf, 8)?;
        let mp_type = buf.get_u16();
        let _flags = buf.get_u16();
        buf.advance(4);
        match mp_type {
            MULTIPART_PORT_STATS => {
                need(buf, 8)?;
                let port_no = PortNo(buf.get_u32());
                buf.advance(4);
                Ok(MultipartRequest::PortStats { port_no })
            }
            MULTIPART_PORT_DESC => Ok(MultipartRequest::PortDesc),
            _ => Err(WireError::Malformed("unsupported multipart request")),
        }
    }
}

/// One `ofp_port_stats` entry (112 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortStatsEntry {
    pub port_no: PortNo,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_frame_err: u64,
    pub rx_over_err: u64,
    pub rx_crc_err: u64,
    pub collisions: u64,
    pub duration_sec: u32,
    pub duration_nsec: u32,
}

impl PortStatsEntry {
    pub const ENCODED_LEN: usize = 112;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.port_no.0);
        buf.put_bytes(0, 4);
        buf.put_u64(self.rx_packets);
        buf.put_u64(self.tx_packets);
        buf.put_u64(self.rx_bytes);
        buf.put_u64(self.tx_bytes);
        buf.put_u64(self.rx_dropped);
        buf.put_u64(self.tx_dropped);
        buf.put_u64(self.rx_errors);
        buf.put_u64(self.tx_errors);
        buf.put_u64(self.rx_frame_err);
        buf.put_u64(self.rx_over_err);
        buf.put_u64(self.rx_crc_err);
        buf.put_u64(self.collisions);
        buf.put_u32(self.duration_sec);
        buf.put_u32(self.duration_nsec);
    }

    fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        need(buf, Self::ENCODED_LEN)?;
        let port_no = PortNo(buf.get_u32());
        buf.advance(4);
        Ok(PortStatsEntry {
            port_no,
            rx_packets: buf.get_u64(),
            tx_packets: buf.get_u64(),
            rx_bytes: buf.get_u64(),
            tx_bytes: buf.get_u64(),
            rx_dropped: buf.get_u64(),
            tx_dropped: buf.get_u64(),
            rx_errors: buf.get_u64(),
            tx_errors: buf.get_u64(),
            rx_frame_err: buf.get_u64(),
            rx_over_err: buf.get_u64(),
            rx_crc_err: buf.get_u64(),
            collisions: buf.get_u64(),
            duration_sec: buf.get_u32(),
            duration_nsec: buf.get_u32(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MultipartReplyBody {
    PortStats(Vec<PortStatsEntry>),
    PortDesc(Vec<PortDescEntry>),
    /// A multipart type we did not request; body discarded.
    Other(u16),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartReply {
    pub flags: u16,
    pub body: MultipartReplyBody,
}

impl MultipartReply {
    pub fn port_stats(entries: Vec<PortStatsEntry>) -> Self {
        MultipartReply {
            flags: 0,
            body: MultipartReplyBody::PortStats(entries),
        }
    }

    pub fn port_desc(entries: Vec<PortDescEntry>) -> Self {
        MultipartReply {
            flags: 0,
            body: MultipartReplyBody::PortDesc(entries),
        }
    }

    /// More segments of this reply follow.
    pub fn has_more(&self) -> bool {
        self.flags & MULTIPART_REPLY_MORE != 0
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        let mp_type = match &self.body {
            MultipartReplyBody::PortStats(_) => MULTIPART_PORT_STATS,
            MultipartReplyBody::PortDesc(_) => MULTIPART_PORT_DESC,
            MultipartReplyBody::Other(t) => *t,
        };
        buf.put_u16(mp_type);
        buf.put_u16(self.flags);
        buf.put_bytes(0, 4);
        match &self.body {
            MultipartReplyBody::PortStats(entries) => {
                for entry in entries {
                    entry.encode(buf);
                }
            }
            MultipartReplyBody::PortDesc(entries) => {
                for entry in entries {
                    entry.encode(buf);
                }
            }
            MultipartReplyBody::Other(_) => {}
        }
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self, WireError> {
        need(buf, 8)?;
        let mp_type = buf.get_u16();
        let flags = buf.get_u16();
        buf.advance(4);
        let body = match mp_type {
            MULTIPART_PORT_STATS => {
                let mut entries = Vec::new();
                while buf.has_remaining() {
                    entries.push(PortStatsEntry::decode(buf)?);
                }
                MultipartReplyBody::PortStats(entries)
            }
            MULTIPART_PORT_DESC => {
                let mut entries = Vec::new();
                while buf.has_remaining() {
                    entries.push(PortDescEntry::decode(buf)?);
                }
                MultipartReplyBody::PortDesc(entries)
            }
            other => {
                buf.advance(buf.remaining());
                MultipartReplyBody::Other(other)
            }
        };
        Ok(MultipartReply { flags, body })
    }
}

// ─── OfMessage ──────────────────────────────────────────────────────────────

/// A decoded OpenFlow message.
#[derive(Debug, Clone, PartialEq)]
pub enum OfMessage {
    Hello,
    Error(ErrorMsg),
    EchoRequest(Bytes),
    EchoReply(Bytes),
    FeaturesRequest,
    FeaturesReply(FeaturesReply),
    PacketIn(PacketIn),
    PortStatus(PortStatus),
    PacketOut(PacketOut),
    FlowMod(FlowMod),
    MultipartRequest(MultipartRequest),
    MultipartReply(MultipartReply),
    /// A well-formed message of a type the controller does not act on.
    Unhandled { msg_type: u8 },
}

impl OfMessage {
    pub fn msg_type(&self) -> u8 {
        match self {
            OfMessage::Hello => MsgType::Hello as u8,
            OfMessage::Error(_) => MsgType::Error as u8,
            OfMessage::EchoRequest(_) => MsgType::EchoRequest as u8,
            OfMessage::EchoReply(_) => MsgType::EchoReply as u8,
            OfMessage::FeaturesRequest => MsgType::FeaturesRequest as u8,
            OfMessage::FeaturesReply(_) => MsgType::FeaturesReply as u8,
            OfMessage::PacketIn(_) => MsgType::PacketIn as u8,
            OfMessage::PortStatus(_) => MsgType::PortStatus as u8,
            OfMessage::PacketOut(_) => MsgType::PacketOut as u8,
            OfMessage::FlowMod(_) => MsgType::FlowMod as u8,
            OfMessage::MultipartRequest(_) => MsgType::MultipartRequest as u8,
            OfMessage::MultipartReply(_) => MsgType::MultipartReply as u8,
            OfMessage::Unhandled { msg_type } => *msg_type,
        }
    }

    /// Serialise with a fresh header; the length field is backfilled once
    /// the body size is known.
    pub fn encode(&self, xid: u32) -> BytesMut {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(OFP_VERSION);
        buf.put_u8(self.msg_type());
        buf.put_u16(0);
        buf.put_u32(xid);
        match self {
            OfMessage::Hello
            | OfMessage::FeaturesRequest
            | OfMessage::Unhandled { .. } => {}
            OfMessage::Error(body) => body.encode_body(&mut buf),
            OfMessage::EchoRequest(payload) | OfMessage::EchoReply(payload) => {
                buf.put_slice(payload)
            }
            OfMessage::FeaturesReply(body) => body.encode_body(&mut buf),
            OfMessage::PacketIn(body) => body.encode_body(&mut buf),
            OfMessage::PortStatus(body) => body.encode_body(&mut buf),
            OfMessage::PacketOut(body) => body.encode_body(&mut buf),
            OfMessage::FlowMod(body) => body.encode_body(&mut buf),
            OfMessage::MultipartRequest(body) => body.encode_body(&mut buf),
            OfMessage::MultipartReply(body) => body.encode_body(&mut buf),
        }
        let len = buf.len() as u16;
        buf[2..4].copy_from_slice(&len.to_be_bytes());
        buf
    }

    /// Decode a message body. `body` must hold exactly `header.body_len()`
    /// bytes.
    pub fn decode(header: &Header, mut body: Bytes) -> Result<Self, WireError> {
        let msg_type = match MsgType::from_byte(header.msg_type) {
            Some(t) => t,
            None => return Ok(OfMessage::Unhandled { msg_type: header.msg_type }),
        };
        // HELLO may legitimately arrive with a different version during
        // negotiation; everything else must be 1.3.
        if header.version != OFP_VERSION && msg_type != MsgType::Hello {
            return Err(WireError::BadVersion(header.version));
        }
        match msg_type {
            MsgType::Hello => Ok(OfMessage::Hello),
            MsgType::Error => Ok(OfMessage::Error(ErrorMsg::decode_body(&mut body)?)),
            MsgType::EchoRequest => Ok(OfMessage::EchoRequest(body)),
            MsgType::EchoReply => Ok(OfMessage::EchoReply(body)),
            MsgType::FeaturesRequest => Ok(OfMessage::FeaturesRequest),
            MsgType::FeaturesReply => {
                Ok(OfMessage::FeaturesReply(FeaturesReply::decode_body(&mut body)?))
            }
            MsgType::PacketIn => Ok(OfMessage::PacketIn(PacketIn::decode_body(&mut body)?)),
            MsgType::PortStatus => Ok(OfMessage::PortStatus(PortStatus::decode_body(&mut body)?)),
            MsgType::PacketOut => Ok(OfMessage::PacketOut(PacketOut::decode_body(&mut body)?)),
            MsgType::FlowMod => Ok(OfMessage::FlowMod(FlowMod::decode_body(&mut body)?)),
            MsgType::MultipartRequest => Ok(OfMessage::MultipartRequest(
                MultipartRequest::decode_body(&mut body)?,
            )),
            MsgType::MultipartReply => Ok(OfMessage::MultipartReply(
                MultipartReply::decode_body(&mut body)?,
            )),
        }
    }
}

/// Read one framed message from a blocking stream.
pub fn read_message<R: Read>(reader: &mut R) -> Result<(Header, OfMessage), WireError> {
    let mut hdr_bytes = [0u8; HEADER_LEN];
    reader.read_exact(&mut hdr_bytes)?;
    let header = Header::decode(&mut &hdr_bytes[..])?;
    let mut body = vec![0u8; header.body_len()];
    reader.read_exact(&mut body)?;
    let msg = OfMessage::decode(&header, Bytes::from(body))?;
    Ok((header, msg))
}

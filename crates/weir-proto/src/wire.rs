//! # OpenFlow 1.3 framing
//!
//! Every OpenFlow message starts with the same 8-byte header:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Version    |     Type      |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Transaction id (xid)                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `Length` covers the header itself, so the smallest legal message is 8
//! bytes. Decoding distinguishes truncation from semantic violations; both
//! close the session (§ protocol errors), but the log line should say which.

use bytes::{Buf, BufMut};
use thiserror::Error;

// ─── Constants ──────────────────────────────────────────────────────────────

/// The only protocol version this controller negotiates.
pub const OFP_VERSION: u8 = 0x04;

/// Fixed header size.
pub const HEADER_LEN: usize = 8;

/// IANA-assigned OpenFlow controller port.
pub const DEFAULT_PORT: u16 = 6653;

/// `OFP_NO_BUFFER`: the switch did not buffer the packet.
pub const NO_BUFFER: u32 = 0xffff_ffff;

/// `OFPG_ANY`: wildcard group for flow deletes.
pub const GROUP_ANY: u32 = 0xffff_ffff;

/// `OFPCML_NO_BUFFER`: send the complete packet to the controller.
pub const CONTROLLER_MAX_LEN: u16 = 0xffff;

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Wire-level decode/read failure. Any of these on a switch session is a
/// protocol error: the session is closed and the switch drives reconnect.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("message truncated")]
    Truncated,
    #[error("unsupported OpenFlow version {0:#04x}")]
    BadVersion(u8),
    #[error("header length {0} shorter than the header itself")]
    BadLength(u16),
    #[error("malformed message: {0}")]
    Malformed(&'static str),
    #[error("socket read failed: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Message types ──────────────────────────────────────────────────────────

/// The OF 1.3 message types this controller understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Hello = 0,
    Error = 1,
    EchoRequest = 2,
    EchoReply = 3,
    FeaturesRequest = 5,
    FeaturesReply = 6,
    PacketIn = 10,
    PortStatus = 12,
    PacketOut = 13,
    FlowMod = 14,
    MultipartRequest = 18,
    MultipartReply = 19,
}

impl MsgType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(MsgType::Hello),
            1 => Some(MsgType::Error),
            2 => Some(MsgType::EchoRequest),
            3 => Some(MsgType::EchoReply),
            5 => Some(MsgType::FeaturesRequest),
            6 => Some(MsgType::FeaturesReply),
            10 => Some(MsgType::PacketIn),
            12 => Some(MsgType::PortStatus),
            13 => Some(MsgType::PacketOut),
            14 => Some(MsgType::FlowMod),
            18 => Some(MsgType::MultipartRequest),
            19 => Some(MsgType::MultipartReply),
            _ => None,
        }
    }
}

// ─── Header ─────────────────────────────────────────────────────────────────

/// The fixed 8-byte OpenFlow header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    /// Raw message type byte; may be a type we do not model.
    pub msg_type: u8,
    /// Total message length including this header.
    pub length: u16,
    pub xid: u32,
}

impl Header {
    pub fn new(msg_type: MsgType, length: u16, xid: u32) -> Self {
        Header {
            version: OFP_VERSION,
            msg_type: msg_type as u8,
            length,
            xid,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.msg_type);
        buf.put_u16(self.length);
        buf.put_u32(self.xid);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        if buf.remaining() < HEADER_LEN {
            return Err(WireError::Truncated);
        }
        let version = buf.get_u8();
        let msg_type = buf.get_u8();
        let length = buf.get_u16();
        let xid = buf.get_u32();
        if (length as usize) < HEADER_LEN {
            return Err(WireError::BadLength(length));
        }
        Ok(Header {
            version,
            msg_type,
            length,
            xid,
        })
    }

    /// Body length after the header.
    pub fn body_len(&self) -> usize {
        self.length as usize - HEADER_LEN
    }
}

/// Bounds-check helper shared by the body decoders.
pub(crate) fn need(buf: &impl Buf, n: usize) -> Result<(), WireError> {
    if buf.remaining() < n {
        Err(WireError::Truncated)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn header_roundtrip() {
        let hdr = Header::new(MsgType::PacketIn, 42, 7);
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        let decoded = Header::decode(&mut buf).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn short_header_is_truncated() {
        let mut buf = &[0x04u8, 10, 0][..];
        assert!(matches!(Header::decode(&mut buf), Err(WireError::Truncated)));
    }

    #[test]
    fn undersized_length_is_rejected() {
        let mut buf = BytesMut::new();
        Header {
            version: OFP_VERSION,
            msg_type: 0,
            length: 4,
            xid: 0,
        }
        .encode(&mut buf);
        assert!(matches!(
            Header::decode(&mut buf),
            Err(WireError::BadLength(4))
        ));
    }

    #[test]
    fn msg_type_bytes() {
        assert_eq!(MsgType::from_byte(14), Some(MsgType::FlowMod));
        assert_eq!(MsgType::from_byte(19), Some(MsgType::MultipartReply));
        assert_eq!(MsgType::from_byte(4), None);
        assert_eq!(MsgType::FlowMod as u8, 14);
    }
}

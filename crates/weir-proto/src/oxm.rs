//! # OXM match fields
//!
//! OF 1.3 replaced the fixed match structure with a TLV list (OXM). Each
//! field is `class(16) | field(7) hasmask(1) | length(8) | value`, and the
//! whole list rides inside an `ofp_match` that is padded to 8 bytes.
//!
//! Only the `OPENFLOW_BASIC` class fields the controller matches on are
//! modelled; unknown fields and masked values are skipped on decode so a
//! switch that volunteers extra metadata does not kill the session.

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, BytesMut};

use weir_common::ids::{MacAddr, PortNo};

use crate::wire::{need, WireError};

// ─── Constants ──────────────────────────────────────────────────────────────

/// `OFPXMC_OPENFLOW_BASIC`.
pub const OXM_CLASS_BASIC: u16 = 0x8000;

/// `OFPMT_OXM` — the only match type in OF 1.3.
pub const MATCH_TYPE_OXM: u16 = 1;

/// OXM field numbers within the basic class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OxmField {
    InPort = 0,
    EthDst = 3,
    EthSrc = 4,
    EthType = 5,
    IpProto = 10,
    Ipv4Src = 11,
    Ipv4Dst = 12,
    TcpSrc = 13,
    TcpDst = 14,
    UdpSrc = 15,
    UdpDst = 16,
}

// ─── Match ──────────────────────────────────────────────────────────────────

/// A flow match over the fields the controller uses: ingress port, L2
/// addresses, or the IPv4 5-tuple.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Match {
    pub in_port: Option<u32>,
    pub eth_src: Option<MacAddr>,
    pub eth_dst: Option<MacAddr>,
    pub eth_type: Option<u16>,
    pub ip_proto: Option<u8>,
    pub ipv4_src: Option<Ipv4Addr>,
    pub ipv4_dst: Option<Ipv4Addr>,
    pub tcp_src: Option<u16>,
    pub tcp_dst: Option<u16>,
    pub udp_src: Option<u16>,
    pub udp_dst: Option<u16>,
}

impl Match {
    /// Match-all (used by the table-miss rule).
    pub fn any() -> Self {
        Match::default()
    }

    /// L2 match on a (source, destination) MAC pair.
    pub fn l2(eth_src: MacAddr, eth_dst: MacAddr) -> Self {
        Match {
            eth_src: Some(eth_src),
            eth_dst: Some(eth_dst),
            ..Match::default()
        }
    }

    /// IPv4 5-tuple match. Ports land in the TCP or UDP fields according
    /// to `ip_proto`; other protocols match on addresses only.
    pub fn five_tuple(
        ipv4_src: Ipv4Addr,
        ipv4_dst: Ipv4Addr,
        ip_proto: u8,
        src_port: u16,
        dst_port: u16,
    ) -> Self {
        let mut m = Match {
            eth_type: Some(crate::packet::ETHERTYPE_IPV4),
            ip_proto: Some(ip_proto),
            ipv4_src: Some(ipv4_src),
            ipv4_dst: Some(ipv4_dst),
            ..Match::default()
        };
        match ip_proto {
            crate::packet::IP_PROTO_TCP => {
                m.tcp_src = Some(src_port);
                m.tcp_dst = Some(dst_port);
            }
            crate::packet::IP_PROTO_UDP => {
                m.udp_src = Some(src_port);
                m.udp_dst = Some(dst_port);
            }
            _ => {}
        }
        m
    }

    /// The same match with every directional field swapped.
    pub fn reversed(&self) -> Match {
        Match {
            in_port: None,
            eth_src: self.eth_dst,
            eth_dst: self.eth_src,
            eth_type: self.eth_type,
            ip_proto: self.ip_proto,
            ipv4_src: self.ipv4_dst,
            ipv4_dst: self.ipv4_src,
            tcp_src: self.tcp_dst,
            tcp_dst: self.tcp_src,
            udp_src: self.udp_dst,
            udp_dst: self.udp_src,
        }
    }

    /// The ingress port, when the switch included one (PACKET_IN always does).
    pub fn in_port(&self) -> Option<PortNo> {
        self.in_port.map(PortNo)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut fields = BytesMut::new();
        if let Some(port) = self.in_port {
            put_oxm_header(&mut fields, OxmField::InPort, 4);
            fields.put_u32(port);
        }
        if let Some(mac) = self.eth_dst {
            put_oxm_header(&mut fields, OxmField::EthDst, 6);
            fields.put_slice(&mac.octets());
        }
        if let Some(mac) = self.eth_src {
            put_oxm_header(&mut fields, OxmField::EthSrc, 6);
            fields.put_slice(&mac.octets());
        }
        if let Some(eth_type) = self.eth_type {
            put_oxm_header(&mut fields, OxmField::EthType, 2);
            fields.put_u16(eth_type);
        }
        if let Some(proto) = self.ip_proto {
            put_oxm_header(&mut fields, OxmField::IpProto, 1);
            fields.put_u8(proto);
        }
        if let Some(ip) = self.ipv4_src {
            put_oxm_header(&mut fields, OxmField::Ipv4Src, 4);
            fields.put_slice(&ip.octets());
        }
        if let Some(ip) = self.ipv4_dst {
            put_oxm_header(&mut fields, OxmField::Ipv4Dst, 4);
            fields.put_slice(&ip.octets());
        }
        for (field, value) in [
            (OxmField::TcpSrc, self.tcp_src),
            (OxmField::TcpDst, self.tcp_dst),
            (OxmField::UdpSrc, self.udp_src),
            (OxmField::UdpDst, self.udp_dst),
        ] {
            if let Some(port) = value {
                put_oxm_header(&mut fields, field, 2);
                fields.put_u16(port);
            }
        }

        // ofp_match length covers type + length + fields but not padding.
        let length = 4 + fields.len();
        buf.put_u16(MATCH_TYPE_OXM);
        buf.put_u16(length as u16);
        buf.put_slice(&fields);
        let pad = (8 - length % 8) % 8;
        buf.put_bytes(0, pad);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        need(buf, 4)?;
        let match_type = buf.get_u16();
        if match_type != MATCH_TYPE_OXM {
            return Err(WireError::Malformed("unsupported ofp_match type"));
        }
        let length = buf.get_u16() as usize;
        if length < 4 {
            return Err(WireError::Malformed("ofp_match length underflow"));
        }
        let fields_len = length - 4;
        let pad = (8 - length % 8) % 8;
        need(buf, fields_len + pad)?;

        let mut fields = buf.copy_to_bytes(fields_len);
        buf.advance(pad);

        let mut m = Match::default();
        while fields.has_remaining() {
            need(&fields, 4)?;
            let class = fields.get_u16();
            let field_byte = fields.get_u8();
            let value_len = fields.get_u8() as usize;
            need(&fields, value_len)?;
            if class != OXM_CLASS_BASIC {
                fields.advance(value_len);
                continue;
            }
            let field = field_byte >> 1;
            let has_mask = field_byte & 1 == 1;
            // Masked fields carry value + mask back to back; we match
            // exact values only, so the whole TLV is skipped.
            if has_mask {
                fields.advance(value_len);
                continue;
            }
            m.apply_field(field, value_len, &mut fields)?;
        }
        Ok(m)
    }

    fn apply_field(
        &mut self,
        field: u8,
        value_len: usize,
        buf: &mut impl Buf,
    ) -> Result<(), WireError> {
        macro_rules! expect_len {
            ($n:expr) => {
                if value_len != $n {
                    return Err(WireError::Malformed("OXM value length mismatch"));
                }
            };
        }
        match field {
            f if f == OxmField::InPort as u8 => {
                expect_len!(4);
                self.in_port = Some(buf.get_u32());
            }
            f if f == OxmField::EthDst as u8 => {
                expect_len!(6);
                self.eth_dst = Some(get_mac(buf));
            }
            f if f == OxmField::EthSrc as u8 => {
                expect_len!(6);
                self.eth_src = Some(get_mac(buf));
            }
            f if f == OxmField::EthType as u8 => {
                expect_len!(2);
                self.eth_type = Some(buf.get_u16());
            }
            f if f == OxmField::IpProto as u8 => {
                expect_len!(1);
                self.ip_proto = Some(buf.get_u8());
            }
            f if f == OxmField::Ipv4Src as u8 => {
                expect_len!(4);
                self.ipv4_src = Some(Ipv4Addr::from(buf.get_u32()));
            }
            f if f == OxmField::Ipv4Dst as u8 => {
                expect_len!(4);
                self.ipv4_dst = Some(Ipv4Addr::from(buf.get_u32()));
            }
            f if f == OxmField::TcpSrc as u8 => {
                expect_len!(2);
                self.tcp_src = Some(buf.get_u16());
            }
            f if f == OxmField::TcpDst as u8 => {
                expect_len!(2);
                self.tcp_dst = Some(buf.get_u16());
            }
            f if f == OxmField::UdpSrc as u8 => {
                expect_len!(2);
                self.udp_src = Some(buf.get_u16());
            }
            f if f == OxmField::UdpDst as u8 => {
                expect_len!(2);
                self.udp_dst = Some(buf.get_u16());
            }
            _ => {
                // A basic-class field we do not model.
                buf.advance(value_len);
            }
        }
        Ok(())
    }
}

fn put_oxm_header(buf: &mut BytesMut, field: OxmField, value_len: u8) {
    buf.put_u16(OXM_CLASS_BASIC);
    buf.put_u8((field as u8) << 1);
    buf.put_u8(value_len);
}

fn get_mac(buf: &mut impl Buf) -> MacAddr {
    let mut octets = [0u8; 6];
    buf.copy_to_slice(&mut octets);
    MacAddr(octets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0, 0, 0, 0, 0, last])
    }

    #[test]
    fn empty_match_is_8_bytes() {
        let mut buf = BytesMut::new();
        Match::any().encode(&mut buf);
        // type(2) + length(2) + 4 bytes of padding.
        assert_eq!(buf.len(), 8);
        let decoded = Match::decode(&mut buf).unwrap();
        assert_eq!(decoded, Match::any());
    }

    #[test]
    fn l2_match_roundtrip() {
        let m = Match::l2(mac(1), mac(2));
        let mut buf = BytesMut::new();
        m.encode(&mut buf);
        assert_eq!(buf.len() % 8, 0, "ofp_match must be padded to 8");
        let decoded = Match::decode(&mut buf).unwrap();
        assert_eq!(decoded, m);
    }

    #[test]
    fn five_tuple_roundtrip_tcp_and_udp() {
        for (proto, is_tcp) in [(6u8, true), (17u8, false)] {
            let m = Match::five_tuple(
                "10.0.0.1".parse().unwrap(),
                "10.0.0.2".parse().unwrap(),
                proto,
                40000,
                80,
            );
            assert_eq!(m.tcp_src.is_some(), is_tcp);
            assert_eq!(m.udp_src.is_some(), !is_tcp);
            let mut buf = BytesMut::new();
            m.encode(&mut buf);
            let decoded = Match::decode(&mut buf).unwrap();
            assert_eq!(decoded, m);
        }
    }

    #[test]
    fn reversed_swaps_directional_fields() {
        let m = Match::five_tuple(
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            6,
            40000,
            80,
        );
        let r = m.reversed();
        assert_eq!(r.ipv4_src, m.ipv4_dst);
        assert_eq!(r.ipv4_dst, m.ipv4_src);
        assert_eq!(r.tcp_src, m.tcp_dst);
        assert_eq!(r.tcp_dst, m.tcp_src);
        assert_eq!(r.reversed(), m);
    }

    #[test]
    fn unknown_and_masked_fields_are_skipped() {
        let mut fields = BytesMut::new();
        // IN_PORT
        put_oxm_header(&mut fields, OxmField::InPort, 4);
        fields.put_u32(3);
        // METADATA (field 2, unmodelled, 8 bytes)
        fields.put_u16(OXM_CLASS_BASIC);
        fields.put_u8(2 << 1);
        fields.put_u8(8);
        fields.put_u64(0xdead_beef);
        // Masked ETH_DST: value + mask.
        fields.put_u16(OXM_CLASS_BASIC);
        fields.put_u8((OxmField::EthDst as u8) << 1 | 1);
        fields.put_u8(12);
        fields.put_bytes(0xff, 12);

        let length = 4 + fields.len();
        let mut buf = BytesMut::new();
        buf.put_u16(MATCH_TYPE_OXM);
        buf.put_u16(length as u16);
        buf.put_slice(&fields);
        buf.put_bytes(0, (8 - length % 8) % 8);

        let m = Match::decode(&mut buf).unwrap();
        assert_eq!(m.in_port, Some(3));
        assert_eq!(m.eth_dst, None);
    }

    #[test]
    fn truncated_match_fails() {
        let m = Match::l2(mac(1), mac(2));
        let mut buf = BytesMut::new();
        m.encode(&mut buf);
        let mut short = buf.split_to(buf.len() - 3);
        assert!(Match::decode(&mut short).is_err());
    }

    proptest! {
        #[test]
        fn proptest_match_roundtrip(
            in_port in proptest::option::of(0u32..0xffff_ff00),
            src in proptest::option::of(any::<[u8; 6]>()),
            dst in proptest::option::of(any::<[u8; 6]>()),
            tcp_src in proptest::option::of(any::<u16>()),
        ) {
            let m = Match {
                in_port,
                eth_src: src.map(MacAddr),
                eth_dst: dst.map(MacAddr),
                tcp_src,
                ..Match::default()
            };
            let mut buf = BytesMut::new();
            m.encode(&mut buf);
            prop_assert_eq!(buf.len() % 8, 0);
            let decoded = Match::decode(&mut buf).unwrap();
            prop_assert_eq!(decoded, m);
        }

        #[test]
        fn proptest_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut buf = &data[..];
            let _ = Match::decode(&mut buf);
        }
    }
}

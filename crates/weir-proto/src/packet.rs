//! # PACKET_IN payload dissection
//!
//! Just enough Ethernet/ARP/IPv4/TCP/UDP parsing to feed L2 learning, the
//! capture buffer and the flow matcher. Parsing is total — anything that
//! does not dissect cleanly comes back as `None` or `Other` and is handled
//! as an opaque L2 frame.

use std::net::Ipv4Addr;

use bytes::Buf;

use weir_common::ids::MacAddr;

// ─── Constants ──────────────────────────────────────────────────────────────

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_VLAN: u16 = 0x8100;
pub const ETHERTYPE_LLDP: u16 = 0x88cc;

pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;

// ─── Frames ─────────────────────────────────────────────────────────────────

/// A dissected Ethernet frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    pub dst: MacAddr,
    pub src: MacAddr,
    /// Ethertype after any VLAN tags.
    pub ethertype: u16,
    pub payload: EthPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EthPayload {
    Arp(ArpPacket),
    Ipv4(Ipv4Packet),
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    /// 1 = request, 2 = reply.
    pub op: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Packet {
    pub tos: u8,
    pub ttl: u8,
    pub proto: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub transport: Transport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp(TcpSegment),
    Udp(UdpDatagram),
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSegment {
    pub src_port: u16,
    pub dst_port: u16,
    /// FIN/SYN/RST/PSH/ACK/URG/ECE/CWR, low bit first.
    pub flags: u8,
    pub window: u16,
}

/// TCP flag bits in `TcpSegment::flags`.
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpDatagram {
    pub src_port: u16,
    pub dst_port: u16,
}

impl EthernetFrame {
    /// Dissect a raw frame. `None` means "too short to be Ethernet".
    pub fn parse(data: &[u8]) -> Option<EthernetFrame> {
        let mut buf = data;
        if buf.remaining() < 14 {
            return None;
        }
        let dst = get_mac(&mut buf);
        let src = get_mac(&mut buf);
        let mut ethertype = buf.get_u16();
        // Peel 802.1Q tags; the inner ethertype is what we dispatch on.
        while ethertype == ETHERTYPE_VLAN {
            if buf.remaining() < 4 {
                return None;
            }
            buf.advance(2);
            ethertype = buf.get_u16();
        }
        let payload = match ethertype {
            ETHERTYPE_ARP => ArpPacket::parse(&mut buf)
                .map(EthPayload::Arp)
                .unwrap_or(EthPayload::Other),
            ETHERTYPE_IPV4 => Ipv4Packet::parse(&mut buf)
                .map(EthPayload::Ipv4)
                .unwrap_or(EthPayload::Other),
            _ => EthPayload::Other,
        };
        Some(EthernetFrame {
            dst,
            src,
            ethertype,
            payload,
        })
    }

    pub fn is_lldp(&self) -> bool {
        self.ethertype == ETHERTYPE_LLDP
    }

    /// The IPv4 header, when this is an IPv4 frame.
    pub fn ipv4(&self) -> Option<&Ipv4Packet> {
        match &self.payload {
            EthPayload::Ipv4(ip) => Some(ip),
            _ => None,
        }
    }

    /// (src_ip, src_port, dst_ip, dst_port, proto) when this frame carries
    /// a TCP or UDP segment.
    pub fn five_tuple(&self) -> Option<(Ipv4Addr, u16, Ipv4Addr, u16, u8)> {
        let ip = self.ipv4()?;
        match ip.transport {
            Transport::Tcp(tcp) => Some((ip.src, tcp.src_port, ip.dst, tcp.dst_port, ip.proto)),
            Transport::Udp(udp) => Some((ip.src, udp.src_port, ip.dst, udp.dst_port, ip.proto)),
            Transport::Other => None,
        }
    }
}

impl ArpPacket {
    fn parse(buf: &mut &[u8]) -> Option<ArpPacket> {
        if buf.remaining() < 28 {
            return None;
        }
        buf.advance(2); // htype
        let ptype = buf.get_u16();
        let hlen = buf.get_u8();
        let plen = buf.get_u8();
        if ptype != ETHERTYPE_IPV4 || hlen != 6 || plen != 4 {
            return None;
        }
        let op = buf.get_u16();
        let sender_mac = get_mac(buf);
        let sender_ip = Ipv4Addr::from(buf.get_u32());
        let target_mac = get_mac(buf);
        let target_ip = Ipv4Addr::from(buf.get_u32());
        Some(ArpPacket {
            op,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        })
    }
}

impl Ipv4Packet {
    fn parse(buf: &mut &[u8]) -> Option<Ipv4Packet> {
        if buf.remaining() < 20 {
            return None;
        }
        let ver_ihl = buf.get_u8();
        if ver_ihl >> 4 != 4 {
            return None;
        }
        let header_len = ((ver_ihl & 0x0f) as usize) * 4;
        if header_len < 20 {
            return None;
        }
        let tos = buf.get_u8();
        buf.advance(2); // total length
        buf.advance(4); // id + flags/fragment
        let ttl = buf.get_u8();
        let proto = buf.get_u8();
        buf.advance(2); // checksum
        let src = Ipv4Addr::from(buf.get_u32());
        let dst = Ipv4Addr::from(buf.get_u32());
        let options = header_len - 20;
        if buf.remaining() < options {
            return None;
        }
        buf.advance(options);

        let transport = match proto {
            IP_PROTO_TCP => TcpSegment::parse(buf)
                .map(Transport::Tcp)
                .unwrap_or(Transport::Other),
            IP_PROTO_UDP => UdpDatagram::parse(buf)
                .map(Transport::Udp)
                .unwrap_or(Transport::Other),
            _ => Transport::Other,
        };
        Some(Ipv4Packet {
            tos,
            ttl,
            proto,
            src,
            dst,
            transport,
        })
    }
}

impl TcpSegment {
    fn parse(buf: &mut &[u8]) -> Option<TcpSegment> {
        if buf.remaining() < 16 {
            return None;
        }
        let src_port = buf.get_u16();
        let dst_port = buf.get_u16();
        buf.advance(8); // seq + ack
        buf.advance(1); // data offset + reserved
        let flags = buf.get_u8();
        let window = buf.get_u16();
        Some(TcpSegment {
            src_port,
            dst_port,
            flags,
            window,
        })
    }
}

impl UdpDatagram {
    fn parse(buf: &mut &[u8]) -> Option<UdpDatagram> {
        if buf.remaining() < 8 {
            return None;
        }
        let src_port = buf.get_u16();
        let dst_port = buf.get_u16();
        buf.advance(4); // length + checksum
        Some(UdpDatagram { src_port, dst_port })
    }
}

fn get_mac(buf: &mut &[u8]) -> MacAddr {
    let mut octets = [0u8; 6];
    buf.copy_to_slice(&mut octets);
    MacAddr(octets)
}

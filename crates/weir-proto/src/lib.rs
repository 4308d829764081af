//! # weir-proto
//!
//! OpenFlow 1.3 wire codec for the weir control plane.
//!
//! Covers the message subset the controller speaks: HELLO, ERROR, ECHO,
//! FEATURES, PACKET_IN, PACKET_OUT, FLOW_MOD, PORT_STATUS and the
//! PORT_STATS / PORT_DESC multiparts — plus dissection of the Ethernet
//! payloads that arrive inside PACKET_IN.
//!
//! ## Crate structure
//!
//! - [`wire`] — header framing, message types, constants
//! - [`oxm`] — OXM match TLVs and the [`oxm::Match`] builder
//! - [`messages`] — typed message bodies and the [`messages::OfMessage`] sum type
//! - [`packet`] — Ethernet/ARP/IPv4/TCP/UDP dissection

pub mod messages;
pub mod oxm;
pub mod packet;
pub mod wire;

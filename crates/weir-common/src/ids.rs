//! Typed identifiers used across the control plane.
//!
//! Datapath ids, port numbers and Ethernet addresses all travel through
//! channels, tables and log lines; newtypes keep them from being mixed up
//! and give each a stable display format (dpids print as 16-digit hex, the
//! way switches report them).

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Symbolic host name from the host map (`h1`, `h2`, ...).
pub type HostId = String;

// ─── Dpid ───────────────────────────────────────────────────────────────────

/// A 64-bit OpenFlow datapath identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Dpid(pub u64);

impl fmt::Display for Dpid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for Dpid {
    fn from(v: u64) -> Self {
        Dpid(v)
    }
}

// ─── PortNo ─────────────────────────────────────────────────────────────────

/// An OpenFlow port number on a datapath.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct PortNo(pub u32);

impl PortNo {
    /// Highest valid physical port number (`OFPP_MAX`).
    pub const MAX: PortNo = PortNo(0xffff_ff00);
    /// Flood to all standard ports except the ingress (`OFPP_FLOOD`).
    pub const FLOOD: PortNo = PortNo(0xffff_fffb);
    /// Punt to the controller (`OFPP_CONTROLLER`).
    pub const CONTROLLER: PortNo = PortNo(0xffff_fffd);
    /// The switch-local port (`OFPP_LOCAL`).
    pub const LOCAL: PortNo = PortNo(0xffff_fffe);
    /// Wildcard for deletes and stats requests (`OFPP_ANY`).
    pub const ANY: PortNo = PortNo(0xffff_ffff);

    /// Whether this is a real forwarding port rather than a reserved value.
    pub fn is_physical(self) -> bool {
        self.0 < Self::MAX.0
    }
}

impl fmt::Display for PortNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PortNo::FLOOD => write!(f, "FLOOD"),
            PortNo::CONTROLLER => write!(f, "CONTROLLER"),
            PortNo::LOCAL => write!(f, "LOCAL"),
            PortNo::ANY => write!(f, "ANY"),
            PortNo(n) => write!(f, "{n}"),
        }
    }
}

impl From<u32> for PortNo {
    fn from(v: u32) -> Self {
        PortNo(v)
    }
}

// ─── MacAddr ────────────────────────────────────────────────────────────────

/// A 48-bit Ethernet address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// The all-ones broadcast address.
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub fn octets(self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    /// Group bit set — includes broadcast.
    pub fn is_multicast(self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

/// Error parsing a `xx:xx:xx:xx:xx:xx` MAC address.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid MAC address `{0}`")]
pub struct MacParseError(pub String);

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut parts = s.split(':');
        for byte in out.iter_mut() {
            let part = parts.next().ok_or_else(|| MacParseError(s.into()))?;
            if part.len() != 2 {
                return Err(MacParseError(s.into()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.into()))?;
        }
        if parts.next().is_some() {
            return Err(MacParseError(s.into()));
        }
        Ok(MacAddr(out))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MacVisitor;

        impl Visitor<'_> for MacVisitor {
            type Value = MacAddr;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a MAC address like aa:bb:cc:dd:ee:ff")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<MacAddr, E> {
                v.parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(MacVisitor)
    }
}

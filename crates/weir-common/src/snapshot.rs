//! The packet snapshot record and file naming.
//!
//! One snapshot file per capture flush: a JSON array of records, named
//! `captured_packets_<unix_ts>.json` with a strictly increasing timestamp
//! so the offline pipeline can ingest files in capture order. Files are
//! append-only and immutable after close.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::ids::{Dpid, MacAddr, PortNo};

/// Prefix shared by every snapshot file.
pub const SNAPSHOT_PREFIX: &str = "captured_packets_";
/// Snapshot file extension.
pub const SNAPSHOT_SUFFIX: &str = ".json";

/// One captured packet, as punted to the controller.
///
/// Non-IP frames carry zeroed L3/L4 fields and no addresses; the offline
/// pipeline only aggregates records with both addresses present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedPacket {
    /// Capture time, seconds since the unix epoch.
    pub timestamp: f64,
    pub dpid: Dpid,
    pub in_port: PortNo,
    pub eth_src: MacAddr,
    pub eth_dst: MacAddr,
    /// IP protocol number (6 = TCP, 17 = UDP); 0 for non-IP frames.
    #[serde(default)]
    pub protocol: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub src_port: u16,
    #[serde(default)]
    pub dst_port: u16,
    /// Frame length on the wire, bytes.
    pub length: u32,
    #[serde(default)]
    pub tcp_flags: u8,
    #[serde(default)]
    pub ttl: u8,
    #[serde(default)]
    pub tos: u8,
    #[serde(default)]
    pub window: u16,
}

/// The snapshot filename for a flush timestamp.
pub fn snapshot_filename(unix_ts: u64) -> String {
    format!("{SNAPSHOT_PREFIX}{unix_ts}{SNAPSHOT_SUFFIX}")
}

/// Extract the flush timestamp from a snapshot filename.
pub fn parse_snapshot_ts(filename: &str) -> Option<u64> {
    filename
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(SNAPSHOT_SUFFIX)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_roundtrip() {
        let name = snapshot_filename(1_700_000_123);
        assert_eq!(name, "captured_packets_1700000123.json");
        assert_eq!(parse_snapshot_ts(&name), Some(1_700_000_123));
    }

    #[test]
    fn foreign_filenames_are_rejected() {
        assert_eq!(parse_snapshot_ts("features.csv"), None);
        assert_eq!(parse_snapshot_ts("captured_packets_.json"), None);
        assert_eq!(parse_snapshot_ts("captured_packets_12.json.tmp"), None);
    }

    #[test]
    fn non_ip_record_omits_addresses() {
        let record = CapturedPacket {
            timestamp: 1.5,
            dpid: Dpid(1),
            in_port: PortNo(2),
            eth_src: "00:00:00:00:00:01".parse().unwrap(),
            eth_dst: "ff:ff:ff:ff:ff:ff".parse().unwrap(),
            protocol: 0,
            src_ip: None,
            dst_ip: None,
            src_port: 0,
            dst_port: 0,
            length: 60,
            tcp_flags: 0,
            ttl: 0,
            tos: 0,
            window: 0,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("src_ip"));
        let parsed: CapturedPacket = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}

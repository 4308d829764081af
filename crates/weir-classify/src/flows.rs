//! # Bidirectional flow aggregation
//!
//! Packets group under the canonical unordered 5-tuple; "forward" is the
//! direction of the first observed packet. Everything the classifier
//! needs is accumulated in one pass: directional packet/byte counts,
//! packet-size moments, inter-arrival statistics per direction and
//! overall, TCP flag counts and header means.
//!
//! Extraction is deterministic: rows come out in first-seen order, and
//! every statistic is a pure fold over the input sequence. Flows with a
//! single packet emit zeroed spread/IAT columns; consumers treat those
//! defensively.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use weir_common::snapshot::CapturedPacket;

use crate::ClassifyError;

// ─── Keys ───────────────────────────────────────────────────────────────────

/// Canonical unordered flow key: endpoint A sorts before endpoint B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub ip_a: Ipv4Addr,
    pub port_a: u16,
    pub ip_b: Ipv4Addr,
    pub port_b: u16,
    pub protocol: u8,
}

impl FlowKey {
    /// Canonicalise a directed 5-tuple.
    pub fn canonical(
        src_ip: Ipv4Addr,
        src_port: u16,
        dst_ip: Ipv4Addr,
        dst_port: u16,
        protocol: u8,
    ) -> FlowKey {
        if (src_ip, src_port) <= (dst_ip, dst_port) {
            FlowKey {
                ip_a: src_ip,
                port_a: src_port,
                ip_b: dst_ip,
                port_b: dst_port,
                protocol,
            }
        } else {
            FlowKey {
                ip_a: dst_ip,
                port_a: dst_port,
                ip_b: src_ip,
                port_b: src_port,
                protocol,
            }
        }
    }
}

// ─── Accumulators ───────────────────────────────────────────────────────────

/// Packet-size moments for one direction (or the whole flow).
#[derive(Debug, Clone, Copy, Default)]
struct SizeStats {
    count: u64,
    bytes: u64,
    min: f64,
    max: f64,
    sum: f64,
    sum_sq: f64,
}

impl SizeStats {
    fn add(&mut self, len: u32) {
        let len_f = f64::from(len);
        if self.count == 0 || len_f < self.min {
            self.min = len_f;
        }
        if len_f > self.max {
            self.max = len_f;
        }
        self.count += 1;
        self.bytes += u64::from(len);
        self.sum += len_f;
        self.sum_sq += len_f * len_f;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Population standard deviation; 0 for fewer than two samples.
    fn std(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        (self.sum_sq / n - mean * mean).max(0.0).sqrt()
    }
}

/// Inter-arrival statistics for one packet stream.
#[derive(Debug, Clone, Copy, Default)]
struct IatStats {
    last: Option<f64>,
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
    sum_sq: f64,
}

impl IatStats {
    fn observe(&mut self, ts: f64) {
        if let Some(last) = self.last {
            let dt = (ts - last).max(0.0);
            if self.count == 0 || dt < self.min {
                self.min = dt;
            }
            if dt > self.max {
                self.max = dt;
            }
            self.count += 1;
            self.sum += dt;
            self.sum_sq += dt * dt;
        }
        self.last = Some(ts);
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    fn std(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        (self.sum_sq / n - mean * mean).max(0.0).sqrt()
    }
}

#[derive(Debug)]
struct FlowAccumulator {
    first_ts: f64,
    last_ts: f64,
    /// The (ip, port) that sent the first packet; defines "forward".
    first_src: (Ipv4Addr, u16),
    first_dst: (Ipv4Addr, u16),
    protocol: u8,
    total: SizeStats,
    fwd: SizeStats,
    bwd: SizeStats,
    iat: IatStats,
    fwd_iat: IatStats,
    bwd_iat: IatStats,
    // FIN SYN RST PSH ACK URG
    flag_counts: [u64; 6],
    window_sum: f64,
    ttl_sum: f64,
    tos_sum: f64,
}

impl FlowAccumulator {
    fn new(pkt: &CapturedPacket, src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16)) -> Self {
        FlowAccumulator {
            first_ts: pkt.timestamp,
            last_ts: pkt.timestamp,
            first_src: src,
            first_dst: dst,
            protocol: pkt.protocol,
            total: SizeStats::default(),
            fwd: SizeStats::default(),
            bwd: SizeStats::default(),
            iat: IatStats::default(),
            fwd_iat: IatStats::default(),
            bwd_iat: IatStats::default(),
            flag_counts: [0; 6],
            window_sum: 0.0,
            ttl_sum: 0.0,
            tos_sum: 0.0,
        }
    }

    fn add(&mut self, pkt: &CapturedPacket, src: (Ipv4Addr, u16)) {
        self.last_ts = pkt.timestamp;
        self.total.add(pkt.length);
        self.iat.observe(pkt.timestamp);
        if src == self.first_src {
            self.fwd.add(pkt.length);
            self.fwd_iat.observe(pkt.timestamp);
        } else {
            self.bwd.add(pkt.length);
            self.bwd_iat.observe(pkt.timestamp);
        }
        for (i, count) in self.flag_counts.iter_mut().enumerate() {
            if pkt.tcp_flags & (1 << i) != 0 {
                *count += 1;
            }
        }
        self.window_sum += f64::from(pkt.window);
        self.ttl_sum += f64::from(pkt.ttl);
        self.tos_sum += f64::from(pkt.tos);
    }

    fn finish(&self) -> FlowFeatures {
        let duration = (self.last_ts - self.first_ts).max(0.0);
        let n = self.total.count as f64;
        let per_second = |value: f64| if duration > 0.0 { value / duration } else { 0.0 };
        FlowFeatures {
            src_ip: self.first_src.0.to_string(),
            dst_ip: self.first_dst.0.to_string(),
            src_port: self.first_src.1,
            dst_port: self.first_dst.1,
            protocol: self.protocol,
            total_packets: self.total.count,
            fwd_packets: self.fwd.count,
            bwd_packets: self.bwd.count,
            total_bytes: self.total.bytes,
            fwd_bytes: self.fwd.bytes,
            bwd_bytes: self.bwd.bytes,
            flow_duration: duration,
            packets_per_second: per_second(n),
            bytes_per_second: per_second(self.total.bytes as f64),
            pkt_len_min: self.total.min,
            pkt_len_max: self.total.max,
            pkt_len_mean: self.total.mean(),
            pkt_len_std: self.total.std(),
            fwd_pkt_len_min: self.fwd.min,
            fwd_pkt_len_max: self.fwd.max,
            fwd_pkt_len_mean: self.fwd.mean(),
            fwd_pkt_len_std: self.fwd.std(),
            bwd_pkt_len_min: self.bwd.min,
            bwd_pkt_len_max: self.bwd.max,
            bwd_pkt_len_mean: self.bwd.mean(),
            bwd_pkt_len_std: self.bwd.std(),
            iat_mean: self.iat.mean(),
            iat_std: self.iat.std(),
            iat_min: if self.iat.count == 0 { 0.0 } else { self.iat.min },
            iat_max: self.iat.max,
            fwd_iat_mean: self.fwd_iat.mean(),
            fwd_iat_std: self.fwd_iat.std(),
            bwd_iat_mean: self.bwd_iat.mean(),
            bwd_iat_std: self.bwd_iat.std(),
            fin_count: self.flag_counts[0],
            syn_count: self.flag_counts[1],
            rst_count: self.flag_counts[2],
            psh_count: self.flag_counts[3],
            ack_count: self.flag_counts[4],
            urg_count: self.flag_counts[5],
            mean_window: if n > 0.0 { self.window_sum / n } else { 0.0 },
            mean_ttl: if n > 0.0 { self.ttl_sum / n } else { 0.0 },
            mean_tos: if n > 0.0 { self.tos_sum / n } else { 0.0 },
        }
    }
}

// ─── Feature rows ───────────────────────────────────────────────────────────

/// One feature CSV row: identity columns first, then the statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowFeatures {
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub total_packets: u64,
    pub fwd_packets: u64,
    pub bwd_packets: u64,
    pub total_bytes: u64,
    pub fwd_bytes: u64,
    pub bwd_bytes: u64,
    pub flow_duration: f64,
    pub packets_per_second: f64,
    pub bytes_per_second: f64,
    pub pkt_len_min: f64,
    pub pkt_len_max: f64,
    pub pkt_len_mean: f64,
    pub pkt_len_std: f64,
    pub fwd_pkt_len_min: f64,
    pub fwd_pkt_len_max: f64,
    pub fwd_pkt_len_mean: f64,
    pub fwd_pkt_len_std: f64,
    pub bwd_pkt_len_min: f64,
    pub bwd_pkt_len_max: f64,
    pub bwd_pkt_len_mean: f64,
    pub bwd_pkt_len_std: f64,
    pub iat_mean: f64,
    pub iat_std: f64,
    pub iat_min: f64,
    pub iat_max: f64,
    pub fwd_iat_mean: f64,
    pub fwd_iat_std: f64,
    pub bwd_iat_mean: f64,
    pub bwd_iat_std: f64,
    pub fin_count: u64,
    pub syn_count: u64,
    pub rst_count: u64,
    pub psh_count: u64,
    pub ack_count: u64,
    pub urg_count: u64,
    pub mean_window: f64,
    pub mean_ttl: f64,
    pub mean_tos: f64,
}

impl FlowFeatures {
    /// The numeric columns by name, for feature-vector assembly.
    pub fn numeric_features(&self) -> HashMap<String, f64> {
        let value = serde_json::to_value(self).expect("feature row serialises");
        let serde_json::Value::Object(map) = value else {
            unreachable!("feature row is a struct");
        };
        map.into_iter()
            .filter_map(|(k, v)| Some((k, v.as_f64()?)))
            .collect()
    }
}

/// Aggregate captured packets into feature rows, first-seen order.
/// Non-IP records carry no addresses and are skipped.
pub fn aggregate(packets: &[CapturedPacket]) -> Vec<FlowFeatures> {
    let mut flows: HashMap<FlowKey, FlowAccumulator> = HashMap::new();
    let mut order: Vec<FlowKey> = Vec::new();

    for pkt in packets {
        let (Some(src_ip), Some(dst_ip)) = (pkt.src_ip, pkt.dst_ip) else {
            continue;
        };
        let src = (src_ip, pkt.src_port);
        let dst = (dst_ip, pkt.dst_port);
        let key = FlowKey::canonical(src_ip, pkt.src_port, dst_ip, pkt.dst_port, pkt.protocol);
        let acc = flows.entry(key).or_insert_with(|| {
            order.push(key);
            FlowAccumulator::new(pkt, src, dst)
        });
        acc.add(pkt, src);
    }

    debug!(packets = packets.len(), flows = order.len(), "aggregated");
    order.iter().map(|key| flows[key].finish()).collect()
}

/// Write feature rows as CSV.
pub fn write_features(path: &Path, rows: &[FlowFeatures]) -> Result<(), ClassifyError> {
    let file = std::fs::File::create(path).map_err(|e| ClassifyError::io(path, e))?;
    let mut writer = csv::Writer::from_writer(std::io::BufWriter::new(file));
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| ClassifyError::io(path, e))?;
    Ok(())
}

/// Read feature rows back (the classifier's input).
pub fn read_features(path: &Path) -> Result<Vec<FlowFeatures>, ClassifyError> {
    let file = std::fs::File::open(path).map_err(|e| ClassifyError::io(path, e))?;
    let mut reader = csv::Reader::from_reader(std::io::BufReader::new(file));
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

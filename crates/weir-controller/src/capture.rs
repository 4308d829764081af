//! # Packet capture ring and snapshot flusher
//!
//! The PACKET_IN handler pushes capture records into a bounded ring; a
//! flusher thread swaps the ring for an empty one and serialises the
//! drained batch to `captured_packets_<unix_ts>.json`. Two triggers: the
//! ring reaching capacity, and a wall-clock period. The producer never
//! blocks — when the flusher cannot keep up, the oldest half of the ring
//! is dropped and counted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, tick, Receiver, Sender};
use tracing::{debug, error, info, warn};

use weir_common::ids::{Dpid, PortNo};
use weir_common::snapshot::{parse_snapshot_ts, snapshot_filename, CapturedPacket};
use weir_proto::packet::{EthPayload, EthernetFrame, Transport};

/// Build a capture record from a dissected PACKET_IN payload.
pub fn record_packet(
    dpid: Dpid,
    in_port: PortNo,
    frame: &EthernetFrame,
    length: u32,
    timestamp: f64,
) -> CapturedPacket {
    let mut record = CapturedPacket {
        timestamp,
        dpid,
        in_port,
        eth_src: frame.src,
        eth_dst: frame.dst,
        protocol: 0,
        src_ip: None,
        dst_ip: None,
        src_port: 0,
        dst_port: 0,
        length,
        tcp_flags: 0,
        ttl: 0,
        tos: 0,
        window: 0,
    };
    if let EthPayload::Ipv4(ip) = &frame.payload {
        record.protocol = ip.proto;
        record.src_ip = Some(ip.src);
        record.dst_ip = Some(ip.dst);
        record.ttl = ip.ttl;
        record.tos = ip.tos;
        match ip.transport {
            Transport::Tcp(tcp) => {
                record.src_port = tcp.src_port;
                record.dst_port = tcp.dst_port;
                record.tcp_flags = tcp.flags;
                record.window = tcp.window;
            }
            Transport::Udp(udp) => {
                record.src_port = udp.src_port;
                record.dst_port = udp.dst_port;
            }
            Transport::Other => {}
        }
    }
    record
}

// ─── Ring ───────────────────────────────────────────────────────────────────

/// Bounded capture ring: single producer (the compute worker), single
/// consumer (the flusher).
pub struct CaptureRing {
    inner: Mutex<Vec<CapturedPacket>>,
    capacity: usize,
    dropped: AtomicU64,
    flush_signal: Sender<()>,
}

impl CaptureRing {
    /// Returns the ring and the size-trigger receiver for the flusher.
    pub fn new(capacity: usize) -> (Arc<CaptureRing>, Receiver<()>) {
        let (flush_signal, flush_rx) = bounded(1);
        (
            Arc::new(CaptureRing {
                inner: Mutex::new(Vec::with_capacity(capacity)),
                capacity,
                dropped: AtomicU64::new(0),
                flush_signal,
            }),
            flush_rx,
        )
    }

    /// Append a record. Never blocks: a full ring sheds its oldest half
    /// and bumps the drop counter instead.
    pub fn push(&self, record: CapturedPacket) {
        let mut inner = self.inner.lock().expect("capture ring poisoned");
        if inner.len() >= self.capacity {
            let shed = self.capacity / 2;
            inner.drain(..shed);
            self.dropped.fetch_add(shed as u64, Ordering::Relaxed);
            warn!(shed, "capture ring overflow, dropped oldest half");
        }
        inner.push(record);
        if inner.len() >= self.capacity {
            // Wake the flusher; a pending wake is just as good.
            let _ = self.flush_signal.try_send(());
        }
    }

    /// Swap the ring for an empty one and return the drained batch.
    pub fn drain(&self) -> Vec<CapturedPacket> {
        std::mem::take(&mut *self.inner.lock().expect("capture ring poisoned"))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("capture ring poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records shed by back-pressure since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ─── Snapshot writer ────────────────────────────────────────────────────────

/// Serialises drained batches and rotates old snapshot files.
pub struct SnapshotWriter {
    dir: PathBuf,
    last_ts: u64,
    max_files: usize,
    max_age: Duration,
}

impl SnapshotWriter {
    pub fn new(dir: PathBuf, max_files: usize, max_age: Duration) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(SnapshotWriter {
            dir,
            last_ts: 0,
            max_files,
            max_age,
        })
    }

    /// Write one batch. Filenames carry strictly increasing timestamps,
    /// bumped by a second when two flushes land in the same one.
    pub fn write(&mut self, batch: &[CapturedPacket]) -> std::io::Result<PathBuf> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let ts = now.max(self.last_ts + 1);
        self.last_ts = ts;

        let path = self.dir.join(snapshot_filename(ts));
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), batch)?;
        debug!(path = %path.display(), packets = batch.len(), "snapshot written");

        self.rotate(now);
        Ok(path)
    }

    /// Enforce the count and age bounds on the snapshot directory.
    fn rotate(&self, now: u64) {
        let mut snapshots: Vec<(u64, PathBuf)> = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(|e| {
                    let path = e.ok()?.path();
                    let ts = parse_snapshot_ts(path.file_name()?.to_str()?)?;
                    Some((ts, path))
                })
                .collect(),
            Err(e) => {
                warn!("snapshot rotation failed to list directory: {e}");
                return;
            }
        };
        snapshots.sort_unstable_by_key(|(ts, _)| *ts);

        let cutoff = now.saturating_sub(self.max_age.as_secs());
        let excess = snapshots.len().saturating_sub(self.max_files);
        for (i, (ts, path)) in snapshots.iter().enumerate() {
            if i < excess || *ts < cutoff {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), "failed to rotate snapshot: {e}");
                }
            }
        }
    }
}

// ─── Flusher thread ─────────────────────────────────────────────────────────

/// Run the flusher until shutdown: drain on size signal or period, plus a
/// final drain on the way out.
pub fn spawn_flusher(
    ring: Arc<CaptureRing>,
    flush_rx: Receiver<()>,
    mut writer: SnapshotWriter,
    period: Duration,
    shutdown: Receiver<()>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("capture-flusher".into())
        .spawn(move || {
            let ticker = tick(period);
            loop {
                crossbeam_channel::select! {
                    recv(flush_rx) -> _ => flush(&ring, &mut writer),
                    recv(ticker) -> _ => flush(&ring, &mut writer),
                    recv(shutdown) -> _ => {
                        flush(&ring, &mut writer);
                        info!("capture flusher stopped");
                        return;
                    }
                }
            }
        })
        .expect("failed to spawn capture flusher")
}

fn flush(ring: &CaptureRing, writer: &mut SnapshotWriter) {
    let batch = ring.drain();
    if batch.is_empty() {
        return;
    }
    if let Err(e) = writer.write(&batch) {
        error!(packets = batch.len(), "snapshot write failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: u16) -> CapturedPacket {
        CapturedPacket {
            timestamp: n as f64,
            dpid: Dpid(1),
            in_port: PortNo(1),
            eth_src: Default::default(),
            eth_dst: Default::default(),
            protocol: 6,
            src_ip: Some("10.0.0.1".parse().unwrap()),
            dst_ip: Some("10.0.0.2".parse().unwrap()),
            src_port: n,
            dst_port: 80,
            length: 100,
            tcp_flags: 0,
            ttl: 64,
            tos: 0,
            window: 1024,
        }
    }

    #[test]
    fn size_trigger_fires_at_capacity() {
        let (ring, flush_rx) = CaptureRing::new(10);
        for n in 0..9 {
            ring.push(record(n));
        }
        assert!(flush_rx.try_recv().is_err());
        ring.push(record(9));
        assert!(flush_rx.try_recv().is_ok());
        assert_eq!(ring.dropped(), 0);
    }

    #[test]
    fn overflow_sheds_oldest_half_without_blocking() {
        let (ring, _flush_rx) = CaptureRing::new(10);
        for n in 0..11 {
            ring.push(record(n));
        }
        assert_eq!(ring.dropped(), 5);
        let batch = ring.drain();
        assert_eq!(batch.len(), 6);
        // The oldest survivors start after the shed half.
        assert_eq!(batch[0].src_port, 5);
        assert_eq!(batch[5].src_port, 10);
    }

    #[test]
    fn drain_swaps_in_an_empty_ring() {
        let (ring, _flush_rx) = CaptureRing::new(10);
        ring.push(record(1));
        ring.push(record(2));
        assert_eq!(ring.drain().len(), 2);
        assert!(ring.is_empty());
        assert!(ring.drain().is_empty());
    }

    #[test]
    fn size_then_time_flush_loses_nothing() {
        // The capture-flush scenario: a burst exactly at capacity flushes
        // by size; the surplus goes out with the periodic flush.
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            SnapshotWriter::new(dir.path().into(), 100, Duration::from_secs(3600)).unwrap();
        let (ring, flush_rx) = CaptureRing::new(100);

        for n in 0..100 {
            ring.push(record(n));
        }
        assert!(flush_rx.try_recv().is_ok());
        let first = ring.drain();
        assert_eq!(first.len(), 100);
        let first_path = writer.write(&first).unwrap();

        for n in 100..137 {
            ring.push(record(n));
        }
        let second = ring.drain();
        assert_eq!(second.len(), 37);
        let second_path = writer.write(&second).unwrap();

        assert_eq!(ring.dropped(), 0);

        let parse = |p: &PathBuf| {
            parse_snapshot_ts(p.file_name().unwrap().to_str().unwrap()).unwrap()
        };
        assert!(parse(&second_path) > parse(&first_path), "filenames must be monotonic");

        let reloaded: Vec<CapturedPacket> =
            serde_json::from_reader(std::fs::File::open(&first_path).unwrap()).unwrap();
        assert_eq!(reloaded.len(), 100);
        assert_eq!(reloaded[0].src_port, 0);
    }

    #[test]
    fn rotation_enforces_file_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            SnapshotWriter::new(dir.path().into(), 2, Duration::from_secs(3600)).unwrap();
        let batch = vec![record(1)];
        let first = writer.write(&batch).unwrap();
        let second = writer.write(&batch).unwrap();
        let third = writer.write(&batch).unwrap();

        assert!(!first.exists(), "oldest snapshot should rotate out");
        assert!(second.exists());
        assert!(third.exists());
    }

    #[test]
    fn capture_record_from_tcp_frame() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&[0, 0, 0, 0, 0, 2]);
        raw.extend_from_slice(&[0, 0, 0, 0, 0, 1]);
        raw.extend_from_slice(&0x0800u16.to_be_bytes());
        raw.push(0x45);
        raw.push(0x08);
        raw.extend_from_slice(&40u16.to_be_bytes());
        raw.extend_from_slice(&[0; 4]);
        raw.push(63);
        raw.push(6);
        raw.extend_from_slice(&[0; 2]);
        raw.extend_from_slice(&[10, 0, 0, 1]);
        raw.extend_from_slice(&[10, 0, 0, 2]);
        raw.extend_from_slice(&40000u16.to_be_bytes());
        raw.extend_from_slice(&443u16.to_be_bytes());
        raw.extend_from_slice(&[0; 8]);
        raw.push(0x50);
        raw.push(0x18);
        raw.extend_from_slice(&2048u16.to_be_bytes());
        raw.extend_from_slice(&[0; 2]);

        let frame = EthernetFrame::parse(&raw).unwrap();
        let rec = record_packet(Dpid(7), PortNo(2), &frame, raw.len() as u32, 12.5);
        assert_eq!(rec.dpid, Dpid(7));
        assert_eq!(rec.protocol, 6);
        assert_eq!(rec.src_ip, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(rec.dst_port, 443);
        assert_eq!(rec.ttl, 63);
        assert_eq!(rec.tos, 0x08);
        assert_eq!(rec.window, 2048);
        assert_eq!(rec.tcp_flags, 0x18);
    }
}

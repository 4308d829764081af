//! Snapshot discovery and ingest.
//!
//! Snapshot filenames carry their flush timestamp, so capture order is
//! recoverable from the names alone: directories are scanned for
//! `captured_packets_*.json` and everything is sorted by embedded
//! timestamp before a single packet is read.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use weir_common::snapshot::{parse_snapshot_ts, CapturedPacket};

use crate::ClassifyError;

/// Expand files and directories into an ordered snapshot list.
///
/// Directories contribute every file matching the snapshot pattern;
/// explicitly named files are taken as-is. Ordering is by embedded
/// timestamp, with non-conforming names (explicit files only) sorted
/// after by name.
pub fn collect_snapshots(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, ClassifyError> {
    let mut found: Vec<PathBuf> = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let entries =
                std::fs::read_dir(input).map_err(|e| ClassifyError::io(input, e))?;
            let mut matched = 0;
            for entry in entries {
                let path = entry.map_err(|e| ClassifyError::io(input, e))?.path();
                if file_ts(&path).is_some() {
                    found.push(path);
                    matched += 1;
                }
            }
            if matched == 0 {
                warn!(dir = %input.display(), "no snapshot files found");
            }
        } else {
            found.push(input.clone());
        }
    }
    found.sort_by(|a, b| match (file_ts(a), file_ts(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });
    Ok(found)
}

/// Read every packet from the given snapshots, preserving file order.
pub fn load_packets(paths: &[PathBuf]) -> Result<Vec<CapturedPacket>, ClassifyError> {
    let mut packets = Vec::new();
    for path in paths {
        let file = std::fs::File::open(path).map_err(|e| ClassifyError::io(path, e))?;
        let batch: Vec<CapturedPacket> =
            serde_json::from_reader(std::io::BufReader::new(file))?;
        debug!(path = %path.display(), packets = batch.len(), "snapshot loaded");
        packets.extend(batch);
    }
    Ok(packets)
}

fn file_ts(path: &Path) -> Option<u64> {
    parse_snapshot_ts(path.file_name()?.to_str()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use weir_common::snapshot::snapshot_filename;

    fn touch(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(body.as_bytes())
            .unwrap();
        path
    }

    #[test]
    fn directory_scan_orders_by_embedded_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &snapshot_filename(300), "[]");
        touch(dir.path(), &snapshot_filename(100), "[]");
        touch(dir.path(), &snapshot_filename(200), "[]");
        touch(dir.path(), "features.csv", "");

        let paths = collect_snapshots(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                snapshot_filename(100),
                snapshot_filename(200),
                snapshot_filename(300)
            ]
        );
    }

    #[test]
    fn explicit_files_are_kept_even_without_the_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let odd = touch(dir.path(), "oddly_named.json", "[]");
        let paths = collect_snapshots(&[odd.clone()]).unwrap();
        assert_eq!(paths, vec![odd]);
    }

    #[test]
    fn packets_concatenate_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let one = r#"[{"timestamp":1.0,"dpid":1,"in_port":1,"eth_src":"00:00:00:00:00:01","eth_dst":"00:00:00:00:00:02","protocol":6,"src_ip":"10.0.0.1","dst_ip":"10.0.0.2","src_port":1,"dst_port":80,"length":100,"tcp_flags":0,"ttl":64,"tos":0,"window":1000}]"#;
        let two = r#"[{"timestamp":2.0,"dpid":1,"in_port":1,"eth_src":"00:00:00:00:00:01","eth_dst":"00:00:00:00:00:02","protocol":6,"src_ip":"10.0.0.1","dst_ip":"10.0.0.2","src_port":2,"dst_port":80,"length":100,"tcp_flags":0,"ttl":64,"tos":0,"window":1000}]"#;
        touch(dir.path(), &snapshot_filename(200), two);
        touch(dir.path(), &snapshot_filename(100), one);

        let paths = collect_snapshots(&[dir.path().to_path_buf()]).unwrap();
        let packets = load_packets(&paths).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].src_port, 1);
        assert_eq!(packets[1].src_port, 2);
    }

    #[test]
    fn malformed_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let bad = touch(dir.path(), &snapshot_filename(1), "{not json");
        assert!(matches!(
            load_packets(&[bad]),
            Err(ClassifyError::Json(_))
        ));
    }
}

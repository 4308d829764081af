//! # Classification export
//!
//! The last stage of the pipeline: run the model over every feature row,
//! apply the well-known-port override, join flows to symbolic host ids by
//! IP, synthesise the reverse record for each conversation, and replace
//! the classification table with a write-then-rename so the controller
//! never observes a half-written file.

use std::path::Path;

use tracing::{debug, info, warn};

use weir_common::class::PortOverrides;
use weir_common::hostmap::HostMap;
use weir_common::table::ClassificationRecord;

use crate::flows::FlowFeatures;
use crate::model::Classifier;
use crate::ClassifyError;

/// Classify feature rows into table records. Flows whose endpoints are
/// not both in the host map are dropped — the controller could not use
/// them anyway.
pub fn classify_rows(
    rows: &[FlowFeatures],
    classifier: &Classifier,
    hosts: &HostMap,
    overrides: &PortOverrides,
) -> Vec<ClassificationRecord> {
    let mut records = Vec::with_capacity(rows.len() * 2);
    let mut dropped = 0usize;
    let mut overridden = 0usize;

    for (index, row) in rows.iter().enumerate() {
        let prediction = classifier.predict(&row.numeric_features());
        let (class, confidence) = match overrides.lookup(row.dst_port, row.src_port) {
            // A well-known port beats the model, at full confidence.
            Some(forced) => {
                if forced != prediction.class {
                    debug!(
                        dst_port = row.dst_port,
                        predicted = %prediction.class,
                        forced = %forced,
                        "port override applied"
                    );
                }
                overridden += 1;
                (forced, 1.0)
            }
            None => (prediction.class, prediction.confidence),
        };

        let src_ip = row.src_ip.parse().ok();
        let dst_ip = row.dst_ip.parse().ok();
        let src_host = src_ip.and_then(|ip| hosts.host_id_for_ip(ip));
        let dst_host = dst_ip.and_then(|ip| hosts.host_id_for_ip(ip));
        let (Some(src_host), Some(dst_host)) = (src_host, dst_host) else {
            dropped += 1;
            continue;
        };

        let forward = ClassificationRecord {
            flow_id: format!("{}", index + 1),
            src_host: src_host.to_owned(),
            dst_host: dst_host.to_owned(),
            src_ip: row.src_ip.clone(),
            dst_ip: row.dst_ip.clone(),
            src_port: row.src_port,
            dst_port: row.dst_port,
            protocol: row.protocol,
            traffic_type: class,
            confidence,
            total_packets: row.total_packets,
            total_bytes: row.total_bytes,
            flow_duration: row.flow_duration,
            packets_per_second: row.packets_per_second,
        };
        let reverse = ClassificationRecord {
            flow_id: format!("{}r", index + 1),
            src_host: forward.dst_host.clone(),
            dst_host: forward.src_host.clone(),
            src_ip: forward.dst_ip.clone(),
            dst_ip: forward.src_ip.clone(),
            src_port: forward.dst_port,
            dst_port: forward.src_port,
            ..forward.clone()
        };
        records.push(forward);
        records.push(reverse);
    }

    info!(
        flows = rows.len(),
        records = records.len(),
        overridden,
        dropped,
        "classification complete"
    );
    if dropped > 0 {
        warn!(dropped, "flows without host-mapped endpoints were dropped");
    }
    records
}

/// Atomically replace the classification table: write to a temp file in
/// the destination directory, then rename over the target.
pub fn write_table(path: &Path, records: &[ClassificationRecord]) -> Result<(), ClassifyError> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let tmp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir),
        None => tempfile::NamedTempFile::new_in("."),
    }
    .map_err(|e| ClassifyError::io(path, e))?;

    {
        let mut writer = csv::Writer::from_writer(tmp.as_file());
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush().map_err(|e| ClassifyError::io(path, e))?;
    }
    tmp.persist(path)?;
    info!(path = %path.display(), records = records.len(), "classification table replaced");
    Ok(())
}

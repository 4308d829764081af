//! The host-pair classification table.
//!
//! Produced by the offline pipeline, consumed by the router. The controller
//! only acts on `(src_host, dst_host, traffic_type, confidence)`; the other
//! columns are preserved for downstream tooling. Both directions of a
//! conversation are stored — the loader synthesises the reverse record when
//! the file carries only one direction.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::class::TrafficClass;
use crate::ids::HostId;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read classification table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed classification table: {0}")]
    Csv(#[from] csv::Error),
}

/// One row of the classification CSV, all columns preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub flow_id: String,
    pub src_host: String,
    pub dst_host: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub traffic_type: TrafficClass,
    pub confidence: f64,
    pub total_packets: u64,
    pub total_bytes: u64,
    pub flow_duration: f64,
    pub packets_per_second: f64,
}

/// The routing-relevant slice of a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassEntry {
    pub class: TrafficClass,
    pub confidence: f64,
}

impl ClassEntry {
    pub const UNKNOWN: ClassEntry = ClassEntry {
        class: TrafficClass::Unknown,
        confidence: 0.0,
    };
}

/// Immutable `(src_host, dst_host)` → class snapshot.
#[derive(Debug, Clone, Default)]
pub struct ClassificationTable {
    entries: HashMap<(HostId, HostId), ClassEntry>,
}

impl ClassificationTable {
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let file = std::fs::File::open(path).map_err(|source| TableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut reader = csv::Reader::from_reader(file);
        let mut records = Vec::new();
        for record in reader.deserialize() {
            records.push(record?);
        }
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: impl IntoIterator<Item = ClassificationRecord>) -> Self {
        let mut entries: HashMap<(HostId, HostId), ClassEntry> = HashMap::new();
        let mut order = Vec::new();
        for rec in records {
            let key = (rec.src_host.clone(), rec.dst_host.clone());
            entries.insert(
                key.clone(),
                ClassEntry {
                    class: rec.traffic_type,
                    confidence: rec.confidence,
                },
            );
            order.push(key);
        }
        // Synthesise the reverse direction where the file only has one.
        for (src, dst) in order {
            let reverse = (dst.clone(), src.clone());
            if !entries.contains_key(&reverse) {
                let entry = entries[&(src, dst)];
                entries.insert(reverse, entry);
            }
        }
        ClassificationTable { entries }
    }

    /// Class for a host pair; Unknown/0.0 when unclassified.
    pub fn lookup(&self, src: &str, dst: &str) -> ClassEntry {
        self.entries
            .get(&(src.to_owned(), dst.to_owned()))
            .copied()
            .unwrap_or(ClassEntry::UNKNOWN)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

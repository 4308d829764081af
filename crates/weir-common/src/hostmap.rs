//! The pre-seeded host map.
//!
//! Whitespace-separated lines of `mac dpid port [host_id] [ip]`, with `#`
//! comments. The map is loaded and injected into the learning table before
//! any traffic arrives — emulated hosts may carry pre-populated ARP caches
//! and never emit discovery traffic. The optional `ip` column is what lets
//! the offline classifier join flows back to symbolic host ids.
//!
//! Unknown or malformed lines are skipped with a warning.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

use crate::ids::{Dpid, HostId, MacAddr, PortNo};

#[derive(Debug, Error)]
pub enum HostMapError {
    #[error("failed to read host map {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Where a host attaches to the fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub mac: MacAddr,
    pub dpid: Dpid,
    pub port: PortNo,
    pub host_id: Option<HostId>,
    pub ip: Option<Ipv4Addr>,
}

/// MAC-keyed attachment map with a secondary index by IP.
#[derive(Debug, Clone, Default)]
pub struct HostMap {
    by_mac: HashMap<MacAddr, HostEntry>,
    by_ip: HashMap<Ipv4Addr, MacAddr>,
}

impl HostMap {
    pub fn load(path: &Path) -> Result<Self, HostMapError> {
        let text = std::fs::read_to_string(path).map_err(|source| HostMapError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Parse host map text, skipping malformed lines with a warning.
    pub fn parse(text: &str) -> Self {
        let mut map = HostMap::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Some(entry) => map.insert(entry),
                None => warn!(line = lineno + 1, content = line, "skipping malformed host map line"),
            }
        }
        map
    }

    pub fn insert(&mut self, entry: HostEntry) {
        if let Some(ip) = entry.ip {
            self.by_ip.insert(ip, entry.mac);
        }
        self.by_mac.insert(entry.mac, entry);
    }

    /// O(1) attachment lookup.
    pub fn locate(&self, mac: MacAddr) -> Option<(Dpid, PortNo)> {
        self.by_mac.get(&mac).map(|e| (e.dpid, e.port))
    }

    pub fn entry(&self, mac: MacAddr) -> Option<&HostEntry> {
        self.by_mac.get(&mac)
    }

    pub fn host_id(&self, mac: MacAddr) -> Option<&str> {
        self.by_mac.get(&mac)?.host_id.as_deref()
    }

    pub fn entry_by_ip(&self, ip: Ipv4Addr) -> Option<&HostEntry> {
        self.by_mac.get(self.by_ip.get(&ip)?)
    }

    pub fn host_id_for_ip(&self, ip: Ipv4Addr) -> Option<&str> {
        self.entry_by_ip(ip)?.host_id.as_deref()
    }

    /// Record an observed IP for a seeded host. Later observations win.
    pub fn set_ip(&mut self, mac: MacAddr, ip: Ipv4Addr) {
        if let Some(entry) = self.by_mac.get_mut(&mac) {
            if let Some(old) = entry.ip.replace(ip) {
                if old != ip {
                    self.by_ip.remove(&old);
                }
            }
            self.by_ip.insert(ip, mac);
        }
    }

    pub fn len(&self) -> usize {
        self.by_mac.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_mac.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostEntry> {
        self.by_mac.values()
    }
}

fn parse_line(line: &str) -> Option<HostEntry> {
    let mut tokens = line.split_whitespace();
    let mac: MacAddr = tokens.next()?.parse().ok()?;
    let dpid: u64 = tokens.next()?.parse().ok()?;
    let port: u32 = tokens.next()?.parse().ok()?;
    let host_id = tokens.next().map(str::to_owned);
    let ip = match tokens.next() {
        Some(tok) => Some(tok.parse().ok()?),
        None => None,
    };
    if tokens.next().is_some() {
        return None;
    }
    Some(HostEntry {
        mac,
        dpid: Dpid(dpid),
        port: PortNo(port),
        host_id,
        ip,
    })
}

//! Traffic classes and their routing priorities.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── TrafficClass ───────────────────────────────────────────────────────────

/// The closed set of traffic classes the classifier can assign.
///
/// Priority drives the FPLF weight scaling: video preempts interactive ssh,
/// which preempts web, which preempts bulk ftp. Unknown flows carry
/// priority 0 and scale their weights like priority-1 traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrafficClass {
    #[serde(rename = "VIDEO")]
    Video,
    #[serde(rename = "SSH")]
    Ssh,
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "FTP")]
    Ftp,
    #[default]
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl TrafficClass {
    /// Routing priority: 4 (highest) down to 1, 0 for unclassified.
    pub fn priority(self) -> u8 {
        match self {
            TrafficClass::Video => 4,
            TrafficClass::Ssh => 3,
            TrafficClass::Http => 2,
            TrafficClass::Ftp => 1,
            TrafficClass::Unknown => 0,
        }
    }

    /// The label used in classification files.
    pub fn label(self) -> &'static str {
        match self {
            TrafficClass::Video => "VIDEO",
            TrafficClass::Ssh => "SSH",
            TrafficClass::Http => "HTTP",
            TrafficClass::Ftp => "FTP",
            TrafficClass::Unknown => "UNKNOWN",
        }
    }

    /// Parse a label, case-insensitively. Unknown labels map to `None`.
    pub fn from_label(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "VIDEO" => Some(TrafficClass::Video),
            "SSH" => Some(TrafficClass::Ssh),
            "HTTP" => Some(TrafficClass::Http),
            "FTP" => Some(TrafficClass::Ftp),
            "UNKNOWN" => Some(TrafficClass::Unknown),
            _ => None,
        }
    }

    /// Dijkstra edge-weight multiplier for this class: `(5 - p) / 4` for
    /// priority p, with Unknown scaling like priority 1.
    pub fn weight_factor(self) -> f64 {
        let p = self.priority().max(1);
        f64::from(5 - p) / 4.0
    }
}

impl std::fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ─── Port overrides ─────────────────────────────────────────────────────────

/// Well-known-port → class override table.
///
/// Applied after model inference: a flow whose destination (else source)
/// port appears here is forced to the mapped class with confidence 1.0.
#[derive(Debug, Clone)]
pub struct PortOverrides {
    map: HashMap<u16, TrafficClass>,
}

impl Default for PortOverrides {
    fn default() -> Self {
        let map = [
            (80, TrafficClass::Http),
            (8080, TrafficClass::Http),
            (443, TrafficClass::Http),
            (20, TrafficClass::Ftp),
            (21, TrafficClass::Ftp),
            (22, TrafficClass::Ssh),
            (5004, TrafficClass::Video),
            (5006, TrafficClass::Video),
            (1935, TrafficClass::Video),
        ]
        .into_iter()
        .collect();
        PortOverrides { map }
    }
}

impl PortOverrides {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u16, TrafficClass)>) -> Self {
        PortOverrides {
            map: pairs.into_iter().collect(),
        }
    }

    /// Destination port wins over source port.
    pub fn lookup(&self, dst_port: u16, src_port: u16) -> Option<TrafficClass> {
        self.map
            .get(&dst_port)
            .or_else(|| self.map.get(&src_port))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_are_ordered() {
        assert_eq!(TrafficClass::Video.priority(), 4);
        assert_eq!(TrafficClass::Ssh.priority(), 3);
        assert_eq!(TrafficClass::Http.priority(), 2);
        assert_eq!(TrafficClass::Ftp.priority(), 1);
        assert_eq!(TrafficClass::Unknown.priority(), 0);
    }

    #[test]
    fn weight_factors_scale_by_priority() {
        assert_eq!(TrafficClass::Ftp.weight_factor(), 1.0);
        assert_eq!(TrafficClass::Http.weight_factor(), 0.75);
        assert_eq!(TrafficClass::Ssh.weight_factor(), 0.5);
        assert_eq!(TrafficClass::Video.weight_factor(), 0.25);
        // Unknown behaves like a priority-1 flow.
        assert_eq!(TrafficClass::Unknown.weight_factor(), 1.0);
    }

    #[test]
    fn label_roundtrip() {
        for class in [
            TrafficClass::Video,
            TrafficClass::Ssh,
            TrafficClass::Http,
            TrafficClass::Ftp,
            TrafficClass::Unknown,
        ] {
            assert_eq!(TrafficClass::from_label(class.label()), Some(class));
        }
        assert_eq!(TrafficClass::from_label("video"), Some(TrafficClass::Video));
        assert_eq!(TrafficClass::from_label("dns"), None);
    }

    #[test]
    fn default_overrides_cover_the_well_known_ports() {
        let overrides = PortOverrides::default();
        assert_eq!(overrides.lookup(22, 50000), Some(TrafficClass::Ssh));
        assert_eq!(overrides.lookup(443, 50000), Some(TrafficClass::Http));
        assert_eq!(overrides.lookup(21, 50000), Some(TrafficClass::Ftp));
        assert_eq!(overrides.lookup(1935, 50000), Some(TrafficClass::Video));
        assert_eq!(overrides.lookup(50000, 50001), None);
    }

    #[test]
    fn dst_port_wins_over_src() {
        let overrides = PortOverrides::default();
        assert_eq!(overrides.lookup(22, 80), Some(TrafficClass::Ssh));
        // Falls back to the source port when the destination has no mapping.
        assert_eq!(overrides.lookup(50000, 80), Some(TrafficClass::Http));
    }
}

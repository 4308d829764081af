//! Controller and pipeline configuration.
//!
//! Loaded from TOML. Every knob carries its operational default so a
//! minimal file is just the paths that differ from the defaults.
//! Validation happens at load time — a zero or negative link capacity is a
//! configuration error, not a runtime surprise.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::class::{PortOverrides, TrafficClass};
use crate::ids::{Dpid, PortNo};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// OpenFlow listen address.
    #[serde(default = "defaults::listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub flows: FlowConfig,
    #[serde(default)]
    pub reload: ReloadConfig,
    /// Static topology, used when link discovery is disabled.
    #[serde(default)]
    pub links: Vec<StaticLink>,
    /// Well-known-port class overrides, keyed by port number.
    #[serde(default)]
    pub port_overrides: Option<HashMap<String, TrafficClass>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Paths {
    #[serde(default = "defaults::host_map")]
    pub host_map: PathBuf,
    #[serde(default = "defaults::classification_table")]
    pub classification_table: PathBuf,
    #[serde(default = "defaults::snapshot_dir")]
    pub snapshot_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Port-statistics sampling interval, seconds.
    #[serde(default = "defaults::sampling_interval_secs")]
    pub sampling_interval_secs: f64,
    /// Assumed capacity for links without an explicit one, Mbit/s.
    #[serde(default = "defaults::capacity_mbps")]
    pub default_capacity_mbps: f64,
    /// Utilisation at which a link counts as congested. Deployments with a
    /// 10 Mbit/s bottleneck typically run 0.08.
    #[serde(default = "defaults::congestion_threshold")]
    pub congestion_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureConfig {
    /// Ring capacity; doubles as the size flush trigger.
    #[serde(default = "defaults::ring_capacity")]
    pub ring_capacity: usize,
    /// Wall-clock flush period, seconds.
    #[serde(default = "defaults::flush_period_secs")]
    pub flush_period_secs: u64,
    /// Snapshot rotation: maximum file count.
    #[serde(default = "defaults::max_snapshots")]
    pub max_snapshots: usize,
    /// Snapshot rotation: maximum file age, seconds.
    #[serde(default = "defaults::max_snapshot_age_secs")]
    pub max_snapshot_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowConfig {
    #[serde(default = "defaults::idle_timeout_secs")]
    pub idle_timeout_secs: u16,
    #[serde(default = "defaults::hard_timeout_secs")]
    pub hard_timeout_secs: u16,
    /// Overall budget for one route-and-install operation, milliseconds.
    #[serde(default = "defaults::install_budget_ms")]
    pub install_budget_ms: u64,
    /// Match on the full 5-tuple instead of (eth_src, eth_dst). Reverse
    /// rules share whichever granularity is selected.
    #[serde(default)]
    pub fine_match: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReloadConfig {
    /// Classification table rescan period, seconds.
    #[serde(default = "defaults::reload_period_secs")]
    pub period_secs: u64,
}

/// One statically configured inter-switch link.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticLink {
    pub a_dpid: u64,
    pub a_port: u32,
    pub b_dpid: u64,
    pub b_port: u32,
    /// Per-link capacity override, Mbit/s.
    pub capacity_mbps: Option<f64>,
}

impl StaticLink {
    pub fn endpoints(&self) -> ((Dpid, PortNo), (Dpid, PortNo)) {
        (
            (Dpid(self.a_dpid), PortNo(self.a_port)),
            (Dpid(self.b_dpid), PortNo(self.b_port)),
        )
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn listen_addr() -> String {
        "0.0.0.0:6653".into()
    }
    pub fn host_map() -> PathBuf {
        "hosts.map".into()
    }
    pub fn classification_table() -> PathBuf {
        "classified_flows.csv".into()
    }
    pub fn snapshot_dir() -> PathBuf {
        "captures".into()
    }
    pub fn sampling_interval_secs() -> f64 {
        1.0
    }
    pub fn capacity_mbps() -> f64 {
        100.0
    }
    pub fn congestion_threshold() -> f64 {
        0.9
    }
    pub fn ring_capacity() -> usize {
        10_000
    }
    pub fn flush_period_secs() -> u64 {
        30
    }
    pub fn max_snapshots() -> usize {
        100
    }
    pub fn max_snapshot_age_secs() -> u64 {
        3600
    }
    pub fn idle_timeout_secs() -> u16 {
        30
    }
    pub fn hard_timeout_secs() -> u16 {
        300
    }
    pub fn install_budget_ms() -> u64 {
        250
    }
    pub fn reload_period_secs() -> u64 {
        10
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: defaults::listen_addr(),
            paths: Paths::default(),
            monitor: MonitorConfig::default(),
            capture: CaptureConfig::default(),
            flows: FlowConfig::default(),
            reload: ReloadConfig::default(),
            links: Vec::new(),
            port_overrides: None,
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        Paths {
            host_map: defaults::host_map(),
            classification_table: defaults::classification_table(),
            snapshot_dir: defaults::snapshot_dir(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            sampling_interval_secs: defaults::sampling_interval_secs(),
            default_capacity_mbps: defaults::capacity_mbps(),
            congestion_threshold: defaults::congestion_threshold(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            ring_capacity: defaults::ring_capacity(),
            flush_period_secs: defaults::flush_period_secs(),
            max_snapshots: defaults::max_snapshots(),
            max_snapshot_age_secs: defaults::max_snapshot_age_secs(),
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        FlowConfig {
            idle_timeout_secs: defaults::idle_timeout_secs(),
            hard_timeout_secs: defaults::hard_timeout_secs(),
            install_budget_ms: defaults::install_budget_ms(),
            fine_match: false,
        }
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        ReloadConfig {
            period_secs: defaults::reload_period_secs(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.sampling_interval_secs <= 0.0 {
            return Err(ConfigError::Invalid(
                "monitor.sampling_interval_secs must be positive".into(),
            ));
        }
        if self.monitor.default_capacity_mbps <= 0.0 {
            return Err(ConfigError::Invalid(
                "monitor.default_capacity_mbps must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.monitor.congestion_threshold)
            || self.monitor.congestion_threshold == 0.0
        {
            return Err(ConfigError::Invalid(
                "monitor.congestion_threshold must be in (0, 1]".into(),
            ));
        }
        if self.capture.ring_capacity == 0 {
            return Err(ConfigError::Invalid(
                "capture.ring_capacity must be positive".into(),
            ));
        }
        for link in &self.links {
            if link.a_dpid == link.b_dpid {
                return Err(ConfigError::Invalid(format!(
                    "link {}:{} <-> {}:{} connects a switch to itself",
                    link.a_dpid, link.a_port, link.b_dpid, link.b_port
                )));
            }
            if let Some(capacity) = link.capacity_mbps {
                if capacity <= 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "link {} <-> {} capacity must be positive",
                        link.a_dpid, link.b_dpid
                    )));
                }
            }
        }
        if let Some(overrides) = &self.port_overrides {
            for key in overrides.keys() {
                if key.parse::<u16>().is_err() {
                    return Err(ConfigError::Invalid(format!(
                        "port_overrides key `{key}` is not a port number"
                    )));
                }
            }
        }
        Ok(())
    }

    /// The configured port-override table, or the built-in default.
    pub fn port_override_table(&self) -> PortOverrides {
        match &self.port_overrides {
            Some(map) => PortOverrides::from_pairs(
                map.iter()
                    .filter_map(|(port, class)| Some((port.parse().ok()?, *class))),
            ),
            None => PortOverrides::default(),
        }
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_secs_f64(self.monitor.sampling_interval_secs)
    }

    pub fn flush_period(&self) -> Duration {
        Duration::from_secs(self.capture.flush_period_secs)
    }

    pub fn reload_period(&self) -> Duration {
        Duration::from_secs(self.reload.period_secs)
    }

    pub fn install_budget(&self) -> Duration {
        Duration::from_millis(self.flows.install_budget_ms)
    }
}

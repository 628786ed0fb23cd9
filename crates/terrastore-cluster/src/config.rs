//! Process configuration surface.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use terrastore_common::{Result, TerrastoreError};
use terrastore_routing::DEFAULT_PARTITIONS;

/// Full configuration of one Terrastore process, loadable from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            TerrastoreError::Validation(format!(
                "Cannot read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| TerrastoreError::Validation(format!("Invalid config: {}", e)))
    }
}

/// The local node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Logical node name, unique inside the cluster.
    pub id: String,
    /// Host peers use to reach the command server.
    #[serde(default = "defaults::host")]
    pub host: String,
    /// Command server port.
    #[serde(default = "defaults::port")]
    pub port: u16,
    /// Worker pool size.
    #[serde(default = "defaults::concurrency")]
    pub concurrency: usize,
    /// Per-command remote timeout, milliseconds.
    #[serde(default = "defaults::node_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: "node-1".to_string(),
            host: defaults::host(),
            port: defaults::port(),
            concurrency: defaults::concurrency(),
            timeout_ms: defaults::node_timeout_ms(),
        }
    }
}

/// The local cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "defaults::cluster_name")]
    pub name: String,
    /// Slot count per cluster ring.
    #[serde(default = "defaults::partitions")]
    pub partitions: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: defaults::cluster_name(),
            partitions: defaults::partitions(),
        }
    }
}

/// How remote-cluster membership is refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollingStrategy {
    Fixed,
    Adaptive,
}

/// The federation this cluster takes part in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default = "defaults::strategy")]
    pub strategy: PollingStrategy,
    /// Polling interval for the fixed strategy, milliseconds.
    #[serde(default = "defaults::ensemble_interval_ms")]
    pub interval_ms: u64,
    /// Lower interval bound for the adaptive strategy.
    #[serde(default = "defaults::ensemble_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Upper interval bound for the adaptive strategy.
    #[serde(default = "defaults::ensemble_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Remote cluster name to seed contact endpoints (`host:port`).
    #[serde(default)]
    pub clusters: HashMap<String, Vec<String>>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            strategy: defaults::strategy(),
            interval_ms: defaults::ensemble_interval_ms(),
            min_interval_ms: defaults::ensemble_min_interval_ms(),
            max_interval_ms: defaults::ensemble_max_interval_ms(),
            clusters: HashMap::new(),
        }
    }
}

/// Bounded retry on transport failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    #[serde(default = "defaults::retries")]
    pub retries: u32,
    #[serde(default = "defaults::retry_interval_ms")]
    pub interval_ms: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            retries: defaults::retries(),
            interval_ms: defaults::retry_interval_ms(),
        }
    }
}

/// Which event bus publishes value events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    #[serde(rename = "impl", default = "defaults::event_bus_impl")]
    pub implementation: String,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            implementation: defaults::event_bus_impl(),
        }
    }
}

mod defaults {
    use super::PollingStrategy;

    pub fn host() -> String {
        "127.0.0.1".to_string()
    }
    pub fn port() -> u16 {
        6200
    }
    pub fn concurrency() -> usize {
        25
    }
    pub fn node_timeout_ms() -> u64 {
        3000
    }
    pub fn cluster_name() -> String {
        "default-cluster".to_string()
    }
    pub fn partitions() -> usize {
        super::DEFAULT_PARTITIONS
    }
    pub fn strategy() -> PollingStrategy {
        PollingStrategy::Fixed
    }
    pub fn ensemble_interval_ms() -> u64 {
        10_000
    }
    pub fn ensemble_min_interval_ms() -> u64 {
        1_000
    }
    pub fn ensemble_max_interval_ms() -> u64 {
        60_000
    }
    pub fn retries() -> u32 {
        3
    }
    pub fn retry_interval_ms() -> u64 {
        1_000
    }
    pub fn event_bus_impl() -> String {
        "memory".to_string()
    }
}

// ── Network-level state and published outputs ──

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::device::DeviceSummary;

/// How discovery beacons are addressed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BroadcastMode {
    /// One beacon to the configured broadcast address.
    #[default]
    Broadcast,
    /// One unicast beacon per registered device with a known IP.
    Targeted,
}

/// Network tuple published periodically and on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub connected: bool,
    pub listener_ip: IpAddr,
    pub listener_port: u16,
    pub broadcast_ip: String,
    pub broadcast_port: u16,
    pub broadcast_mode: BroadcastMode,
    pub broadcasting: bool,
}

/// Aggregate timing for one measured operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub count: usize,
}

/// Snapshot of the performance monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfStats {
    pub enabled: bool,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub errors: u64,
    pub metrics: BTreeMap<String, MetricStats>,
}

/// Everything the communicator publishes to its consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Output {
    Network(NetworkStatus),
    Registry(Arc<Vec<DeviceSummary>>),
    /// All RPM values followed by all duty cycles, `max_fans` per device.
    Feedback(Arc<Vec<f64>>),
    Performance(PerfStats),
}

impl Output {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Registry(_) => "registry",
            Self::Feedback(_) => "feedback",
            Self::Performance(_) => "performance",
        }
    }
}

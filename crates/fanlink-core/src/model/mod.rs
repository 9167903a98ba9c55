// ── Domain model ──

mod device;
mod mac;
mod network;

pub use device::{DeviceStatus, DeviceSummary, Endpoint, Feedback};
pub use mac::{MAC_LENGTH, MacAddress};
pub use network::{BroadcastMode, MetricStats, NetworkStatus, Output, PerfStats};

// ── Device domain types ──

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use super::mac::MacAddress;

/// Connection lifecycle of a registered device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum DeviceStatus {
    /// Seen on the network but not adopted by the operator.
    Available,
    /// Adopted and reachable; the worker will attempt a handshake.
    Known,
    /// Handshake completed, periodic exchange running.
    Connected,
    /// Running its bootloader, usually mid firmware update.
    Updating,
    /// Adopted but unreachable until it announces itself again.
    Disconnected,
}

impl DeviceStatus {
    /// Transition table for status changes.
    ///
    /// `UPDATING` is entered when a registered device announces itself from
    /// its bootloader; `AVAILABLE` devices stay available in that case.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Available, Self::Known)
                | (Self::Known, Self::Connected | Self::Disconnected)
                | (Self::Connected, Self::Disconnected)
                | (Self::Disconnected | Self::Updating, Self::Known)
                | (
                    Self::Known | Self::Connected | Self::Disconnected | Self::Updating,
                    Self::Updating
                )
        )
    }
}

/// Where a device listens and which port it talks back from.
///
/// `inbound_port` is the device's sending side (our receive channel),
/// `outbound_port` the port it receives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub inbound_port: u16,
    pub outbound_port: u16,
}

/// Latest telemetry from one device, padded to the fleet-wide fan width.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub rpm: Vec<f64>,
    pub duty_cycle: Vec<f64>,
}

impl Feedback {
    /// All-zero feedback for a device that has not reported yet.
    pub fn zeroed(width: usize) -> Self {
        Self {
            rpm: vec![0.0; width],
            duty_cycle: vec![0.0; width],
        }
    }
}

/// One registry row as published to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub index: usize,
    pub name: String,
    pub mac: MacAddress,
    pub status: DeviceStatus,
    pub fans: usize,
    pub version: String,
    pub ip: Option<IpAddr>,
    /// Commands discarded because the mailbox was full.
    pub dropped_commands: u64,
}

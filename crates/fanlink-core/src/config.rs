// ── Runtime communicator configuration ──
//
// Describes how the engine talks to its fleet. The CLI builds a
// `CommunicatorConfig` from its profile and hands it in; core never
// reads config files.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::MacAddress;
use crate::protocol::{FanProfile, SEPARATOR};

/// Well-known port devices expect the listener on.
pub const DEFAULT_LISTENER_PORT: u16 = 57584;

/// Broadcast IP sentinel meaning "the local broadcast address".
pub const BROADCAST_SENTINEL: &str = "<broadcast>";

/// A device adopted in a previous session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedDevice {
    pub name: String,
    pub mac: MacAddress,
    pub fans: usize,
}

/// Everything the communicator needs to run.
#[derive(Debug, Clone)]
pub struct CommunicatorConfig {
    /// Shared secret carried in every discovery datagram.
    pub passcode: SecretString,
    /// Local address all sockets bind to.
    pub bind_ip: IpAddr,
    /// Preferred listener port; falls back to an ephemeral port when taken.
    /// `0` binds an ephemeral port directly.
    pub listener_port: u16,
    /// Beacon destination: `<broadcast>` or a dotted quad.
    pub broadcast_ip: String,
    pub broadcast_port: u16,
    /// Port the firmware image is served from during updates.
    pub http_port: u16,
    pub broadcast_period: Duration,
    /// Exchange cycle and output publishing period.
    pub period: Duration,
    /// Consecutive silent cycles before a connected device is dropped.
    pub max_timeouts: u32,
    /// Handshake frames sent before giving up on a known device.
    pub handshake_attempts: u32,
    /// Fleet-wide fan width; feedback is padded to this.
    pub max_fans: usize,
    /// Fan count assigned to devices discovered at runtime.
    pub default_fans: usize,
    /// Largest datagram accepted.
    pub max_length: usize,
    pub mailbox_capacity: usize,
    /// Bounded wait for the registry mutation lock.
    pub lock_timeout: Duration,
    pub fan_profile: FanProfile,
    pub saved_devices: Vec<SavedDevice>,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            passcode: SecretString::from("CT"),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listener_port: DEFAULT_LISTENER_PORT,
            broadcast_ip: BROADCAST_SENTINEL.into(),
            broadcast_port: 65000,
            http_port: 8000,
            broadcast_period: Duration::from_secs(1),
            period: Duration::from_millis(100),
            max_timeouts: 10,
            handshake_attempts: 3,
            max_fans: 21,
            default_fans: 21,
            max_length: 512,
            mailbox_capacity: 16,
            lock_timeout: Duration::from_secs(5),
            fan_profile: FanProfile::default(),
            saved_devices: Vec::new(),
        }
    }
}

impl CommunicatorConfig {
    /// Check every field the engine relies on before any socket is bound.
    pub fn validate(&self) -> Result<(), CoreError> {
        let passcode = self.passcode.expose_secret();
        if passcode.is_empty() {
            return Err(CoreError::config("passcode must not be empty"));
        }
        if passcode.contains(SEPARATOR) {
            return Err(CoreError::config(format!(
                "passcode must not contain '{SEPARATOR}'"
            )));
        }
        if !is_valid_broadcast_ip(&self.broadcast_ip) {
            return Err(CoreError::config(format!(
                "invalid broadcast IP {:?}",
                self.broadcast_ip
            )));
        }
        if self.broadcast_port == 0 {
            return Err(CoreError::config("broadcast port must be in 1..=65535"));
        }
        if self.period.is_zero() || self.broadcast_period.is_zero() {
            return Err(CoreError::config("periods must be non-zero"));
        }
        if self.max_timeouts == 0 || self.handshake_attempts == 0 {
            return Err(CoreError::config(
                "max_timeouts and handshake_attempts must be at least 1",
            ));
        }
        if self.max_fans == 0 {
            return Err(CoreError::config("max_fans must be at least 1"));
        }
        if self.default_fans == 0 || self.default_fans > self.max_fans {
            return Err(CoreError::config(format!(
                "default_fans must be in 1..={}",
                self.max_fans
            )));
        }
        if self.max_length < 64 {
            return Err(CoreError::config("max_length must be at least 64 bytes"));
        }
        if self.mailbox_capacity == 0 {
            return Err(CoreError::config("mailbox_capacity must be at least 1"));
        }

        let mut seen = HashSet::new();
        for device in &self.saved_devices {
            if !seen.insert(&device.mac) {
                return Err(CoreError::config(format!(
                    "device {} is listed more than once",
                    device.mac
                )));
            }
            if device.fans == 0 || device.fans > self.max_fans {
                return Err(CoreError::config(format!(
                    "device {} has {} fans; expected 1..={}",
                    device.mac, device.fans, self.max_fans
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn passcode(&self) -> &str {
        self.passcode.expose_secret()
    }
}

/// Whether `ip` is an acceptable beacon destination.
pub fn is_valid_broadcast_ip(ip: &str) -> bool {
    ip == BROADCAST_SENTINEL || ip.parse::<Ipv4Addr>().is_ok()
}

/// Resolve a beacon destination to a concrete address.
pub(crate) fn resolve_broadcast_ip(ip: &str) -> Option<Ipv4Addr> {
    if ip == BROADCAST_SENTINEL {
        Some(Ipv4Addr::BROADCAST)
    } else {
        ip.parse().ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        CommunicatorConfig::default().validate().unwrap();
    }

    #[test]
    fn passcode_with_separator_is_rejected() {
        let config = CommunicatorConfig {
            passcode: SecretString::from("a|b"),
            ..CommunicatorConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config { .. })));
    }

    #[test]
    fn broadcast_ip_validation() {
        assert!(is_valid_broadcast_ip("<broadcast>"));
        assert!(is_valid_broadcast_ip("192.168.1.255"));
        assert!(!is_valid_broadcast_ip("256.1.1.1"));
        assert!(!is_valid_broadcast_ip("example.com"));
        assert_eq!(resolve_broadcast_ip("<broadcast>"), Some(Ipv4Addr::BROADCAST));
    }

    #[test]
    fn duplicate_saved_devices_are_rejected() {
        let mac = MacAddress::parse("00:11:22:33:44:55").unwrap();
        let device = SavedDevice {
            name: "A1".into(),
            mac,
            fans: 4,
        };
        let config = CommunicatorConfig {
            saved_devices: vec![device.clone(), device],
            ..CommunicatorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_fan_count_is_rejected() {
        let config = CommunicatorConfig {
            saved_devices: vec![SavedDevice {
                name: "A1".into(),
                mac: MacAddress::parse("00:11:22:33:44:55").unwrap(),
                fans: 99,
            }],
            ..CommunicatorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

// ── Beacon broadcaster ──
//
// Periodically advertises the listener port so devices know where to
// announce themselves. The enable switch, addressing mode and target IP
// can change at runtime; each tick reads the current settings.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, trace};

use crate::communicator::CommunicatorInner;
use crate::config::{is_valid_broadcast_ip, resolve_broadcast_ip};
use crate::error::CoreError;
use crate::model::BroadcastMode;
use crate::protocol::Directive;
use crate::store::DeviceRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconState {
    pub enabled: bool,
    pub mode: BroadcastMode,
    /// `<broadcast>` or a dotted quad.
    pub ip: String,
}

#[derive(Debug)]
pub(crate) struct BeaconSettings {
    state: ArcSwap<BeaconState>,
}

impl BeaconSettings {
    pub(crate) fn new(ip: String) -> Self {
        Self {
            state: ArcSwap::from_pointee(BeaconState {
                enabled: true,
                mode: BroadcastMode::Broadcast,
                ip,
            }),
        }
    }

    pub(crate) fn get(&self) -> Arc<BeaconState> {
        self.state.load_full()
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.state.rcu(|s| BeaconState {
            enabled,
            ..BeaconState::clone(s)
        });
    }

    pub(crate) fn set_mode(&self, mode: BroadcastMode) {
        self.state.rcu(|s| BeaconState {
            mode,
            ..BeaconState::clone(s)
        });
    }

    pub(crate) fn set_ip(&self, ip: &str) -> Result<(), CoreError> {
        if !is_valid_broadcast_ip(ip) {
            return Err(CoreError::InvalidArguments {
                opcode: "set_broadcast_ip".into(),
                message: format!("{ip:?} is neither <broadcast> nor a dotted quad"),
            });
        }
        self.state.rcu(|s| BeaconState {
            ip: ip.to_owned(),
            ..BeaconState::clone(s)
        });
        Ok(())
    }

    /// Fleet-wide destination for broadcast directives.
    pub(crate) fn broadcast_addr(&self, port: u16) -> Option<SocketAddr> {
        resolve_broadcast_ip(&self.state.load().ip).map(|ip| SocketAddr::new(IpAddr::V4(ip), port))
    }
}

/// Where this tick's beacons go.
pub(crate) fn destinations(
    state: &BeaconState,
    registry: &DeviceRegistry,
    port: u16,
) -> Vec<SocketAddr> {
    match state.mode {
        BroadcastMode::Broadcast => resolve_broadcast_ip(&state.ip)
            .map(|ip| SocketAddr::new(IpAddr::V4(ip), port))
            .into_iter()
            .collect(),
        BroadcastMode::Targeted => {
            let mut targets: Vec<SocketAddr> = registry
                .slots()
                .iter()
                .filter_map(|slot| slot.endpoint())
                .map(|endpoint| SocketAddr::new(endpoint.ip, port))
                .collect();
            targets.sort_unstable();
            targets.dedup();
            targets
        }
    }
}

/// Send a beacon every broadcast period while enabled.
pub(crate) async fn beacon_task(inner: Arc<CommunicatorInner>) {
    let cancel = inner.cancel.clone();
    let port = inner.config.broadcast_port;
    let message = Directive::Beacon {
        listener_port: inner.listener_port(),
    }
    .encode(inner.config.passcode());

    let mut interval = tokio::time::interval(inner.config.broadcast_period);
    debug!(
        period_ms = inner.config.broadcast_period.as_millis(),
        port, "beacon broadcaster started"
    );

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let state = inner.beacon.get();
                if !state.enabled {
                    continue;
                }
                for target in destinations(&state, &inner.registry, port) {
                    match inner.control.send_to(message.as_bytes(), target).await {
                        Ok(_) => trace!(%target, "beacon sent"),
                        Err(e) => inner.report("beacon", &CoreError::socket("sending beacon", e)),
                    }
                }
            }
        }
    }
    debug!("beacon broadcaster stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;
    use crate::model::{DeviceStatus, Endpoint, MacAddress};
    use crate::store::{Link, NewDevice};

    #[test]
    fn settings_updates_are_independent() {
        let settings = BeaconSettings::new("<broadcast>".into());
        settings.set_mode(BroadcastMode::Targeted);
        settings.set_enabled(false);
        settings.set_ip("10.0.0.255").unwrap();
        let state = settings.get();
        assert!(!state.enabled);
        assert_eq!(state.mode, BroadcastMode::Targeted);
        assert_eq!(state.ip, "10.0.0.255");
        assert!(settings.set_ip("not-an-ip").is_err());
        assert_eq!(settings.get().ip, "10.0.0.255");
    }

    #[test]
    fn broadcast_mode_targets_broadcast_address() {
        let registry = DeviceRegistry::new(1, 1, Duration::from_millis(10));
        let state = BeaconState {
            enabled: true,
            mode: BroadcastMode::Broadcast,
            ip: "<broadcast>".into(),
        };
        assert_eq!(
            destinations(&state, &registry, 65000),
            vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), 65000)]
        );
    }

    #[tokio::test]
    async fn targeted_mode_unicasts_to_known_ips() {
        let registry = DeviceRegistry::new(1, 1, Duration::from_millis(10));
        registry
            .register(NewDevice {
                mac: MacAddress::parse("00:00:00:00:00:01").unwrap(),
                name: "a".into(),
                fans: 1,
                status: DeviceStatus::Known,
                link: Link {
                    endpoint: Some(Endpoint {
                        ip: "10.0.0.5".parse().unwrap(),
                        inbound_port: 1,
                        outbound_port: 2,
                    }),
                    version: "v".into(),
                },
            })
            .await
            .unwrap();
        registry
            .register(NewDevice {
                mac: MacAddress::parse("00:00:00:00:00:02").unwrap(),
                name: "b".into(),
                fans: 1,
                status: DeviceStatus::Disconnected,
                link: Link::default(),
            })
            .await
            .unwrap();
        let state = BeaconState {
            enabled: true,
            mode: BroadcastMode::Targeted,
            ip: "<broadcast>".into(),
        };
        assert_eq!(
            destinations(&state, &registry, 65000),
            vec!["10.0.0.5:65000".parse::<SocketAddr>().unwrap()]
        );
    }
}

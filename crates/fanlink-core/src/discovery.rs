// ── Discovery listener ──
//
// Reads the shared rendezvous socket, classifies announcements and
// applies the outcome to the registry. Classification is a pure function
// of the message, the registry entry (if any) and the firmware state.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::communicator::CommunicatorInner;
use crate::error::CoreError;
use crate::firmware::FirmwareOrchestrator;
use crate::model::{DeviceStatus, Endpoint};
use crate::protocol::{Directive, DiscoveryMessage, parse_discovery};
use crate::services::TrafficClass;
use crate::store::{Link, NewDevice};

/// Version recorded for a bootloader that does not report one.
const UNKNOWN_BOOTLOADER_VERSION: &str = "Bootloader(?)";

/// What the listener does with a verified announcement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DiscoveryAction {
    /// Known device on the wrong firmware: send it to its bootloader.
    RebootForUpdate,
    /// Known device returning from DISCONNECTED or UPDATING.
    Rediscover { index: usize },
    /// Known device whose status discovery does not touch.
    Ignore { index: usize, status: DeviceStatus },
    /// First sighting of this MAC.
    Register,
    /// Bootloader announcement; `index` is set for registered devices.
    Bootloader { reply: Directive, index: Option<usize> },
    /// Error report from a device or bootloader.
    Report,
}

pub(crate) fn classify(
    message: &DiscoveryMessage,
    known: Option<(usize, DeviceStatus)>,
    firmware: &FirmwareOrchestrator,
) -> DiscoveryAction {
    match message {
        DiscoveryMessage::Announce { version, .. } => match known {
            None => DiscoveryAction::Register,
            Some(_) if firmware.needs_reboot(version) => DiscoveryAction::RebootForUpdate,
            Some((index, DeviceStatus::Disconnected | DeviceStatus::Updating)) => {
                DiscoveryAction::Rediscover { index }
            }
            Some((index, status)) => DiscoveryAction::Ignore { index, status },
        },
        DiscoveryMessage::BootloaderAnnounce { .. } => DiscoveryAction::Bootloader {
            reply: firmware.flash_directive().unwrap_or(Directive::Launch),
            index: known.map(|(index, _)| index),
        },
        DiscoveryMessage::DeviceError { .. } | DiscoveryMessage::BootloaderError { .. } => {
            DiscoveryAction::Report
        }
    }
}

/// Receive and handle discovery datagrams until cancelled.
pub(crate) async fn listener_task(inner: Arc<CommunicatorInner>) {
    let cancel = inner.cancel.clone();
    let mut buf = vec![0u8; inner.config.max_length];
    debug!(port = inner.listener_port(), "discovery listener started");

    loop {
        let wait = inner.services.timeouts.timeout_for(TrafficClass::Discovery);
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            r = tokio::time::timeout(wait, inner.listener.recv_from(&mut buf)) => r,
        };

        let (len, sender) = match received {
            // Idle; nothing announced this period.
            Err(_) => continue,
            Ok(Err(e)) => {
                inner.report(
                    "listener",
                    &CoreError::socket("receiving discovery datagram", e),
                );
                continue;
            }
            Ok(Ok(received)) => received,
        };

        if let Err(e) = handle_datagram(&inner, &buf[..len], sender).await {
            if e.is_fatal() {
                error!(error = %e, "discovery listener terminated");
                break;
            }
            inner.report("listener", &e);
        }
    }
    debug!("discovery listener stopped");
}

async fn handle_datagram(
    inner: &Arc<CommunicatorInner>,
    datagram: &[u8],
    sender: SocketAddr,
) -> Result<(), CoreError> {
    trace!(%sender, len = datagram.len(), "discovery datagram");
    let message = match parse_discovery(datagram, inner.config.passcode()) {
        Ok(Some(message)) => message,
        Ok(None) => {
            debug!(%sender, "discarding datagram with foreign passcode");
            return Ok(());
        }
        Err(e) => {
            warn!(%sender, error = %e, "discarding invalid discovery datagram");
            inner.perf.error();
            return Ok(());
        }
    };

    let known = inner
        .registry
        .find(message.mac())
        .map(|slot| (slot.index(), slot.status()));

    match classify(&message, known, &inner.firmware) {
        DiscoveryAction::RebootForUpdate => {
            info!(mac = message.mac(), "device on outdated firmware, rebooting it");
            inner.reply(&Directive::Reboot, sender).await;
        }
        DiscoveryAction::Rediscover { index } => {
            let DiscoveryMessage::Announce {
                inbound_port,
                outbound_port,
                version,
                ..
            } = message
            else {
                return Err(CoreError::Internal(
                    "rediscover action for a non-announce message".into(),
                ));
            };
            let link = Link {
                endpoint: Some(Endpoint {
                    ip: sender.ip(),
                    inbound_port,
                    outbound_port,
                }),
                version,
            };
            if inner.registry.rediscover(index, link).await? {
                info!(index, %sender, "device rediscovered");
            }
        }
        DiscoveryAction::Ignore { index, status } => {
            trace!(index, %status, "announcement from device in a stable state");
        }
        DiscoveryAction::Register => register(inner, message, sender).await?,
        DiscoveryAction::Bootloader { reply, index } => {
            inner.reply(&reply, sender).await;
            if let Some(index) = index {
                let version = match message {
                    DiscoveryMessage::BootloaderAnnounce {
                        boot_version: Some(v),
                        ..
                    } => v,
                    _ => UNKNOWN_BOOTLOADER_VERSION.to_owned(),
                };
                if inner.registry.enter_bootloader(index, version).await? {
                    info!(index, "device entered its bootloader");
                }
            }
        }
        DiscoveryAction::Report => match &message {
            DiscoveryMessage::BootloaderError { mac, text } => {
                error!(%mac, "bootloader error: {text}");
            }
            DiscoveryMessage::DeviceError { mac, text } => {
                error!(%mac, "device error: {text}");
            }
            _ => {}
        },
    }
    Ok(())
}

async fn register(
    inner: &Arc<CommunicatorInner>,
    message: DiscoveryMessage,
    sender: SocketAddr,
) -> Result<(), CoreError> {
    let DiscoveryMessage::Announce {
        mac,
        inbound_port,
        outbound_port,
        version,
    } = message
    else {
        return Err(CoreError::Internal(
            "register action for a non-announce message".into(),
        ));
    };

    let slot = inner
        .registry
        .register(NewDevice {
            mac,
            name: inner.services.names.next_name(),
            fans: inner.config.default_fans,
            status: DeviceStatus::Available,
            link: Link {
                endpoint: Some(Endpoint {
                    ip: sender.ip(),
                    inbound_port,
                    outbound_port,
                }),
                version,
            },
        })
        .await?;
    info!(
        index = slot.index(),
        mac = %slot.mac(),
        name = slot.name(),
        "new device available"
    );
    inner.spawn_worker(slot).await;
    Ok(())
}

// ── Command routing ──
//
// Dispatch table from `Command` to registry operations, mailbox pushes
// and fleet-wide directives. Fan-out skips devices that are missing or not
// in an eligible state; the caller may be working from a stale snapshot.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Command, CommandResult, DutyCycleTarget, Target};
use crate::communicator::CommunicatorInner;
use crate::error::CoreError;
use crate::model::{DeviceStatus, Output};
use crate::protocol::Directive;
use crate::store::{DeviceSlot, MailboxCommand};

pub(crate) async fn route_command(
    inner: &Arc<CommunicatorInner>,
    command: Command,
) -> Result<CommandResult, CoreError> {
    debug!(opcode = %command.opcode(), "routing command");
    match command {
        // ── Fleet membership ─────────────────────────────────────────
        Command::Add { target } => {
            for slot in targets(inner, &target) {
                match inner
                    .registry
                    .transition_from(slot.index(), &[DeviceStatus::Available], DeviceStatus::Known)
                    .await
                {
                    Ok(true) => info!(index = slot.index(), mac = %slot.mac(), "device added"),
                    Ok(false) => {}
                    Err(e) => warn!(index = slot.index(), error = %e, "add skipped"),
                }
            }
            Ok(CommandResult::Ok)
        }

        Command::Disconnect { target } => {
            match target {
                Target::All => inner.broadcast(&Directive::Disconnect).await,
                Target::Selected(_) => {
                    for slot in connected(targets(inner, &target)) {
                        enqueue(&slot, MailboxCommand::Disconnect);
                    }
                }
            }
            Ok(CommandResult::Ok)
        }

        Command::Reboot { target } => {
            match target {
                Target::All => inner.broadcast(&Directive::Reboot).await,
                Target::Selected(_) => {
                    for slot in targets(inner, &target) {
                        reboot_one(inner, &slot).await;
                    }
                }
            }
            Ok(CommandResult::Ok)
        }

        // ── Lifecycle ────────────────────────────────────────────────
        Command::Shutdown => {
            info!("shutdown requested");
            let releasing: Vec<_> = connected(inner.registry.slots().iter().cloned()).collect();
            for slot in &releasing {
                enqueue(slot, MailboxCommand::Disconnect);
            }
            drain_mailboxes(inner, &releasing).await;
            inner.shutdown().await;
            Ok(CommandResult::Ok)
        }

        Command::Stop => {
            warn!("stop requested");
            inner.shutdown().await;
            Ok(CommandResult::Ok)
        }

        // ── Firmware ─────────────────────────────────────────────────
        Command::StartFirmwareUpdate(update) => {
            inner
                .firmware
                .start(update, inner.listener_port(), inner.config.http_port);
            Ok(CommandResult::Ok)
        }

        Command::StopFirmwareUpdate => {
            inner.firmware.stop();
            Ok(CommandResult::Ok)
        }

        // ── Discovery ────────────────────────────────────────────────
        Command::SetBroadcastMode(mode) => {
            inner.beacon.set_mode(mode);
            info!(%mode, "broadcast mode changed");
            Ok(publish_network(inner))
        }

        Command::SetBroadcastIp(ip) => {
            inner.beacon.set_ip(&ip)?;
            info!(%ip, "broadcast IP changed");
            Ok(publish_network(inner))
        }

        // ── Snapshots ────────────────────────────────────────────────
        Command::NetworkSnapshot => Ok(publish_network(inner)),

        Command::RegistrySnapshot => {
            let snapshot = inner.registry.snapshot();
            inner.publish(Output::Registry(Arc::clone(&snapshot)));
            Ok(CommandResult::Registry(snapshot))
        }

        // ── Fan control ──────────────────────────────────────────────
        Command::Chase {
            fan_id,
            rpm,
            target,
        } => {
            match target {
                Target::All => inner.broadcast(&Directive::Chase { fan_id, rpm }).await,
                Target::Selected(_) => {
                    for slot in targets(inner, &target) {
                        let directive = Directive::ChaseDevice {
                            fan_id,
                            rpm,
                            mac: slot.mac().to_string(),
                        };
                        inner.broadcast(&directive).await;
                    }
                }
            }
            Ok(CommandResult::Ok)
        }

        Command::ChaseSelection {
            fan_id,
            rpm,
            selection,
        } => {
            let directive = Directive::ChaseSelection {
                fan_id,
                rpm,
                selection,
            };
            inner.broadcast(&directive).await;
            Ok(CommandResult::Ok)
        }

        Command::PiSet {
            fan_id,
            kp,
            ki,
            target,
        } => {
            match target {
                Target::All => inner.broadcast(&Directive::PiSet { fan_id, kp, ki }).await,
                Target::Selected(_) => {
                    for slot in targets(inner, &target) {
                        let directive = Directive::PiSetDevice {
                            fan_id,
                            kp,
                            ki,
                            mac: slot.mac().to_string(),
                        };
                        inner.broadcast(&directive).await;
                    }
                }
            }
            info!(fan_id, kp, ki, "PI gains sent");
            Ok(CommandResult::Ok)
        }

        Command::DutyCycle { dc, target } => {
            match target {
                DutyCycleTarget::All { selection } => {
                    for slot in connected(inner.registry.slots().iter().cloned()) {
                        enqueue(
                            &slot,
                            MailboxCommand::DutyCycle {
                                dc,
                                selection: selection.clone(),
                            },
                        );
                    }
                }
                DutyCycleTarget::Selected(selections) => {
                    for fan in selections {
                        let Some(slot) = inner.registry.get(fan.index) else {
                            continue;
                        };
                        if slot.status() == DeviceStatus::Connected {
                            enqueue(
                                &slot,
                                MailboxCommand::DutyCycle {
                                    dc,
                                    selection: fan.selection,
                                },
                            );
                        }
                    }
                }
            }
            Ok(CommandResult::Ok)
        }

        Command::DutyCycleVector(values) => {
            let slots = inner.registry.slots();
            for (slot, dcs) in split_vector(&values, &slots, inner.config.max_fans) {
                enqueue(slot, MailboxCommand::DutyCycleVector(dcs));
            }
            Ok(CommandResult::Ok)
        }

        // ── Performance monitor ──────────────────────────────────────
        Command::PerfStats => {
            let stats = inner.perf.stats();
            inner.publish(Output::Performance(stats.clone()));
            Ok(CommandResult::Performance(stats))
        }

        Command::PerfReset => {
            inner.perf.reset();
            info!("performance statistics reset");
            Ok(CommandResult::Ok)
        }

        Command::PerfEnable => {
            inner.perf.set_enabled(true);
            info!("performance monitoring enabled");
            Ok(CommandResult::Ok)
        }

        Command::PerfDisable => {
            inner.perf.set_enabled(false);
            info!("performance monitoring disabled");
            Ok(CommandResult::Ok)
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Resolve a target to existing slots, silently skipping unknown indices.
fn targets(inner: &CommunicatorInner, target: &Target) -> Vec<Arc<DeviceSlot>> {
    match target {
        Target::All => inner.registry.slots().iter().cloned().collect(),
        Target::Selected(indices) => indices
            .iter()
            .filter_map(|&index| inner.registry.get(index))
            .collect(),
    }
}

fn connected(slots: impl IntoIterator<Item = Arc<DeviceSlot>>) -> impl Iterator<Item = Arc<DeviceSlot>> {
    slots
        .into_iter()
        .filter(|slot| slot.status() == DeviceStatus::Connected)
}

fn enqueue(slot: &DeviceSlot, command: MailboxCommand) {
    if slot.mailbox().push(command) {
        warn!(
            index = slot.index(),
            dropped = slot.mailbox().dropped(),
            "mailbox full; oldest command dropped"
        );
    }
}

async fn reboot_one(inner: &CommunicatorInner, slot: &DeviceSlot) {
    if slot.status() == DeviceStatus::Connected {
        enqueue(slot, MailboxCommand::Reboot);
        return;
    }
    match slot.endpoint() {
        Some(endpoint) => {
            let addr = SocketAddr::new(endpoint.ip, inner.config.broadcast_port);
            inner.send_control(&Directive::Reboot, addr).await;
        }
        None => {
            let directive = Directive::RebootDevice {
                mac: slot.mac().to_string(),
            };
            inner.broadcast(&directive).await;
        }
    }
}

/// Give workers a few periods to flush their mailboxes.
async fn drain_mailboxes(inner: &CommunicatorInner, slots: &[Arc<DeviceSlot>]) {
    let period = inner.config.period;
    let deadline = tokio::time::Instant::now() + period * 3;
    while slots.iter().any(|slot| !slot.mailbox().is_empty()) {
        if tokio::time::Instant::now() >= deadline || inner.cancel.is_cancelled() {
            debug!("mailboxes not drained before shutdown");
            return;
        }
        tokio::time::sleep(period / 4).await;
    }
}

fn publish_network(inner: &CommunicatorInner) -> CommandResult {
    let status = inner.network_status();
    inner.publish(Output::Network(status.clone()));
    CommandResult::Network(status)
}

/// Split a flat duty-cycle vector across connected devices.
///
/// Each device in registry order owns the next `fans` values of the
/// vector, whether or not it is connected; the cursor advances by the
/// device's own fan count and each connected device's share is
/// zero-padded to `width`. Consumption stops when the vector runs out.
pub(crate) fn split_vector<'a>(
    values: &[f64],
    slots: &'a [Arc<DeviceSlot>],
    width: usize,
) -> Vec<(&'a DeviceSlot, Vec<f64>)> {
    let mut out = Vec::new();
    let mut cursor = 0;
    for slot in slots {
        if cursor >= values.len() {
            break;
        }
        if slot.status() == DeviceStatus::Connected {
            let end = (cursor + slot.fans()).min(values.len());
            let mut dcs: Vec<f64> = values.get(cursor..end).unwrap_or_default().to_vec();
            dcs.resize(width, 0.0);
            out.push((slot.as_ref(), dcs));
        }
        cursor += slot.fans();
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::MacAddress;
    use crate::store::{DeviceRegistry, Link, NewDevice};
    use pretty_assertions::assert_eq;

    async fn registry(devices: &[(usize, DeviceStatus)]) -> DeviceRegistry {
        let registry = DeviceRegistry::new(4, 4, Duration::from_millis(10));
        for (i, (fans, status)) in devices.iter().enumerate() {
            registry
                .register(NewDevice {
                    mac: MacAddress::parse(format!("00:00:00:00:00:{i:02}")).unwrap(),
                    name: format!("d{i}"),
                    fans: *fans,
                    status: *status,
                    link: Link::default(),
                })
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn vector_is_split_by_each_devices_fan_count() {
        let registry = registry(&[
            (2, DeviceStatus::Connected),
            (3, DeviceStatus::Connected),
        ])
        .await;
        let slots = registry.slots();
        let split = split_vector(&[0.1, 0.2, 0.3, 0.4, 0.5], &slots, 4);
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].1, vec![0.1, 0.2, 0.0, 0.0]);
        assert_eq!(split[1].1, vec![0.3, 0.4, 0.5, 0.0]);
    }

    #[tokio::test]
    async fn disconnected_devices_still_consume_their_share() {
        let registry = registry(&[
            (2, DeviceStatus::Disconnected),
            (2, DeviceStatus::Connected),
        ])
        .await;
        let slots = registry.slots();
        let split = split_vector(&[0.1, 0.2, 0.3, 0.4], &slots, 4);
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].0.index(), 1);
        assert_eq!(split[0].1, vec![0.3, 0.4, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn short_vector_pads_and_stops() {
        let registry = registry(&[
            (3, DeviceStatus::Connected),
            (3, DeviceStatus::Connected),
        ])
        .await;
        let slots = registry.slots();
        let split = split_vector(&[0.9, 0.8], &slots, 4);
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].1, vec![0.9, 0.8, 0.0, 0.0]);
    }
}

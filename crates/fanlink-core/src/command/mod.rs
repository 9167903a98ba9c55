// ── Command API ──
//
// Every operator action flows through the `Command` enum. In-process
// callers build commands directly; the control plane sends
// `CommandVector`s that are decoded by opcode.

mod router;
mod vector;

pub(crate) use router::route_command;
pub use vector::CommandVector;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::CoreError;
use crate::firmware::FirmwareUpdate;
use crate::model::{BroadcastMode, DeviceSummary, NetworkStatus, PerfStats};

/// A command envelope sent through the command channel.
///
/// `response_tx` is `None` for fire-and-forget submissions.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: Option<tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>>,
}

/// Control-plane opcode names.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Opcode {
    Add,
    Disconnect,
    Reboot,
    Shutdown,
    Stop,
    FirmwareUpdateStart,
    FirmwareUpdateStop,
    SetBroadcastMode,
    SetBroadcastIp,
    NetworkSnapshot,
    RegistrySnapshot,
    Chase,
    ChaseSelection,
    PiSet,
    PerfStats,
    PerfReset,
    PerfEnable,
    PerfDisable,
    DcSingle,
    DcVector,
}

/// Which devices an operation applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    #[default]
    All,
    Selected(Vec<usize>),
}

/// Fan selection for one device: one `1`/`0` character per fan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanSelection {
    pub index: usize,
    pub selection: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DutyCycleTarget {
    /// Same selection on every connected device.
    All { selection: String },
    Selected(Vec<FanSelection>),
}

/// All operations the communicator accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ── Fleet membership ─────────────────────────────────────────────
    /// Adopt AVAILABLE devices.
    Add { target: Target },
    Disconnect { target: Target },
    Reboot { target: Target },

    // ── Lifecycle ────────────────────────────────────────────────────
    /// Disconnect every connected device, then stop.
    Shutdown,
    Stop,

    // ── Firmware ─────────────────────────────────────────────────────
    StartFirmwareUpdate(FirmwareUpdate),
    StopFirmwareUpdate,

    // ── Discovery ────────────────────────────────────────────────────
    SetBroadcastMode(BroadcastMode),
    SetBroadcastIp(String),

    // ── Snapshots ────────────────────────────────────────────────────
    NetworkSnapshot,
    RegistrySnapshot,

    // ── Fan control ──────────────────────────────────────────────────
    Chase { fan_id: u32, rpm: u32, target: Target },
    /// Chase on the selected fans of every device.
    ChaseSelection {
        fan_id: u32,
        rpm: u32,
        selection: String,
    },
    /// PI controller gains used while chasing.
    PiSet {
        fan_id: u32,
        kp: f64,
        ki: f64,
        target: Target,
    },
    DutyCycle { dc: f64, target: DutyCycleTarget },
    /// Flat duty-cycle vector consumed positionally per device.
    DutyCycleVector(Vec<f64>),

    // ── Performance monitor ──────────────────────────────────────────
    PerfStats,
    PerfReset,
    PerfEnable,
    PerfDisable,
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Add { .. } => Opcode::Add,
            Self::Disconnect { .. } => Opcode::Disconnect,
            Self::Reboot { .. } => Opcode::Reboot,
            Self::Shutdown => Opcode::Shutdown,
            Self::Stop => Opcode::Stop,
            Self::StartFirmwareUpdate(_) => Opcode::FirmwareUpdateStart,
            Self::StopFirmwareUpdate => Opcode::FirmwareUpdateStop,
            Self::SetBroadcastMode(_) => Opcode::SetBroadcastMode,
            Self::SetBroadcastIp(_) => Opcode::SetBroadcastIp,
            Self::NetworkSnapshot => Opcode::NetworkSnapshot,
            Self::RegistrySnapshot => Opcode::RegistrySnapshot,
            Self::Chase { .. } => Opcode::Chase,
            Self::ChaseSelection { .. } => Opcode::ChaseSelection,
            Self::PiSet { .. } => Opcode::PiSet,
            Self::DutyCycle { .. } => Opcode::DcSingle,
            Self::DutyCycleVector(_) => Opcode::DcVector,
            Self::PerfStats => Opcode::PerfStats,
            Self::PerfReset => Opcode::PerfReset,
            Self::PerfEnable => Opcode::PerfEnable,
            Self::PerfDisable => Opcode::PerfDisable,
        }
    }
}

/// Result of a routed command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Ok,
    Network(NetworkStatus),
    Registry(Arc<Vec<DeviceSummary>>),
    Performance(PerfStats),
}

// ── Control-plane command vectors ──
//
// One JSON object per command: `{"op": "<opcode>", "args": {...}}`.
// Arguments are decoded per opcode; unknown opcodes are rejected here so
// the router only ever sees well-formed commands.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Command, DutyCycleTarget, Opcode, Target};
use crate::error::CoreError;
use crate::firmware::FirmwareUpdate;
use crate::model::BroadcastMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandVector {
    pub op: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Deserialize)]
struct TargetArgs {
    #[serde(default)]
    target: Target,
}

#[derive(Deserialize)]
struct ModeArgs {
    mode: BroadcastMode,
}

#[derive(Deserialize)]
struct IpArgs {
    ip: String,
}

#[derive(Deserialize)]
struct ChaseArgs {
    fan_id: u32,
    rpm: u32,
    #[serde(default)]
    target: Target,
}

#[derive(Deserialize)]
struct ChaseSelectionArgs {
    fan_id: u32,
    rpm: u32,
    selection: String,
}

#[derive(Deserialize)]
struct PiSetArgs {
    #[serde(default)]
    fan_id: u32,
    kp: f64,
    ki: f64,
    #[serde(default)]
    target: Target,
}

#[derive(Deserialize)]
struct DutyCycleArgs {
    dc: f64,
    target: DutyCycleTarget,
}

#[derive(Deserialize)]
struct VectorArgs {
    values: Vec<f64>,
}

impl TryFrom<CommandVector> for Command {
    type Error = CoreError;

    fn try_from(vector: CommandVector) -> Result<Self, Self::Error> {
        let opcode = Opcode::from_str(&vector.op).map_err(|_| CoreError::UnknownOpcode {
            opcode: vector.op.clone(),
        })?;
        let args = vector.args;

        let command = match opcode {
            Opcode::Add => Self::Add {
                target: decode::<TargetArgs>(opcode, args)?.target,
            },
            Opcode::Disconnect => Self::Disconnect {
                target: decode::<TargetArgs>(opcode, args)?.target,
            },
            Opcode::Reboot => Self::Reboot {
                target: decode::<TargetArgs>(opcode, args)?.target,
            },
            Opcode::Shutdown => Self::Shutdown,
            Opcode::Stop => Self::Stop,
            Opcode::FirmwareUpdateStart => {
                Self::StartFirmwareUpdate(decode::<FirmwareUpdate>(opcode, args)?)
            }
            Opcode::FirmwareUpdateStop => Self::StopFirmwareUpdate,
            Opcode::SetBroadcastMode => {
                Self::SetBroadcastMode(decode::<ModeArgs>(opcode, args)?.mode)
            }
            Opcode::SetBroadcastIp => Self::SetBroadcastIp(decode::<IpArgs>(opcode, args)?.ip),
            Opcode::NetworkSnapshot => Self::NetworkSnapshot,
            Opcode::RegistrySnapshot => Self::RegistrySnapshot,
            Opcode::Chase => {
                let ChaseArgs { fan_id, rpm, target } = decode(opcode, args)?;
                Self::Chase {
                    fan_id,
                    rpm,
                    target,
                }
            }
            Opcode::ChaseSelection => {
                let ChaseSelectionArgs {
                    fan_id,
                    rpm,
                    selection,
                } = decode(opcode, args)?;
                Self::ChaseSelection {
                    fan_id,
                    rpm,
                    selection,
                }
            }
            Opcode::PiSet => {
                let PiSetArgs {
                    fan_id,
                    kp,
                    ki,
                    target,
                } = decode(opcode, args)?;
                Self::PiSet {
                    fan_id,
                    kp,
                    ki,
                    target,
                }
            }
            Opcode::DcSingle => {
                let DutyCycleArgs { dc, target } = decode(opcode, args)?;
                Self::DutyCycle { dc, target }
            }
            Opcode::DcVector => Self::DutyCycleVector(decode::<VectorArgs>(opcode, args)?.values),
            Opcode::PerfStats => Self::PerfStats,
            Opcode::PerfReset => Self::PerfReset,
            Opcode::PerfEnable => Self::PerfEnable,
            Opcode::PerfDisable => Self::PerfDisable,
        };
        Ok(command)
    }
}

fn decode<T: DeserializeOwned>(opcode: Opcode, args: serde_json::Value) -> Result<T, CoreError> {
    // Opcodes whose arguments are all optional accept a missing `args`.
    let args = if args.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| CoreError::InvalidArguments {
        opcode: opcode.to_string(),
        message: e.to_string(),
    })
}

// ── Core error types ──
//
// Errors surfaced by the communicator engine. Wire-level parse failures
// live in `protocol::ProtocolError` and are folded in through `From`.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::model::DeviceStatus;
use crate::protocol::ProtocolError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Network errors ───────────────────────────────────────────────
    #[error("Cannot bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket error while {operation}: {source}")]
    Socket {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Device {mac} has no known network endpoint")]
    NoEndpoint { mac: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Invalid MAC address {value:?}: expected 17 characters, got {len}")]
    InvalidMac { value: String, len: usize },

    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Device {mac} is already registered")]
    DuplicateDevice { mac: String },

    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition { from: DeviceStatus, to: DeviceStatus },

    // ── Command errors ───────────────────────────────────────────────
    #[error("Unrecognized opcode: {opcode}")]
    UnknownOpcode { opcode: String },

    #[error("Invalid arguments for {opcode}: {message}")]
    InvalidArguments { opcode: String, message: String },

    // ── Concurrency errors ───────────────────────────────────────────
    #[error("Timed out after {waited:?} waiting for the registry lock")]
    LockTimeout { waited: Duration },

    #[error("Communicator is stopped")]
    Stopped,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn socket(operation: &'static str, source: std::io::Error) -> Self {
        Self::Socket { operation, source }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error ends the task that hit it.
    ///
    /// Socket, parse and lock faults are recoverable; the affected
    /// operation is skipped and the task keeps going.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Internal(_) | Self::Stopped)
    }
}

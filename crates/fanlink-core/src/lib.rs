//! UDP communicator engine for fleets of embedded fan-array controllers.
//!
//! This crate owns the wire protocol, the device registry and the task
//! graph that keeps every device in sync:
//!
//! - **[`Communicator`]**: Central facade. [`new()`](Communicator::new)
//!   binds the shared sockets and seeds saved devices;
//!   [`start()`](Communicator::start) spawns the discovery listener, the
//!   beacon broadcaster, the output publisher, the command processor and
//!   one worker per device; [`stop()`](Communicator::stop) broadcasts a
//!   disconnect and joins them.
//!
//! - **[`DeviceRegistry`]**: Append-only, index-addressed device records.
//!   Reads are lock-free snapshots; status changes go through a single
//!   mutation lock acquired with a bounded wait.
//!
//! - **[`Command`]**: Typed control-plane requests routed through an
//!   `mpsc` channel. [`CommandVector`] is the `{op, args}` wire shape.
//!
//! - **[`Output`]**: Network status, registry snapshots, the flat feedback
//!   vector and performance statistics, fanned out over a broadcast
//!   channel from [`Communicator::subscribe`].
//!
//! - **Protocol** ([`protocol`]): Encoders and parsers for the
//!   pipe-delimited discovery and exchange datagrams.

pub mod beacon;
pub mod command;
pub mod communicator;
pub mod config;
mod discovery;
pub mod error;
pub mod firmware;
pub mod model;
pub mod perf;
pub mod protocol;
mod publisher;
pub mod services;
pub mod store;
mod worker;

// ── Primary re-exports ──────────────────────────────────────────────
pub use beacon::BeaconState;
pub use command::{
    Command, CommandResult, CommandVector, DutyCycleTarget, FanSelection, Opcode, Target,
};
pub use communicator::Communicator;
pub use config::{CommunicatorConfig, SavedDevice};
pub use error::CoreError;
pub use firmware::FirmwareUpdate;
pub use protocol::FanProfile;
pub use services::{FaultStats, Services};
pub use store::DeviceRegistry;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    BroadcastMode, DeviceStatus, DeviceSummary, Endpoint, Feedback, MacAddress, MetricStats,
    NetworkStatus, Output, PerfStats,
};

// ── Device store ──

mod mailbox;
mod registry;
mod slot;

pub use mailbox::{Mailbox, MailboxCommand};
pub use registry::DeviceRegistry;
pub use slot::{DeviceSlot, Link, NewDevice, UNKNOWN_VERSION};

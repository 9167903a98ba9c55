// ── Registry slot for one device ──
//
// Identity fields never change after creation. Status is a `watch`
// channel so workers can wake on transitions; link details and telemetry
// are swapped atomically so readers never block the exchange loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use tokio::sync::watch;

use super::mailbox::Mailbox;
use crate::model::{DeviceStatus, DeviceSummary, Endpoint, Feedback, MacAddress};

/// Version reported for devices that have not announced one yet.
pub const UNKNOWN_VERSION: &str = "(Unknown)";

/// Network details learned from the device's latest announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub endpoint: Option<Endpoint>,
    pub version: String,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            endpoint: None,
            version: UNKNOWN_VERSION.into(),
        }
    }
}

/// Identity and initial state for a registry append.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub mac: MacAddress,
    pub name: String,
    pub fans: usize,
    pub status: DeviceStatus,
    pub link: Link,
}

/// Sequence bookkeeping for the exchange channel.
#[derive(Debug, Default)]
pub(crate) struct ExchangeIndices {
    pub(crate) outbound: AtomicU64,
    pub(crate) inbound: AtomicU64,
    pub(crate) data: AtomicU64,
}

impl ExchangeIndices {
    pub(crate) fn reset(&self) {
        self.outbound.store(0, Ordering::Relaxed);
        self.inbound.store(0, Ordering::Relaxed);
        self.data.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct DeviceSlot {
    index: usize,
    mac: MacAddress,
    name: String,
    fans: usize,
    status: watch::Sender<DeviceStatus>,
    link: ArcSwap<Link>,
    feedback: ArcSwap<Feedback>,
    mailbox: Mailbox,
    pub(crate) indices: ExchangeIndices,
}

impl DeviceSlot {
    pub(crate) fn new(
        index: usize,
        device: NewDevice,
        width: usize,
        mailbox_capacity: usize,
    ) -> Self {
        let (status, _) = watch::channel(device.status);
        Self {
            index,
            mac: device.mac,
            name: device.name,
            fans: device.fans,
            status,
            link: ArcSwap::from_pointee(device.link),
            feedback: ArcSwap::from_pointee(Feedback::zeroed(width)),
            mailbox: Mailbox::new(mailbox_capacity),
            indices: ExchangeIndices::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn mac(&self) -> &MacAddress {
        &self.mac
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fans(&self) -> usize {
        self.fans
    }

    pub fn status(&self) -> DeviceStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<DeviceStatus> {
        self.status.subscribe()
    }

    pub fn link(&self) -> Arc<Link> {
        self.link.load_full()
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.link.load().endpoint
    }

    pub fn version(&self) -> String {
        self.link.load().version.clone()
    }

    pub fn feedback(&self) -> Arc<Feedback> {
        self.feedback.load_full()
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn summary(&self) -> DeviceSummary {
        let link = self.link.load();
        DeviceSummary {
            index: self.index,
            name: self.name.clone(),
            mac: self.mac.clone(),
            status: self.status(),
            fans: self.fans,
            version: link.version.clone(),
            ip: link.endpoint.map(|e| e.ip),
            dropped_commands: self.mailbox.dropped(),
        }
    }

    // Mutators are crate-private: status and link only change through the
    // registry, which serializes them and republishes the snapshot.

    pub(crate) fn set_status(&self, status: DeviceStatus) {
        self.status.send_replace(status);
    }

    pub(crate) fn set_link(&self, link: Link) {
        self.link.store(Arc::new(link));
    }

    pub(crate) fn set_version(&self, version: String) {
        self.link.rcu(|current| Link {
            endpoint: current.endpoint,
            version: version.clone(),
        });
    }

    pub(crate) fn store_feedback(&self, feedback: Feedback) {
        self.feedback.store(Arc::new(feedback));
    }
}

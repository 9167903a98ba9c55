// ── Device registry ──
//
// Append-only table of devices. Indices are assigned at registration and
// never reused or reordered. Reads are lock-free; mutations are
// serialized by a mutex acquired with a bounded wait, and every
// committed mutation republishes the registry snapshot.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard, watch};

use super::slot::{DeviceSlot, Link, NewDevice};
use crate::error::CoreError;
use crate::model::{DeviceStatus, DeviceSummary};
use crate::services::acquire_within;

pub struct DeviceRegistry {
    slots: ArcSwap<Vec<Arc<DeviceSlot>>>,
    /// MAC string -> index.
    by_mac: DashMap<String, usize>,
    write_lock: Mutex<()>,
    lock_timeout: Duration,
    width: usize,
    mailbox_capacity: usize,
    snapshot: watch::Sender<Arc<Vec<DeviceSummary>>>,
}

impl DeviceRegistry {
    /// `width` is the fleet-wide fan count telemetry is padded to.
    pub fn new(width: usize, mailbox_capacity: usize, lock_timeout: Duration) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            slots: ArcSwap::from_pointee(Vec::new()),
            by_mac: DashMap::new(),
            write_lock: Mutex::new(()),
            lock_timeout,
            width,
            mailbox_capacity,
            snapshot,
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, index: usize) -> Option<Arc<DeviceSlot>> {
        self.slots.load().get(index).cloned()
    }

    pub fn find(&self, mac: &str) -> Option<Arc<DeviceSlot>> {
        let index = *self.by_mac.get(mac)?;
        self.get(index)
    }

    pub fn len(&self) -> usize {
        self.slots.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All slots in index order.
    pub fn slots(&self) -> Arc<Vec<Arc<DeviceSlot>>> {
        self.slots.load_full()
    }

    /// Fresh summary of every device, including live drop counters.
    pub fn snapshot(&self) -> Arc<Vec<DeviceSummary>> {
        Arc::new(self.slots.load().iter().map(|s| s.summary()).collect())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<DeviceSummary>>> {
        self.snapshot.subscribe()
    }

    /// All RPMs then all duty cycles, `width` values per device.
    pub fn feedback_vector(&self) -> Vec<f64> {
        let slots = self.slots.load();
        let mut rpm = Vec::with_capacity(slots.len() * self.width);
        let mut duty_cycle = Vec::with_capacity(slots.len() * self.width);
        for slot in slots.iter() {
            let feedback = slot.feedback();
            rpm.extend(padded(&feedback.rpm, self.width));
            duty_cycle.extend(padded(&feedback.duty_cycle, self.width));
        }
        rpm.extend(duty_cycle);
        rpm
    }

    pub fn width(&self) -> usize {
        self.width
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Append a device and return its slot.
    pub async fn register(&self, device: NewDevice) -> Result<Arc<DeviceSlot>, CoreError> {
        let _guard = self.lock().await?;
        if self.by_mac.contains_key(device.mac.as_str()) {
            return Err(CoreError::DuplicateDevice {
                mac: device.mac.to_string(),
            });
        }

        let current = self.slots.load_full();
        let index = current.len();
        let mac = device.mac.to_string();
        let slot = Arc::new(DeviceSlot::new(
            index,
            device,
            self.width,
            self.mailbox_capacity,
        ));

        let mut next = Vec::with_capacity(index + 1);
        next.extend(current.iter().cloned());
        next.push(Arc::clone(&slot));
        self.slots.store(Arc::new(next));
        self.by_mac.insert(mac, index);

        self.publish();
        Ok(slot)
    }

    /// Move a device to `to`, validating against the transition table.
    ///
    /// Setting the current status again is a no-op. Returns the previous
    /// status.
    pub async fn set_status(&self, index: usize, to: DeviceStatus) -> Result<DeviceStatus, CoreError> {
        let slot = self.require(index)?;
        let _guard = self.lock().await?;
        let from = slot.status();
        if from == to {
            return Ok(from);
        }
        if !from.can_transition_to(to) {
            return Err(CoreError::InvalidTransition { from, to });
        }
        slot.set_status(to);
        self.publish();
        Ok(from)
    }

    /// Move a device to `to` only if its current status is in `from`.
    ///
    /// Returns whether the transition happened.
    pub async fn transition_from(
        &self,
        index: usize,
        from: &[DeviceStatus],
        to: DeviceStatus,
    ) -> Result<bool, CoreError> {
        let slot = self.require(index)?;
        let _guard = self.lock().await?;
        let current = slot.status();
        if !from.contains(&current) || !current.can_transition_to(to) {
            return Ok(false);
        }
        slot.set_status(to);
        self.publish();
        Ok(true)
    }

    /// A disconnected or updating device announced itself again: record
    /// where it is and make it eligible for a handshake.
    pub async fn rediscover(&self, index: usize, link: Link) -> Result<bool, CoreError> {
        let slot = self.require(index)?;
        let _guard = self.lock().await?;
        if !matches!(
            slot.status(),
            DeviceStatus::Disconnected | DeviceStatus::Updating
        ) {
            return Ok(false);
        }
        slot.set_link(link);
        slot.set_status(DeviceStatus::Known);
        self.publish();
        Ok(true)
    }

    /// A registered device announced itself from its bootloader.
    pub async fn enter_bootloader(&self, index: usize, version: String) -> Result<bool, CoreError> {
        let slot = self.require(index)?;
        let _guard = self.lock().await?;
        slot.set_version(version);
        let entered = slot.status().can_transition_to(DeviceStatus::Updating);
        if entered {
            slot.set_status(DeviceStatus::Updating);
        }
        self.publish();
        Ok(entered)
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn lock(&self) -> Result<MutexGuard<'_, ()>, CoreError> {
        acquire_within(&self.write_lock, self.lock_timeout).await
    }

    fn require(&self, index: usize) -> Result<Arc<DeviceSlot>, CoreError> {
        self.get(index).ok_or_else(|| CoreError::DeviceNotFound {
            identifier: format!("index {index}"),
        })
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.snapshot());
    }
}

fn padded(values: &[f64], width: usize) -> impl Iterator<Item = f64> + '_ {
    values
        .iter()
        .copied()
        .chain(std::iter::repeat(0.0))
        .take(width)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{Endpoint, Feedback, MacAddress};
    use pretty_assertions::assert_eq;

    fn device(mac: &str, status: DeviceStatus) -> NewDevice {
        NewDevice {
            mac: MacAddress::parse(mac).unwrap(),
            name: "Zephyr".into(),
            fans: 2,
            status,
            link: Link::default(),
        }
    }

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(3, 4, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn indices_are_assigned_in_order() {
        let registry = registry();
        let a = registry
            .register(device("00:00:00:00:00:01", DeviceStatus::Available))
            .await
            .unwrap();
        let b = registry
            .register(device("00:00:00:00:00:02", DeviceStatus::Available))
            .await
            .unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));
        assert_eq!(registry.find("00:00:00:00:00:02").unwrap().index(), 1);
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_mac_is_rejected() {
        let registry = registry();
        registry
            .register(device("00:00:00:00:00:01", DeviceStatus::Available))
            .await
            .unwrap();
        let err = registry
            .register(device("00:00:00:00:00:01", DeviceStatus::Known))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateDevice { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let registry = registry();
        registry
            .register(device("00:00:00:00:00:01", DeviceStatus::Available))
            .await
            .unwrap();
        let err = registry
            .set_status(0, DeviceStatus::Connected)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(registry.get(0).unwrap().status(), DeviceStatus::Available);
    }

    #[tokio::test]
    async fn rediscover_only_from_disconnected_or_updating() {
        let registry = registry();
        registry
            .register(device("00:00:00:00:00:01", DeviceStatus::Disconnected))
            .await
            .unwrap();
        registry
            .register(device("00:00:00:00:00:02", DeviceStatus::Available))
            .await
            .unwrap();
        let link = Link {
            endpoint: Some(Endpoint {
                ip: "10.0.0.7".parse().unwrap(),
                inbound_port: 4000,
                outbound_port: 4001,
            }),
            version: "SK-2".into(),
        };
        assert!(registry.rediscover(0, link.clone()).await.unwrap());
        assert!(!registry.rediscover(1, link).await.unwrap());
        let slot = registry.get(0).unwrap();
        assert_eq!(slot.status(), DeviceStatus::Known);
        assert_eq!(slot.version(), "SK-2");
        assert_eq!(registry.get(1).unwrap().status(), DeviceStatus::Available);
    }

    #[tokio::test]
    async fn mutation_times_out_when_lock_is_held() {
        let registry = registry();
        registry
            .register(device("00:00:00:00:00:01", DeviceStatus::Available))
            .await
            .unwrap();
        let _held = registry.write_lock.lock().await;
        let err = registry
            .set_status(0, DeviceStatus::Known)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { .. }));
        assert_eq!(registry.get(0).unwrap().status(), DeviceStatus::Available);
    }

    #[tokio::test]
    async fn mutations_republish_snapshot() {
        let registry = registry();
        let mut rx = registry.subscribe();
        registry
            .register(device("00:00:00:00:00:01", DeviceStatus::Available))
            .await
            .unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update()[0].status, DeviceStatus::Available);
        registry.set_status(0, DeviceStatus::Known).await.unwrap();
        assert_eq!(rx.borrow_and_update()[0].status, DeviceStatus::Known);
    }

    #[tokio::test]
    async fn feedback_vector_is_rpms_then_duty_cycles() {
        let registry = registry();
        let a = registry
            .register(device("00:00:00:00:00:01", DeviceStatus::Known))
            .await
            .unwrap();
        registry
            .register(device("00:00:00:00:00:02", DeviceStatus::Known))
            .await
            .unwrap();
        a.store_feedback(Feedback {
            rpm: vec![100.0, 200.0, 300.0],
            duty_cycle: vec![0.1, 0.2, 0.3],
        });
        assert_eq!(
            registry.feedback_vector(),
            vec![100.0, 200.0, 300.0, 0.0, 0.0, 0.0, 0.1, 0.2, 0.3, 0.0, 0.0, 0.0]
        );
    }
}

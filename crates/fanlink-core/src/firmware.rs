// ── Firmware update orchestration ──
//
// While an update is active, application-mode devices reporting any other
// version are told to reboot into their bootloader, and bootloaders are
// handed the flash directive instead of a launch directive.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};

use crate::protocol::{Directive, FlashTarget};

/// Operator request to flash the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareUpdate {
    /// Version devices must report once flashed.
    pub version: String,
    /// Image name as served over HTTP.
    pub filename: String,
    /// Image size in bytes.
    pub size: u64,
}

#[derive(Debug)]
struct ActiveUpdate {
    update: FirmwareUpdate,
    directive: Directive,
}

#[derive(Debug, Default)]
pub struct FirmwareOrchestrator {
    active: ArcSwapOption<ActiveUpdate>,
}

impl FirmwareOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin an update. Replaces any update already in progress.
    pub fn start(&self, update: FirmwareUpdate, listener_port: u16, http_port: u16) {
        let directive = Directive::Flash(FlashTarget {
            listener_port,
            http_port,
            filename: update.filename.clone(),
            size: update.size,
        });
        tracing::info!(
            version = %update.version,
            filename = %update.filename,
            size = update.size,
            "firmware update started"
        );
        self.active
            .store(Some(Arc::new(ActiveUpdate { update, directive })));
    }

    pub fn stop(&self) {
        if self.active.swap(None).is_some() {
            tracing::info!("firmware update stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load().is_some()
    }

    pub fn current(&self) -> Option<FirmwareUpdate> {
        self.active.load().as_ref().map(|a| a.update.clone())
    }

    /// Whether a device running `version` must reboot into its bootloader.
    pub fn needs_reboot(&self, version: &str) -> bool {
        self.active
            .load()
            .as_ref()
            .is_some_and(|a| a.update.version != version)
    }

    /// Directive for a bootloader that just announced itself, if flashing.
    pub fn flash_directive(&self) -> Option<Directive> {
        self.active.load().as_ref().map(|a| a.directive.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update() -> FirmwareUpdate {
        FirmwareUpdate {
            version: "SK-3".into(),
            filename: "sk3.bin".into(),
            size: 2048,
        }
    }

    #[test]
    fn inactive_by_default() {
        let firmware = FirmwareOrchestrator::new();
        assert!(!firmware.is_active());
        assert!(!firmware.needs_reboot("anything"));
        assert!(firmware.flash_directive().is_none());
    }

    #[test]
    fn active_update_flags_mismatched_versions() {
        let firmware = FirmwareOrchestrator::new();
        firmware.start(update(), 57584, 8000);
        assert!(firmware.needs_reboot("SK-2"));
        assert!(!firmware.needs_reboot("SK-3"));
        assert_eq!(
            firmware.flash_directive().map(|d| d.encode("CT")).as_deref(),
            Some("U|CT|57584|8000|sk3.bin|2048")
        );
        firmware.stop();
        assert!(!firmware.is_active());
        assert!(!firmware.needs_reboot("SK-2"));
    }
}

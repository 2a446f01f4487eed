//! Picks the firmware release to offer a probed device.

use serde::Serialize;

use super::{FirmwareRelease, ReleaseCatalog};
use crate::device_info::DeviceInfo;
use crate::version::parse_lenient;

/// Result of matching a device against the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlan {
    pub selected_release: Option<FirmwareRelease>,
    pub device_info: DeviceInfo,
}

impl UpdatePlan {
    /// Whether the selected release is newer than the firmware on the device.
    pub fn update_available(&self) -> bool {
        self.selected_release
            .as_ref()
            .is_some_and(|release| release.version() > &self.device_info.firmware_version())
    }

    /// Whether the device's bootloader can run the selected release.
    ///
    /// `None` when there is no selection, the release sets no minimum, or the
    /// device bootloader version is unknown.
    pub fn bootloader_compatible(&self) -> Option<bool> {
        let minimum = self.selected_release.as_ref()?.min_bootloader_version.as_ref()?;
        let installed = self
            .device_info
            .bootloader_version
            .as_deref()
            .and_then(parse_lenient)?;
        Some(&installed >= minimum)
    }
}

/// Select the newest eligible firmware for `device`.
///
/// Beta releases are skipped unless `include_beta` is set. A board missing
/// from the catalog yields a plan with no release.
pub fn select_update(catalog: &ReleaseCatalog, device: &DeviceInfo, include_beta: bool) -> UpdatePlan {
    let selected_release = catalog.board(&device.model_number).and_then(|board| {
        board
            .firmware
            .iter()
            .find(|release| include_beta || !release.info.is_beta)
            .cloned()
    });

    UpdatePlan {
        selected_release,
        device_info: device.clone(),
    }
}

//! Device Information Service probe.
//!
//! Reads manufacturer, model, firmware and software revision strings from
//! a connected peripheral. Bluefruit firmware reports its bootloader version
//! as a suffix of the firmware revision (`"0.6.7, 0.1"`); older firmware
//! omits it and a per-model default applies.

use semver::Version;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::traits::{LinkError, PeripheralConnection};
use crate::version::{parse_lenient, parse_or_zero};

// ============================================================================
// GATT Identifiers
// ============================================================================

/// Expand a 16-bit SIG-assigned UUID onto the Bluetooth base UUID.
pub const fn bluetooth_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5F9B_34FB)
}

pub const DEVICE_INFORMATION_SERVICE_UUID: Uuid = bluetooth_uuid(0x180A);
pub const MANUFACTURER_NAME_UUID: Uuid = bluetooth_uuid(0x2A29);
pub const MODEL_NUMBER_UUID: Uuid = bluetooth_uuid(0x2A24);
pub const FIRMWARE_REVISION_UUID: Uuid = bluetooth_uuid(0x2A26);
pub const SOFTWARE_REVISION_UUID: Uuid = bluetooth_uuid(0x2A28);

/// Separator between application and bootloader versions in the firmware revision.
const BOOTLOADER_SEPARATOR: &str = ", ";

/// Bootloader assumed for boards whose firmware predates the revision suffix.
pub static DEFAULT_BOOTLOADER_VERSIONS: &[(&str, &str)] = &[
    ("BLEFRIEND", "0.0"),
    ("BLEFRIEND32", "0.0"),
    ("BLESPIFRIEND", "0.0"),
    ("BLEUARTFRIEND", "0.0"),
];

fn default_bootloader_version(model_number: &str) -> Option<&'static str> {
    DEFAULT_BOOTLOADER_VERSIONS
        .iter()
        .find(|(model, _)| model.eq_ignore_ascii_case(model_number))
        .map(|(_, version)| *version)
}

/// Snapshot of a peripheral's identity strings. Rebuilt on every probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub manufacturer: Option<String>,
    pub model_number: String,
    pub firmware_revision: String,
    pub software_revision: Option<String>,
    /// `None` when neither the revision nor the default table names one.
    pub bootloader_version: Option<String>,
    #[serde(skip)]
    bootloader_from_default: bool,
}

impl DeviceInfo {
    pub fn new(
        manufacturer: Option<String>,
        model_number: impl Into<String>,
        firmware_revision: impl Into<String>,
        software_revision: Option<String>,
    ) -> Self {
        let model_number = model_number.into();
        let firmware_revision = firmware_revision.into();

        let embedded = firmware_revision
            .split_once(BOOTLOADER_SEPARATOR)
            .map(|(_, suffix)| suffix.trim())
            .filter(|suffix| parse_lenient(suffix).is_some());
        let (bootloader_version, bootloader_from_default) = match embedded {
            Some(version) => (Some(version.to_string()), false),
            None => match default_bootloader_version(&model_number) {
                Some(version) => (Some(version.to_string()), true),
                None => (None, false),
            },
        };

        Self {
            manufacturer,
            model_number,
            firmware_revision,
            software_revision,
            bootloader_version,
            bootloader_from_default,
        }
    }

    /// Application firmware version. Unparsable revisions read as `0.0.0`.
    pub fn firmware_version(&self) -> Version {
        let application = self
            .firmware_revision
            .split(BOOTLOADER_SEPARATOR)
            .next()
            .unwrap_or_default();
        parse_or_zero(application)
    }

    /// Whether the bootloader version was assumed from the model rather than reported.
    pub fn has_default_bootloader_version(&self) -> bool {
        self.bootloader_from_default
    }

    #[cfg(test)]
    pub(crate) fn with_bootloader_version(mut self, version: Option<String>) -> Self {
        self.bootloader_version = version;
        self.bootloader_from_default = false;
        self
    }
}

/// Reasons a probe produces no [`DeviceInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "camelCase")]
pub enum ProbeError {
    /// No Device Information Service, or it does not report a firmware revision.
    #[error("Device Information Service not found")]
    DeviceInfoServiceNotFound,

    #[error("Connection failed: {0}")]
    ConnectionFailed(LinkError),
}

impl ProbeError {
    /// Get a user-friendly error code for support purposes.
    pub fn error_code(&self) -> &'static str {
        match self {
            ProbeError::DeviceInfoServiceNotFound => "DIS-001",
            ProbeError::ConnectionFailed(_) => "DIS-002",
        }
    }
}

fn decode(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

async fn read_string(
    peripheral: &dyn PeripheralConnection,
    available: &[Uuid],
    characteristic: Uuid,
) -> Result<Option<String>, ProbeError> {
    if !available.contains(&characteristic) {
        debug!("Characteristic {} not present", characteristic);
        return Ok(None);
    }
    match peripheral.read(characteristic).await {
        Ok(value) => Ok(Some(decode(&value)).filter(|s| !s.is_empty())),
        Err(e) if e.is_disconnect() => Err(ProbeError::ConnectionFailed(e)),
        Err(e) => {
            warn!("Reading {} failed: {}", characteristic, e);
            Ok(None)
        }
    }
}

/// Read the Device Information Service of a connected peripheral.
pub async fn probe(peripheral: &dyn PeripheralConnection) -> Result<DeviceInfo, ProbeError> {
    let services = peripheral
        .discover_services()
        .await
        .map_err(ProbeError::ConnectionFailed)?;
    if !services.contains(&DEVICE_INFORMATION_SERVICE_UUID) {
        return Err(ProbeError::DeviceInfoServiceNotFound);
    }

    let available = peripheral
        .discover_characteristics(DEVICE_INFORMATION_SERVICE_UUID)
        .await
        .map_err(ProbeError::ConnectionFailed)?;

    let manufacturer = read_string(peripheral, &available, MANUFACTURER_NAME_UUID).await?;
    let model_number = read_string(peripheral, &available, MODEL_NUMBER_UUID).await?;
    let firmware_revision = read_string(peripheral, &available, FIRMWARE_REVISION_UUID).await?;
    let software_revision = read_string(peripheral, &available, SOFTWARE_REVISION_UUID).await?;

    let Some(firmware_revision) = firmware_revision else {
        warn!("{} reports no firmware revision", peripheral.id());
        return Err(ProbeError::DeviceInfoServiceNotFound);
    };

    let info = DeviceInfo::new(
        manufacturer,
        model_number.unwrap_or_default(),
        firmware_revision,
        software_revision,
    );
    debug!(
        "Probed {}: model {}, firmware {}, bootloader {:?}",
        peripheral.id(),
        info.model_number,
        info.firmware_revision,
        info.bootloader_version
    );
    Ok(info)
}

//! Firmware update pipeline for Bluefruit LE peripherals.
//!
//! - [`device_info`] probes a connected peripheral's Device Information Service
//! - [`releases`] parses the release catalog and selects an update
//! - [`updater`] coordinates checks and hands images to the DFU engine
//! - [`dfu`] drives the Nordic legacy DFU transfer
//!
//! The BLE stack and downloads are reached only through [`traits`]. The
//! `btleplug` and `http` features add real implementations of them.

pub mod device_info;
pub mod dfu;
pub mod releases;
pub mod settings;
pub mod traits;
pub mod updater;
pub mod version;

#[cfg(feature = "btleplug")]
pub mod btle;

#[cfg(test)]
mod test_helpers;

pub use device_info::{probe, DeviceInfo, ProbeError};
pub use dfu::{DfuConfig, DfuEngine, DfuEvent, DfuFailure, DfuOutcome, FirmwareImage, TransferState};
pub use releases::{parse_catalog, select_update, CatalogStore, ReleaseCatalog, UpdatePlan};
pub use settings::{SettingsManager, UpdaterSettings};
pub use updater::{CheckState, FirmwareUpdater, UpdateCheckOutcome, UpdateCheckResult, UpdateError};

//! Configuration constants for the Nordic legacy BLE DFU protocol.

use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// GATT Identifiers
// ============================================================================

/// Legacy DFU service.
pub const DFU_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001530_1212_EFDE_1523_785FEABCD123);

/// Control point: commands in (write with response), responses out (notify).
pub const DFU_CONTROL_POINT_UUID: Uuid = Uuid::from_u128(0x00001531_1212_EFDE_1523_785FEABCD123);

/// Packet characteristic: image data (write without response).
pub const DFU_PACKET_UUID: Uuid = Uuid::from_u128(0x00001532_1212_EFDE_1523_785FEABCD123);

/// DFU version characteristic (read). Absent on very old bootloaders.
pub const DFU_VERSION_UUID: Uuid = Uuid::from_u128(0x00001534_1212_EFDE_1523_785FEABCD123);

/// DFU version value reported by an application exposing buttonless DFU.
pub const DFU_VERSION_APPLICATION: u16 = 0x0001;

// ============================================================================
// Default Timeouts
// ============================================================================

/// Bound on locating the DFU service and its characteristics.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the peripheral reappearing in bootloader mode after the mode switch.
pub const RECONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Bound on each acknowledgment of the final validation exchange.
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on Start DFU / Init responses. Covers the flash erase after Start.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between lookups while waiting for the bootloader to advertise.
pub const SCAN_INTERVAL: Duration = Duration::from_millis(500);

/// Bound on the best-effort abort write during cancellation.
pub const ABORT_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Transfer Configuration
// ============================================================================

/// Maximum number of retries for a single packet write.
pub const MAX_PACKET_RETRIES: u8 = 3;

/// Packets sent per credit window before a receipt notification is required.
pub const DEFAULT_PACKET_RECEIPT_INTERVAL: u16 = 10;

/// Write-without-response payload size with the default ATT MTU (23 - 3).
pub const DEFAULT_PACKET_SIZE: usize = 20;

// ============================================================================
// DFU Opcodes (Legacy DFU Protocol)
// ============================================================================

/// Legacy DFU control point opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum DfuOpcode {
    /// Start DFU with image type (also the buttonless "enter bootloader" command)
    StartDfu = 0x01,
    /// Initialize DFU parameters (init packet follows on the packet characteristic)
    InitDfuParams = 0x02,
    /// Receive firmware image (data follows on the packet characteristic)
    ReceiveFirmwareImage = 0x03,
    /// Validate the received firmware
    ValidateFirmware = 0x04,
    /// Activate firmware and reset device
    ActivateAndReset = 0x05,
    /// System reset (used as abort)
    SystemReset = 0x06,
    /// Report received image size
    ReportReceivedImageSize = 0x07,
    /// Request packet receipt notification interval
    PacketReceiptNotificationRequest = 0x08,
    /// Response from bootloader
    Response = 0x10,
    /// Packet receipt notification from bootloader
    PacketReceiptNotification = 0x11,
}

impl DfuOpcode {
    /// Parse an opcode from a byte value.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(DfuOpcode::StartDfu),
            0x02 => Some(DfuOpcode::InitDfuParams),
            0x03 => Some(DfuOpcode::ReceiveFirmwareImage),
            0x04 => Some(DfuOpcode::ValidateFirmware),
            0x05 => Some(DfuOpcode::ActivateAndReset),
            0x06 => Some(DfuOpcode::SystemReset),
            0x07 => Some(DfuOpcode::ReportReceivedImageSize),
            0x08 => Some(DfuOpcode::PacketReceiptNotificationRequest),
            0x10 => Some(DfuOpcode::Response),
            0x11 => Some(DfuOpcode::PacketReceiptNotification),
            _ => None,
        }
    }
}

/// Init packet sub-commands sent with `InitDfuParams`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InitPacketStep {
    Receive = 0x00,
    Complete = 0x01,
}

/// DFU image type (what firmware component is being updated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DfuImageType {
    SoftDevice = 0x01,
    Bootloader = 0x02,
    SoftDeviceBootloader = 0x03,
    Application = 0x04,
}

/// DFU response status codes from the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum DfuResponseStatus {
    Success = 0x01,
    InvalidState = 0x02,
    NotSupported = 0x03,
    DataSizeExceedsLimit = 0x04,
    CrcError = 0x05,
    OperationFailed = 0x06,
}

impl DfuResponseStatus {
    /// Parse a status code from a byte value.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(DfuResponseStatus::Success),
            0x02 => Some(DfuResponseStatus::InvalidState),
            0x03 => Some(DfuResponseStatus::NotSupported),
            0x04 => Some(DfuResponseStatus::DataSizeExceedsLimit),
            0x05 => Some(DfuResponseStatus::CrcError),
            0x06 => Some(DfuResponseStatus::OperationFailed),
            _ => None,
        }
    }

    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            DfuResponseStatus::Success => "Operation successful",
            DfuResponseStatus::InvalidState => "Invalid state for this operation",
            DfuResponseStatus::NotSupported => "Operation not supported",
            DfuResponseStatus::DataSizeExceedsLimit => "Data size exceeds limit",
            DfuResponseStatus::CrcError => "CRC validation failed",
            DfuResponseStatus::OperationFailed => "Operation failed",
        }
    }
}

// ============================================================================
// Runtime Configuration
// ============================================================================

/// Tunables for one DFU engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DfuConfig {
    pub discovery_timeout: Duration,
    pub reconnect_timeout: Duration,
    pub validation_timeout: Duration,
    pub response_timeout: Duration,
    pub scan_interval: Duration,
    /// Credit window size. Values below 1 are raised to 1 by the engine.
    pub packet_receipt_interval: u16,
    pub max_packet_retries: u8,
}

impl Default for DfuConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: DISCOVERY_TIMEOUT,
            reconnect_timeout: RECONNECT_TIMEOUT,
            validation_timeout: VALIDATION_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
            scan_interval: SCAN_INTERVAL,
            packet_receipt_interval: DEFAULT_PACKET_RECEIPT_INTERVAL,
            max_packet_retries: MAX_PACKET_RETRIES,
        }
    }
}

impl DfuConfig {
    /// Copy of this configuration with a credit window of at least one packet.
    pub fn with_flow_control(mut self) -> Self {
        self.packet_receipt_interval = self.packet_receipt_interval.max(1);
        self
    }
}

/// Whether a DFU version value means the peripheral is still running its application.
pub fn is_application_mode(version: u16) -> bool {
    version == DFU_VERSION_APPLICATION
}

//! Control point command encoding and notification parsing for legacy BLE DFU.
//!
//! Commands are written to the control point characteristic. Image sizes,
//! the init packet and firmware data go to the packet characteristic.
//! Every notification on the control point is either a response
//! (`0x10 <request> <status> [payload]`) or a packet receipt
//! (`0x11 <bytes received u32 LE>`).

use super::config::{DfuImageType, DfuOpcode, DfuResponseStatus, InitPacketStep};
use super::error::{DfuFailure, DfuResult};

// ============================================================================
// DFU Command Builders
// ============================================================================

/// `[0x01, image_type]`. Also the buttonless "jump to bootloader" command.
pub fn start_dfu(image_type: DfuImageType) -> [u8; 2] {
    [DfuOpcode::StartDfu as u8, image_type as u8]
}

/// Image size triple sent on the packet characteristic after Start DFU.
///
/// Layout: `[softdevice u32 LE, bootloader u32 LE, application u32 LE]`.
pub fn image_sizes(softdevice_size: u32, bootloader_size: u32, app_size: u32) -> [u8; 12] {
    let mut data = [0u8; 12];
    data[0..4].copy_from_slice(&softdevice_size.to_le_bytes());
    data[4..8].copy_from_slice(&bootloader_size.to_le_bytes());
    data[8..12].copy_from_slice(&app_size.to_le_bytes());
    data
}

/// `[0x02, step]`.
pub fn init_params(step: InitPacketStep) -> [u8; 2] {
    [DfuOpcode::InitDfuParams as u8, step as u8]
}

/// `[0x08, n LE u16]`. `n == 0` disables receipts.
pub fn packet_receipt_request(packets: u16) -> [u8; 3] {
    let n = packets.to_le_bytes();
    [DfuOpcode::PacketReceiptNotificationRequest as u8, n[0], n[1]]
}

pub fn receive_firmware_image() -> [u8; 1] {
    [DfuOpcode::ReceiveFirmwareImage as u8]
}

pub fn report_received_size() -> [u8; 1] {
    [DfuOpcode::ReportReceivedImageSize as u8]
}

pub fn validate() -> [u8; 1] {
    [DfuOpcode::ValidateFirmware as u8]
}

pub fn activate_and_reset() -> [u8; 1] {
    [DfuOpcode::ActivateAndReset as u8]
}

/// Abort: resets the bootloader, discarding the partial image.
pub fn system_reset() -> [u8; 1] {
    [DfuOpcode::SystemReset as u8]
}

// ============================================================================
// Response Parsing
// ============================================================================

/// A notification received on the control point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPointNotification {
    /// Response to an earlier request. `payload` carries the received size
    /// for `ReportReceivedImageSize`.
    Response {
        request: DfuOpcode,
        status: DfuResponseStatus,
        payload: Vec<u8>,
    },
    /// Flow-control receipt: total image bytes received so far.
    PacketReceipt { bytes_received: u32 },
}

impl ControlPointNotification {
    /// Parse a raw control point notification.
    pub fn parse(data: &[u8]) -> DfuResult<Self> {
        match data {
            [op, request, status, payload @ ..] if *op == DfuOpcode::Response as u8 => {
                let request = DfuOpcode::from_byte(*request).ok_or_else(|| {
                    DfuFailure::UnexpectedResponse(format!("unknown request opcode 0x{request:02X}"))
                })?;
                let status = DfuResponseStatus::from_byte(*status).ok_or_else(|| {
                    DfuFailure::UnexpectedResponse(format!("unknown status 0x{status:02X}"))
                })?;
                Ok(Self::Response {
                    request,
                    status,
                    payload: payload.to_vec(),
                })
            }
            [op, b0, b1, b2, b3, ..] if *op == DfuOpcode::PacketReceiptNotification as u8 => {
                Ok(Self::PacketReceipt {
                    bytes_received: u32::from_le_bytes([*b0, *b1, *b2, *b3]),
                })
            }
            _ => Err(DfuFailure::UnexpectedResponse(format!(
                "malformed notification {data:02X?}"
            ))),
        }
    }
}

/// Read the little-endian size from a `ReportReceivedImageSize` response payload.
pub fn received_size(payload: &[u8]) -> Option<u32> {
    match payload {
        [b0, b1, b2, b3, ..] => Some(u32::from_le_bytes([*b0, *b1, *b2, *b3])),
        _ => None,
    }
}

// ============================================================================
// CRC16 (CCITT-FALSE, as used in legacy init packets)
// ============================================================================

/// CRC16-CCITT of a firmware image.
pub fn image_crc(data: &[u8]) -> u16 {
    crc16::State::<crc16::CCITT_FALSE>::calculate(data)
}

/// Extract the image CRC embedded at the end of a legacy init packet.
///
/// Layout: `device_type u16, device_rev u16, app_version u32,
/// sd_req_len u16, sd_req[n] u16, crc u16`. Returns `None` when the
/// packet carries no CRC (older init packets stop after `sd_req`).
pub fn init_packet_crc(init_packet: &[u8]) -> Option<u16> {
    if init_packet.len() < 10 {
        return None;
    }
    let sd_req_len = u16::from_le_bytes([init_packet[8], init_packet[9]]) as usize;
    let crc_offset = 10 + sd_req_len * 2;
    if init_packet.len() != crc_offset + 2 {
        return None;
    }
    Some(u16::from_le_bytes([
        init_packet[crc_offset],
        init_packet[crc_offset + 1],
    ]))
}

// ============================================================================
// Tests
// ============================================================================

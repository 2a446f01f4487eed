//! GATT transport layer for legacy DFU.
//!
//! Wraps a [`PeripheralConnection`] that exposes the DFU service:
//! commands and responses on the control point, data on the packet
//! characteristic. Every wait here is bounded by a timeout or the
//! session's [`CancelToken`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::cancel::CancelToken;
use super::config::{
    DfuConfig, DfuOpcode, DfuResponseStatus, ABORT_TIMEOUT, DFU_CONTROL_POINT_UUID,
    DFU_PACKET_UUID, DFU_SERVICE_UUID, DFU_VERSION_UUID,
};
use super::error::{DfuFailure, DfuResult};
use super::packet::{self, ControlPointNotification};
use crate::traits::{LinkError, Notifications, PeripheralConnection, WriteKind};

/// An opened DFU service on one connection.
pub struct DfuLink {
    peripheral: Arc<dyn PeripheralConnection>,
    notifications: Notifications,
    has_version: bool,
    packet_size: usize,
    max_packet_retries: u8,
}

impl DfuLink {
    /// Discover the DFU service and subscribe to the control point.
    ///
    /// Fails with [`DfuFailure::DfuServiceNotFound`] when the service or its
    /// characteristics are missing or discovery exceeds `discovery_timeout`.
    pub async fn open(
        peripheral: Arc<dyn PeripheralConnection>,
        config: &DfuConfig,
        cancel: &CancelToken,
    ) -> DfuResult<Self> {
        let discovery = tokio::time::timeout(config.discovery_timeout, discover(&*peripheral));

        let (has_version, notifications) = tokio::select! {
            result = discovery => match result {
                Ok(found) => found?,
                Err(_) => {
                    warn!(
                        "DFU service discovery timed out after {}ms",
                        config.discovery_timeout.as_millis()
                    );
                    return Err(DfuFailure::DfuServiceNotFound);
                }
            },
            _ = cancel.cancelled() => return Err(DfuFailure::Cancelled),
        };

        let packet_size = peripheral.max_write_without_response().max(1);
        debug!(
            "DFU service opened on {} (packet size {}, version characteristic: {})",
            peripheral.id(),
            packet_size,
            has_version
        );

        Ok(Self {
            peripheral,
            notifications,
            has_version,
            packet_size,
            max_packet_retries: config.max_packet_retries,
        })
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Read the DFU version characteristic.
    ///
    /// `None` when the characteristic is absent or unreadable.
    pub async fn read_version(&self) -> Option<u16> {
        if !self.has_version {
            return None;
        }
        match self.peripheral.read(DFU_VERSION_UUID).await {
            Ok(value) => match value.as_slice() {
                [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
                [lo] => Some(*lo as u16),
                [] => None,
            },
            Err(e) => {
                debug!("DFU version read failed: {}", e);
                None
            }
        }
    }

    /// Write a command to the control point.
    pub async fn send_command(&self, command: &[u8]) -> DfuResult<()> {
        debug!("Control point <- {:02X?}", command);
        self.peripheral
            .write(DFU_CONTROL_POINT_UUID, command, WriteKind::WithResponse)
            .await?;
        Ok(())
    }

    /// Write one packet to the packet characteristic, retrying transient failures.
    pub async fn send_packet(&self, data: &[u8]) -> DfuResult<()> {
        let mut attempts: u8 = 0;
        loop {
            attempts += 1;
            match self
                .peripheral
                .write(DFU_PACKET_UUID, data, WriteKind::WithoutResponse)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempts <= self.max_packet_retries => {
                    warn!("Packet write failed (attempt {}), retrying: {}", attempts, e);
                }
                Err(e) if e.is_transient() => {
                    return Err(DfuFailure::WriteFailed {
                        attempts,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(DfuFailure::Link(e)),
            }
        }
    }

    /// Write an arbitrary-length payload to the packet characteristic in packet-sized pieces.
    pub async fn send_data(&self, data: &[u8]) -> DfuResult<()> {
        for chunk in data.chunks(self.packet_size) {
            self.send_packet(chunk).await?;
        }
        Ok(())
    }

    async fn next_notification(
        &mut self,
        cancel: &CancelToken,
    ) -> DfuResult<ControlPointNotification> {
        let raw = tokio::select! {
            raw = self.notifications.recv() => raw,
            _ = cancel.cancelled() => return Err(DfuFailure::Cancelled),
        };
        let raw = raw.ok_or(DfuFailure::Link(LinkError::Disconnected))?;
        debug!("Control point -> {:02X?}", raw);
        ControlPointNotification::parse(&raw)
    }

    /// Wait for the response to `request`, returning its payload on success.
    ///
    /// Packet receipts arriving in the meantime are skipped.
    pub async fn await_response(
        &mut self,
        request: DfuOpcode,
        wait: Duration,
        cancel: &CancelToken,
    ) -> DfuResult<Vec<u8>> {
        let response = async {
            loop {
                match self.next_notification(cancel).await? {
                    ControlPointNotification::Response {
                        request: answered,
                        status,
                        payload,
                    } if answered == request => {
                        if status != DfuResponseStatus::Success {
                            return Err(DfuFailure::Rejected { request, status });
                        }
                        return Ok(payload);
                    }
                    ControlPointNotification::Response {
                        request: answered, ..
                    } => {
                        return Err(DfuFailure::UnexpectedResponse(format!(
                            "expected response to {request:?}, got {answered:?}"
                        )));
                    }
                    ControlPointNotification::PacketReceipt { bytes_received } => {
                        debug!("Ignoring late packet receipt ({} bytes)", bytes_received);
                    }
                }
            }
        };

        tokio::time::timeout(wait, response)
            .await
            .map_err(|_| DfuFailure::ResponseTimeout {
                request,
                timeout_ms: wait.as_millis() as u64,
            })?
    }

    /// Wait, with no timeout, for the next packet receipt notification.
    ///
    /// A response arriving instead is the bootloader aborting the image transfer.
    pub async fn await_receipt(&mut self, cancel: &CancelToken) -> DfuResult<u32> {
        match self.next_notification(cancel).await? {
            ControlPointNotification::PacketReceipt { bytes_received } => Ok(bytes_received),
            ControlPointNotification::Response {
                request, status, ..
            } if status != DfuResponseStatus::Success => {
                Err(DfuFailure::Rejected { request, status })
            }
            ControlPointNotification::Response { request, .. } => Err(
                DfuFailure::UnexpectedResponse(format!("{request:?} response during transfer")),
            ),
        }
    }

    pub async fn disconnect(&self) {
        disconnect(&*self.peripheral).await;
    }
}

/// Best-effort abort: reset the bootloader and drop the connection.
///
/// Works without an opened [`DfuLink`] so a session cancelled mid-rediscovery
/// can still release the bootloader.
pub async fn abort(peripheral: &dyn PeripheralConnection) {
    let command = packet::system_reset();
    let reset = peripheral.write(DFU_CONTROL_POINT_UUID, &command, WriteKind::WithResponse);
    match tokio::time::timeout(ABORT_TIMEOUT, reset).await {
        Ok(Ok(())) => debug!("Abort sent"),
        Ok(Err(e)) => debug!("Abort write failed: {}", e),
        Err(_) => debug!("Abort write timed out"),
    }
    disconnect(peripheral).await;
}

pub async fn disconnect(peripheral: &dyn PeripheralConnection) {
    if let Err(e) = peripheral.disconnect().await {
        debug!("Disconnect failed: {}", e);
    }
}

/// Locate the DFU service and subscribe to the control point.
async fn discover(peripheral: &dyn PeripheralConnection) -> DfuResult<(bool, Notifications)> {
    let services = peripheral.discover_services().await?;
    if !services.contains(&DFU_SERVICE_UUID) {
        return Err(DfuFailure::DfuServiceNotFound);
    }

    let characteristics = peripheral.discover_characteristics(DFU_SERVICE_UUID).await?;
    if !characteristics.contains(&DFU_CONTROL_POINT_UUID)
        || !characteristics.contains(&DFU_PACKET_UUID)
    {
        return Err(DfuFailure::DfuServiceNotFound);
    }

    let notifications = peripheral.subscribe(DFU_CONTROL_POINT_UUID).await?;
    Ok((characteristics.contains(&DFU_VERSION_UUID), notifications))
}

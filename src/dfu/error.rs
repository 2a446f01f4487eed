//! DFU error types for the legacy Nordic BLE DFU engine.

use serde::Serialize;
use thiserror::Error;

use super::config::{DfuOpcode, DfuResponseStatus};
use crate::traits::LinkError;

/// Result type alias for DFU operations.
pub type DfuResult<T> = Result<T, DfuFailure>;

/// Reasons a transfer session terminates without success.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "camelCase")]
pub enum DfuFailure {
    /// DFU service or one of its characteristics was not found in time.
    #[error("DFU service not found on peripheral")]
    DfuServiceNotFound,

    /// Peripheral did not come back in bootloader mode.
    #[error("Bootloader did not reconnect within {timeout_ms}ms")]
    ReconnectTimeout { timeout_ms: u64 },

    /// Bootloader did not confirm the received image.
    #[error("Firmware validation failed: {reason}")]
    ValidationFailed { reason: String },

    /// Another transfer already owns the engine.
    #[error("A firmware transfer is already in progress")]
    TransferAlreadyInProgress,

    /// Operation was cancelled by user.
    #[error("Operation cancelled by user")]
    Cancelled,

    /// A packet write kept failing after retries.
    #[error("Packet write failed after {attempts} attempts: {reason}")]
    WriteFailed { attempts: u8, reason: String },

    /// Bootloader answered a request with a non-success status.
    #[error("Bootloader rejected {request:?}: {}", status.description())]
    Rejected {
        request: DfuOpcode,
        status: DfuResponseStatus,
    },

    /// No response to a control point request.
    #[error("Timeout waiting for {request:?} response ({timeout_ms}ms)")]
    ResponseTimeout { request: DfuOpcode, timeout_ms: u64 },

    /// Malformed or out-of-sequence control point notification.
    #[error("Unexpected control point notification: {0}")]
    UnexpectedResponse(String),

    /// Connection-level failure outside the retried packet path.
    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

impl DfuFailure {
    /// Get a user-friendly error code for support purposes.
    pub fn error_code(&self) -> &'static str {
        match self {
            DfuFailure::Link(_) => "DFU-001",
            DfuFailure::DfuServiceNotFound => "DFU-010",
            DfuFailure::ReconnectTimeout { .. } => "DFU-022",
            DfuFailure::ResponseTimeout { .. } => "DFU-021",
            DfuFailure::WriteFailed { .. } => "DFU-023",
            DfuFailure::Rejected { .. } => "DFU-030",
            DfuFailure::UnexpectedResponse(_) => "DFU-031",
            DfuFailure::ValidationFailed { .. } => "DFU-040",
            DfuFailure::TransferAlreadyInProgress => "DFU-050",
            DfuFailure::Cancelled => "DFU-099",
        }
    }
}

//! Flat progress events for UI hosts.

use serde::Serialize;

use crate::dfu::{DfuEvent, DfuOutcome, TransferState};

/// Share of the progress bar reserved for the image upload.
const UPLOAD_START: f32 = 10.0;
const UPLOAD_END: f32 = 95.0;

/// Progress event sent to the frontend during DFU.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DfuProgressEvent {
    /// Current stage name.
    pub stage: String,
    /// Bytes sent (for uploading stage).
    pub sent: Option<usize>,
    /// Total bytes (for uploading stage).
    pub total: Option<usize>,
    /// Progress percentage (0-100).
    pub percent: f32,
    /// Human-readable message.
    pub message: String,
}

impl DfuProgressEvent {
    fn stage(stage: &str, percent: f32, message: String) -> Self {
        Self {
            stage: stage.to_string(),
            sent: None,
            total: None,
            percent,
            message,
        }
    }
}

fn state_stage(state: &TransferState) -> (&'static str, f32) {
    match state {
        TransferState::NotStarted => ("idle", 0.0),
        TransferState::DiscoveringDfuService => ("discovering", 2.0),
        TransferState::EnteringBootloaderMode => ("bootloader", 5.0),
        TransferState::AwaitingReconnect => ("waiting", 8.0),
        TransferState::TransferringImage => ("uploading", UPLOAD_START),
        TransferState::Validating => ("validating", UPLOAD_END),
        TransferState::Completed => ("complete", 100.0),
        TransferState::Cancelled => ("cancelled", 0.0),
        TransferState::Failed(_) => ("failed", 0.0),
    }
}

impl From<&DfuEvent> for DfuProgressEvent {
    fn from(event: &DfuEvent) -> Self {
        match event {
            DfuEvent::State(state) => {
                let (stage, percent) = state_stage(state);
                Self::stage(stage, percent, state.message())
            }
            DfuEvent::Progress {
                bytes_transferred,
                total_bytes,
            } => {
                let fraction = if *total_bytes == 0 {
                    1.0
                } else {
                    *bytes_transferred as f32 / *total_bytes as f32
                };
                Self {
                    stage: "uploading".to_string(),
                    sent: Some(*bytes_transferred),
                    total: Some(*total_bytes),
                    percent: UPLOAD_START + (UPLOAD_END - UPLOAD_START) * fraction,
                    message: format!(
                        "Uploading firmware: {} / {} bytes",
                        bytes_transferred, total_bytes
                    ),
                }
            }
            DfuEvent::Finished(DfuOutcome::Success) => {
                Self::stage("finished", 100.0, "Firmware update complete".to_string())
            }
            DfuEvent::Finished(DfuOutcome::Cancelled) => {
                Self::stage("finished", 0.0, "Firmware update cancelled".to_string())
            }
            DfuEvent::Finished(DfuOutcome::Error(failure)) => Self::stage(
                "finished",
                0.0,
                format!("Firmware update failed [{}]: {}", failure.error_code(), failure),
            ),
        }
    }
}

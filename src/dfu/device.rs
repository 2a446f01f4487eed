//! Reacquiring the peripheral after it resets into its bootloader.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::cancel::CancelToken;
use super::error::{DfuFailure, DfuResult};
use crate::traits::{Central, PeripheralConnection};

/// Wait for the peripheral identified by `id` to reappear and connect to it.
///
/// The central is polled every `scan_interval`. A lookup that finds the
/// peripheral but fails to connect is retried on the next poll.
///
/// # Returns
/// The connected bootloader, or [`DfuFailure::ReconnectTimeout`] once
/// `timeout` expires.
pub async fn wait_for_bootloader(
    central: &dyn Central,
    id: &str,
    timeout: Duration,
    scan_interval: Duration,
    cancel: &CancelToken,
) -> DfuResult<Arc<dyn PeripheralConnection>> {
    let poll = async {
        loop {
            match central.find(id).await {
                Ok(Some(peripheral)) => match peripheral.connect().await {
                    Ok(()) => return peripheral,
                    Err(e) => debug!("Bootloader {} found but connect failed: {}", id, e),
                },
                Ok(None) => {}
                Err(e) => debug!("Scan for {} failed: {}", id, e),
            }
            tokio::time::sleep(scan_interval).await;
        }
    };

    tokio::select! {
        found = tokio::time::timeout(timeout, poll) => match found {
            Ok(peripheral) => {
                info!("Reconnected to {} in bootloader mode", id);
                Ok(peripheral)
            }
            Err(_) => Err(DfuFailure::ReconnectTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        },
        _ = cancel.cancelled() => Err(DfuFailure::Cancelled),
    }
}

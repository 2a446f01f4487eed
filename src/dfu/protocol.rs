//! Legacy Nordic DFU engine.
//!
//! Drives one peripheral through the over-the-air update:
//! 1. Discover the DFU service
//! 2. Switch the application into its bootloader (buttonless DFU) and reconnect
//! 3. Start DFU, send image sizes and the init packet
//! 4. Stream the image under packet-receipt flow control
//! 5. Validate, then activate and reset

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::cancel::CancelToken;
use super::config::{
    is_application_mode, DfuConfig, DfuImageType, DfuOpcode, InitPacketStep,
};
use super::device::wait_for_bootloader;
use super::error::{DfuFailure, DfuResult};
use super::firmware_reader::FirmwareImage;
use super::packet;
use super::transport::{self, DfuLink};
use crate::traits::{Central, PeripheralConnection};

/// Engine state, reported through [`DfuEvent::State`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "failure", rename_all = "camelCase")]
pub enum TransferState {
    NotStarted,
    DiscoveringDfuService,
    EnteringBootloaderMode,
    AwaitingReconnect,
    TransferringImage,
    Validating,
    Completed,
    Cancelled,
    Failed(DfuFailure),
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Cancelled | TransferState::Failed(_)
        )
    }

    /// Get a human-readable message for this state.
    pub fn message(&self) -> String {
        match self {
            TransferState::NotStarted => "Waiting to start...".into(),
            TransferState::DiscoveringDfuService => "Looking for DFU service...".into(),
            TransferState::EnteringBootloaderMode => "Entering bootloader mode...".into(),
            TransferState::AwaitingReconnect => "Waiting for bootloader...".into(),
            TransferState::TransferringImage => "Uploading firmware...".into(),
            TransferState::Validating => "Validating firmware...".into(),
            TransferState::Completed => "Update complete!".into(),
            TransferState::Cancelled => "Update cancelled".into(),
            TransferState::Failed(failure) => format!("Update failed: {}", failure),
        }
    }
}

/// How a transfer session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "camelCase")]
pub enum DfuOutcome {
    Success,
    Cancelled,
    Error(DfuFailure),
}

/// Events delivered to the `on_event` callback of [`DfuEngine::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum DfuEvent {
    State(TransferState),
    #[serde(rename_all = "camelCase")]
    Progress {
        bytes_transferred: usize,
        total_bytes: usize,
    },
    Finished(DfuOutcome),
}

/// Parts of a session visible outside its run future.
#[derive(Debug)]
struct SessionShared {
    state: Mutex<TransferState>,
    cancel: CancelToken,
}

#[derive(Debug, Default)]
struct Slot {
    session: Option<Arc<SessionShared>>,
    active: bool,
}

/// Frees the session slot when the run future completes or is dropped.
struct SlotGuard<'a>(&'a Mutex<Slot>);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).active = false;
    }
}

/// One firmware transfer. Lives only inside [`DfuEngine::run`].
struct TransferSession {
    peripheral: Arc<dyn PeripheralConnection>,
    image: FirmwareImage,
    total_bytes: usize,
    bytes_transferred: usize,
    state: TransferState,
    last_error: Option<DfuFailure>,
    /// Connected to the bootloader; from here on cancellation sends an abort.
    in_bootloader: bool,
    shared: Arc<SessionShared>,
}

impl TransferSession {
    fn new(
        peripheral: Arc<dyn PeripheralConnection>,
        image: FirmwareImage,
        shared: Arc<SessionShared>,
    ) -> Self {
        let total_bytes = image.len();
        Self {
            peripheral,
            image,
            total_bytes,
            bytes_transferred: 0,
            state: TransferState::NotStarted,
            last_error: None,
            in_bootloader: false,
            shared,
        }
    }

    /// Move to a non-terminal state, honouring a pending cancel first.
    fn enter<F: Fn(DfuEvent)>(&mut self, state: TransferState, on_event: &F) -> DfuResult<()> {
        if self.shared.cancel.is_cancelled() {
            return Err(DfuFailure::Cancelled);
        }
        self.set_state(state, on_event);
        Ok(())
    }

    fn set_state<F: Fn(DfuEvent)>(&mut self, state: TransferState, on_event: &F) {
        info!("DFU {}: {}", self.peripheral.id(), state.message());
        self.state = state.clone();
        *self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = state.clone();
        on_event(DfuEvent::State(state));
    }
}

/// Legacy DFU engine with a single session slot.
pub struct DfuEngine {
    central: Arc<dyn Central>,
    config: DfuConfig,
    slot: Mutex<Slot>,
}

impl DfuEngine {
    /// A zero credit window in `config` is raised to one packet.
    pub fn new(central: Arc<dyn Central>, config: DfuConfig) -> Self {
        if config.packet_receipt_interval == 0 {
            warn!("Packet receipt interval 0 would disable flow control; using 1");
        }
        Self {
            central,
            config: config.with_flow_control(),
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn config(&self) -> &DfuConfig {
        &self.config
    }

    /// State of the current session, or of the last one once it has ended.
    pub fn state(&self) -> TransferState {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match &slot.session {
            Some(shared) => shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            None => TransferState::NotStarted,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active
    }

    /// Request cancellation of the running session.
    ///
    /// Returns `false` when no session is running.
    pub fn cancel(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match &slot.session {
            Some(shared) if slot.active => {
                info!("DFU cancellation requested");
                shared.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    fn claim(&self) -> Option<Arc<SessionShared>> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.active {
            return None;
        }
        let shared = Arc::new(SessionShared {
            state: Mutex::new(TransferState::NotStarted),
            cancel: CancelToken::new(),
        });
        slot.session = Some(shared.clone());
        slot.active = true;
        Some(shared)
    }

    /// Transfer `image` to `peripheral`.
    ///
    /// Every session ends with exactly one [`DfuEvent::Finished`]. A call made
    /// while another session is running fails immediately with
    /// [`DfuFailure::TransferAlreadyInProgress`] and leaves that session alone.
    pub async fn run<F>(
        &self,
        peripheral: Arc<dyn PeripheralConnection>,
        image: FirmwareImage,
        on_event: F,
    ) -> DfuResult<()>
    where
        F: Fn(DfuEvent) + Send + Sync,
    {
        let Some(shared) = self.claim() else {
            warn!(
                "Rejecting transfer to {}: another transfer is in progress",
                peripheral.id()
            );
            let failure = DfuFailure::TransferAlreadyInProgress;
            on_event(DfuEvent::Finished(DfuOutcome::Error(failure.clone())));
            return Err(failure);
        };
        let _guard = SlotGuard(&self.slot);

        let mut session = TransferSession::new(peripheral, image, shared);
        let result = self.drive(&mut session, &on_event).await;
        let outcome = Self::finish(&mut session, &result, &on_event).await;
        debug!(
            "Session ended after {} of {} bytes (last error: {:?})",
            session.bytes_transferred, session.total_bytes, session.last_error
        );
        on_event(DfuEvent::Finished(outcome));
        result
    }

    async fn finish<F: Fn(DfuEvent)>(
        session: &mut TransferSession,
        result: &DfuResult<()>,
        on_event: &F,
    ) -> DfuOutcome {
        match result {
            Ok(()) => DfuOutcome::Success,
            Err(DfuFailure::Cancelled) => {
                if session.in_bootloader {
                    transport::abort(&*session.peripheral).await;
                }
                session.set_state(TransferState::Cancelled, on_event);
                DfuOutcome::Cancelled
            }
            Err(failure) => {
                warn!(
                    "DFU failed during {:?} ({}): {}",
                    session.state,
                    failure.error_code(),
                    failure
                );
                if session.in_bootloader {
                    transport::disconnect(&*session.peripheral).await;
                }
                session.last_error = Some(failure.clone());
                session.set_state(TransferState::Failed(failure.clone()), on_event);
                DfuOutcome::Error(failure.clone())
            }
        }
    }

    async fn drive<F: Fn(DfuEvent)>(
        &self,
        session: &mut TransferSession,
        on_event: &F,
    ) -> DfuResult<()> {
        let cancel = session.shared.cancel.clone();

        session.enter(TransferState::DiscoveringDfuService, on_event)?;
        if !session.peripheral.is_connected().await {
            session.peripheral.connect().await?;
        }
        let mut link = DfuLink::open(session.peripheral.clone(), &self.config, &cancel).await?;

        // An absent version characteristic means an application too old to report it.
        let version = link.read_version().await;
        if version.map_or(true, is_application_mode) {
            session.enter(TransferState::EnteringBootloaderMode, on_event)?;
            Self::enter_bootloader(&link).await;

            session.enter(TransferState::AwaitingReconnect, on_event)?;
            let id = session.peripheral.id();
            let bootloader = wait_for_bootloader(
                &*self.central,
                &id,
                self.config.reconnect_timeout,
                self.config.scan_interval,
                &cancel,
            )
            .await?;
            session.peripheral = bootloader;
            session.in_bootloader = true;
            link = DfuLink::open(session.peripheral.clone(), &self.config, &cancel).await?;
        } else {
            info!(
                "{} already in bootloader mode (DFU version {:?})",
                session.peripheral.id(),
                version
            );
            session.in_bootloader = true;
        }

        session.enter(TransferState::TransferringImage, on_event)?;
        self.transfer(&mut link, session, &cancel, on_event).await?;

        session.enter(TransferState::Validating, on_event)?;
        self.validate(&mut link, session, &cancel).await?;

        if let Err(e) = link.send_command(&packet::activate_and_reset()).await {
            debug!("Activate and reset write failed (device may already be resetting): {}", e);
        }
        session.set_state(TransferState::Completed, on_event);
        Ok(())
    }

    /// Buttonless switch: the application resets into its bootloader on Start DFU.
    async fn enter_bootloader(link: &DfuLink) {
        if let Err(e) = link
            .send_command(&packet::start_dfu(DfuImageType::Application))
            .await
        {
            debug!("Bootloader switch write failed (device may have reset): {}", e);
        }
        link.disconnect().await;
    }

    async fn transfer<F: Fn(DfuEvent)>(
        &self,
        link: &mut DfuLink,
        session: &mut TransferSession,
        cancel: &CancelToken,
        on_event: &F,
    ) -> DfuResult<()> {
        let total = session.total_bytes;
        let response_timeout = self.config.response_timeout;

        link.send_command(&packet::start_dfu(DfuImageType::Application))
            .await?;
        link.send_data(&packet::image_sizes(0, 0, total as u32)).await?;
        link.await_response(DfuOpcode::StartDfu, response_timeout, cancel)
            .await?;

        if let Some(init_packet) = &session.image.init_packet {
            link.send_command(&packet::init_params(InitPacketStep::Receive))
                .await?;
            link.send_data(init_packet).await?;
            link.send_command(&packet::init_params(InitPacketStep::Complete))
                .await?;
            link.await_response(DfuOpcode::InitDfuParams, response_timeout, cancel)
                .await?;
        }

        let window = self.config.packet_receipt_interval;
        link.send_command(&packet::packet_receipt_request(window))
            .await?;
        link.send_command(&packet::receive_firmware_image()).await?;

        let mut credits = window;
        for chunk in session.image.data.chunks(link.packet_size()) {
            if credits == 0 {
                let received = link.await_receipt(cancel).await? as usize;
                if received != session.bytes_transferred {
                    return Err(DfuFailure::ValidationFailed {
                        reason: format!(
                            "bootloader received {} bytes, {} were sent",
                            received, session.bytes_transferred
                        ),
                    });
                }
                credits = window;
            }
            if cancel.is_cancelled() {
                return Err(DfuFailure::Cancelled);
            }

            link.send_packet(chunk).await?;
            credits = credits.saturating_sub(1);
            session.bytes_transferred += chunk.len();
            on_event(DfuEvent::Progress {
                bytes_transferred: session.bytes_transferred,
                total_bytes: total,
            });
        }

        Ok(())
    }

    async fn validate(
        &self,
        link: &mut DfuLink,
        session: &TransferSession,
        cancel: &CancelToken,
    ) -> DfuResult<()> {
        let wait = self.config.validation_timeout;

        link.await_response(DfuOpcode::ReceiveFirmwareImage, wait, cancel)
            .await
            .map_err(validation_failure)?;

        link.send_command(&packet::report_received_size()).await?;
        let payload = link
            .await_response(DfuOpcode::ReportReceivedImageSize, wait, cancel)
            .await
            .map_err(validation_failure)?;
        match packet::received_size(&payload) {
            Some(size) if size as usize == session.total_bytes => {}
            Some(size) => {
                return Err(DfuFailure::ValidationFailed {
                    reason: format!(
                        "bootloader reports {} bytes, image is {}",
                        size, session.total_bytes
                    ),
                });
            }
            None => {
                return Err(DfuFailure::ValidationFailed {
                    reason: "size report carried no size".to_string(),
                });
            }
        }

        link.send_command(&packet::validate()).await?;
        link.await_response(DfuOpcode::ValidateFirmware, wait, cancel)
            .await
            .map_err(validation_failure)?;
        Ok(())
    }
}

/// Fold protocol-level failures during validation into `ValidationFailed`.
fn validation_failure(failure: DfuFailure) -> DfuFailure {
    match failure {
        DfuFailure::ResponseTimeout {
            request,
            timeout_ms,
        } => DfuFailure::ValidationFailed {
            reason: format!("no {:?} response within {}ms", request, timeout_ms),
        },
        DfuFailure::Rejected { request, status } => DfuFailure::ValidationFailed {
            reason: format!("{:?}: {}", request, status.description()),
        },
        other => other,
    }
}

//! Firmware update coordinator.
//!
//! Ties the pieces together for one peripheral: probe its Device
//! Information Service, match it against the release catalog, and when the
//! caller decides to proceed, load the release image and hand it to the
//! DFU engine.

mod events;

pub use events::DfuProgressEvent;

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::device_info::{self, DeviceInfo, ProbeError};
use crate::dfu::{read_firmware_zip, DfuEngine, DfuEvent, DfuFailure, FirmwareImage, ImageError};
use crate::releases::{
    parse_catalog, select_update, CatalogSnapshot, CatalogStore, FirmwareRelease, ParseError,
    ReleaseCatalog,
};
use crate::settings::UpdaterSettings;
use crate::traits::{FetchError, PeripheralConnection, ResourceFetcher};

/// Progress of the most recent update check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckState {
    Idle,
    Probing,
    CatalogLoading,
    Evaluated,
    UpdateOffered,
    NoUpdateNeeded,
    Failed,
}

/// Everything a UI needs to offer (or not offer) an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckResult {
    pub update_available: bool,
    pub latest_release: Option<FirmwareRelease>,
    /// `None` when the release or the installed bootloader version is unknown.
    pub bootloader_compatible: Option<bool>,
    pub device_info: DeviceInfo,
    /// The whole catalog the check was evaluated against, every board included.
    pub all_releases: ReleaseCatalog,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "result", rename_all = "camelCase")]
pub enum UpdateCheckOutcome {
    Checked(UpdateCheckResult),
    /// The peripheral does not expose the services needed to update it.
    DfuServiceNotFound,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Device probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("No release catalog URL configured")]
    NoReleasesUrl,

    #[error("Download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Release catalog rejected: {0}")]
    Catalog(#[from] ParseError),

    #[error("Firmware image rejected: {0}")]
    Image(#[from] ImageError),

    #[error("Firmware transfer failed: {0}")]
    Dfu(#[from] DfuFailure),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl UpdateError {
    /// Get a user-friendly error code for support purposes.
    pub fn error_code(&self) -> &'static str {
        match self {
            UpdateError::Probe(e) => e.error_code(),
            UpdateError::NoReleasesUrl => "UPD-001",
            UpdateError::Fetch(_) => "UPD-002",
            UpdateError::Catalog(_) => "UPD-003",
            UpdateError::Image(_) => "UPD-004",
            UpdateError::Dfu(e) => e.error_code(),
            UpdateError::Task(_) => "UPD-005",
        }
    }
}

async fn fetch_catalog(
    fetcher: &dyn ResourceFetcher,
    store: &CatalogStore,
    url: Option<&str>,
) -> Result<Arc<CatalogSnapshot>, UpdateError> {
    let url = url.ok_or(UpdateError::NoReleasesUrl)?;
    let bytes = fetcher.fetch(url).await?;
    let catalog = parse_catalog(&bytes)?;
    info!("Fetched release catalog from {} ({} boards)", url, catalog.len());
    Ok(store.replace(CatalogSnapshot::new(catalog, url)))
}

/// Coordinates update checks and transfers against one catalog store.
pub struct FirmwareUpdater {
    fetcher: Arc<dyn ResourceFetcher>,
    store: Arc<CatalogStore>,
    settings: UpdaterSettings,
    state: Mutex<CheckState>,
}

impl FirmwareUpdater {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        store: Arc<CatalogStore>,
        settings: UpdaterSettings,
    ) -> Self {
        Self {
            fetcher,
            store,
            settings,
            state: Mutex::new(CheckState::Idle),
        }
    }

    pub fn settings(&self) -> &UpdaterSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    pub fn state(&self) -> CheckState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: CheckState) {
        debug!("Update check: {:?}", state);
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn fail(&self, error: UpdateError) -> UpdateError {
        warn!("Update check failed ({}): {}", error.error_code(), error);
        self.set_state(CheckState::Failed);
        error
    }

    /// Check a peripheral for available updates, connecting first if needed.
    ///
    /// The catalog is the one current when the call starts; a refresh that
    /// lands during the check does not affect it.
    pub async fn check_updates(
        &self,
        peripheral: &dyn PeripheralConnection,
    ) -> Result<UpdateCheckOutcome, UpdateError> {
        let snapshot = self.store.snapshot();
        if !peripheral.is_connected().await {
            if let Err(e) = peripheral.connect().await {
                return Err(self.fail(ProbeError::ConnectionFailed(e).into()));
            }
        }
        self.evaluate(peripheral, snapshot).await
    }

    /// Connect to `peripheral` and check it for updates.
    pub async fn connect_and_check_updates(
        &self,
        peripheral: &dyn PeripheralConnection,
    ) -> Result<UpdateCheckOutcome, UpdateError> {
        let snapshot = self.store.snapshot();
        if let Err(e) = peripheral.connect().await {
            return Err(self.fail(ProbeError::ConnectionFailed(e).into()));
        }
        self.evaluate(peripheral, snapshot).await
    }

    async fn evaluate(
        &self,
        peripheral: &dyn PeripheralConnection,
        snapshot: Option<Arc<CatalogSnapshot>>,
    ) -> Result<UpdateCheckOutcome, UpdateError> {
        self.set_state(CheckState::Probing);
        let device_info = match device_info::probe(peripheral).await {
            Ok(info) => info,
            Err(ProbeError::DeviceInfoServiceNotFound) => {
                warn!("{} has no usable Device Information Service", peripheral.id());
                self.set_state(CheckState::Failed);
                return Ok(UpdateCheckOutcome::DfuServiceNotFound);
            }
            Err(e) => return Err(self.fail(e.into())),
        };

        self.set_state(CheckState::CatalogLoading);
        let snapshot = match snapshot {
            Some(snapshot) => snapshot,
            None => match self.refresh_catalog().await {
                Ok(snapshot) => snapshot,
                Err(e) => return Err(self.fail(e)),
            },
        };

        self.set_state(CheckState::Evaluated);
        let plan = select_update(&snapshot.catalog, &device_info, self.settings.include_beta);
        let result = UpdateCheckResult {
            update_available: plan.update_available(),
            bootloader_compatible: plan.bootloader_compatible(),
            all_releases: snapshot.catalog.clone(),
            latest_release: plan.selected_release,
            device_info: plan.device_info,
        };

        if result.update_available {
            info!(
                "Update available for {}: {} -> {}",
                result.device_info.model_number,
                result.device_info.firmware_revision,
                result
                    .latest_release
                    .as_ref()
                    .map(|r| r.version().to_string())
                    .unwrap_or_default()
            );
            self.set_state(CheckState::UpdateOffered);
        } else {
            info!(
                "{} firmware {} is up to date",
                result.device_info.model_number, result.device_info.firmware_revision
            );
            self.set_state(CheckState::NoUpdateNeeded);
        }
        Ok(UpdateCheckOutcome::Checked(result))
    }

    /// Fetch and install the release catalog.
    pub async fn refresh_catalog(&self) -> Result<Arc<CatalogSnapshot>, UpdateError> {
        fetch_catalog(
            &*self.fetcher,
            &self.store,
            self.settings.releases_url.as_deref(),
        )
        .await
    }

    /// Refresh the catalog in the background. Failures are logged.
    pub fn refresh_software_updates_database(&self) -> JoinHandle<()> {
        let fetcher = self.fetcher.clone();
        let store = self.store.clone();
        let url = self.settings.releases_url.clone();

        tokio::spawn(async move {
            if let Err(e) = fetch_catalog(&*fetcher, &store, url.as_deref()).await {
                warn!("Release catalog refresh failed ({}): {}", e.error_code(), e);
            }
        })
    }

    /// Download a release's image and init packet.
    pub async fn load_release_image(
        &self,
        release: &FirmwareRelease,
    ) -> Result<FirmwareImage, UpdateError> {
        let info = &release.info;
        let bytes = self.fetcher.fetch(&info.image_url).await?;
        let init_packet = match &info.init_url {
            Some(url) => Some(self.fetcher.fetch(url).await?),
            None => None,
        };

        let image = FirmwareImage::from_download(&info.image_url, bytes, init_packet)?;
        image.verify_crc()?;
        info!(
            "Loaded {} firmware {} ({} bytes)",
            info.board_name,
            info.version,
            image.len()
        );
        Ok(image)
    }

    /// Download `release` and transfer it to `peripheral`.
    pub async fn apply_update<F>(
        &self,
        engine: &DfuEngine,
        peripheral: Arc<dyn PeripheralConnection>,
        release: &FirmwareRelease,
        on_event: F,
    ) -> Result<(), UpdateError>
    where
        F: Fn(DfuEvent) + Send + Sync,
    {
        let image = self.load_release_image(release).await?;
        engine.run(peripheral, image, on_event).await?;
        Ok(())
    }

    /// Transfer a Nordic DFU zip package from disk to `peripheral`.
    pub async fn apply_local_package<F>(
        &self,
        engine: &DfuEngine,
        peripheral: Arc<dyn PeripheralConnection>,
        path: impl AsRef<Path>,
        on_event: F,
    ) -> Result<(), UpdateError>
    where
        F: Fn(DfuEvent) + Send + Sync,
    {
        let path = path.as_ref().to_path_buf();
        let image = tokio::task::spawn_blocking(move || read_firmware_zip(&path))
            .await
            .map_err(|e| UpdateError::Task(e.to_string()))??;
        image.verify_crc()?;

        engine.run(peripheral, image, on_event).await?;
        Ok(())
    }
}

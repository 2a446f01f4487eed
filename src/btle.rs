//! [`PeripheralConnection`] and [`Central`] on top of `btleplug`.
//!
//! Enabled with the `btleplug` cargo feature. The adapter must be scanning
//! (see [`BtleplugCentral::start_scan`]) for a peripheral to be found again
//! after it resets into its bootloader.

use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central as _, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, info};
use uuid::Uuid;

use crate::traits::{Central, LinkError, Notifications, PeripheralConnection, WriteKind};

fn link_error(error: btleplug::Error) -> LinkError {
    match error {
        btleplug::Error::NotConnected => LinkError::NotConnected,
        btleplug::Error::DeviceNotFound => LinkError::Disconnected,
        other => LinkError::Operation(other.to_string()),
    }
}

fn peripheral_key(peripheral: &Peripheral) -> String {
    format!("{:?}", peripheral.id())
}

/// A `btleplug` peripheral.
pub struct BtleplugPeripheral {
    inner: Peripheral,
}

impl BtleplugPeripheral {
    pub fn new(inner: Peripheral) -> Self {
        Self { inner }
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, LinkError> {
        self.inner
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(LinkError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl PeripheralConnection for BtleplugPeripheral {
    fn id(&self) -> String {
        peripheral_key(&self.inner)
    }

    async fn is_connected(&self) -> bool {
        self.inner.is_connected().await.unwrap_or(false)
    }

    async fn connect(&self) -> Result<(), LinkError> {
        self.inner.connect().await.map_err(link_error)
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.inner.disconnect().await.map_err(link_error)
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>, LinkError> {
        self.inner.discover_services().await.map_err(link_error)?;
        Ok(self.inner.services().iter().map(|s| s.uuid).collect())
    }

    async fn discover_characteristics(&self, service: Uuid) -> Result<Vec<Uuid>, LinkError> {
        Ok(self
            .inner
            .services()
            .into_iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics.into_iter().map(|c| c.uuid))
            .collect())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, LinkError> {
        let characteristic = self.characteristic(characteristic)?;
        self.inner.read(&characteristic).await.map_err(link_error)
    }

    async fn write(
        &self,
        characteristic: Uuid,
        data: &[u8],
        kind: WriteKind,
    ) -> Result<(), LinkError> {
        let characteristic = self.characteristic(characteristic)?;
        let write_type = match kind {
            WriteKind::WithResponse => WriteType::WithResponse,
            WriteKind::WithoutResponse => WriteType::WithoutResponse,
        };
        self.inner
            .write(&characteristic, data, write_type)
            .await
            .map_err(link_error)
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<Notifications, LinkError> {
        let target = self.characteristic(characteristic)?;
        self.inner.subscribe(&target).await.map_err(link_error)?;
        let mut stream = self.inner.notifications().await.map_err(link_error)?;

        let (tx, rx) = unbounded_channel();
        tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                if tx.send(notification.value).is_err() {
                    break;
                }
            }
            debug!("Notification stream for {} ended", characteristic);
        });
        Ok(rx)
    }
}

/// A `btleplug` adapter.
pub struct BtleplugCentral {
    adapter: Adapter,
}

impl BtleplugCentral {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Use the first Bluetooth adapter on the system.
    pub async fn first_adapter() -> Result<Self, LinkError> {
        let manager = Manager::new().await.map_err(link_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(link_error)?
            .into_iter()
            .next()
            .ok_or_else(|| LinkError::Operation("no Bluetooth adapter found".to_string()))?;
        Ok(Self::new(adapter))
    }

    pub async fn start_scan(&self) -> Result<(), LinkError> {
        info!("Starting BLE scan");
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(link_error)
    }

    /// Peripherals seen so far.
    pub async fn peripherals(&self) -> Result<Vec<Arc<dyn PeripheralConnection>>, LinkError> {
        Ok(self
            .adapter
            .peripherals()
            .await
            .map_err(link_error)?
            .into_iter()
            .map(|p| Arc::new(BtleplugPeripheral::new(p)) as Arc<dyn PeripheralConnection>)
            .collect())
    }
}

#[async_trait]
impl Central for BtleplugCentral {
    async fn find(&self, id: &str) -> Result<Option<Arc<dyn PeripheralConnection>>, LinkError> {
        let found = self
            .adapter
            .peripherals()
            .await
            .map_err(link_error)?
            .into_iter()
            .find(|p| peripheral_key(p) == id);
        Ok(found.map(|p| Arc::new(BtleplugPeripheral::new(p)) as Arc<dyn PeripheralConnection>))
    }
}

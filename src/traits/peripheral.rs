//! Abstraction over a BLE peripheral connection.
//!
//! The pipeline never talks to a radio stack directly. Everything goes
//! through these traits so the probe and the DFU engine can run against
//! real hardware (see the `btleplug` feature) or a scripted fake in tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

/// Stream of notification payloads for one subscribed characteristic.
pub type Notifications = UnboundedReceiver<Vec<u8>>;

/// Errors reported by the connection layer.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum LinkError {
    /// Operation attempted without an open connection.
    #[error("peripheral is not connected")]
    NotConnected,

    /// The peripheral dropped the connection.
    #[error("peripheral disconnected")]
    Disconnected,

    /// The requested characteristic was not discovered.
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    /// Any other failure reported by the BLE stack.
    #[error("BLE operation failed: {0}")]
    Operation(String),
}

impl LinkError {
    /// Whether the link is gone (as opposed to a single failed operation).
    pub fn is_disconnect(&self) -> bool {
        matches!(self, LinkError::NotConnected | LinkError::Disconnected)
    }

    /// Transient errors that may succeed when the same write is repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, LinkError::Operation(_))
    }
}

/// GATT write mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

/// A connected (or connectable) BLE peripheral.
#[async_trait]
pub trait PeripheralConnection: Send + Sync {
    /// Stable identity used to find the peripheral again after it resets.
    fn id(&self) -> String;

    /// Largest payload accepted by a single write without response.
    fn max_write_without_response(&self) -> usize {
        crate::dfu::config::DEFAULT_PACKET_SIZE
    }

    async fn is_connected(&self) -> bool;

    async fn connect(&self) -> Result<(), LinkError>;

    async fn disconnect(&self) -> Result<(), LinkError>;

    /// Discover primary services, returning their UUIDs.
    async fn discover_services(&self) -> Result<Vec<Uuid>, LinkError>;

    /// Discover the characteristics of an already discovered service.
    async fn discover_characteristics(&self, service: Uuid) -> Result<Vec<Uuid>, LinkError>;

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, LinkError>;

    async fn write(
        &self,
        characteristic: Uuid,
        data: &[u8],
        kind: WriteKind,
    ) -> Result<(), LinkError>;

    /// Enable notifications and return the receiving end.
    async fn subscribe(&self, characteristic: Uuid) -> Result<Notifications, LinkError>;
}

/// Scanner used to find a peripheral again once it re-advertises.
#[async_trait]
pub trait Central: Send + Sync {
    /// Look up a currently advertising peripheral by identity.
    ///
    /// Returns `Ok(None)` when the peripheral is not visible right now.
    async fn find(&self, id: &str) -> Result<Option<Arc<dyn PeripheralConnection>>, LinkError>;
}

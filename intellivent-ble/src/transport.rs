//! The BLE capability the connection manager drives
//!
//! Discovery, GATT enumeration and raw reads/writes are supplied by the
//! platform. `btleplug_backend` implements these traits for desktop stacks
//! and `mock` provides a loopback device for tests.

use async_trait::async_trait;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no bluetooth adapter found")]
    NoAdapter,
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("peripheral is not connected")]
    NotConnected,
    #[error("{0}")]
    Ble(String),
}

/// Resolves once the peer drops the link. A dropped sender means the
/// subscription ended without a disconnect.
pub type LinkLost = oneshot::Receiver<()>;

/// Entry point of the platform BLE stack
#[async_trait]
pub trait BleCentral: Send + Sync + 'static {
    type Peripheral: BlePeripheral;

    /// Look up a peripheral by address (scanning if needed)
    async fn find(&self, address: &str) -> Result<Self::Peripheral, TransportError>;
}

/// Handle to one remote device
#[async_trait]
pub trait BlePeripheral: Clone + Send + Sync + 'static {
    type Characteristic: BleCharacteristic;
    type Service: BleService<Characteristic = Self::Characteristic>;

    async fn is_connected(&self) -> Result<bool, TransportError>;

    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn discover_services(&self) -> Result<Vec<Self::Service>, TransportError>;

    /// Subscribe to the next peer-initiated disconnect
    async fn link_lost(&self) -> Result<LinkLost, TransportError>;
}

#[async_trait]
pub trait BleService: Send + Sync {
    type Characteristic: BleCharacteristic;

    fn uuid(&self) -> Uuid;

    async fn discover_characteristics(&self) -> Result<Vec<Self::Characteristic>, TransportError>;
}

#[async_trait]
pub trait BleCharacteristic: Clone + Send + Sync + 'static {
    fn uuid(&self) -> Uuid;

    async fn read(&self) -> Result<Vec<u8>, TransportError>;

    async fn write(&self, data: &[u8]) -> Result<(), TransportError>;
}

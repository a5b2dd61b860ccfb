//! Desktop BLE stack (BlueZ, CoreBluetooth, WinRT) through btleplug

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use intellivent_proto::ble::is_supported_device_name;
use log::debug;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::transport::{
    BleCentral, BleCharacteristic, BlePeripheral, BleService, LinkLost, TransportError,
};

const SCAN_POLL: Duration = Duration::from_millis(500);

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::NotConnected => TransportError::NotConnected,
            other => TransportError::Ble(other.to_string()),
        }
    }
}

/// A peripheral seen during a scan
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub supported: bool,
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(TransportError::NoAdapter)
}

/// Scan for `duration` and list everything seen. Fans have `supported = true`.
pub async fn scan(duration: Duration) -> Result<Vec<DiscoveredDevice>, TransportError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let mut devices = Vec::new();
    for peripheral in adapter.peripherals().await? {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            devices.push(DiscoveredDevice {
                supported: is_supported_device_name(&name),
                address: peripheral.address().to_string(),
                rssi: props.rssi,
                name,
            });
        }
    }

    adapter.stop_scan().await?;
    Ok(devices)
}

fn matches(peripheral: &Peripheral, address: &str) -> bool {
    peripheral.address().to_string().eq_ignore_ascii_case(address)
        || peripheral.id().to_string().eq_ignore_ascii_case(address)
}

#[derive(Clone)]
pub struct BtleplugCentral {
    adapter: Adapter,
    scan_timeout: Duration,
}

impl BtleplugCentral {
    pub async fn new() -> Result<Self, TransportError> {
        Ok(Self::with_adapter(get_adapter().await?))
    }

    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            scan_timeout: Duration::from_secs(10),
        }
    }

    /// How long `find` scans before reporting the device missing
    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    async fn lookup(&self, address: &str) -> Result<Option<Peripheral>, TransportError> {
        Ok(self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| matches(p, address)))
    }
}

#[async_trait]
impl BleCentral for BtleplugCentral {
    type Peripheral = BtleplugPeripheral;

    async fn find(&self, address: &str) -> Result<BtleplugPeripheral, TransportError> {
        if let Some(peripheral) = self.lookup(address).await? {
            return Ok(BtleplugPeripheral::new(self.adapter.clone(), peripheral));
        }

        self.adapter.start_scan(ScanFilter::default()).await?;
        let deadline = tokio::time::Instant::now() + self.scan_timeout;
        let found = loop {
            if let Some(peripheral) = self.lookup(address).await? {
                break Some(peripheral);
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(SCAN_POLL).await;
        };
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Stopping scan failed: {e}");
        }

        found
            .map(|peripheral| BtleplugPeripheral::new(self.adapter.clone(), peripheral))
            .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))
    }
}

#[derive(Clone)]
pub struct BtleplugPeripheral {
    adapter: Adapter,
    peripheral: Peripheral,
}

impl BtleplugPeripheral {
    fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self {
            adapter,
            peripheral,
        }
    }

    pub fn address(&self) -> String {
        self.peripheral.address().to_string()
    }
}

#[async_trait]
impl BlePeripheral for BtleplugPeripheral {
    type Characteristic = BtleplugCharacteristic;
    type Service = BtleplugService;

    async fn is_connected(&self) -> Result<bool, TransportError> {
        Ok(self.peripheral.is_connected().await?)
    }

    async fn connect(&self) -> Result<(), TransportError> {
        Ok(self.peripheral.connect().await?)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(self.peripheral.disconnect().await?)
    }

    async fn discover_services(&self) -> Result<Vec<BtleplugService>, TransportError> {
        self.peripheral.discover_services().await?;
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|service| BtleplugService {
                peripheral: self.peripheral.clone(),
                service,
            })
            .collect())
    }

    async fn link_lost(&self) -> Result<LinkLost, TransportError> {
        let mut events = self.adapter.events().await?;
        let id = self.peripheral.id();
        let (mut tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let disconnected = loop {
                let event = tokio::select! {
                    _ = tx.closed() => break false,
                    event = events.next() => event,
                };
                match event {
                    Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => break true,
                    Some(_) => continue,
                    None => break false,
                }
            };
            if disconnected {
                let _ = tx.send(());
            }
        });

        Ok(rx)
    }
}

pub struct BtleplugService {
    peripheral: Peripheral,
    service: btleplug::api::Service,
}

#[async_trait]
impl BleService for BtleplugService {
    type Characteristic = BtleplugCharacteristic;

    fn uuid(&self) -> Uuid {
        self.service.uuid
    }

    async fn discover_characteristics(&self) -> Result<Vec<BtleplugCharacteristic>, TransportError> {
        Ok(self
            .service
            .characteristics
            .iter()
            .map(|characteristic| BtleplugCharacteristic {
                peripheral: self.peripheral.clone(),
                characteristic: characteristic.clone(),
            })
            .collect())
    }
}

#[derive(Clone)]
pub struct BtleplugCharacteristic {
    peripheral: Peripheral,
    characteristic: btleplug::api::Characteristic,
}

#[async_trait]
impl BleCharacteristic for BtleplugCharacteristic {
    fn uuid(&self) -> Uuid {
        self.characteristic.uuid
    }

    async fn read(&self) -> Result<Vec<u8>, TransportError> {
        Ok(self.peripheral.read(&self.characteristic).await?)
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        Ok(self
            .peripheral
            .write(&self.characteristic, data, WriteType::WithResponse)
            .await?)
    }
}

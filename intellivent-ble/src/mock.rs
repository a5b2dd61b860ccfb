//! In-memory loopback fan for tests and demos
//!
//! Every characteristic of the fan is exposed across two services. Writes
//! are stored and read back. Call counters and failure injection let tests
//! observe how the connection manager drives the link.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use intellivent_proto::ble::Feature;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::transport::{
    BleCentral, BleCharacteristic, BlePeripheral, BleService, LinkLost, TransportError,
};

const SERVICES: [&[Feature]; 2] = [
    &[Feature::DeviceName, Feature::DeviceStatus, Feature::Auth],
    &[
        Feature::Humidity,
        Feature::LightVoc,
        Feature::ConstantSpeed,
        Feature::Timer,
        Feature::Airing,
        Feature::Pause,
        Feature::Boost,
        Feature::TemporarySpeed,
    ],
];

#[derive(Clone, Default)]
pub struct MockCentral {
    inner: Arc<CentralInner>,
}

#[derive(Default)]
struct CentralInner {
    devices: Mutex<HashMap<String, MockDevice>>,
    find_calls: AtomicUsize,
}

impl MockCentral {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(device: &MockDevice) -> Self {
        let central = Self::new();
        central.add(device);
        central
    }

    pub fn add(&self, device: &MockDevice) {
        self.inner
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.address().to_string(), device.clone());
    }

    pub fn find_calls(&self) -> usize {
        self.inner.find_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleCentral for MockCentral {
    type Peripheral = MockDevice;

    async fn find(&self, address: &str) -> Result<MockDevice, TransportError> {
        self.inner.find_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))
    }
}

#[derive(Clone)]
pub struct MockDevice {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    address: String,
    state: Mutex<State>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    discover_calls: AtomicUsize,
    read_calls: AtomicUsize,
}

#[derive(Default)]
struct State {
    connected: bool,
    values: HashMap<Feature, Vec<u8>>,
    missing: HashSet<Feature>,
    writes: Vec<(Feature, Vec<u8>)>,
    listeners: Vec<oneshot::Sender<()>>,
    connect_times: Vec<Instant>,
    fail_connects: u32,
    fail_reads: u32,
    fail_writes: u32,
    connect_delay: Duration,
    read_delay: Duration,
}

impl State {
    fn drop_link(&mut self) {
        self.connected = false;
        for listener in self.listeners.drain(..) {
            let _ = listener.send(());
        }
    }
}

impl MockDevice {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                address: address.into(),
                state: Mutex::new(State::default()),
                connect_calls: AtomicUsize::new(0),
                disconnect_calls: AtomicUsize::new(0),
                discover_calls: AtomicUsize::new(0),
                read_calls: AtomicUsize::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn connected(&self) -> bool {
        self.state().connected
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.inner.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn discover_calls(&self) -> usize {
        self.inner.discover_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.inner.read_calls.load(Ordering::SeqCst)
    }

    /// When each connect call started, on the tokio clock
    pub fn connect_times(&self) -> Vec<Instant> {
        self.state().connect_times.clone()
    }

    pub fn set_value(&self, feature: Feature, value: impl Into<Vec<u8>>) {
        self.state().values.insert(feature, value.into());
    }

    pub fn value(&self, feature: Feature) -> Option<Vec<u8>> {
        self.state().values.get(&feature).cloned()
    }

    /// Every write so far, oldest first
    pub fn writes(&self) -> Vec<(Feature, Vec<u8>)> {
        self.state().writes.clone()
    }

    pub fn remove_characteristic(&self, feature: Feature) {
        self.state().missing.insert(feature);
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.state().fail_connects = n;
    }

    pub fn fail_next_reads(&self, n: u32) {
        self.state().fail_reads = n;
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.state().fail_writes = n;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state().connect_delay = delay;
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.state().read_delay = delay;
    }

    /// Simulate the fan dropping the link
    pub fn drop_link(&self) {
        self.state().drop_link();
    }
}

#[async_trait]
impl BlePeripheral for MockDevice {
    type Characteristic = MockCharacteristic;
    type Service = MockService;

    async fn is_connected(&self) -> Result<bool, TransportError> {
        Ok(self.connected())
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = {
            let mut state = self.state();
            state.connect_times.push(Instant::now());
            state.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(TransportError::Ble("connection refused".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.state().drop_link();
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<MockService>, TransportError> {
        self.inner.discover_calls.fetch_add(1, Ordering::SeqCst);
        if !self.connected() {
            return Err(TransportError::NotConnected);
        }
        Ok((0..SERVICES.len())
            .map(|index| MockService {
                device: self.clone(),
                index,
            })
            .collect())
    }

    async fn link_lost(&self) -> Result<LinkLost, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.state().listeners.push(tx);
        Ok(rx)
    }
}

pub struct MockService {
    device: MockDevice,
    index: usize,
}

#[async_trait]
impl BleService for MockService {
    type Characteristic = MockCharacteristic;

    fn uuid(&self) -> Uuid {
        Uuid::from_u128(0x1d14_d6ee_fd63_4fa1_bfa4_8f47_b42119f0 + self.index as u128)
    }

    async fn discover_characteristics(&self) -> Result<Vec<MockCharacteristic>, TransportError> {
        let state = self.device.state();
        Ok(SERVICES[self.index]
            .iter()
            .filter(|feature| !state.missing.contains(*feature))
            .map(|feature| MockCharacteristic {
                device: self.device.clone(),
                feature: *feature,
            })
            .collect())
    }
}

#[derive(Clone)]
pub struct MockCharacteristic {
    device: MockDevice,
    feature: Feature,
}

#[async_trait]
impl BleCharacteristic for MockCharacteristic {
    fn uuid(&self) -> Uuid {
        self.feature.uuid()
    }

    async fn read(&self) -> Result<Vec<u8>, TransportError> {
        self.device.inner.read_calls.fetch_add(1, Ordering::SeqCst);
        // the response is fixed once the request is sent
        let (result, delay) = {
            let mut state = self.device.state();
            let result = if !state.connected {
                Err(TransportError::NotConnected)
            } else if state.fail_reads > 0 {
                state.fail_reads -= 1;
                Err(TransportError::Ble("read failed".to_string()))
            } else {
                Ok(state.values.get(&self.feature).cloned().unwrap_or_default())
            };
            (result, state.read_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.device.state();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(TransportError::Ble("write failed".to_string()));
        }
        state.writes.push((self.feature, data.to_vec()));
        state.values.insert(self.feature, data.to_vec());
        Ok(())
    }
}

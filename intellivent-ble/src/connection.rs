//! One resilient link to one fan
//!
//! The manager owns the transport handle for its address. `connect()` is
//! serialized: callers arriving while an attempt is running wait for it and
//! share its outcome instead of starting a second physical connect. Failed
//! attempts back off exponentially and retry, unbounded unless
//! `max_attempts` is configured.
//!
//! Characteristic reads and writes are serialized on the link. Any I/O error
//! tears the link down before it is returned so the next call reconnects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use intellivent_keystore::{KeyStore, SettingsStore};
use intellivent_proto::AuthCode;
use intellivent_proto::ble::Feature;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::ConnectionConfig;
use crate::error::Error;
use crate::transport::{
    BleCentral, BleCharacteristic, BlePeripheral, BleService, LinkLost, TransportError,
};

type Peripheral<C> = <C as BleCentral>::Peripheral;
type Characteristic<C> = <Peripheral<C> as BlePeripheral>::Characteristic;

/// What the key store holds for a device
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredAuth {
    code: String,
}

struct Link<P: BlePeripheral> {
    peripheral: Option<P>,
    connected: bool,
    /// Bumped on every connect and teardown so stale link-lost watchers can
    /// tell their session is gone
    session: u64,
    characteristics: HashMap<Feature, P::Characteristic>,
    /// Completed `connect()` runs, and the failure of the latest one
    attempts_finished: u64,
    last_failure: Option<(u32, TransportError)>,
}

impl<P: BlePeripheral> Link<P> {
    fn new() -> Self {
        Self {
            peripheral: None,
            connected: false,
            session: 0,
            characteristics: HashMap::new(),
            attempts_finished: 0,
            last_failure: None,
        }
    }

    fn teardown(&mut self) -> Option<P> {
        self.connected = false;
        self.session += 1;
        self.characteristics.clear();
        self.peripheral.take()
    }
}

pub struct ConnectionManager<C: BleCentral, S> {
    address: String,
    central: C,
    keystore: Arc<KeyStore<S>>,
    config: ConnectionConfig,
    link: Arc<Mutex<Link<Peripheral<C>>>>,
    connecting: tokio::sync::Mutex<()>,
    io: tokio::sync::Mutex<()>,
}

impl<C, S> ConnectionManager<C, S>
where
    C: BleCentral,
    S: SettingsStore + 'static,
{
    pub fn new(
        address: impl Into<String>,
        central: C,
        keystore: Arc<KeyStore<S>>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            address: address.into(),
            central,
            keystore,
            config,
            link: Arc::new(Mutex::new(Link::new())),
            connecting: tokio::sync::Mutex::new(()),
            io: tokio::sync::Mutex::new(()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn keystore(&self) -> &Arc<KeyStore<S>> {
        &self.keystore
    }

    pub fn is_connected(&self) -> bool {
        self.with_link(|link| link.connected)
    }

    fn with_link<R>(&self, f: impl FnOnce(&mut Link<Peripheral<C>>) -> R) -> R {
        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut link)
    }

    /// Ensure the link is up, retrying with backoff until it is
    ///
    /// Only fails when `max_attempts` is set and that many consecutive
    /// attempts failed.
    pub async fn connect(&self) -> Result<(), Error> {
        if self.is_connected() {
            return Ok(());
        }

        let observed = self.with_link(|link| link.attempts_finished);
        let _connecting = self.connecting.lock().await;

        let (connected, finished, failure) = self.with_link(|link| {
            (
                link.connected,
                link.attempts_finished,
                link.last_failure.clone(),
            )
        });
        if connected {
            return Ok(());
        }
        // an attempt we were waiting on gave up; report its outcome
        if finished != observed {
            if let Some((attempts, source)) = failure {
                return Err(self.unavailable(attempts, source));
            }
        }

        let result = self.establish().await;
        self.with_link(|link| {
            link.attempts_finished += 1;
            link.last_failure = result.as_ref().err().cloned();
        });
        result.map_err(|(attempts, source)| self.unavailable(attempts, source))
    }

    fn unavailable(&self, attempts: u32, source: TransportError) -> Error {
        Error::TransportUnavailable {
            address: self.address.clone(),
            attempts,
            source,
        }
    }

    async fn establish(&self) -> Result<(), (u32, TransportError)> {
        let mut backoff = self.config.backoff();
        let mut attempts = 0u32;

        loop {
            match self.try_connect().await {
                Ok(peripheral) => {
                    self.on_connected(peripheral).await;
                    info!("Connected to {}", self.address);
                    return Ok(());
                }
                Err(e) => {
                    attempts += 1;
                    self.with_link(|link| link.teardown());

                    if self.config.max_attempts.is_some_and(|max| attempts >= max) {
                        error!(
                            "Giving up on {} after {attempts} connection attempts: {e}",
                            self.address
                        );
                        return Err((attempts, e));
                    }

                    let delay = backoff.next_delay();
                    warn!(
                        "Connection to {} failed (attempt {attempts}): {e}. Retrying in {}ms",
                        self.address,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_connect(&self) -> Result<Peripheral<C>, TransportError> {
        let peripheral = match self.with_link(|link| link.peripheral.clone()) {
            Some(peripheral) => peripheral,
            None => {
                debug!("Looking up {}", self.address);
                let peripheral = self.central.find(&self.address).await?;
                self.with_link(|link| link.peripheral = Some(peripheral.clone()));
                peripheral
            }
        };

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        Ok(peripheral)
    }

    async fn on_connected(&self, peripheral: Peripheral<C>) {
        let lost = peripheral.link_lost().await;

        let session = self.with_link(|link| {
            link.session += 1;
            link.connected = true;
            link.characteristics.clear();
            link.peripheral = Some(peripheral);
            link.session
        });

        match lost {
            Ok(lost) => self.watch_link(lost, session),
            Err(e) => warn!(
                "Cannot watch {} for disconnects: {e}. A dropped link surfaces on the next I/O",
                self.address
            ),
        }
    }

    fn watch_link(&self, lost: LinkLost, session: u64) {
        let link = Arc::clone(&self.link);
        let address = self.address.clone();

        tokio::spawn(async move {
            // a closed channel means the subscription ended, not the link
            if lost.await.is_err() {
                return;
            }
            let mut link = link.lock().unwrap_or_else(PoisonError::into_inner);
            if link.session != session {
                return;
            }
            link.teardown();
            info!("{address} disconnected");
        });
    }

    /// Drop the link. Never fails; transport errors are logged and swallowed.
    pub async fn disconnect(&self) {
        let peripheral = match self.with_link(|link| link.teardown()) {
            Some(peripheral) => peripheral,
            None => match self.central.find(&self.address).await {
                Ok(peripheral) => peripheral,
                Err(e) => {
                    debug!("Disconnect {}: lookup failed: {e}", self.address);
                    return;
                }
            },
        };

        if let Err(e) = peripheral.disconnect().await {
            debug!("Disconnect {}: {e}", self.address);
        }
    }

    /// Resolve the characteristic backing `feature`, connecting first
    pub async fn get_characteristic(&self, feature: Feature) -> Result<Characteristic<C>, Error> {
        self.connect().await?;

        let cache = self.config.cache_characteristics;
        let (cached, peripheral, session) = self.with_link(|link| {
            (
                link.characteristics.get(&feature).cloned(),
                link.peripheral.clone(),
                link.session,
            )
        });
        if cache {
            if let Some(characteristic) = cached {
                debug!("{feature} resolved from cache");
                return Ok(characteristic);
            }
        }

        // the peer may have dropped us since connect() returned
        let peripheral = peripheral.ok_or(TransportError::NotConnected)?;
        let wanted = feature.uuid();

        for service in peripheral.discover_services().await? {
            for characteristic in service.discover_characteristics().await? {
                if characteristic.uuid() != wanted {
                    continue;
                }
                if cache {
                    self.with_link(|link| {
                        if link.session == session {
                            link.characteristics.insert(feature, characteristic.clone());
                        }
                    });
                }
                return Ok(characteristic);
            }
        }

        Err(Error::CharacteristicNotFound(feature))
    }

    pub async fn read_characteristic(&self, feature: Feature) -> Result<Vec<u8>, Error> {
        let _io = self.io.lock().await;

        let result = self.read_once(feature).await;
        if let Err(e) = &result {
            error!("Reading {feature} from {} failed: {e}", self.address);
            self.drop_failed_link(e).await;
        }
        result
    }

    pub async fn write_characteristic(&self, feature: Feature, data: &[u8]) -> Result<(), Error> {
        let _io = self.io.lock().await;

        let result = self.write_once(feature, data).await;
        if let Err(e) = &result {
            error!("Writing {feature} to {} failed: {e}", self.address);
            self.drop_failed_link(e).await;
        }
        result
    }

    /// Force a clean link after failed I/O. A connect that gave up has
    /// nothing left to tear down.
    async fn drop_failed_link(&self, error: &Error) {
        if !matches!(error, Error::TransportUnavailable { .. }) {
            self.disconnect().await;
        }
    }

    async fn read_once(&self, feature: Feature) -> Result<Vec<u8>, Error> {
        let characteristic = self.get_characteristic(feature).await?;
        Ok(characteristic.read().await?)
    }

    async fn write_once(&self, feature: Feature, data: &[u8]) -> Result<(), Error> {
        let characteristic = self.get_characteristic(feature).await?;
        Ok(characteristic.write(data).await?)
    }

    /// Write the stored auth code to the device
    ///
    /// Returns `false` when no code is stored; running unauthenticated is
    /// allowed since most reads do not need it.
    pub async fn authenticate(&self) -> Result<bool, Error> {
        let Some(code) = self.load_credentials().await? else {
            info!("No auth code stored for {}, continuing unauthenticated", self.address);
            return Ok(false);
        };

        self.write_characteristic(Feature::Auth, code.as_bytes()).await?;
        info!("Authenticated with {}", self.address);
        Ok(true)
    }

    pub async fn load_credentials(&self) -> Result<Option<AuthCode>, Error> {
        let keystore = Arc::clone(&self.keystore);
        let id = self.address.clone();
        let stored = tokio::task::spawn_blocking(move || keystore.load::<StoredAuth>(&id)).await??;

        match stored {
            Some(stored) => AuthCode::from_hex(&stored.code)
                .map(Some)
                .map_err(|_| Error::TamperedOrCorrupt),
            None => Ok(None),
        }
    }

    pub async fn save_credentials(&self, code: &AuthCode) -> Result<(), Error> {
        let keystore = Arc::clone(&self.keystore);
        let id = self.address.clone();
        let stored = StoredAuth { code: code.to_hex() };
        tokio::task::spawn_blocking(move || keystore.save(&id, &stored)).await??;
        Ok(())
    }

    pub async fn has_credentials(&self) -> Result<bool, Error> {
        let keystore = Arc::clone(&self.keystore);
        let id = self.address.clone();
        Ok(tokio::task::spawn_blocking(move || keystore.contains(&id)).await??)
    }

    pub async fn forget_credentials(&self) -> Result<(), Error> {
        let keystore = Arc::clone(&self.keystore);
        let id = self.address.clone();
        tokio::task::spawn_blocking(move || keystore.delete(&id)).await??;
        info!("Forgot credentials for {}", self.address);
        Ok(())
    }
}

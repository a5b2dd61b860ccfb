//! A fan session: onboarding, polling and capability toggles on top of `Sky`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use intellivent_keystore::SettingsStore;
use intellivent_proto::validate::{
    validated_detection, validated_minutes, validated_minutes_u8, validated_rpm,
};
use intellivent_proto::{
    Airing, AuthCode, Boost, ConstantSpeed, Humidity, LightVoc, Pause, SensorStatus,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionManager;
use crate::error::Error;
use crate::sky::Sky;
use crate::transport::BleCentral;

/// Everything one poll reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub sensor: SensorStatus,
    pub boost: Boost,
    pub pause: Pause,
    pub constant_speed: ConstantSpeed,
    pub humidity: Humidity,
    pub light_voc: LightVoc,
    pub airing: Airing,
}

/// Host settings changes. Absent fields are left as the device has them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub humidity_rpm: Option<i64>,
    pub humidity_detection: Option<f64>,
    pub boost_rpm: Option<i64>,
    pub boost_minutes: Option<f64>,
    pub pause_minutes: Option<f64>,
    pub auth_code: Option<String>,
}

pub struct FanDevice<C: BleCentral, S> {
    sky: Sky<C, S>,
    online: AtomicBool,
}

impl<C, S> FanDevice<C, S>
where
    C: BleCentral,
    S: SettingsStore + 'static,
{
    pub fn new(connection: Arc<ConnectionManager<C, S>>) -> Self {
        Self {
            sky: Sky::new(connection),
            online: AtomicBool::new(false),
        }
    }

    pub fn sky(&self) -> &Sky<C, S> {
        &self.sky
    }

    fn connection(&self) -> &ConnectionManager<C, S> {
        self.sky.connection()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> Result<(), Error> {
        if self.is_online() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Connect, learn the auth code if none is usable, authenticate
    ///
    /// A failed authentication does not fail the session; sensor reads
    /// work without it.
    pub async fn start(&self) -> Result<(), Error> {
        let connection = self.connection();
        connection.connect().await?;

        let paired = match connection.load_credentials().await {
            Ok(code) => code.is_some(),
            Err(Error::TamperedOrCorrupt) => {
                warn!(
                    "Stored auth code for {} is unreadable, pairing again",
                    connection.address()
                );
                false
            }
            Err(e) => return Err(e),
        };
        if !paired {
            self.onboard().await?;
        }

        if let Err(e) = connection.authenticate().await {
            error!("Authentication with {} failed: {e}", connection.address());
        }

        self.online.store(true, Ordering::SeqCst);
        info!("{} online", connection.address());
        Ok(())
    }

    /// Try to read the auth code the device shows in pairing mode and keep it
    ///
    /// Returns whether a code was saved. Not being in pairing mode is not an
    /// error.
    async fn onboard(&self) -> Result<bool, Error> {
        let connection = self.connection();
        let deadline = connection.config().auth_fetch_timeout();

        let code = match tokio::time::timeout(deadline, self.sky.fetch_auth_code()).await {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => {
                info!(
                    "Could not fetch auth code from {} (not in pairing mode?): {e}",
                    connection.address()
                );
                return Ok(false);
            }
            Err(_) => {
                info!(
                    "Timed out fetching auth code from {} (not in pairing mode?)",
                    connection.address()
                );
                return Ok(false);
            }
        };

        if code.is_unset() {
            info!("{} reported an empty auth code", connection.address());
            return Ok(false);
        }

        connection.save_credentials(&code).await?;
        info!("Saved auth code fetched from {}", connection.address());
        Ok(true)
    }

    /// Read the full device state. A failure takes the session offline.
    pub async fn poll(&self) -> Result<Snapshot, Error> {
        self.ensure_online()?;

        match self.read_snapshot().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                error!("Polling {} failed: {e}", self.connection().address());
                self.online.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn read_snapshot(&self) -> Result<Snapshot, Error> {
        Ok(Snapshot {
            sensor: self.sky.get_sensor_data().await?,
            boost: self.sky.get_boost().await?,
            pause: self.sky.get_pause().await?,
            constant_speed: self.sky.get_constant_speed().await?,
            humidity: self.sky.get_humidity().await?,
            light_voc: self.sky.get_light_voc().await?,
            airing: self.sky.get_airing().await?,
        })
    }

    pub async fn set_boost_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.ensure_online()?;
        let current = self.sky.get_boost().await?;
        self.sky.set_boost(enabled, current.minutes, current.rpm).await
    }

    pub async fn set_pause_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.ensure_online()?;
        let current = self.sky.get_pause().await?;
        self.sky.set_pause(enabled, current.minutes).await
    }

    pub async fn set_constant_speed_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.ensure_online()?;
        let current = self.sky.get_constant_speed().await?;
        self.sky.set_constant_speed(enabled, current.rpm).await
    }

    /// Constant speed target; the enabled flag is kept
    pub async fn set_target_rpm(&self, rpm: i64) -> Result<(), Error> {
        self.ensure_online()?;
        let current = self.sky.get_constant_speed().await?;
        self.sky
            .set_constant_speed(current.enabled, validated_rpm(rpm))
            .await
    }

    pub async fn set_humidity_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.ensure_online()?;
        let current = self.sky.get_humidity().await?;
        self.sky
            .set_humidity(enabled, current.detection, current.rpm)
            .await
    }

    pub async fn set_light_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.ensure_online()?;
        let current = self.sky.get_light_voc().await?;
        self.sky
            .set_light_voc(
                enabled,
                current.light.detection,
                current.voc.enabled,
                current.voc.detection,
            )
            .await
    }

    pub async fn set_airing_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.ensure_online()?;
        let current = self.sky.get_airing().await?;
        self.sky
            .set_airing(enabled, current.run_time, current.rpm)
            .await
    }

    /// Push changed settings to the device, one read-modify-write per record
    ///
    /// A new auth code is checked before anything is written, then stored
    /// and sent to the device.
    pub async fn apply_settings(&self, update: &SettingsUpdate) -> Result<(), Error> {
        self.ensure_online()?;

        let code = update
            .auth_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(AuthCode::from_hex)
            .transpose()?;

        if update.humidity_rpm.is_some() || update.humidity_detection.is_some() {
            let current = self.sky.get_humidity().await?;
            let detection = update
                .humidity_detection
                .map_or(current.detection, validated_detection);
            let rpm = update.humidity_rpm.map_or(current.rpm, validated_rpm);
            self.sky
                .set_humidity(current.enabled, detection, rpm)
                .await?;
        }

        if update.boost_rpm.is_some() || update.boost_minutes.is_some() {
            let current = self.sky.get_boost().await?;
            let minutes = update.boost_minutes.map_or(current.minutes, validated_minutes);
            let rpm = update.boost_rpm.map_or(current.rpm, validated_rpm);
            self.sky.set_boost(current.enabled, minutes, rpm).await?;
        }

        if let Some(minutes) = update.pause_minutes {
            let current = self.sky.get_pause().await?;
            self.sky
                .set_pause(current.enabled, validated_minutes_u8(minutes))
                .await?;
        }

        if let Some(code) = code {
            self.connection().save_credentials(&code).await?;
            self.sky.authenticate(&code).await?;
            info!("Authenticated {} with a new auth code", self.connection().address());
        }

        Ok(())
    }

    /// Take the session offline and drop the link
    pub async fn stop(&self) {
        self.online.store(false, Ordering::SeqCst);
        self.connection().disconnect().await;
    }

    /// Remove the device: delete its stored code and disconnect
    pub async fn forget(&self) -> Result<(), Error> {
        self.online.store(false, Ordering::SeqCst);
        self.connection().forget_credentials().await?;
        self.connection().disconnect().await;
        Ok(())
    }
}

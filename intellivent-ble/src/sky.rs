//! Typed access to the fan's characteristics
//!
//! Each getter reads one characteristic and decodes it, each setter encodes
//! and writes one. Setters clamp their inputs; there is no read-modify-write
//! here, see `FanDevice` for that.

use std::sync::Arc;

use intellivent_keystore::SettingsStore;
use intellivent_proto::ble::Feature;
use intellivent_proto::{
    Airing, AuthCode, Boost, ConstantSpeed, Delay, Detector, Humidity, LightVoc, Pause,
    SensorStatus, TemporarySpeed, Timer,
};

use crate::connection::ConnectionManager;
use crate::error::Error;
use crate::transport::BleCentral;

pub struct Sky<C: BleCentral, S> {
    connection: Arc<ConnectionManager<C, S>>,
}

impl<C: BleCentral, S> Clone for Sky<C, S> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
        }
    }
}

impl<C, S> Sky<C, S>
where
    C: BleCentral,
    S: SettingsStore + 'static,
{
    pub fn new(connection: Arc<ConnectionManager<C, S>>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager<C, S>> {
        &self.connection
    }

    async fn read(&self, feature: Feature) -> Result<Vec<u8>, Error> {
        self.connection.read_characteristic(feature).await
    }

    async fn write(&self, feature: Feature, data: &[u8]) -> Result<(), Error> {
        self.connection.write_characteristic(feature, data).await
    }

    /// Read the code the device exposes while in pairing mode
    pub async fn fetch_auth_code(&self) -> Result<AuthCode, Error> {
        Ok(AuthCode::from_bytes(&self.read(Feature::Auth).await?))
    }

    pub async fn authenticate(&self, code: &AuthCode) -> Result<(), Error> {
        self.write(Feature::Auth, code.as_bytes()).await
    }

    /// Like `authenticate`, but takes the hex form; bad hex fails before any I/O
    pub async fn authenticate_hex(&self, hex: &str) -> Result<(), Error> {
        let code = AuthCode::from_hex(hex)?;
        self.authenticate(&code).await
    }

    pub async fn device_name(&self) -> Result<String, Error> {
        let data = self.read(Feature::DeviceName).await?;
        Ok(String::from_utf8_lossy(&data)
            .trim_end_matches('\0')
            .to_string())
    }

    pub async fn get_humidity(&self) -> Result<Humidity, Error> {
        Ok(Humidity::from_bytes(&self.read(Feature::Humidity).await?)?)
    }

    pub async fn set_humidity(&self, enabled: bool, detection: u8, rpm: u16) -> Result<(), Error> {
        let record = Humidity::new(enabled, detection, rpm);
        self.write(Feature::Humidity, &record.to_bytes()).await
    }

    pub async fn get_light_voc(&self) -> Result<LightVoc, Error> {
        Ok(LightVoc::from_bytes(&self.read(Feature::LightVoc).await?)?)
    }

    pub async fn set_light_voc(
        &self,
        light_enabled: bool,
        light_detection: u8,
        voc_enabled: bool,
        voc_detection: u8,
    ) -> Result<(), Error> {
        let record = LightVoc {
            light: Detector {
                enabled: light_enabled,
                detection: light_detection,
            },
            voc: Detector {
                enabled: voc_enabled,
                detection: voc_detection,
            },
        };
        self.write(Feature::LightVoc, &record.to_bytes()).await
    }

    pub async fn get_constant_speed(&self) -> Result<ConstantSpeed, Error> {
        Ok(ConstantSpeed::from_bytes(
            &self.read(Feature::ConstantSpeed).await?,
        )?)
    }

    pub async fn set_constant_speed(&self, enabled: bool, rpm: u16) -> Result<(), Error> {
        let record = ConstantSpeed { enabled, rpm };
        self.write(Feature::ConstantSpeed, &record.to_bytes()).await
    }

    pub async fn get_timer(&self) -> Result<Timer, Error> {
        Ok(Timer::from_bytes(&self.read(Feature::Timer).await?)?)
    }

    pub async fn set_timer(
        &self,
        run_time: u8,
        delay_enabled: bool,
        delay_minutes: u8,
        rpm: u16,
    ) -> Result<(), Error> {
        let record = Timer {
            run_time,
            delay: Delay {
                enabled: delay_enabled,
                minutes: delay_minutes,
            },
            rpm,
        };
        self.write(Feature::Timer, &record.to_bytes()).await
    }

    pub async fn get_airing(&self) -> Result<Airing, Error> {
        Ok(Airing::from_bytes(&self.read(Feature::Airing).await?)?)
    }

    pub async fn set_airing(&self, enabled: bool, run_time: u8, rpm: u16) -> Result<(), Error> {
        let record = Airing {
            enabled,
            run_time,
            rpm,
        };
        self.write(Feature::Airing, &record.to_bytes()).await
    }

    pub async fn get_pause(&self) -> Result<Pause, Error> {
        Ok(Pause::from_bytes(&self.read(Feature::Pause).await?)?)
    }

    pub async fn set_pause(&self, enabled: bool, minutes: u8) -> Result<(), Error> {
        let record = Pause { enabled, minutes };
        self.write(Feature::Pause, &record.to_bytes()).await
    }

    pub async fn get_boost(&self) -> Result<Boost, Error> {
        Ok(Boost::from_bytes(&self.read(Feature::Boost).await?)?)
    }

    pub async fn set_boost(&self, enabled: bool, minutes: u16, rpm: u16) -> Result<(), Error> {
        let record = Boost::new(enabled, minutes, rpm);
        self.write(Feature::Boost, &record.to_bytes()).await
    }

    /// Write only; the device offers no way to read the override back
    pub async fn set_temporary_speed(&self, enabled: bool, rpm: u16) -> Result<(), Error> {
        let record = TemporarySpeed { enabled, rpm };
        self.write(Feature::TemporarySpeed, &record.to_bytes()).await
    }

    pub async fn get_sensor_data(&self) -> Result<SensorStatus, Error> {
        Ok(SensorStatus::from_bytes(
            &self.read(Feature::DeviceStatus).await?,
        )?)
    }
}

//! BLE GATT characteristic identifiers for Intellivent Sky fans
//!
//! These UUIDs are the wire contract with the device firmware and must match
//! byte-for-byte.

use uuid::Uuid;

/// Device name characteristic (read, UTF-8)
pub const DEVICE_NAME_UUID: Uuid = Uuid::from_u128(0xb85fa07a_9382_4838_871c_81d045dcc2ff);

/// Sensor status characteristic (read)
pub const DEVICE_STATUS_UUID: Uuid = Uuid::from_u128(0x528b80e8_c47a_4c0a_bdf1_916a7748f412);

/// Authentication code characteristic (read/write)
pub const AUTH_UUID: Uuid = Uuid::from_u128(0x4cad343a_209a_40b7_b911_4d9b3df569b2);

/// Humidity mode characteristic (read/write)
pub const HUMIDITY_UUID: Uuid = Uuid::from_u128(0x7c4adc01_2f33_11e7_93ae_92361f002671);

/// Light and VOC mode characteristic (read/write)
pub const LIGHT_VOC_UUID: Uuid = Uuid::from_u128(0x7c4adc02_2f33_11e7_93ae_92361f002671);

/// Constant speed mode characteristic (read/write)
pub const CONSTANT_SPEED_UUID: Uuid = Uuid::from_u128(0x7c4adc03_2f33_11e7_93ae_92361f002671);

/// Timer mode characteristic (read/write)
pub const TIMER_UUID: Uuid = Uuid::from_u128(0x7c4adc04_2f33_11e7_93ae_92361f002671);

/// Airing mode characteristic (read/write)
pub const AIRING_UUID: Uuid = Uuid::from_u128(0x7c4adc05_2f33_11e7_93ae_92361f002671);

/// Pause mode characteristic (read/write)
pub const PAUSE_UUID: Uuid = Uuid::from_u128(0x7c4adc06_2f33_11e7_93ae_92361f002671);

/// Boost mode characteristic (read/write)
pub const BOOST_UUID: Uuid = Uuid::from_u128(0x7c4adc07_2f33_11e7_93ae_92361f002671);

/// Temporary speed characteristic (write only)
pub const TEMPORARY_SPEED_UUID: Uuid = Uuid::from_u128(0x7c4adc08_2f33_11e7_93ae_92361f002671);

/// Advertised local names of supported fans
pub const DEVICE_NAMES: [&str; 2] = ["Intellivent SKY", "Intellivent ICE"];

pub fn is_supported_device_name(name: &str) -> bool {
    DEVICE_NAMES.contains(&name)
}

/// What a characteristic allows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// A device feature, one per characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    DeviceName,
    DeviceStatus,
    Auth,
    Humidity,
    LightVoc,
    ConstantSpeed,
    Timer,
    Airing,
    Pause,
    Boost,
    TemporarySpeed,
}

impl Feature {
    pub const ALL: [Feature; 11] = [
        Feature::DeviceName,
        Feature::DeviceStatus,
        Feature::Auth,
        Feature::Humidity,
        Feature::LightVoc,
        Feature::ConstantSpeed,
        Feature::Timer,
        Feature::Airing,
        Feature::Pause,
        Feature::Boost,
        Feature::TemporarySpeed,
    ];

    pub fn uuid(self) -> Uuid {
        match self {
            Feature::DeviceName => DEVICE_NAME_UUID,
            Feature::DeviceStatus => DEVICE_STATUS_UUID,
            Feature::Auth => AUTH_UUID,
            Feature::Humidity => HUMIDITY_UUID,
            Feature::LightVoc => LIGHT_VOC_UUID,
            Feature::ConstantSpeed => CONSTANT_SPEED_UUID,
            Feature::Timer => TIMER_UUID,
            Feature::Airing => AIRING_UUID,
            Feature::Pause => PAUSE_UUID,
            Feature::Boost => BOOST_UUID,
            Feature::TemporarySpeed => TEMPORARY_SPEED_UUID,
        }
    }

    pub fn from_uuid(uuid: &Uuid) -> Option<Feature> {
        Feature::ALL.into_iter().find(|f| f.uuid() == *uuid)
    }

    pub fn name(self) -> &'static str {
        match self {
            Feature::DeviceName => "DEVICE_NAME",
            Feature::DeviceStatus => "DEVICE_STATUS",
            Feature::Auth => "AUTH",
            Feature::Humidity => "HUMIDITY",
            Feature::LightVoc => "LIGHT_VOC",
            Feature::ConstantSpeed => "CONSTANT_SPEED",
            Feature::Timer => "TIMER",
            Feature::Airing => "AIRING",
            Feature::Pause => "PAUSE",
            Feature::Boost => "BOOST",
            Feature::TemporarySpeed => "TEMPORARY_SPEED",
        }
    }

    pub fn access(self) -> Access {
        match self {
            Feature::DeviceName | Feature::DeviceStatus => Access::Read,
            Feature::TemporarySpeed => Access::Write,
            _ => Access::ReadWrite,
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

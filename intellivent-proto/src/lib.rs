//! Intellivent Sky wire protocol - fixed layout characteristic records
//!
//! Every record is little-endian and fixed width. Decoding never looks at
//! device state and encoding never reads prior values, so callers do
//! read-modify-write themselves.

pub mod ble;
pub mod validate;

use serde::{Deserialize, Serialize};

use validate::{clamp_detection, clamp_rpm};

/// Value the device expects in byte 1 of every airing write
pub const AIRING_MARKER: u8 = 0x1A;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtoError {
    #[error("{record} record too short: expected {expected} bytes, got {actual}")]
    MalformedRecord {
        record: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid auth code: {0}")]
    InvalidAuthCode(String),
}

fn ensure_len(record: &'static str, data: &[u8], expected: usize) -> Result<(), ProtoError> {
    if data.len() < expected {
        return Err(ProtoError::MalformedRecord {
            record,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn u16_le(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

/// Humidity mode: 0:enabled 1:detection 2:rpm(2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Humidity {
    pub enabled: bool,
    pub detection: u8,
    pub rpm: u16,
}

impl Humidity {
    pub const LEN: usize = 4;

    pub fn new(enabled: bool, detection: u8, rpm: u16) -> Self {
        Self { enabled, detection, rpm }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.push(self.enabled as u8);
        buf.push(clamp_detection(self.detection));
        buf.extend_from_slice(&clamp_rpm(self.rpm).to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        ensure_len("HUMIDITY", data, Self::LEN)?;
        Ok(Self {
            enabled: data[0] != 0,
            detection: data[1],
            rpm: u16_le(data, 2),
        })
    }
}

/// One sensor-triggered mode: on/off plus sensitivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detector {
    pub enabled: bool,
    pub detection: u8,
}

/// Light and VOC modes: 0:light enabled 1:light detection 2:voc enabled 3:voc detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightVoc {
    pub light: Detector,
    pub voc: Detector,
}

impl LightVoc {
    pub const LEN: usize = 4;

    pub fn to_bytes(&self) -> Vec<u8> {
        vec![
            self.light.enabled as u8,
            clamp_detection(self.light.detection),
            self.voc.enabled as u8,
            clamp_detection(self.voc.detection),
        ]
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        ensure_len("LIGHT_VOC", data, Self::LEN)?;
        Ok(Self {
            light: Detector {
                enabled: data[0] != 0,
                detection: data[1],
            },
            voc: Detector {
                enabled: data[2] != 0,
                detection: data[3],
            },
        })
    }
}

/// Constant speed mode: 0:enabled 1:rpm(2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantSpeed {
    pub enabled: bool,
    pub rpm: u16,
}

impl ConstantSpeed {
    pub const LEN: usize = 3;

    pub fn to_bytes(&self) -> Vec<u8> {
        speed_bytes(self.enabled, self.rpm)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        ensure_len("CONSTANT_SPEED", data, Self::LEN)?;
        Ok(Self {
            enabled: data[0] != 0,
            rpm: u16_le(data, 1),
        })
    }
}

/// Delayed start of the timer mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delay {
    pub enabled: bool,
    pub minutes: u8,
}

/// Timer mode: 0:run time 1:delay enabled 2:delay minutes 3:rpm(2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub run_time: u8,
    pub delay: Delay,
    pub rpm: u16,
}

impl Timer {
    pub const LEN: usize = 5;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.push(self.run_time);
        buf.push(self.delay.enabled as u8);
        buf.push(self.delay.minutes);
        buf.extend_from_slice(&clamp_rpm(self.rpm).to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        ensure_len("TIMER", data, Self::LEN)?;
        Ok(Self {
            run_time: data[0],
            delay: Delay {
                enabled: data[1] != 0,
                minutes: data[2],
            },
            rpm: u16_le(data, 3),
        })
    }
}

/// Airing mode: 0:enabled 1:0x1A 2:run time 3:rpm(2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airing {
    pub enabled: bool,
    pub run_time: u8,
    pub rpm: u16,
}

impl Airing {
    pub const LEN: usize = 5;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.push(self.enabled as u8);
        buf.push(AIRING_MARKER);
        buf.push(self.run_time);
        buf.extend_from_slice(&clamp_rpm(self.rpm).to_le_bytes());
        buf
    }

    /// Byte 1 is not interpreted.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        ensure_len("AIRING", data, Self::LEN)?;
        Ok(Self {
            enabled: data[0] != 0,
            run_time: data[2],
            rpm: u16_le(data, 3),
        })
    }
}

/// Pause mode: 0:enabled 1:minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pause {
    pub enabled: bool,
    pub minutes: u8,
}

impl Pause {
    pub const LEN: usize = 2;

    pub fn to_bytes(&self) -> Vec<u8> {
        vec![self.enabled as u8, self.minutes]
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        ensure_len("PAUSE", data, Self::LEN)?;
        Ok(Self {
            enabled: data[0] != 0,
            minutes: data[1],
        })
    }
}

/// Boost mode: 0:enabled 1:minutes(2) 3:rpm(2)
///
/// Older firmware notes disagree on the packing of this record; both
/// directions use the 5-byte layout here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Boost {
    pub enabled: bool,
    pub minutes: u16,
    pub rpm: u16,
}

impl Boost {
    pub const LEN: usize = 5;

    pub fn new(enabled: bool, minutes: u16, rpm: u16) -> Self {
        Self { enabled, minutes, rpm }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.push(self.enabled as u8);
        buf.extend_from_slice(&self.minutes.to_le_bytes());
        buf.extend_from_slice(&clamp_rpm(self.rpm).to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        ensure_len("BOOST", data, Self::LEN)?;
        Ok(Self {
            enabled: data[0] != 0,
            minutes: u16_le(data, 1),
            rpm: u16_le(data, 3),
        })
    }
}

/// Temporary speed override: 0:enabled 1:rpm(2). Write only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporarySpeed {
    pub enabled: bool,
    pub rpm: u16,
}

impl TemporarySpeed {
    pub const LEN: usize = 3;

    pub fn to_bytes(&self) -> Vec<u8> {
        speed_bytes(self.enabled, self.rpm)
    }
}

fn speed_bytes(enabled: bool, rpm: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3);
    buf.push(enabled as u8);
    buf.extend_from_slice(&clamp_rpm(rpm).to_le_bytes());
    buf
}

/// Sensor status: 0:status 1:mode 8:rpm(2) 13:temperature(2). Read only.
///
/// The remaining bytes of the 15 byte record are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorStatus {
    pub status: bool,
    pub mode: u8,
    pub rpm: u16,
    pub temperature: u16,
}

impl SensorStatus {
    pub const LEN: usize = 15;

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        ensure_len("DEVICE_STATUS", data, Self::LEN)?;
        Ok(Self {
            status: data[0] != 0,
            mode: data[1],
            rpm: u16_le(data, 8),
            temperature: u16_le(data, 13),
        })
    }
}

/// Device authentication code, carried as hex in storage and settings
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCode(Vec<u8>);

impl AuthCode {
    pub fn from_hex(hex: &str) -> Result<Self, ProtoError> {
        let hex = hex.trim();
        if hex.len() % 2 != 0 {
            return Err(ProtoError::InvalidAuthCode(format!(
                "odd length ({} hex digits)",
                hex.len()
            )));
        }
        data_encoding::HEXLOWER_PERMISSIVE
            .decode(hex.as_bytes())
            .map(Self)
            .map_err(|e| ProtoError::InvalidAuthCode(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self(data.to_vec())
    }

    pub fn to_hex(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The device reports zeros when it is not in pairing mode.
    pub fn is_unset(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

// never print the code itself
impl std::fmt::Debug for AuthCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthCode({} bytes)", self.0.len())
    }
}

//! Clamping of host supplied values into the ranges the fan accepts
//!
//! Values are clamped, never rejected. Records apply the same clamps again
//! when encoding, so a record built from unchecked integers is still safe to
//! write.

/// Lowest fan speed the device accepts
pub const RPM_MIN: u16 = 800;

/// Highest fan speed the device accepts
pub const RPM_MAX: u16 = 2400;

/// Highest sensor detection (sensitivity) level
pub const DETECTION_MAX: u8 = 3;

pub fn validated_rpm(value: i64) -> u16 {
    value.clamp(i64::from(RPM_MIN), i64::from(RPM_MAX)) as u16
}

pub fn validated_detection(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, f64::from(DETECTION_MAX)).trunc() as u8
}

/// Minutes for a 2-byte field. Float to int `as` casts saturate.
pub fn validated_minutes(value: f64) -> u16 {
    if value.is_nan() {
        return 0;
    }
    value.max(0.0).trunc() as u16
}

/// Minutes for a 1-byte field
pub fn validated_minutes_u8(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.max(0.0).trunc() as u8
}

pub(crate) fn clamp_rpm(rpm: u16) -> u16 {
    rpm.clamp(RPM_MIN, RPM_MAX)
}

pub(crate) fn clamp_detection(detection: u8) -> u8 {
    detection.min(DETECTION_MAX)
}

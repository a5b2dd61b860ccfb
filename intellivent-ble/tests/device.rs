use std::sync::Arc;
use std::time::Duration;

use intellivent_ble::mock::{MockCentral, MockDevice};
use intellivent_ble::{ConnectionConfig, ConnectionManager, Error, FanDevice, SettingsUpdate, Sky};
use intellivent_keystore::{KdfParams, KeyStore, MemoryStore, SettingsStore, entry_key};
use intellivent_proto::ble::Feature;
use intellivent_proto::{
    Airing, AuthCode, Boost, ConstantSpeed, Detector, Humidity, LightVoc, Pause, SensorStatus,
};

const ADDR: &str = "C4:2E:9D:00:00:02";
const FAST: KdfParams = KdfParams { log_n: 4, r: 8, p: 1 };

type Manager = ConnectionManager<MockCentral, Arc<MemoryStore>>;

struct Harness {
    device: MockDevice,
    connection: Arc<Manager>,
    fan: FanDevice<MockCentral, Arc<MemoryStore>>,
}

fn harness() -> Harness {
    let device = MockDevice::new(ADDR);
    let keystore = Arc::new(KeyStore::with_params(Arc::new(MemoryStore::new()), FAST));
    let connection = Arc::new(ConnectionManager::new(
        ADDR,
        MockCentral::with_device(&device),
        keystore,
        ConnectionConfig::default(),
    ));
    let fan = FanDevice::new(Arc::clone(&connection));
    Harness {
        device,
        connection,
        fan,
    }
}

fn status_bytes() -> Vec<u8> {
    let mut data = vec![0u8; SensorStatus::LEN];
    data[0] = 1;
    data[1] = 3;
    data[8..10].copy_from_slice(&1200u16.to_le_bytes());
    data[13..15].copy_from_slice(&215u16.to_le_bytes());
    data
}

fn load_fan_state(device: &MockDevice) {
    device.set_value(Feature::DeviceStatus, status_bytes());
    device.set_value(Feature::Boost, vec![0, 0x0f, 0x00, 0xb0, 0x04]);
    device.set_value(Feature::Pause, vec![0, 30]);
    device.set_value(Feature::ConstantSpeed, vec![1, 0x20, 0x03]);
    device.set_value(Feature::Humidity, vec![1, 1, 0x20, 0x03]);
    device.set_value(Feature::LightVoc, vec![0, 2, 1, 3]);
    device.set_value(Feature::Airing, vec![0, 0x1a, 20, 0xe8, 0x03]);
}

#[tokio::test]
async fn humidity_round_trips_through_the_device() {
    let h = harness();
    let sky = Sky::new(Arc::clone(&h.connection));

    sky.set_humidity(true, 2, 1500).await.unwrap();

    assert_eq!(h.device.value(Feature::Humidity), Some(vec![1, 2, 0xdc, 0x05]));
    assert_eq!(
        sky.get_humidity().await.unwrap(),
        Humidity {
            enabled: true,
            detection: 2,
            rpm: 1500
        }
    );
}

#[tokio::test]
async fn boost_rpm_is_clamped() {
    let h = harness();
    let sky = Sky::new(Arc::clone(&h.connection));

    sky.set_boost(true, 10, 5000).await.unwrap();

    assert_eq!(
        h.device.value(Feature::Boost),
        Some(vec![1, 10, 0, 0x60, 0x09])
    );
    assert_eq!(sky.get_boost().await.unwrap().rpm, 2400);
}

#[tokio::test]
async fn sensor_status_is_decoded() {
    let h = harness();
    let sky = Sky::new(Arc::clone(&h.connection));
    h.device.set_value(Feature::DeviceStatus, status_bytes());

    assert_eq!(
        sky.get_sensor_data().await.unwrap(),
        SensorStatus {
            status: true,
            mode: 3,
            rpm: 1200,
            temperature: 215
        }
    );
}

#[tokio::test]
async fn short_record_is_malformed() {
    let h = harness();
    let sky = Sky::new(Arc::clone(&h.connection));
    h.device.set_value(Feature::DeviceStatus, vec![1, 3, 0]);

    let err = sky.get_sensor_data().await.unwrap_err();
    assert!(matches!(err, Error::MalformedRecord(_)));
}

#[tokio::test]
async fn write_only_and_marker_records() {
    let h = harness();
    let sky = Sky::new(Arc::clone(&h.connection));

    sky.set_temporary_speed(true, 100).await.unwrap();
    sky.set_airing(true, 30, 1200).await.unwrap();

    assert_eq!(
        h.device.writes(),
        vec![
            (Feature::TemporarySpeed, vec![1, 0x20, 0x03]),
            (Feature::Airing, vec![1, 0x1a, 30, 0xb0, 0x04]),
        ]
    );
}

#[tokio::test]
async fn device_name_is_utf8() {
    let h = harness();
    let sky = Sky::new(Arc::clone(&h.connection));
    h.device
        .set_value(Feature::DeviceName, b"Intellivent SKY\0".to_vec());

    assert_eq!(sky.device_name().await.unwrap(), "Intellivent SKY");
}

#[tokio::test]
async fn bad_hex_fails_before_any_io() {
    let h = harness();
    let sky = Sky::new(Arc::clone(&h.connection));

    let err = sky.authenticate_hex("abc").await.unwrap_err();
    assert!(matches!(err, Error::InvalidAuthCode(_)));
    let err = sky.authenticate_hex("zz00").await.unwrap_err();
    assert!(matches!(err, Error::InvalidAuthCode(_)));
    assert_eq!(h.device.connect_calls(), 0);
}

#[tokio::test]
async fn controls_need_a_started_session() {
    let h = harness();

    assert!(matches!(h.fan.poll().await, Err(Error::NotConnected)));
    assert!(matches!(
        h.fan.set_boost_enabled(true).await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        h.fan.apply_settings(&SettingsUpdate::default()).await,
        Err(Error::NotConnected)
    ));
    assert_eq!(h.device.connect_calls(), 0);
}

#[tokio::test]
async fn start_saves_code_from_pairing_mode() {
    let h = harness();
    h.device.set_value(Feature::Auth, vec![0xc0, 0xff, 0xee, 0x01]);

    h.fan.start().await.unwrap();

    assert!(h.fan.is_online());
    assert_eq!(
        h.connection.load_credentials().await.unwrap(),
        Some(AuthCode::from_hex("c0ffee01").unwrap())
    );
    assert_eq!(
        h.device.writes(),
        vec![(Feature::Auth, vec![0xc0, 0xff, 0xee, 0x01])]
    );
}

#[tokio::test]
async fn zero_code_is_not_saved() {
    let h = harness();
    h.device.set_value(Feature::Auth, vec![0, 0, 0, 0]);

    h.fan.start().await.unwrap();

    assert!(h.fan.is_online());
    assert!(!h.connection.has_credentials().await.unwrap());
    assert!(h.device.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_auth_fetch_times_out() {
    let h = harness();
    h.device.set_value(Feature::Auth, vec![0xc0, 0xff, 0xee, 0x01]);
    h.device.set_read_delay(Duration::from_secs(30));

    let started = tokio::time::Instant::now();
    h.fan.start().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(h.fan.is_online());
    assert!(!h.connection.has_credentials().await.unwrap());
}

#[tokio::test]
async fn stored_code_skips_pairing() {
    let h = harness();
    let code = AuthCode::from_hex("0a0b0c0d").unwrap();
    h.connection.save_credentials(&code).await.unwrap();

    h.fan.start().await.unwrap();

    assert_eq!(h.device.read_calls(), 0);
    assert_eq!(
        h.device.writes(),
        vec![(Feature::Auth, vec![0x0a, 0x0b, 0x0c, 0x0d])]
    );
}

#[tokio::test]
async fn unreadable_stored_code_is_replaced_by_pairing() {
    let h = harness();
    h.connection
        .keystore()
        .settings()
        .set(&entry_key(ADDR), b"garbage")
        .unwrap();
    h.device.set_value(Feature::Auth, vec![0xc0, 0xff, 0xee, 0x01]);

    h.fan.start().await.unwrap();

    assert!(h.fan.is_online());
    assert_eq!(h.device.read_calls(), 1);
    assert_eq!(
        h.connection.load_credentials().await.unwrap(),
        Some(AuthCode::from_hex("c0ffee01").unwrap())
    );
    assert_eq!(
        h.device.writes(),
        vec![(Feature::Auth, vec![0xc0, 0xff, 0xee, 0x01])]
    );
}

#[tokio::test]
async fn failed_authentication_keeps_the_session() {
    let h = harness();
    let code = AuthCode::from_hex("0a0b0c0d").unwrap();
    h.connection.save_credentials(&code).await.unwrap();
    h.device.fail_next_writes(1);

    h.fan.start().await.unwrap();

    assert!(h.fan.is_online());
}

#[tokio::test]
async fn poll_reads_every_record() {
    let h = harness();
    load_fan_state(&h.device);
    h.fan.start().await.unwrap();

    let snapshot = h.fan.poll().await.unwrap();

    assert_eq!(snapshot.sensor.rpm, 1200);
    assert_eq!(snapshot.sensor.temperature, 215);
    assert_eq!(
        snapshot.boost,
        Boost {
            enabled: false,
            minutes: 15,
            rpm: 1200
        }
    );
    assert_eq!(
        snapshot.pause,
        Pause {
            enabled: false,
            minutes: 30
        }
    );
    assert_eq!(
        snapshot.constant_speed,
        ConstantSpeed {
            enabled: true,
            rpm: 800
        }
    );
    assert_eq!(snapshot.humidity, Humidity::new(true, 1, 800));
    assert_eq!(
        snapshot.light_voc,
        LightVoc {
            light: Detector {
                enabled: false,
                detection: 2
            },
            voc: Detector {
                enabled: true,
                detection: 3
            },
        }
    );
    assert_eq!(
        snapshot.airing,
        Airing {
            enabled: false,
            run_time: 20,
            rpm: 1000
        }
    );
}

#[tokio::test]
async fn poll_failure_takes_the_session_offline() {
    let h = harness();
    load_fan_state(&h.device);
    h.fan.start().await.unwrap();

    h.device.fail_next_reads(1);
    assert!(matches!(h.fan.poll().await, Err(Error::Transport(_))));
    assert!(!h.fan.is_online());
    assert!(matches!(h.fan.poll().await, Err(Error::NotConnected)));

    h.fan.start().await.unwrap();
    h.fan.poll().await.unwrap();
    assert_eq!(h.device.connect_calls(), 2);
}

#[tokio::test]
async fn toggles_keep_the_other_fields() {
    let h = harness();
    load_fan_state(&h.device);
    h.fan.start().await.unwrap();

    h.fan.set_boost_enabled(true).await.unwrap();
    h.fan.set_pause_enabled(true).await.unwrap();
    h.fan.set_light_enabled(true).await.unwrap();
    h.fan.set_airing_enabled(true).await.unwrap();
    h.fan.set_humidity_enabled(false).await.unwrap();
    h.fan.set_constant_speed_enabled(false).await.unwrap();
    h.fan.set_target_rpm(3000).await.unwrap();

    let value = |feature| h.device.value(feature).unwrap();
    assert_eq!(value(Feature::Boost), vec![1, 0x0f, 0x00, 0xb0, 0x04]);
    assert_eq!(value(Feature::Pause), vec![1, 30]);
    assert_eq!(value(Feature::LightVoc), vec![1, 2, 1, 3]);
    assert_eq!(value(Feature::Airing), vec![1, 0x1a, 20, 0xe8, 0x03]);
    assert_eq!(value(Feature::Humidity), vec![0, 1, 0x20, 0x03]);
    assert_eq!(value(Feature::ConstantSpeed), vec![0, 0x60, 0x09]);
}

#[tokio::test]
async fn settings_are_validated_and_merged() {
    let h = harness();
    load_fan_state(&h.device);
    h.fan.start().await.unwrap();

    let update = SettingsUpdate {
        humidity_rpm: Some(1500),
        humidity_detection: Some(7.9),
        boost_minutes: Some(-4.0),
        pause_minutes: Some(12.7),
        ..SettingsUpdate::default()
    };
    h.fan.apply_settings(&update).await.unwrap();

    let value = |feature| h.device.value(feature).unwrap();
    assert_eq!(value(Feature::Humidity), vec![1, 3, 0xdc, 0x05]);
    assert_eq!(value(Feature::Boost), vec![0, 0, 0, 0xb0, 0x04]);
    assert_eq!(value(Feature::Pause), vec![0, 12]);
}

#[tokio::test]
async fn invalid_auth_code_setting_writes_nothing() {
    let h = harness();
    load_fan_state(&h.device);
    h.fan.start().await.unwrap();
    let writes = h.device.writes().len();

    let update = SettingsUpdate {
        humidity_rpm: Some(1000),
        auth_code: Some("abc".to_string()),
        ..SettingsUpdate::default()
    };
    let err = h.fan.apply_settings(&update).await.unwrap_err();

    assert!(matches!(err, Error::InvalidAuthCode(_)));
    assert_eq!(h.device.writes().len(), writes);
    assert!(!h.connection.has_credentials().await.unwrap());
}

#[tokio::test]
async fn new_auth_code_setting_is_stored_and_sent() {
    let h = harness();
    load_fan_state(&h.device);
    h.fan.start().await.unwrap();

    let update: SettingsUpdate = serde_json::from_str(r#"{"auth_code": " C0FFEE01 "}"#).unwrap();
    h.fan.apply_settings(&update).await.unwrap();

    let code = AuthCode::from_hex("c0ffee01").unwrap();
    assert_eq!(h.connection.load_credentials().await.unwrap(), Some(code));
    assert_eq!(
        h.device.writes().last(),
        Some(&(Feature::Auth, vec![0xc0, 0xff, 0xee, 0x01]))
    );
}

#[tokio::test]
async fn forget_removes_code_and_disconnects() {
    let h = harness();
    h.device.set_value(Feature::Auth, vec![0xc0, 0xff, 0xee, 0x01]);
    h.fan.start().await.unwrap();
    assert!(h.connection.has_credentials().await.unwrap());

    h.fan.forget().await.unwrap();

    assert!(!h.connection.has_credentials().await.unwrap());
    assert!(!h.device.connected());
    assert!(!h.fan.is_online());
}

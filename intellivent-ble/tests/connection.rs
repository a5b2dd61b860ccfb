use std::sync::Arc;
use std::time::Duration;

use intellivent_ble::mock::{MockCentral, MockDevice};
use intellivent_ble::{ConnectionConfig, ConnectionManager, Error, TransportError};
use intellivent_keystore::{KdfParams, KeyStore, MemoryStore};
use intellivent_proto::AuthCode;
use intellivent_proto::ble::Feature;
use tokio::task::JoinSet;
use tokio::time::Instant;

const ADDR: &str = "C4:2E:9D:00:00:01";
const FAST: KdfParams = KdfParams { log_n: 4, r: 8, p: 1 };

type Manager = ConnectionManager<MockCentral, Arc<MemoryStore>>;

fn keystore() -> Arc<KeyStore<Arc<MemoryStore>>> {
    Arc::new(KeyStore::with_params(Arc::new(MemoryStore::new()), FAST))
}

fn setup(config: ConnectionConfig) -> (MockDevice, MockCentral, Manager) {
    let device = MockDevice::new(ADDR);
    let central = MockCentral::with_device(&device);
    let manager = ConnectionManager::new(ADDR, central.clone(), keystore(), config);
    (device, central, manager)
}

/// Let spawned link watchers run
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn gaps_ms(device: &MockDevice) -> Vec<u128> {
    device
        .connect_times()
        .windows(2)
        .map(|w| (w[1] - w[0]).as_millis())
        .collect()
}

#[tokio::test]
async fn concurrent_connects_share_one_attempt() {
    let (device, _central, manager) = setup(ConnectionConfig::default());
    device.set_connect_delay(Duration::from_millis(20));

    let (a, b, c) = tokio::join!(manager.connect(), manager.connect(), manager.connect());
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(device.connect_calls(), 1);
    assert!(manager.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_connects_across_tasks() {
    let (device, _central, manager) = setup(ConnectionConfig::default());
    device.set_connect_delay(Duration::from_millis(50));
    let manager = Arc::new(manager);

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        tasks.spawn(async move { manager.connect().await });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    assert_eq!(device.connect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_connects_back_off_exponentially() {
    let (device, _central, manager) = setup(ConnectionConfig::default());
    device.fail_next_connects(3);

    manager.connect().await.unwrap();

    assert_eq!(device.connect_calls(), 4);
    assert_eq!(gaps_ms(&device), vec![1000, 2000, 4000]);
}

#[tokio::test(start_paused = true)]
async fn backoff_is_capped() {
    let config = ConnectionConfig {
        max_backoff_ms: 3000,
        ..ConnectionConfig::default()
    };
    let (device, _central, manager) = setup(config);
    device.fail_next_connects(4);

    manager.connect().await.unwrap();

    assert_eq!(gaps_ms(&device), vec![1000, 2000, 3000, 3000]);
}

#[tokio::test(start_paused = true)]
async fn backoff_restarts_after_success() {
    let (device, _central, manager) = setup(ConnectionConfig::default());

    device.fail_next_connects(2);
    manager.connect().await.unwrap();
    manager.disconnect().await;

    device.fail_next_connects(2);
    manager.connect().await.unwrap();

    assert_eq!(gaps_ms(&device)[3..], [1000, 2000]);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() {
    let config = ConnectionConfig {
        max_attempts: Some(3),
        ..ConnectionConfig::default()
    };
    let (device, _central, manager) = setup(config);
    device.fail_next_connects(10);

    let err = manager.connect().await.unwrap_err();

    assert!(matches!(err, Error::TransportUnavailable { attempts: 3, .. }));
    assert_eq!(device.connect_calls(), 3);
    assert!(!manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn waiting_callers_share_a_failed_attempt() {
    let config = ConnectionConfig {
        max_attempts: Some(2),
        ..ConnectionConfig::default()
    };
    let (device, _central, manager) = setup(config);
    device.fail_next_connects(10);

    let (a, b) = tokio::join!(manager.connect(), manager.connect());

    assert!(matches!(a, Err(Error::TransportUnavailable { .. })));
    assert!(matches!(b, Err(Error::TransportUnavailable { .. })));
    assert_eq!(device.connect_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn missing_device_is_looked_up_on_every_attempt() {
    let config = ConnectionConfig {
        max_attempts: Some(2),
        ..ConnectionConfig::default()
    };
    let central = MockCentral::new();
    let manager = ConnectionManager::new(ADDR, central.clone(), keystore(), config);

    let err = manager.connect().await.unwrap_err();

    match err {
        Error::TransportUnavailable { source, .. } => {
            assert_eq!(source, TransportError::DeviceNotFound(ADDR.to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(central.find_calls(), 2);
}

#[tokio::test]
async fn read_failure_forces_reconnect() {
    let (device, central, manager) = setup(ConnectionConfig::default());
    device.set_value(Feature::Humidity, [1, 2, 0xdc, 0x05]);

    manager.read_characteristic(Feature::Humidity).await.unwrap();
    assert_eq!(device.connect_calls(), 1);

    device.fail_next_reads(1);
    let err = manager
        .read_characteristic(Feature::Humidity)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert!(!manager.is_connected());
    assert_eq!(device.disconnect_calls(), 1);

    let value = manager.read_characteristic(Feature::Humidity).await.unwrap();
    assert_eq!(value, vec![1, 2, 0xdc, 0x05]);
    assert_eq!(device.connect_calls(), 2);
    assert_eq!(central.find_calls(), 2);
}

#[tokio::test]
async fn write_failure_forces_reconnect() {
    let (device, _central, manager) = setup(ConnectionConfig::default());
    device.fail_next_writes(1);

    let err = manager
        .write_characteristic(Feature::Pause, &[1, 30])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert!(!device.connected());

    manager
        .write_characteristic(Feature::Pause, &[1, 30])
        .await
        .unwrap();
    assert_eq!(device.connect_calls(), 2);
    assert_eq!(device.writes(), vec![(Feature::Pause, vec![1, 30])]);
}

#[tokio::test(start_paused = true)]
async fn io_on_one_link_is_serialized() {
    let (device, _central, manager) = setup(ConnectionConfig::default());
    manager.connect().await.unwrap();
    device.set_read_delay(Duration::from_millis(100));

    let started = Instant::now();
    let (a, b, c) = tokio::join!(
        manager.read_characteristic(Feature::Humidity),
        manager.read_characteristic(Feature::Boost),
        manager.write_characteristic(Feature::Pause, &[1, 30])
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(device.writes(), vec![(Feature::Pause, vec![1, 30])]);
}

#[tokio::test(start_paused = true)]
async fn peer_disconnect_does_not_abort_a_read_in_flight() {
    let (device, central, manager) = setup(ConnectionConfig::default());
    device.set_value(Feature::Humidity, [1, 2, 0xdc, 0x05]);
    manager.connect().await.unwrap();
    device.set_read_delay(Duration::from_millis(100));

    let (read, ()) = tokio::join!(manager.read_characteristic(Feature::Humidity), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        device.drop_link();
        settle().await;
    });

    assert_eq!(read.unwrap(), vec![1, 2, 0xdc, 0x05]);
    assert!(!manager.is_connected());
    assert_eq!(device.disconnect_calls(), 0);

    device.set_read_delay(Duration::ZERO);
    manager.read_characteristic(Feature::Humidity).await.unwrap();
    assert_eq!(device.connect_calls(), 2);
    assert_eq!(central.find_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn io_after_giving_up_does_not_look_the_device_up_again() {
    let config = ConnectionConfig {
        max_attempts: Some(2),
        ..ConnectionConfig::default()
    };
    let (device, central, manager) = setup(config);
    device.fail_next_connects(10);

    let err = manager
        .read_characteristic(Feature::Humidity)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TransportUnavailable { attempts: 2, .. }));
    assert_eq!(device.disconnect_calls(), 0);
    assert_eq!(central.find_calls(), 2);
}

#[tokio::test]
async fn missing_characteristic_forces_disconnect() {
    let (device, _central, manager) = setup(ConnectionConfig::default());
    device.remove_characteristic(Feature::Timer);

    let err = manager.read_characteristic(Feature::Timer).await.unwrap_err();

    assert!(matches!(err, Error::CharacteristicNotFound(Feature::Timer)));
    assert!(!manager.is_connected());
    assert_eq!(device.disconnect_calls(), 1);
}

#[tokio::test]
async fn peer_disconnect_clears_the_link() {
    let (device, central, manager) = setup(ConnectionConfig::default());
    manager.connect().await.unwrap();

    device.drop_link();
    settle().await;
    assert!(!manager.is_connected());

    manager.read_characteristic(Feature::Pause).await.unwrap();
    assert_eq!(device.connect_calls(), 2);
    // the handle was dropped with the link and had to be looked up again
    assert_eq!(central.find_calls(), 2);
}

#[tokio::test]
async fn stale_link_watcher_leaves_new_session_alone() {
    let (device, _central, manager) = setup(ConnectionConfig::default());
    manager.connect().await.unwrap();

    // the mock reports our own disconnect to the first session's watcher
    manager.disconnect().await;
    manager.connect().await.unwrap();
    settle().await;

    assert!(manager.is_connected());
    assert!(device.connected());
}

#[tokio::test]
async fn characteristics_are_resolved_once_per_link() {
    let (device, _central, manager) = setup(ConnectionConfig::default());

    for _ in 0..3 {
        manager.read_characteristic(Feature::Humidity).await.unwrap();
    }
    assert_eq!(device.discover_calls(), 1);

    manager.read_characteristic(Feature::Boost).await.unwrap();
    assert_eq!(device.discover_calls(), 2);

    device.drop_link();
    settle().await;
    manager.read_characteristic(Feature::Humidity).await.unwrap();
    assert_eq!(device.discover_calls(), 3);
}

#[tokio::test]
async fn characteristic_cache_can_be_disabled() {
    let config = ConnectionConfig {
        cache_characteristics: false,
        ..ConnectionConfig::default()
    };
    let (device, _central, manager) = setup(config);

    for _ in 0..3 {
        manager.read_characteristic(Feature::Humidity).await.unwrap();
    }
    assert_eq!(device.discover_calls(), 3);
}

#[tokio::test]
async fn disconnect_never_fails() {
    let central = MockCentral::new();
    let manager =
        ConnectionManager::new(ADDR, central.clone(), keystore(), ConnectionConfig::default());

    manager.disconnect().await;

    assert_eq!(central.find_calls(), 1);
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn disconnect_without_handle_looks_the_device_up() {
    let (device, central, manager) = setup(ConnectionConfig::default());

    manager.disconnect().await;

    assert_eq!(central.find_calls(), 1);
    assert_eq!(device.disconnect_calls(), 1);
}

#[tokio::test]
async fn authenticate_without_credentials_is_not_an_error() {
    let (device, _central, manager) = setup(ConnectionConfig::default());

    assert!(!manager.authenticate().await.unwrap());
    assert!(device.writes().is_empty());
}

#[tokio::test]
async fn authenticate_writes_the_stored_code() {
    let (device, _central, manager) = setup(ConnectionConfig::default());
    let code = AuthCode::from_hex("c0ffee01").unwrap();
    manager.save_credentials(&code).await.unwrap();

    assert!(manager.has_credentials().await.unwrap());
    assert_eq!(manager.load_credentials().await.unwrap(), Some(code));
    assert!(manager.authenticate().await.unwrap());
    assert_eq!(
        device.writes(),
        vec![(Feature::Auth, vec![0xc0, 0xff, 0xee, 0x01])]
    );

    manager.forget_credentials().await.unwrap();
    assert!(!manager.has_credentials().await.unwrap());
}

//! Intellivent BLE
//!
//! Connection management and control API for Intellivent Sky and ICE
//! ventilation fans.
//!
//! Layers, bottom up:
//! - `transport`: the BLE capability (find, connect, GATT discovery, raw
//!   read/write, disconnect events), implemented by `btleplug_backend`
//!   (feature `btleplug`) and by the loopback `mock`
//! - `ConnectionManager`: one self-healing link per fan with backoff,
//!   serialized I/O and stored-credential authentication
//! - `Sky`: typed getters and setters per characteristic
//! - `FanDevice`: onboarding, polling and read-modify-write toggles
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use intellivent_ble::{ConnectionConfig, ConnectionManager, FanDevice};
//! use intellivent_ble::btleplug_backend::BtleplugCentral;
//! use intellivent_keystore::{FileStore, KeyStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let keystore = Arc::new(KeyStore::new(FileStore::open("settings.json")?));
//!     let central = BtleplugCentral::new().await?;
//!     let connection = ConnectionManager::new(
//!         "C4:2E:9D:01:02:03",
//!         central,
//!         keystore,
//!         ConnectionConfig::default(),
//!     );
//!     let fan = FanDevice::new(Arc::new(connection));
//!
//!     fan.start().await?;
//!     println!("{:?}", fan.poll().await?);
//!     fan.set_boost_enabled(true).await?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "btleplug")]
pub mod btleplug_backend;
mod config;
mod connection;
mod device;
mod error;
pub mod mock;
mod sky;
pub mod transport;

pub use config::{Backoff, ConnectionConfig};
pub use connection::ConnectionManager;
pub use device::{FanDevice, SettingsUpdate, Snapshot};
pub use error::Error;
pub use sky::Sky;
pub use transport::TransportError;

//! Intellivent Key Store
//!
//! Keeps device authentication codes encrypted at rest.
//!
//! This crate provides:
//! - `SettingsStore`, the raw key-value capability a host supplies, with
//!   in-memory and JSON file implementations
//! - `KeyStore`, which seals each device's payload with AES-256-GCM under a
//!   key derived (scrypt) from a per-install app secret and a fresh salt
//!
//! # Stored format
//! One settings entry per device, `key_<device id>`, holding JSON:
//! `{"iv", "salt", "authTag", "content", "createdAt"}` with hex encoded byte
//! fields and `createdAt` in epoch milliseconds. The app secret lives under
//! `app_secret` as a hex string.

mod cipher;
mod keystore;
mod storage;

pub use cipher::{KdfParams, IV_LEN, KEY_LEN, SALT_LEN, TAG_LEN};
pub use keystore::{APP_SECRET_KEY, APP_SECRET_LEN, KeyStore, StoredEntry, entry_key};
pub use storage::{FileStore, MemoryStore, SettingsStore};

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("settings store: {0}")]
    Storage(#[from] std::io::Error),
    #[error("stored credential is tampered or corrupt")]
    TamperedOrCorrupt,
    #[error("key derivation failed: {0}")]
    Kdf(String),
    #[error("encryption failed")]
    Encrypt,
    #[error("failed to serialize credential: {0}")]
    Encode(serde_json::Error),
}

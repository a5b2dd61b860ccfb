//! Per-device secrets sealed under a key derived from the app secret

use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cipher::{self, IV_LEN, KdfParams, SALT_LEN};
use crate::{KeyStoreError, SettingsStore};

/// Settings key holding the hex encoded app secret
pub const APP_SECRET_KEY: &str = "app_secret";

/// Length of the app secret in bytes
pub const APP_SECRET_LEN: usize = 32;

/// Settings key for a device's sealed credential
pub fn entry_key(device_id: &str) -> String {
    format!("key_{device_id}")
}

/// On-disk form of a sealed credential; every field but the timestamp is hex
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    pub iv: String,
    pub salt: String,
    pub auth_tag: String,
    pub content: String,
    /// Milliseconds since the unix epoch
    pub created_at: u64,
}

/// Encrypted credential store keyed by device id
pub struct KeyStore<S> {
    store: S,
    params: KdfParams,
    secret: OnceLock<[u8; APP_SECRET_LEN]>,
    init: Mutex<()>,
}

impl<S: SettingsStore> KeyStore<S> {
    pub fn new(store: S) -> Self {
        Self::with_params(store, KdfParams::default())
    }

    pub fn with_params(store: S, params: KdfParams) -> Self {
        Self {
            store,
            params,
            secret: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &S {
        &self.store
    }

    /// Get the app secret, creating and persisting it on first use
    ///
    /// Concurrent first callers all observe the same secret; only one of
    /// them generates it.
    pub fn ensure_app_secret(&self) -> Result<&[u8; APP_SECRET_LEN], KeyStoreError> {
        if let Some(secret) = self.secret.get() {
            return Ok(secret);
        }

        let _guard = self.init.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(secret) = self.secret.get() {
            return Ok(secret);
        }

        let secret = match self.store.get(APP_SECRET_KEY)? {
            Some(stored) => parse_app_secret(&stored)?,
            None => {
                let mut secret = [0u8; APP_SECRET_LEN];
                OsRng.fill_bytes(&mut secret);
                self.store
                    .set(APP_SECRET_KEY, data_encoding::HEXLOWER.encode(&secret).as_bytes())?;
                info!("Created new app secret");
                secret
            }
        };

        Ok(self.secret.get_or_init(|| secret))
    }

    /// Seal `payload` for `device_id`, replacing any previous entry
    pub fn save<T: Serialize + ?Sized>(
        &self,
        device_id: &str,
        payload: &T,
    ) -> Result<(), KeyStoreError> {
        let secret = self.ensure_app_secret()?;

        let mut iv = [0u8; IV_LEN];
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut iv);
        OsRng.fill_bytes(&mut salt);

        let key = cipher::derive_key(secret, &salt, &self.params)?;
        let plaintext = serde_json::to_vec(payload).map_err(KeyStoreError::Encode)?;
        let sealed = cipher::seal(&key, &iv, &plaintext)?;

        let entry = StoredEntry {
            iv: hex(&iv),
            salt: hex(&salt),
            auth_tag: hex(&sealed.tag),
            content: hex(&sealed.ciphertext),
            created_at: now_ms(),
        };
        let blob = serde_json::to_vec(&entry).map_err(KeyStoreError::Encode)?;
        self.store.set(&entry_key(device_id), &blob)?;

        info!("Saved credentials for {device_id}");
        Ok(())
    }

    /// Load and open the entry for `device_id`. A missing entry is `Ok(None)`.
    pub fn load<T: DeserializeOwned>(&self, device_id: &str) -> Result<Option<T>, KeyStoreError> {
        let Some(blob) = self.store.get(&entry_key(device_id))? else {
            debug!("No credentials stored for {device_id}");
            return Ok(None);
        };

        let entry: StoredEntry =
            serde_json::from_slice(&blob).map_err(|_| KeyStoreError::TamperedOrCorrupt)?;
        let iv = unhex(&entry.iv)?;
        let salt = unhex(&entry.salt)?;
        let tag = unhex(&entry.auth_tag)?;
        let content = unhex(&entry.content)?;

        let secret = self.ensure_app_secret()?;
        let key = cipher::derive_key(secret, &salt, &self.params)?;
        let plaintext = cipher::open(&key, &iv, &tag, &content)?;

        serde_json::from_slice(&plaintext)
            .map(Some)
            .map_err(|_| KeyStoreError::TamperedOrCorrupt)
    }

    /// Whether an entry exists, without opening it
    pub fn contains(&self, device_id: &str) -> Result<bool, KeyStoreError> {
        Ok(self.store.get(&entry_key(device_id))?.is_some())
    }

    pub fn delete(&self, device_id: &str) -> Result<(), KeyStoreError> {
        self.store.unset(&entry_key(device_id))?;
        Ok(())
    }
}

fn parse_app_secret(stored: &[u8]) -> Result<[u8; APP_SECRET_LEN], KeyStoreError> {
    data_encoding::HEXLOWER_PERMISSIVE
        .decode(stored)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(KeyStoreError::TamperedOrCorrupt)
}

fn hex(bytes: &[u8]) -> String {
    data_encoding::HEXLOWER.encode(bytes)
}

fn unhex(s: &str) -> Result<Vec<u8>, KeyStoreError> {
    data_encoding::HEXLOWER_PERMISSIVE
        .decode(s.as_bytes())
        .map_err(|_| KeyStoreError::TamperedOrCorrupt)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

//! Raw key-value settings storage
//!
//! The key store only needs opaque byte blobs under string keys. Hosts plug
//! in whatever settings backend they have; two implementations ship here.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Trait for persistent settings storage
///
/// Implementations use interior mutability so one store can be shared by
/// several key stores and devices.
pub trait SettingsStore: Send + Sync {
    /// Get the value stored under `key`
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &[u8]) -> io::Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn unset(&self, key: &str) -> io::Result<()>;
}

impl<T: SettingsStore + ?Sized> SettingsStore for Arc<T> {
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> io::Result<()> {
        (**self).set(key, value)
    }

    fn unset(&self, key: &str) -> io::Result<()> {
        (**self).unset(key)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory settings, lost on drop
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> io::Result<()> {
        lock(&self.entries).insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn unset(&self, key: &str) -> io::Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// Settings persisted to a single JSON file (`key -> hex(value)`)
///
/// The whole file is rewritten on each change via a temporary file and a
/// rename. Memory only reflects a change once it is on disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)
    }
}

impl SettingsStore for FileStore {
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        let entries = lock(&self.entries);
        let Some(hex) = entries.get(key) else {
            return Ok(None);
        };
        data_encoding::HEXLOWER
            .decode(hex.as_bytes())
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{key}: {e}")))
    }

    fn set(&self, key: &str, value: &[u8]) -> io::Result<()> {
        let mut entries = lock(&self.entries);
        let mut next = entries.clone();
        next.insert(key.to_string(), data_encoding::HEXLOWER.encode(value));
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn unset(&self, key: &str) -> io::Result<()> {
        let mut entries = lock(&self.entries);
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}

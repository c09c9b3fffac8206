//! Seam over the platform's hardware-backed key storage.
//!
//! The kernel never talks to the OS credential store directly; it goes
//! through [`Keystore`] so the mobile shells and the test suite can plug in
//! their own backends. Values are opaque strings the platform layer encrypts
//! at rest.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("keystore backend unavailable: {0}")]
    Backend(String),
    #[error("keystore entry corrupted: {0}")]
    Corrupted(String),
}

pub trait Keystore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

const SERVICE_NAME: &str = "SwingLock";
const INDEX_KEY: &str = "__swinglock_index";

/// OS keyring backend. One `keyring::Entry` per key, plus a JSON index entry
/// so `keys()` can enumerate (the OS store has no native listing).
pub struct KeyringKeystore {
    service: String,
}

impl KeyringKeystore {
    /// Probes the platform store with a throwaway entry; construction fails
    /// loudly when the store is unreachable, since nothing downstream can
    /// operate securely without it.
    pub fn open() -> Result<Self, StoreError> {
        let store = Self {
            service: SERVICE_NAME.to_string(),
        };
        let probe = store.entry("__probe")?;
        probe
            .set_password("ok")
            .map_err(|e| StoreError::Backend(format!("keystore probe write: {e}")))?;
        let _ = probe.delete_password();
        Ok(store)
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| StoreError::Backend(format!("keyring init: {e}")))
    }

    fn read_index(&self) -> Result<Vec<String>, StoreError> {
        let entry = self.entry(INDEX_KEY)?;
        match entry.get_password() {
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| StoreError::Corrupted(format!("index entry: {e}"))),
            Err(keyring::Error::NoEntry) => Ok(Vec::new()),
            Err(e) => Err(StoreError::Backend(format!("read index: {e}"))),
        }
    }

    fn write_index(&self, keys: &[String]) -> Result<(), StoreError> {
        let entry = self.entry(INDEX_KEY)?;
        let json = serde_json::to_string(keys)
            .map_err(|e| StoreError::Corrupted(format!("encode index: {e}")))?;
        entry
            .set_password(&json)
            .map_err(|e| StoreError::Backend(format!("write index: {e}")))
    }
}

impl Keystore for KeyringKeystore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Backend(format!("read {key}: {e}"))),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| StoreError::Backend(format!("write {key}: {e}")))?;
        let mut index = self.read_index()?;
        if !index.iter().any(|k| k == key) {
            index.push(key.to_string());
            self.write_index(&index)?;
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(e) => return Err(StoreError::Backend(format!("delete {key}: {e}"))),
        }
        let mut index = self.read_index()?;
        index.retain(|k| k != key);
        self.write_index(&index)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.read_index()
    }
}

/// In-memory backend for tests and the simulator shell. The fail switch lets
/// tests exercise storage-error paths.
#[derive(Default)]
pub struct MemoryKeystore {
    entries: RwLock<BTreeMap<String, String>>,
    fail: AtomicBool,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(StoreError::Backend("simulated backend failure".into()))
        } else {
            Ok(())
        }
    }
}

impl Keystore for MemoryKeystore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self.entries.read().keys().cloned().collect())
    }
}

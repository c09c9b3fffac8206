//! Encrypted key/value persistence for auth secrets.
//!
//! Sits on top of the platform [`Keystore`] primitive, which already
//! encrypts at rest. Secret-bearing values (`pin_salt`, `pin_hash`, backup
//! images) get a second authenticated-encryption layer: each write generates
//! a fresh data key and nonce and stores `nonce ‖ key ‖ ciphertext`,
//! base64-encoded, in a single blob. The co-located data key adds no
//! confidentiality beyond the outer layer; it is kept as tamper-evidence
//! (Poly1305 tag) and defense-in-depth should the outer store be weakened on
//! some platform.
//!
//! A value that is absent, truncated, or fails authentication decodes to
//! `None` — operationally identical to "never configured", which pushes the
//! caller into the re-setup flow instead of an error path.

use crate::crypto::{decrypt, encrypt, generate_key, generate_nonce, KEY_LEN, NONCE_LEN};
use crate::keystore::{Keystore, StoreError};
use base64::{engine::general_purpose, Engine as _};
use std::collections::BTreeMap;
use tracing::warn;
use zeroize::Zeroizing;

const INTEGRITY_KEY: &str = "__integrity_probe";

pub struct CredentialStore {
    backend: Box<dyn Keystore>,
    encryption_enabled: bool,
}

impl CredentialStore {
    pub fn new(backend: Box<dyn Keystore>, encryption_enabled: bool) -> Self {
        Self {
            backend,
            encryption_enabled,
        }
    }

    fn seal(&self, value: &[u8]) -> Result<String, StoreError> {
        if !self.encryption_enabled {
            return Ok(general_purpose::STANDARD.encode(value));
        }
        let data_key = generate_key();
        let nonce = generate_nonce();
        let ciphertext = encrypt(&data_key, &nonce, value)
            .map_err(|e| StoreError::Backend(format!("seal: {e}")))?;
        let mut blob = Zeroizing::new(Vec::with_capacity(NONCE_LEN + KEY_LEN + ciphertext.len()));
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&data_key);
        blob.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(blob.as_slice()))
    }

    fn unseal(&self, encoded: &str) -> Option<Vec<u8>> {
        let blob = general_purpose::STANDARD.decode(encoded).ok()?;
        if !self.encryption_enabled {
            return Some(blob);
        }
        if blob.len() <= NONCE_LEN + KEY_LEN {
            return None;
        }
        let nonce: [u8; NONCE_LEN] = blob[..NONCE_LEN].try_into().ok()?;
        let data_key = Zeroizing::new(blob[NONCE_LEN..NONCE_LEN + KEY_LEN].to_vec());
        decrypt(&data_key, &nonce, &blob[NONCE_LEN + KEY_LEN..]).ok()
    }

    pub fn store_encrypted(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let sealed = self.seal(value)?;
        self.backend.put(key, &sealed)
    }

    /// `None` covers absent, corrupted, and unauthenticated blobs alike.
    pub fn get_encrypted(&self, key: &str) -> Option<Vec<u8>> {
        let encoded = match self.backend.get(key) {
            Ok(Some(encoded)) => encoded,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, %e, "keystore read failed");
                return None;
            }
        };
        let value = self.unseal(&encoded);
        if value.is_none() {
            warn!(key, "stored blob failed decryption, treating as absent");
        }
        value
    }

    // Typed pass-throughs. The outer keystore already encrypts these at
    // rest; they skip the extra symmetric layer.

    pub fn store_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.backend.put(key, value)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.backend.get(key).ok().flatten()
    }

    pub fn store_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.backend.put(key, if value { "true" } else { "false" })
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_string(key)?.parse().ok()
    }

    pub fn store_i64(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.backend.put(key, &value.to_string())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_string(key)?.parse().ok()
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.backend.delete(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        matches!(self.backend.get(key), Ok(Some(_)))
    }

    pub fn keys(&self) -> Vec<String> {
        self.backend.keys().unwrap_or_default()
    }

    pub fn clear_all(&self) -> Result<(), StoreError> {
        for key in self.backend.keys()? {
            self.backend.delete(&key)?;
        }
        Ok(())
    }

    /// Serialize the whole store through the authenticated-encryption
    /// wrapper, for migration or recovery. `None` on any failure.
    pub fn backup(&self) -> Option<Vec<u8>> {
        let mut image = BTreeMap::new();
        for key in self.backend.keys().ok()? {
            if let Ok(Some(value)) = self.backend.get(&key) {
                image.insert(key, value);
            }
        }
        let json = serde_json::to_vec(&image).ok()?;
        let data_key = generate_key();
        let nonce = generate_nonce();
        let ciphertext = encrypt(&data_key, &nonce, &json).ok()?;
        let mut blob = Vec::with_capacity(NONCE_LEN + KEY_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&data_key);
        blob.extend_from_slice(&ciphertext);
        Some(blob)
    }

    /// Replace the store's contents with a [`backup`] image. Parses and
    /// authenticates before touching the store, so a tampered image leaves
    /// existing contents intact.
    ///
    /// [`backup`]: CredentialStore::backup
    pub fn restore(&self, image: &[u8]) -> bool {
        if image.len() <= NONCE_LEN + KEY_LEN {
            return false;
        }
        let nonce: [u8; NONCE_LEN] = match image[..NONCE_LEN].try_into() {
            Ok(nonce) => nonce,
            Err(_) => return false,
        };
        let data_key = Zeroizing::new(image[NONCE_LEN..NONCE_LEN + KEY_LEN].to_vec());
        let json = match decrypt(&data_key, &nonce, &image[NONCE_LEN + KEY_LEN..]) {
            Ok(json) => json,
            Err(e) => {
                warn!(%e, "backup image failed authentication");
                return false;
            }
        };
        let entries: BTreeMap<String, String> = match serde_json::from_slice(&json) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(%e, "backup image malformed");
                return false;
            }
        };
        if self.clear_all().is_err() {
            return false;
        }
        for (key, value) in entries {
            if self.backend.put(&key, &value).is_err() {
                return false;
            }
        }
        true
    }

    /// Round-trip a throwaway pair to confirm the store is read/write
    /// healthy.
    pub fn validate_integrity(&self) -> bool {
        let probe = crate::crypto::secure_random(16);
        if self.store_encrypted(INTEGRITY_KEY, &probe).is_err() {
            return false;
        }
        let read_back = self.get_encrypted(INTEGRITY_KEY);
        let _ = self.remove(INTEGRITY_KEY);
        match read_back {
            Some(value) => crate::crypto::secure_compare(&value, &probe),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeystore;

    fn store() -> CredentialStore {
        CredentialStore::new(Box::new(MemoryKeystore::new()), true)
    }

    #[test]
    fn encrypted_roundtrip() {
        let store = store();
        store.store_encrypted("pin_salt", b"some salt bytes").unwrap();
        assert_eq!(
            store.get_encrypted("pin_salt").as_deref(),
            Some(b"some salt bytes".as_slice())
        );
    }

    #[test]
    fn absent_key_reads_none() {
        let store = store();
        assert!(store.get_encrypted("missing").is_none());
        assert!(!store.contains_key("missing"));
    }

    #[test]
    fn corrupted_blob_reads_none() {
        let backend = Box::new(MemoryKeystore::new());
        let store = CredentialStore::new(backend, true);
        store.store_encrypted("k", b"value").unwrap();
        // Flip bytes through a second handle onto the same backend kind.
        let sealed = store.backend.get("k").unwrap().unwrap();
        let mut garbled = sealed.into_bytes();
        garbled[10] ^= 0x20;
        store
            .backend
            .put("k", std::str::from_utf8(&garbled).unwrap())
            .unwrap();
        assert!(store.get_encrypted("k").is_none());
        // Truncated below header size.
        store.backend.put("k", "QUJD").unwrap();
        assert!(store.get_encrypted("k").is_none());
    }

    #[test]
    fn typed_passthroughs() {
        let store = store();
        store.store_string("token", "abc123").unwrap();
        store.store_bool("biometric_enabled", true).unwrap();
        store.store_i64("failed_attempts", 2).unwrap();
        assert_eq!(store.get_string("token").as_deref(), Some("abc123"));
        assert_eq!(store.get_bool("biometric_enabled"), Some(true));
        assert_eq!(store.get_i64("failed_attempts"), Some(2));
        store.remove("token").unwrap();
        assert!(store.get_string("token").is_none());
    }

    #[test]
    fn clear_all_empties_the_store() {
        let store = store();
        store.store_string("a", "1").unwrap();
        store.store_encrypted("b", b"2").unwrap();
        store.clear_all().unwrap();
        assert!(store.keys().is_empty());
    }

    #[test]
    fn backup_restore_roundtrip() {
        let store = store();
        store.store_encrypted("pin_hash", b"hash").unwrap();
        store.store_i64("failed_attempts", 1).unwrap();
        let image = store.backup().unwrap();

        let restored = CredentialStore::new(Box::new(MemoryKeystore::new()), true);
        assert!(restored.restore(&image));
        assert_eq!(
            restored.get_encrypted("pin_hash").as_deref(),
            Some(b"hash".as_slice())
        );
        assert_eq!(restored.get_i64("failed_attempts"), Some(1));
    }

    #[test]
    fn tampered_backup_leaves_store_unchanged() {
        let store = store();
        store.store_string("keep", "me").unwrap();
        let mut image = store.backup().unwrap();
        let last = image.len() - 1;
        image[last] ^= 0xFF;
        assert!(!store.restore(&image));
        assert_eq!(store.get_string("keep").as_deref(), Some("me"));
    }

    #[test]
    fn integrity_probe() {
        let store = store();
        assert!(store.validate_integrity());
        assert!(!store.contains_key(INTEGRITY_KEY));

        let backend = MemoryKeystore::new();
        backend.set_failing(true);
        let broken = CredentialStore::new(Box::new(backend), true);
        assert!(!broken.validate_integrity());
    }
}

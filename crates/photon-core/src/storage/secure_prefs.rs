//! Encrypted key-value store for key material.

use crate::crypto::{self, KEY_SIZE};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use zeroize::Zeroizing;

/// Device key derivation salt.
const DEVICE_KEY_SALT: &[u8] = b"photon-device-key-v1";

/// String key-value pairs sealed with ChaCha20-Poly1305 at rest.
///
/// The whole map is one sealed blob bound to the file name. It is loaded on
/// first access and cached decrypted, with every value zeroized on drop.
pub struct SecurePrefs {
    path: PathBuf,
    key: Zeroizing<[u8; KEY_SIZE]>,
    entries: Mutex<Option<BTreeMap<String, Zeroizing<String>>>>,
}

impl SecurePrefs {
    /// Create a store at `path` sealed under `key`. Nothing is read until first access.
    pub fn open(path: impl Into<PathBuf>, key: Zeroizing<[u8; KEY_SIZE]>) -> Self {
        Self {
            path: path.into(),
            key,
            entries: Mutex::new(None),
        }
    }

    /// Open `<data_dir>/<name>` under the device-derived storage key.
    pub fn open_device(data_dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(data_dir).map_err(|e| {
            Error::KeyStoreUnavailable(format!("failed to create data dir: {}", e))
        })?;
        let key = device_storage_key(data_dir);
        Ok(Self::open(data_dir.join(name), key))
    }

    /// Path of the sealed file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a value.
    pub fn get(&self, name: &str) -> Result<Option<Zeroizing<String>>> {
        self.with_entries(|entries| Ok(entries.get(name).cloned()))
    }

    /// Whether a value exists.
    pub fn contains(&self, name: &str) -> Result<bool> {
        self.with_entries(|entries| Ok(entries.contains_key(name)))
    }

    /// Insert several values and persist them in one atomic write.
    ///
    /// Either every value lands on disk or the store is left unchanged.
    pub fn put_all(&self, values: &[(&str, &str)]) -> Result<()> {
        self.with_entries(|entries| {
            let mut next = entries.clone();
            for (name, value) in values {
                next.insert((*name).to_string(), Zeroizing::new((*value).to_string()));
            }
            self.persist(&next)?;
            *entries = next;
            Ok(())
        })
    }

    fn with_entries<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Zeroizing<String>>) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| Error::KeyStoreUnavailable("lock poisoned".into()))?;

        if guard.is_none() {
            *guard = Some(self.load()?);
        }

        match guard.as_mut() {
            Some(entries) => f(entries),
            None => Err(Error::KeyStoreUnavailable("store not loaded".into())),
        }
    }

    fn associated_data(&self) -> Vec<u8> {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().as_bytes().to_vec())
            .unwrap_or_default()
    }

    fn load(&self) -> Result<BTreeMap<String, Zeroizing<String>>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let sealed = fs::read(&self.path)
            .map_err(|e| Error::KeyStoreUnavailable(format!("failed to read store: {}", e)))?;
        let plaintext = crypto::open(&self.key, &sealed, &self.associated_data())
            .map_err(|_| Error::KeyStoreUnavailable("store failed authentication".into()))?;

        let raw: BTreeMap<String, String> = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::KeyStoreUnavailable(format!("corrupt store: {}", e)))?;

        Ok(raw
            .into_iter()
            .map(|(k, v)| (k, Zeroizing::new(v)))
            .collect())
    }

    fn persist(&self, entries: &BTreeMap<String, Zeroizing<String>>) -> Result<()> {
        let view: BTreeMap<&str, &str> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let plaintext = Zeroizing::new(serde_json::to_vec(&view)?);
        let sealed = crypto::seal(&self.key, &plaintext, &self.associated_data())?;

        write_private_file(&self.path, &sealed)
            .map_err(|e| Error::KeyStoreUnavailable(format!("failed to write store: {}", e)))
    }
}

/// Write `data` to `path` through a temp file and rename, mode 0600 on Unix.
pub(crate) fn write_private_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp, path)
}

/// Derive the device storage key from the machine identifier and data directory.
pub fn device_storage_key(data_dir: &Path) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut input = Zeroizing::new(machine_id());
    input.extend_from_slice(data_dir.to_string_lossy().as_bytes());
    crypto::derive_storage_key(&input, DEVICE_KEY_SALT)
}

/// Machine-specific identifier, falling back to a hostname hash.
fn machine_id() -> Vec<u8> {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(id) = fs::read_to_string(path) {
            let id = id.trim();
            if !id.is_empty() {
                return id.as_bytes().to_vec();
            }
        }
    }

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    use sha2::{Digest, Sha256};
    Sha256::digest(hostname.as_bytes()).to_vec()
}

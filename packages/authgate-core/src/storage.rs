//! Persisted continuity evidence.
//!
//! The session store remembers a successful sign-in with a small key-value
//! area that survives restarts. Backends:
//! 1. Memory (tests, embedding hosts that own their own persistence)
//! 2. File (JSON map in the local data directory)
//! 3. Platform keyring (if `keyring-storage` feature enabled), falling back to file
//!
//! Every access is fallible. Callers in this crate log failures and carry on.

use crate::error::StorageError;
use anyhow::{Context, anyhow};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[cfg(feature = "keyring-storage")]
use keyring::Entry;

/// Key holding the continuity flag (`"true"` or absent).
pub const AUTHENTICATED_KEY: &str = "authenticated";
/// Key holding the JSON identity of the last signed-in user.
pub const IDENTITY_KEY: &str = "identity";

const STATE_FILE: &str = "session_storage.json";

/// A client-local key-value area.
pub trait ContinuityStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Human-readable storage location, for status output.
    fn describe(&self) -> String {
        "custom storage".to_string()
    }
}

impl<T: ContinuityStore + ?Sized> ContinuityStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

// ============================================================================
// Memory storage
// ============================================================================

/// Process-local storage. Forgets everything on exit.
#[derive(Debug, Default)]
pub struct MemoryContinuityStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryContinuityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError(anyhow!("memory storage lock poisoned")))
    }
}

impl ContinuityStore for MemoryContinuityStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory (not persisted)".to_string()
    }
}

// ============================================================================
// File-based storage (always available)
// ============================================================================

/// JSON map on disk, rewritten on every change.
#[derive(Debug, Clone)]
pub struct FileContinuityStore {
    path: PathBuf,
}

impl FileContinuityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage file under the platform's local data directory.
    pub fn default_location() -> anyhow::Result<Self> {
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .context("Could not find data directory")?;
        Ok(Self::new(data_dir.join("authgate").join(STATE_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_map(&self) -> anyhow::Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path).context("Failed to read storage file")?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).context("Failed to parse storage file")
    }

    fn save_map(&self, map: &BTreeMap<String, String>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create storage directory")?;
        }
        let json = serde_json::to_string(map).context("Failed to serialize storage")?;

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600) // Owner read/write only
                .open(&self.path)
                .context("Failed to create storage file")?;
            let mut file = std::io::BufWriter::new(file);
            file.write_all(json.as_bytes())
                .context("Failed to write storage file")?;
            file.flush().context("Failed to flush storage file")?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&self.path, &json).context("Failed to write storage file")?;
        }

        tracing::debug!("Storage saved to file: {:?}", self.path);
        Ok(())
    }
}

impl ContinuityStore for FileContinuityStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load_map()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut map = self.load_map()?;
        map.insert(key.to_string(), value.to_string());
        self.save_map(&map)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut map = self.load_map()?;
        if map.remove(key).is_some() {
            self.save_map(&map)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("File-based storage: {}", self.path.display())
    }
}

// ============================================================================
// Keyring-based storage (optional, platform-specific)
// ============================================================================

/// Service name used for keyring entries
#[cfg(feature = "keyring-storage")]
const KEYRING_SERVICE: &str = "authgate";

/// One keyring entry per key, with the file backend as fallback.
#[cfg(feature = "keyring-storage")]
#[derive(Debug, Clone)]
pub struct KeyringContinuityStore {
    fallback: FileContinuityStore,
}

#[cfg(feature = "keyring-storage")]
impl KeyringContinuityStore {
    pub fn new(fallback: FileContinuityStore) -> Self {
        Self { fallback }
    }

    fn entry(key: &str) -> anyhow::Result<Entry> {
        Entry::new(KEYRING_SERVICE, key).map_err(|e| {
            tracing::error!(
                "Failed to create keyring entry (service='{}', user='{}'): {}",
                KEYRING_SERVICE,
                key,
                e
            );
            anyhow!("Failed to create keyring entry: {}", e)
        })
    }
}

#[cfg(feature = "keyring-storage")]
impl ContinuityStore for KeyringContinuityStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entry = match Self::entry(key) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("{}, trying file fallback", e);
                return self.fallback.get(key);
            }
        };

        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => {
                tracing::debug!("No '{}' in keyring, trying file fallback", key);
                self.fallback.get(key)
            }
            Err(e) => {
                tracing::warn!("Failed to read '{}' from keyring: {}, trying file fallback", key, e);
                self.fallback.get(key)
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let entry = match Self::entry(key) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("{}, using file storage", e);
                return self.fallback.set(key, value);
            }
        };

        if let Err(e) = entry.set_password(value) {
            tracing::warn!("Failed to save '{}' to keyring: {}, using file storage", key, e);
            return self.fallback.set(key, value);
        }

        // Also save to file as backup
        if let Err(e) = self.fallback.set(key, value) {
            tracing::debug!("Failed to save backup '{}' to file: {}", key, e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        // Always delete from file as well
        self.fallback.remove(key)?;

        let entry = Self::entry(key)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StorageError(anyhow!(
                "Failed to delete '{}' from keyring: {}",
                key,
                e
            ))),
        }
    }

    fn describe(&self) -> String {
        #[cfg(target_os = "windows")]
        let platform = "Windows Credential Manager";
        #[cfg(target_os = "macos")]
        let platform = "macOS Keychain";
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        let platform = "Linux Secret Service (GNOME Keyring/KWallet)";

        format!("{} (with file fallback: {})", platform, self.fallback.path.display())
    }
}

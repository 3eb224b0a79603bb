//! Credential storage.
//!
//! The bearer token lives under a single fixed key. The refresh credential is kept
//! under its own key so the HTTP client can exchange it without touching the token.
//! Nothing here enforces expiry: a stale token is only discovered when the server
//! rejects it.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

pub const TOKEN_KEY: &str = "token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to write '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove '{key}': {source}")]
    Remove {
        key: String,
        #[source]
        source: io::Error,
    },
}

/// Durable key/value medium backing the token store.
pub trait StorageBackend: Send + Sync {
    /// Returns the stored value, or `None` when absent or unreadable.
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-local storage. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl StorageBackend for MemoryStorage {
    fn read(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// One plain-text file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl StorageBackend for FileStorage {
    fn read(&self, key: &str) -> Option<String> {
        let value = fs::read_to_string(self.path_for(key)).ok()?;
        let value = value.trim_end_matches(['\r', '\n']);
        (!value.is_empty()).then(|| value.to_string())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)
            .and_then(|_| fs::write(self.path_for(key), value))
            .map_err(|source| StorageError::Write {
                key: key.to_string(),
                source,
            })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Remove {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// Shared handle to the stored credentials.
/// Cheap to clone; every clone sees the same backend.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn StorageBackend>,
}

impl TokenStore {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::default())
    }

    /// The current bearer token, if any. Never fails.
    pub fn get(&self) -> Option<String> {
        self.backend.read(TOKEN_KEY)
    }

    /// Stores the bearer token, replacing any previous value.
    pub fn set(&self, token: &str) -> Result<(), StorageError> {
        self.backend.write(TOKEN_KEY, token)
    }

    /// Removes the bearer token. Failures are logged, not returned.
    pub fn clear(&self) {
        if let Err(e) = self.backend.remove(TOKEN_KEY) {
            warn!("Failed to clear stored token: {e}");
        }
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.backend.read(REFRESH_TOKEN_KEY)
    }

    pub fn set_refresh_token(&self, token: &str) -> Result<(), StorageError> {
        self.backend.write(REFRESH_TOKEN_KEY, token)
    }

    /// Removes both the bearer token and the refresh credential.
    pub fn clear_all(&self) {
        self.clear();
        if let Err(e) = self.backend.remove(REFRESH_TOKEN_KEY) {
            warn!("Failed to clear stored refresh token: {e}");
        }
        debug!("Stored credentials cleared");
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("has_token", &self.get().is_some())
            .finish()
    }
}

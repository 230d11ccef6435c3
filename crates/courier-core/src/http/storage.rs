//! Durable key-value storage for credentials
//!
//! [`TokenStore`](crate::http::TokenStore) persists tokens through the
//! [`DurableStore`] trait. Two backends ship with the crate: an in-process
//! [`MemoryStore`] and a directory-backed [`FileStore`]. Neither encrypts.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use crate::util::lock_unpoisoned;

/// Token persistence failures
#[derive(Error, Debug)]
pub enum StorageError {
    /// The token could not be serialized
    #[error("failed to encode value for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Stored bytes could not be deserialized
    #[error("failed to decode value for '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The backend failed to read or write
    #[error("storage backend failed for '{key}': {source}")]
    Backend {
        key: String,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// Key the failing operation was addressing
    pub fn key(&self) -> &str {
        match self {
            StorageError::Encode { key, .. }
            | StorageError::Decode { key, .. }
            | StorageError::Backend { key, .. } => key,
        }
    }
}

/// Last-write-wins byte storage keyed by string
pub trait DurableStore: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `value` under `key`; `None` clears the key
    fn set(&self, key: &str, value: Option<&[u8]>) -> Result<(), StorageError>;

    /// Remove `key` if present
    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.set(key, None)
    }
}

/// In-process store, lost when dropped
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(lock_unpoisoned(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<&[u8]>) -> Result<(), StorageError> {
        let mut entries = lock_unpoisoned(&self.entries);
        match value {
            Some(bytes) => {
                entries.insert(key.to_string(), bytes.to_vec());
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(())
    }
}

/// One file per key inside a directory
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never sees a partially written value.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Store files under `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path backing `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{}.json", file_name))
    }

    fn backend_error(key: &str, source: io::Error) -> StorageError {
        StorageError::Backend {
            key: key.to_string(),
            source,
        }
    }
}

impl DurableStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::backend_error(key, err)),
        }
    }

    fn set(&self, key: &str, value: Option<&[u8]>) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let Some(bytes) = value else {
            return match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(Self::backend_error(key, err)),
            };
        };

        fs::create_dir_all(&self.root).map_err(|e| Self::backend_error(key, e))?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, bytes).map_err(|e| Self::backend_error(key, e))?;
        fs::rename(&staging, &path).map_err(|e| Self::backend_error(key, e))
    }
}

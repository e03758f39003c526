//! Storage backends behind the cache store.
//!
//! A backend is a flat namespace of identifiers mapping to byte payloads.
//! `FsBackend` keeps one file per entry in a directory; `MemoryBackend` keeps
//! everything in a map (tests, ephemeral caches).

use super::entry::ENTRY_SUFFIX;
use super::StoreError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait StorageBackend: Send + Sync {
    /// Identifiers of all stored entries. Order is unspecified.
    fn enumerate(&self) -> Result<Vec<String>, StoreError>;

    fn read(&self, id: &str) -> Result<Vec<u8>, StoreError>;

    /// Create or replace the payload stored under `id`.
    fn write(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Where the data lives, for status output.
    fn describe(&self) -> String;
}

/// Directory of `*.json` files, one per entry.
///
/// Writes are atomic: the payload goes to a hidden `.tmp` file that is then
/// renamed over the target.
#[derive(Debug, Clone)]
pub struct FsBackend {
    dir: PathBuf,
}

impl FsBackend {
    /// Open (creating if needed) a cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir.display().to_string(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> Result<PathBuf, StoreError> {
        // identifiers are produced escaped; refuse anything that could leave the directory
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(StoreError::InvalidIdentifier(id.to_string()));
        }
        Ok(self.dir.join(id))
    }
}

impl StorageBackend for FsBackend {
    fn enumerate(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir.display().to_string(), e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir.display().to_string(), e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().to_string();
            if is_file && name.ends_with(ENTRY_SUFFIX) && !name.starts_with('.') {
                ids.push(name);
            }
        }
        Ok(ids)
    }

    fn read(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path(id)?;
        fs::read(&path).map_err(|e| StoreError::io(id, e))
    }

    fn write(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path(id)?;
        let tmp_path = self.dir.join(format!(".{id}.tmp"));
        fs::write(&tmp_path, bytes).map_err(|e| StoreError::io(id, e))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::io(id, e)
        })
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path(id)?;
        fs::remove_file(&path).map_err(|e| StoreError::io(id, e))
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// In-memory backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StorageBackend for MemoryBackend {
    fn enumerate(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.map().keys().cloned().collect())
    }

    fn read(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        self.map()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::Missing(id.to_string()))
    }

    fn write(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.map().insert(id.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.map()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::Missing(id.to_string()))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

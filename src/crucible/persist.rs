//! Persisted planning state.
//!
//! Only [`CrucibleState`] is written. Sessions, cancellation tokens and budget resolvers are
//! runtime objects and are rebuilt on resume.

use super::types::CrucibleState;
use crate::error::StorageError;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait StateStore: Send + Sync {
    /// Load the saved state. `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<CrucibleState>, StorageError>;

    fn save(&self, state: &CrucibleState) -> Result<(), StorageError>;

    fn clear(&self) -> Result<(), StorageError>;
}

/// Pretty-printed JSON file, replaced atomically on every save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<CrucibleState>, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        debug!(path = ?self.path, "Loaded planning state");
        Ok(Some(state))
    }

    fn save(&self, state: &CrucibleState) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_vec_pretty(state).map_err(|e| StorageError::Corrupt {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &serialized)?;
        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        debug!(path = ?self.path, phase = %state.phase, "Saved planning state");
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<Option<CrucibleState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<CrucibleState>, StorageError> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &CrucibleState) -> Result<(), StorageError> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.state.lock() = None;
        Ok(())
    }
}

//! Snapshot persistence.
//!
//! A snapshot is a temperature profile (Kelvin) saved under a stage name
//! and read back by a later stage. Stores must return exactly what was
//! saved, same length and order.

pub mod npy;

use crate::error::PersistenceError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait SnapshotStore {
    fn save(&mut self, name: &str, profile: &[f64]) -> Result<(), PersistenceError>;

    fn load(&self, name: &str) -> Result<Vec<f64>, PersistenceError>;

    fn contains(&self, name: &str) -> bool;
}

/// Keeps snapshots in memory for the lifetime of the store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    snapshots: HashMap<String, Vec<f64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&mut self, name: &str, profile: &[f64]) -> Result<(), PersistenceError> {
        self.snapshots.insert(name.to_string(), profile.to_vec());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Vec<f64>, PersistenceError> {
        self.snapshots
            .get(name)
            .cloned()
            .ok_or_else(|| PersistenceError::Missing(name.to_string()))
    }

    fn contains(&self, name: &str) -> bool {
        self.snapshots.contains_key(name)
    }
}

/// One `<name>.npy` file per snapshot inside a directory.
#[derive(Debug, Clone)]
pub struct NpyStore {
    dir: PathBuf,
}

impl NpyStore {
    /// The directory is created on first save if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        NpyStore {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.npy"))
    }
}

impl SnapshotStore for NpyStore {
    fn save(&mut self, name: &str, profile: &[f64]) -> Result<(), PersistenceError> {
        let io_err = |source| PersistenceError::Io {
            name: name.to_string(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        let path = self.path_of(name);
        debug!(?path, len = profile.len(), "writing snapshot");
        std::fs::write(&path, npy::encode(profile)).map_err(io_err)
    }

    fn load(&self, name: &str) -> Result<Vec<f64>, PersistenceError> {
        let path = self.path_of(name);
        debug!(?path, "reading snapshot");
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistenceError::Missing(name.to_string()))
            }
            Err(source) => {
                return Err(PersistenceError::Io {
                    name: name.to_string(),
                    source,
                })
            }
        };
        npy::decode(&bytes).map_err(|reason| PersistenceError::Malformed {
            name: name.to_string(),
            reason,
        })
    }

    fn contains(&self, name: &str) -> bool {
        self.path_of(name).is_file()
    }
}

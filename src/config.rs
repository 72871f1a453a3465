use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub const DEFAULT_DB_NAME: &str = "StickyNotesDB";
pub const DEFAULT_DATA_DIR: &str = ".stickynotes";
const DB_EXTENSION: &str = "sqlite3";

/// Where the backing database lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreLocation {
    /// One file per store name inside this directory.
    Directory(PathBuf),
    /// Ephemeral, discarded when the handle is dropped.
    Memory,
}

/// Configuration for opening a named store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Logical store name, also the database file stem.
    pub name: String,
    pub location: StoreLocation,
    /// How long a writer waits on a lock held by another process.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_DB_NAME.to_string(),
            location: StoreLocation::Directory(PathBuf::from(DEFAULT_DATA_DIR)),
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Store `name` under `dir`.
    pub fn new(name: impl Into<String>, dir: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            location: StoreLocation::Directory(dir.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Default store inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(DEFAULT_DB_NAME, dir)
    }

    pub fn in_memory() -> Self {
        Self {
            location: StoreLocation::Memory,
            ..Self::default()
        }
    }

    /// Build a configuration from `STICKYNOTES_DATA_DIR` and `STICKYNOTES_DB_NAME`.
    pub fn from_env() -> Self {
        let dir = std::env::var("STICKYNOTES_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
        let name = std::env::var("STICKYNOTES_DB_NAME")
            .ok()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DB_NAME.to_string());
        Self::new(name, dir)
    }

    /// The name must be a plain file stem so the store stays inside its directory.
    pub fn validate(&self) -> Result<()> {
        let name = self.name.as_str();
        if name.trim().is_empty() {
            return Err(StoreError::Config("store name is empty".to_string()));
        }
        if name.starts_with('.')
            || name
                .chars()
                .any(|c| c == '/' || c == '\\' || c == ':' || c.is_control())
        {
            return Err(StoreError::Config(format!(
                "invalid store name '{}'",
                name
            )));
        }
        Ok(())
    }

    /// Path of the database file, `None` for in-memory stores.
    pub fn db_path(&self) -> Option<PathBuf> {
        match &self.location {
            StoreLocation::Directory(dir) => {
                Some(dir.join(format!("{}.{}", self.name, DB_EXTENSION)))
            }
            StoreLocation::Memory => None,
        }
    }

    /// Human-readable location, used in logs and errors.
    pub fn describe(&self) -> String {
        match self.db_path() {
            Some(path) => path.display().to_string(),
            None => format!("memory:{}", self.name),
        }
    }
}

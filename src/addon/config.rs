//! Per-addon persisted key/value store.
//!
//! Stored as a JSON object at `<addon_path>/<addon_name>.config`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use super::metadata::write_atomic;
use crate::error::{AddonError, AddonResult};

/// Config file extension.
pub const CONFIG_EXTENSION: &str = "config";

/// Returns the config path for an addon.
#[must_use]
pub fn config_path(addon_path: &Path, addon_name: &str) -> PathBuf {
    addon_path.join(format!("{}.{}", addon_name, CONFIG_EXTENSION))
}

/// A persisted key/value document.
#[derive(Debug)]
pub struct AddonConfig {
    path: PathBuf,
    values: Map<String, Value>,
}

impl AddonConfig {
    /// Opens the store, creating an empty one on disk if absent.
    pub fn open(path: PathBuf) -> AddonResult<Self> {
        if !path.exists() {
            debug!("Creating addon config at {}", path.display());
            write_atomic(&path, &Map::<String, Value>::new())?;
            return Ok(Self {
                path,
                values: Map::new(),
            });
        }

        let values = read_values(&path)?;
        Ok(Self { path, values })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the raw value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Deserializes the value for a key.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> AddonResult<Option<T>> {
        self.values
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(AddonError::from)
    }

    /// Sets a key in memory.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> AddonResult<()> {
        self.values.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Removes a key in memory, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Iterates over keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Persists the store.
    pub fn save(&self) -> AddonResult<()> {
        write_atomic(&self.path, &self.values)
    }

    /// Discards unsaved changes and re-reads from disk.
    pub fn reload(&mut self) -> AddonResult<()> {
        self.values = read_values(&self.path)?;
        Ok(())
    }
}

fn read_values(path: &Path) -> AddonResult<Map<String, Value>> {
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    Ok(serde_json::from_str(&content)?)
}

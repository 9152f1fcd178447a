//! Addon descriptor (`addon.json`) access.
//!
//! The descriptor has a handful of recognized fields. Anything else is kept
//! in [`AddonDescriptor::extra`] and written back untouched.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{AddonError, AddonResult};
use crate::version::ANY_VERSION;

/// Default descriptor file name inside an addon directory.
pub const METADATA_FILE: &str = "addon.json";

/// Whether an addon is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddonStatus {
    /// Addon is active.
    Enabled,
    /// Addon is installed but inactive.
    #[default]
    Disabled,
}

impl std::fmt::Display for AddonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddonStatus::Enabled => write!(f, "enabled"),
            AddonStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// A declared need for a capability at or above a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Capability name.
    pub name: String,
    /// Minimum version, or `"*"` for any.
    #[serde(rename = "version", default = "any_version")]
    pub version_constraint: String,
}

impl Requirement {
    /// Creates a requirement.
    #[must_use]
    pub fn new(name: impl Into<String>, version_constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_constraint: version_constraint.into(),
        }
    }
}

fn any_version() -> String {
    ANY_VERSION.to_string()
}

/// The persisted descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonDescriptor {
    /// Unique addon name.
    pub name: String,
    /// Addon version.
    pub version: String,
    /// Activation status.
    #[serde(default)]
    pub status: AddonStatus,
    /// Declared requirements, in order.
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    /// Entry code unit, relative to the addon directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    /// Unrecognized fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Typed accessor over an addon's descriptor file.
#[derive(Debug, Clone)]
pub struct AddonMetadata {
    /// Descriptor path.
    path: PathBuf,
    /// In-memory copy, authoritative once persisted.
    descriptor: AddonDescriptor,
}

impl AddonMetadata {
    /// Reads a descriptor from disk.
    pub fn load(path: &Path) -> AddonResult<Self> {
        if !path.is_file() {
            return Err(AddonError::Metadata(format!(
                "Cannot find metadata file of addon at {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            AddonError::Metadata(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let descriptor: AddonDescriptor = serde_json::from_str(&content).map_err(|e| {
            AddonError::Metadata(format!(
                "Cannot recognize metadata at {}: {}",
                path.display(),
                e
            ))
        })?;

        if descriptor.name.trim().is_empty() {
            return Err(AddonError::Metadata(format!(
                "Addon name is required in {}",
                path.display()
            )));
        }
        if !is_valid_name(&descriptor.name) {
            return Err(AddonError::Metadata(format!(
                "Addon name {:?} in {} must not contain path separators or '..'",
                descriptor.name,
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            descriptor,
        })
    }

    /// Returns the descriptor path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the full descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &AddonDescriptor {
        &self.descriptor
    }

    /// Addon name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Addon version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.descriptor.version
    }

    /// Activation status.
    #[must_use]
    pub fn status(&self) -> AddonStatus {
        self.descriptor.status
    }

    /// Returns true if the addon is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.descriptor.status == AddonStatus::Enabled
    }

    /// Declared requirements.
    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.descriptor.requirements
    }

    /// Reads a field as JSON, recognized or not.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let d = &self.descriptor;
        match key {
            "name" => Some(Value::String(d.name.clone())),
            "version" => Some(Value::String(d.version.clone())),
            "status" => Some(Value::String(d.status.to_string())),
            "requirements" => serde_json::to_value(&d.requirements).ok(),
            "main" => d.main.clone().map(Value::String),
            other => d.extra.get(other).cloned(),
        }
    }

    /// Sets a field in memory. Call [`save`](Self::save) to persist.
    ///
    /// `name` cannot change, and recognized fields only accept values of
    /// their own shape.
    pub fn set(&mut self, key: &str, value: Value) -> AddonResult<()> {
        apply(&mut self.descriptor, key, value)
    }

    /// Writes the in-memory descriptor to disk.
    pub fn save(&self) -> AddonResult<()> {
        write_atomic(&self.path, &self.descriptor)
    }

    /// Applies a change to a copy, persists it, then adopts it.
    ///
    /// If persisting fails both the file and the in-memory copy are unchanged.
    pub fn update<F>(&mut self, change: F) -> AddonResult<()>
    where
        F: FnOnce(&mut AddonDescriptor) -> AddonResult<()>,
    {
        let mut next = self.descriptor.clone();
        change(&mut next)?;
        if next.name != self.descriptor.name {
            return Err(AddonError::Metadata("Addon name cannot be changed".to_string()));
        }
        write_atomic(&self.path, &next)?;
        self.descriptor = next;
        Ok(())
    }

    /// Marks the addon enabled and persists.
    pub fn enable(&mut self) -> AddonResult<()> {
        self.set_status(AddonStatus::Enabled)
    }

    /// Marks the addon disabled and persists.
    pub fn disable(&mut self) -> AddonResult<()> {
        self.set_status(AddonStatus::Disabled)
    }

    fn set_status(&mut self, status: AddonStatus) -> AddonResult<()> {
        self.update(|d| {
            d.status = status;
            Ok(())
        })?;
        debug!("Addon {} is now {}", self.descriptor.name, status);
        Ok(())
    }
}

fn apply(d: &mut AddonDescriptor, key: &str, value: Value) -> AddonResult<()> {
    let shape = |e: serde_json::Error| AddonError::Metadata(format!("Invalid value for {key}: {e}"));

    match key {
        "name" => {
            if value.as_str() != Some(d.name.as_str()) {
                return Err(AddonError::Metadata("Addon name cannot be changed".to_string()));
            }
        }
        "version" => d.version = serde_json::from_value(value).map_err(shape)?,
        "status" => d.status = serde_json::from_value(value).map_err(shape)?,
        "requirements" => d.requirements = serde_json::from_value(value).map_err(shape)?,
        "main" => d.main = serde_json::from_value(value).map_err(shape)?,
        other => {
            d.extra.insert(other.to_string(), value);
        }
    }
    Ok(())
}

/// Names are used as file names for the config store and archive.
fn is_valid_name(name: &str) -> bool {
    !name.contains(['/', '\\']) && !name.contains("..") && name != "."
}

/// Serializes `value` and replaces `path` with it in one rename.
pub(crate) fn write_atomic<T: Serialize>(path: &Path, value: &T) -> AddonResult<()> {
    let mut content = serde_json::to_string_pretty(value)?;
    content.push('\n');
    write_file_atomic(path, content.as_bytes())?;
    Ok(())
}

/// Replaces `path` with `content` through a sibling temp file and rename.
///
/// On failure the temp file is removed and `path` is untouched.
pub(crate) fn write_file_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let temp_path = temp_path_for(path);
    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if written.is_err() && temp_path.is_file() {
        let _ = fs::remove_file(&temp_path);
    }
    written
}

/// Sibling temp file, so the rename stays on one filesystem.
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

//! Settings for the addon system.
//!
//! Loaded from `~/.relative-addons/settings.toml`. Every field is optional in
//! the file; missing fields take their defaults.
//!
//! ```toml
//! package_manager = "pip"
//! list_args = ["freeze"]
//! install_args = ["install"]
//! error_marker = "ERROR"
//! timeout_secs = 120
//! metadata_file = "addon.json"
//! log_level = "info"
//! log_retention_hours = 24
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::addon::metadata::write_file_atomic;
use crate::addon::{Addon, AddonServices, METADATA_FILE};
use crate::error::{AddonError, AddonResult};
use crate::logging::{DEFAULT_LOG_LEVEL, DEFAULT_LOG_RETENTION_HOURS, LogConfig};
use crate::package::{CommandPackageManager, DEFAULT_ERROR_MARKER};

/// Settings file name inside [`app_directory`].
pub const SETTINGS_FILE: &str = "settings.toml";

/// Returns `~/.relative-addons`.
#[must_use]
pub fn app_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".relative-addons")
}

/// Returns the default settings file path.
#[must_use]
pub fn settings_path() -> PathBuf {
    app_directory().join(SETTINGS_FILE)
}

/// User-tunable settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Package manager executable.
    pub package_manager: String,
    /// Arguments that print the installed `name==version` listing.
    pub list_args: Vec<String>,
    /// Arguments preceding install specifiers.
    pub install_args: Vec<String>,
    /// Marker whose presence in install output means failure.
    pub error_marker: String,
    /// Per-invocation limit in seconds. Unset means wait indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Descriptor file name inside each addon directory.
    pub metadata_file: String,
    /// Log level.
    pub log_level: String,
    /// Log retention in hours.
    pub log_retention_hours: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            package_manager: "pip".to_string(),
            list_args: vec!["freeze".to_string()],
            install_args: vec!["install".to_string()],
            error_marker: DEFAULT_ERROR_MARKER.to_string(),
            timeout_secs: None,
            metadata_file: METADATA_FILE.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_retention_hours: DEFAULT_LOG_RETENTION_HOURS,
        }
    }
}

impl Settings {
    /// Loads from [`settings_path`].
    pub fn load() -> AddonResult<Self> {
        Self::load_from(&settings_path())
    }

    /// Loads from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> AddonResult<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            AddonError::Settings(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Writes the settings to `path` through a temp file and rename.
    pub fn save_to(&self, path: &Path) -> AddonResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AddonError::Settings(format!("Failed to serialize settings: {}", e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        write_file_atomic(path, content.as_bytes())?;
        Ok(())
    }

    /// Per-invocation timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Builds the command adapter these settings describe.
    #[must_use]
    pub fn package_manager(&self) -> CommandPackageManager {
        CommandPackageManager::new(self.package_manager.clone())
            .with_list_args(self.list_args.iter().cloned())
            .with_install_args(self.install_args.iter().cloned())
            .with_error_marker(self.error_marker.clone())
            .with_timeout(self.timeout())
    }

    /// Builds the logging configuration.
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        let level = LogConfig::parse_level(&self.log_level);
        LogConfig {
            enabled: level != "off",
            level,
            retention_hours: self.log_retention_hours,
        }
    }

    /// Descriptor location for an addon directory.
    #[must_use]
    pub fn metadata_path(&self, addon_dir: &Path) -> PathBuf {
        addon_dir.join(&self.metadata_file)
    }

    /// Opens the addon at `path` using the configured descriptor name.
    pub fn open_addon(
        &self,
        path: impl Into<PathBuf>,
        services: AddonServices,
    ) -> AddonResult<Addon> {
        let path = path.into();
        let meta_path = self.metadata_path(&path);
        Addon::with_meta_path(path, meta_path, services)
    }

    /// Discovers addons under `root` using the configured descriptor name.
    pub fn discover_addons(
        &self,
        root: &Path,
        services: &AddonServices,
    ) -> AddonResult<Vec<Addon>> {
        crate::addon::discover_addons(root, &self.metadata_file, services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PackageManager;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.package_manager, "pip");
        assert_eq!(settings.list_args, vec!["freeze"]);
        assert_eq!(settings.metadata_file, "addon.json");
        assert_eq!(settings.timeout(), None);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let settings = Settings::load_from(&dir.path().join(SETTINGS_FILE)).expect("load");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(
            &path,
            "package_manager = \"pip3\"\ntimeout_secs = 30\nlog_level = \"WARNING\"\n",
        )
        .expect("write");

        let settings = Settings::load_from(&path).expect("load");
        assert_eq!(settings.package_manager, "pip3");
        assert_eq!(settings.install_args, vec!["install"]);
        assert_eq!(settings.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(settings.log_config().level, "warn");
    }

    #[test]
    fn test_unparsable_file_is_error() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, "timeout_secs = \"soon\"").expect("write");
        assert!(matches!(
            Settings::load_from(&path),
            Err(AddonError::Settings(_))
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let settings = Settings {
            package_manager: "uv".to_string(),
            list_args: vec!["pip".to_string(), "freeze".to_string()],
            timeout_secs: Some(5),
            ..Settings::default()
        };

        settings.save_to(&path).expect("save");
        assert!(!path.with_extension("toml.tmp").exists());
        assert_eq!(Settings::load_from(&path).expect("load"), settings);
    }

    #[test]
    fn test_failed_save_keeps_previous_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join(SETTINGS_FILE);
        Settings::default().save_to(&path).expect("save");
        let before = fs::read_to_string(&path).expect("read");

        fs::create_dir(path.with_extension("toml.tmp")).expect("block temp");
        let changed = Settings {
            package_manager: "uv".to_string(),
            ..Settings::default()
        };
        assert!(changed.save_to(&path).is_err());
        assert_eq!(fs::read_to_string(&path).expect("read"), before);
    }

    #[test]
    fn test_failed_rename_removes_temp_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join(SETTINGS_FILE);
        fs::create_dir(&path).expect("mkdir");
        fs::write(path.join("occupied"), "x").expect("write");

        assert!(Settings::default().save_to(&path).is_err());
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_package_manager_from_settings() {
        let settings = Settings {
            package_manager: "pip3".to_string(),
            error_marker: "FAILED".to_string(),
            timeout_secs: Some(7),
            ..Settings::default()
        };
        let manager = settings.package_manager();
        assert_eq!(manager.program(), "pip3");
        assert_eq!(manager.error_marker(), "FAILED");
        assert_eq!(manager.timeout(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_log_config_off() {
        let settings = Settings {
            log_level: "off".to_string(),
            ..Settings::default()
        };
        assert!(!settings.log_config().enabled);
    }

    #[test]
    fn test_metadata_path() {
        let settings = Settings {
            metadata_file: "meta.json".to_string(),
            ..Settings::default()
        };
        assert_eq!(
            settings.metadata_path(Path::new("/addons/a")),
            PathBuf::from("/addons/a/meta.json")
        );
    }

    #[test]
    fn test_app_directory() {
        assert!(app_directory().ends_with(".relative-addons"));
        assert!(settings_path().ends_with(".relative-addons/settings.toml"));
    }
}

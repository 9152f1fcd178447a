//! Addons: directories with a descriptor, an optional config store, and an
//! optional Lua code unit.
//!
//! # Architecture
//!
//! - **metadata**: typed access to `addon.json`, atomic writes
//! - **config**: per-addon key/value store, created on first access
//! - **module**: load/reload of the addon's code unit
//! - **archive**: zip packaging
//!
//! An [`Addon`] is identified by its directory and owns its metadata,
//! config and module handle. The capability inventory and resolver are
//! shared between addons through [`AddonServices`].

pub mod archive;
pub mod config;
pub mod metadata;
pub mod module;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{AddonError, AddonResult};
use crate::inventory::CapabilityInventory;
use crate::package::PackageManager;
use crate::resolver::DependencyResolver;
use crate::version;

pub use config::AddonConfig;
pub use metadata::{AddonDescriptor, AddonMetadata, AddonStatus, METADATA_FILE, Requirement};
pub use module::{AddonModuleHandle, LoadedModule, ModuleSpec};

/// Shared collaborators handed to every addon.
#[derive(Debug, Clone)]
pub struct AddonServices {
    /// Installed capability cache.
    pub inventory: Arc<CapabilityInventory>,
    /// Install batch executor.
    pub resolver: Arc<DependencyResolver>,
}

impl AddonServices {
    /// Builds an inventory and resolver over one package manager.
    #[must_use]
    pub fn new(manager: Arc<dyn PackageManager>) -> Self {
        Self {
            inventory: Arc::new(CapabilityInventory::new(Arc::clone(&manager))),
            resolver: Arc::new(DependencyResolver::new(manager)),
        }
    }
}

/// Why a requirement is not met.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementIssue {
    /// The capability is not installed.
    Missing {
        /// Capability name.
        name: String,
        /// Required version.
        required: String,
    },
    /// The capability is installed at too low a version.
    VersionMismatch {
        /// Capability name.
        name: String,
        /// Required version.
        required: String,
        /// Installed version.
        installed: String,
    },
}

/// Lazily constructed sub-resource.
#[derive(Debug)]
enum Slot<T> {
    NotLoaded,
    Loaded(T),
}

/// An addon directory and everything it owns.
#[derive(Debug)]
pub struct Addon {
    /// Addon directory.
    path: PathBuf,
    /// Descriptor location.
    meta_path: PathBuf,
    metadata: Slot<AddonMetadata>,
    config: Slot<AddonConfig>,
    module: Slot<AddonModuleHandle>,
    services: AddonServices,
}

impl Addon {
    /// Opens the addon at `path` with its descriptor at `path/addon.json`.
    pub fn open(path: impl Into<PathBuf>, services: AddonServices) -> AddonResult<Self> {
        let path = path.into();
        let meta_path = path.join(METADATA_FILE);
        Self::with_meta_path(path, meta_path, services)
    }

    /// Opens the addon at `path` with its descriptor at `meta_path`.
    ///
    /// The descriptor is not read until first needed.
    pub fn with_meta_path(
        path: impl Into<PathBuf>,
        meta_path: impl Into<PathBuf>,
        services: AddonServices,
    ) -> AddonResult<Self> {
        let path = path.into();
        let meta_path = meta_path.into();

        if path.as_os_str().is_empty() {
            return Err(AddonError::Metadata("Addon path is empty".to_string()));
        }
        if meta_path.file_name().is_none() || meta_path.is_dir() {
            return Err(AddonError::Metadata(format!(
                "Cannot recognize metadata of addon at {}",
                path.display()
            )));
        }

        Ok(Self {
            path,
            meta_path,
            metadata: Slot::NotLoaded,
            config: Slot::NotLoaded,
            module: Slot::NotLoaded,
            services,
        })
    }

    /// Addon directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Descriptor location.
    #[must_use]
    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    /// Shared services this addon uses.
    #[must_use]
    pub fn services(&self) -> &AddonServices {
        &self.services
    }

    /// Returns the descriptor, reading it on first access.
    pub fn metadata(&mut self) -> AddonResult<&AddonMetadata> {
        self.metadata_mut().map(|m| &*m)
    }

    /// Returns the descriptor mutably, reading it on first access.
    pub fn metadata_mut(&mut self) -> AddonResult<&mut AddonMetadata> {
        if let Slot::NotLoaded = self.metadata {
            let meta = AddonMetadata::load(&self.meta_path)?;
            debug!("Read metadata for {} from {}", meta.name(), self.meta_path.display());
            self.metadata = Slot::Loaded(meta);
        }
        match &mut self.metadata {
            Slot::Loaded(meta) => Ok(meta),
            Slot::NotLoaded => Err(AddonError::Metadata(format!(
                "Metadata for {} is unavailable",
                self.path.display()
            ))),
        }
    }

    /// Addon name from the descriptor.
    pub fn name(&mut self) -> AddonResult<String> {
        Ok(self.metadata()?.name().to_string())
    }

    /// Config store location: `<path>/<name>.config`.
    pub fn config_path(&mut self) -> AddonResult<PathBuf> {
        let name = self.name()?;
        Ok(config::config_path(&self.path, &name))
    }

    /// Marks the addon enabled and persists the descriptor.
    pub fn enable(&mut self) -> AddonResult<()> {
        self.metadata_mut()?.enable()?;
        info!("Enabled addon at {}", self.path.display());
        Ok(())
    }

    /// Marks the addon disabled and persists the descriptor.
    pub fn disable(&mut self) -> AddonResult<()> {
        self.metadata_mut()?.disable()?;
        info!("Disabled addon at {}", self.path.display());
        Ok(())
    }

    /// Lists unmet requirements against the cached inventory.
    pub fn requirement_issues(&mut self) -> AddonResult<Vec<RequirementIssue>> {
        let requirements = self.metadata()?.requirements().to_vec();
        let installed = self.services.inventory.list(false)?;

        let mut issues = Vec::new();
        for req in requirements {
            version::validate_constraint(&req.version_constraint)?;
            match installed.get(&req.name.to_lowercase()) {
                None => issues.push(RequirementIssue::Missing {
                    name: req.name,
                    required: req.version_constraint,
                }),
                Some(actual) => {
                    if !version::satisfies(&req.version_constraint, actual)? {
                        issues.push(RequirementIssue::VersionMismatch {
                            name: req.name,
                            required: req.version_constraint,
                            installed: actual.clone(),
                        });
                    }
                }
            }
        }
        Ok(issues)
    }

    /// Returns true if every requirement is met.
    ///
    /// Unmet requirements are not errors. With `alert` set each one is
    /// logged as a warning. Inventory failures and malformed versions are
    /// errors.
    pub fn check_requirements(&mut self, alert: bool) -> AddonResult<bool> {
        let issues = self.requirement_issues()?;
        if alert && !issues.is_empty() {
            let name = self.name()?;
            for issue in &issues {
                match issue {
                    RequirementIssue::Missing { name: lib, required } => warn!(
                        "addon [{}] requires not installed library [{}] with version {}",
                        name, lib, required
                    ),
                    RequirementIssue::VersionMismatch {
                        name: lib,
                        required,
                        installed,
                    } => warn!(
                        "addon [{}] requires library [{}] with version {}, \
                         but current version of library is {}",
                        name, lib, required, installed
                    ),
                }
            }
        }
        Ok(issues.is_empty())
    }

    /// Installs whatever the addon's requirements are missing.
    ///
    /// Returns the specifiers passed to the package manager. The shared
    /// inventory is left stale; call `services().inventory.list(true)` to see
    /// the result.
    pub fn install_requirements(&mut self) -> AddonResult<Vec<String>> {
        let requirements = self.metadata()?.requirements().to_vec();
        let installed = self.services.inventory.list(false)?;

        let actions = self
            .services
            .resolver
            .resolve(&requirements, &installed)
            .into_actions()?;
        self.services.resolver.execute(&actions)
    }

    /// Returns the config store, opening it on first access.
    pub fn get_config(&mut self) -> AddonResult<&mut AddonConfig> {
        if let Slot::NotLoaded = self.config {
            let path = self.config_path()?;
            self.config = Slot::Loaded(AddonConfig::open(path)?);
        }
        match &mut self.config {
            Slot::Loaded(config) => Ok(config),
            Slot::NotLoaded => Err(AddonError::Metadata(format!(
                "Config for {} is unavailable",
                self.path.display()
            ))),
        }
    }

    /// Returns the module handle without loading the code.
    pub fn module_handle(&mut self) -> AddonResult<&mut AddonModuleHandle> {
        if let Slot::NotLoaded = self.module {
            let meta = self.metadata()?;
            let name = meta.name().to_string();
            let version = meta.version().to_string();
            let entry = meta
                .descriptor()
                .main
                .clone()
                .unwrap_or_else(|| module::DEFAULT_ENTRY.to_string());
            let spec = ModuleSpec {
                dir: self.path.clone(),
                name,
                version,
                entry,
            };
            self.module = Slot::Loaded(AddonModuleHandle::new(spec)?);
        }
        match &mut self.module {
            Slot::Loaded(handle) => Ok(handle),
            Slot::NotLoaded => Err(AddonError::ModuleLoad(format!(
                "No module handle for {}",
                self.path.display()
            ))),
        }
    }

    /// Loads the addon's code unit if it is not loaded yet.
    pub fn module(&mut self) -> AddonResult<&LoadedModule> {
        self.module_handle()?.load()
    }

    /// Re-executes the addon's code unit and everything it pulled in.
    pub fn reload_module(&mut self) -> AddonResult<&LoadedModule> {
        self.module_handle()?.reload()
    }

    /// Packs the addon directory into `<name>.zip` in the current directory.
    pub fn pack(&mut self) -> AddonResult<PathBuf> {
        let dest = std::env::current_dir()?;
        self.pack_into(&dest)
    }

    /// Packs the addon directory into `<dest_dir>/<name>.zip`.
    pub fn pack_into(&mut self, dest_dir: &Path) -> AddonResult<PathBuf> {
        let name = self.name()?;
        archive::pack_directory(&self.path, dest_dir, &name)
    }

    /// Deletes the addon directory and everything in it.
    ///
    /// Consumes the addon; the loaded module (if any) is dropped first.
    pub fn remove(mut self) -> io::Result<()> {
        self.module = Slot::NotLoaded;
        fs::remove_dir_all(&self.path)?;
        info!("Removed addon at {}", self.path.display());
        Ok(())
    }
}

impl std::fmt::Display for Addon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match &self.metadata {
            Slot::Loaded(meta) => format!("{:?}", meta.name()),
            Slot::NotLoaded => "None".to_string(),
        };
        write!(f, "Addon(name={}, path={:?})", name, self.path)
    }
}

/// Opens every immediate subdirectory of `root` that has a descriptor named
/// `metadata_file`.
///
/// Directories without a readable descriptor are skipped with a warning.
pub fn discover_addons(
    root: &Path,
    metadata_file: &str,
    services: &AddonServices,
) -> AddonResult<Vec<Addon>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut dirs: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    let mut addons = Vec::new();
    for dir in dirs {
        let meta_path = dir.join(metadata_file);
        let mut addon = Addon::with_meta_path(&dir, meta_path, services.clone())?;
        match addon.metadata() {
            Ok(_) => addons.push(addon),
            Err(e) => warn!("Skipping {}: {}", dir.display(), e),
        }
    }

    debug!("Discovered {} addon(s) under {}", addons.len(), root.display());
    Ok(addons)
}

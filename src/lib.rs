//! Relative Addons
//!
//! Addon lifecycle management: descriptors, per-addon config, requirement
//! checking against an external package manager, and hot-reloadable Lua
//! code units.
//!
//! # Architecture
//!
//! - **Version Module**: numeric version comparison
//! - **Package Module**: package manager trait and command adapter
//! - **Inventory Module**: cached snapshot of installed capabilities
//! - **Resolver Module**: computes and executes install batches
//! - **Addon Module**: the addon aggregate and its owned resources
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use relative_addons::{Addon, AddonServices, Settings};
//!
//! let settings = Settings::load().expect("settings");
//! let services = AddonServices::new(Arc::new(settings.package_manager()));
//! let mut addon = Addon::open("addons/weather", services).expect("open");
//! if !addon.check_requirements(true).expect("check") {
//!     addon.install_requirements().expect("install");
//! }
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

pub mod addon;
pub mod config;
pub mod error;
pub mod inventory;
pub mod logging;
pub mod package;
pub mod resolver;
pub mod version;

// Re-export main types
pub use addon::{
    Addon, AddonConfig, AddonMetadata, AddonServices, AddonStatus, Requirement, RequirementIssue,
    discover_addons,
};
pub use config::Settings;
pub use error::{AddonError, AddonResult};
pub use inventory::CapabilityInventory;
pub use package::{Capabilities, CommandPackageManager, PackageManager};
pub use resolver::{DependencyResolver, InstallAction, Resolution};
pub use version::VersionFormatError;

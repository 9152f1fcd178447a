//! Package manager collaborator.
//!
//! The package manager is the source of truth for installed capabilities.
//! Addons only consume two operations from it: listing what is installed and
//! installing a batch of specifiers.
//!
//! Both operations report through free-form text. Parsing the listing and
//! detecting install failures are kept in this module so a manager with a
//! structured interface can override them without touching the resolver.

mod command;

use std::collections::HashMap;

use tracing::debug;

use crate::error::{AddonError, AddonResult};

pub use command::CommandPackageManager;

/// Installed capabilities keyed by lower-cased name.
pub type Capabilities = HashMap<String, String>;

/// Error marker printed by pip-like installers.
pub const DEFAULT_ERROR_MARKER: &str = "ERROR";

/// An external package manager.
pub trait PackageManager: Send + Sync {
    /// Program name, for diagnostics.
    fn program(&self) -> &str;

    /// Returns the raw listing of installed capabilities.
    fn list_installed(&self) -> AddonResult<String>;

    /// Installs a batch of `name` or `name==version` specifiers in one call.
    ///
    /// Returns the raw installer output.
    fn install(&self, specifiers: &[String]) -> AddonResult<String>;

    /// Marker whose presence in install output signals failure.
    fn error_marker(&self) -> &str {
        DEFAULT_ERROR_MARKER
    }

    /// Inspects install output and returns the diagnostic if it reports failure.
    fn install_failure(&self, output: &str) -> Option<String> {
        scan_for_marker(output, self.error_marker())
    }

    /// Parses a listing into capabilities.
    fn parse_installed(&self, output: &str) -> AddonResult<Capabilities> {
        parse_installed(output)
    }
}

/// Returns the whole output when it contains the marker.
#[must_use]
pub fn scan_for_marker(output: &str, marker: &str) -> Option<String> {
    if !marker.is_empty() && output.contains(marker) {
        Some(output.to_string())
    } else {
        None
    }
}

/// Parses `name==version` lines into a capability map.
///
/// Blank lines, comments, editable installs (`-e ...`) and direct references
/// (`name @ url`) carry no comparable version and are skipped.
pub fn parse_installed(output: &str) -> AddonResult<Capabilities> {
    let mut capabilities = Capabilities::new();

    for (lineno, raw) in output.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with("-e ") || line.contains(" @ ") {
            debug!("Skipping unversioned entry: {}", line);
            continue;
        }

        let Some((name, version)) = line.split_once("==") else {
            return Err(AddonError::CapabilityQuery(format!(
                "Unrecognized entry on line {}: {:?}",
                lineno + 1,
                line
            )));
        };

        let name = name.trim();
        let version = version.trim();
        if name.is_empty() || version.is_empty() {
            return Err(AddonError::CapabilityQuery(format!(
                "Incomplete entry on line {}: {:?}",
                lineno + 1,
                line
            )));
        }

        capabilities.insert(name.to_lowercase(), version.to_string());
    }

    Ok(capabilities)
}

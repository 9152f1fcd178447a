//! Requirement resolution and installation.
//!
//! Resolution compares an addon's requirements against a capability
//! snapshot and yields the install actions needed to satisfy them. Execution
//! hands the whole batch to the package manager in a single call.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::addon::Requirement;
use crate::error::{AddonError, AddonResult};
use crate::package::{Capabilities, PackageManager};
use crate::version::{self, VersionFormatError};

/// One capability to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallAction {
    /// Lower-cased capability name.
    pub name: String,
    /// Exact version to request, `None` for any.
    pub version: Option<String>,
}

impl InstallAction {
    fn for_requirement(req: &Requirement) -> Self {
        let version = if version::is_any(&req.version_constraint) {
            None
        } else {
            Some(version::to_library_version(&req.version_constraint))
        };
        Self {
            name: req.name.to_lowercase(),
            version,
        }
    }

    /// Installer specifier: `name` or `name==version`.
    #[must_use]
    pub fn specifier(&self) -> String {
        match &self.version {
            Some(v) => format!("{}=={}", self.name, v),
            None => self.name.clone(),
        }
    }
}

/// A requirement whose versions could not be compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRequirement {
    /// The requirement.
    pub requirement: Requirement,
    /// Why it could not be compared.
    pub error: VersionFormatError,
}

/// Outcome of resolving a requirement list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Installs needed, in requirement order.
    pub actions: Vec<InstallAction>,
    /// Requirements that could not be evaluated.
    pub rejected: Vec<RejectedRequirement>,
}

impl Resolution {
    /// Returns true if nothing needs installing and nothing was rejected.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.actions.is_empty() && self.rejected.is_empty()
    }

    /// Returns the actions, or the first rejection as an error.
    pub fn into_actions(self) -> Result<Vec<InstallAction>, VersionFormatError> {
        match self.rejected.into_iter().next() {
            Some(rejected) => Err(rejected.error),
            None => Ok(self.actions),
        }
    }
}

/// Computes and executes install batches.
///
/// The resolver holds no reference to the capability inventory. After
/// [`execute`](Self::execute) the inventory is stale until the caller
/// force-refreshes it.
pub struct DependencyResolver {
    manager: Arc<dyn PackageManager>,
}

impl DependencyResolver {
    /// Creates a resolver installing through `manager`.
    #[must_use]
    pub fn new(manager: Arc<dyn PackageManager>) -> Self {
        Self { manager }
    }

    /// Determines which requirements are unmet by `installed`.
    ///
    /// Each missing or outdated requirement yields one action, in input
    /// order. Requirements are not deduplicated.
    #[must_use]
    pub fn resolve(&self, requirements: &[Requirement], installed: &Capabilities) -> Resolution {
        let mut resolution = Resolution::default();

        for req in requirements {
            let key = req.name.to_lowercase();
            let needed = version::validate_constraint(&req.version_constraint).and_then(|()| {
                match installed.get(&key) {
                    None => Ok(true),
                    Some(actual) => {
                        version::satisfies(&req.version_constraint, actual).map(|ok| !ok)
                    }
                }
            });

            match needed {
                Ok(true) => resolution.actions.push(InstallAction::for_requirement(req)),
                Ok(false) => {}
                Err(error) => {
                    warn!("Cannot compare versions for {}: {}", req.name, error);
                    resolution.rejected.push(RejectedRequirement {
                        requirement: req.clone(),
                        error,
                    });
                }
            }
        }

        debug!(
            "Resolved {} requirement(s): {} to install, {} rejected",
            requirements.len(),
            resolution.actions.len(),
            resolution.rejected.len()
        );
        resolution
    }

    /// Installs every action in one package manager call.
    ///
    /// Returns the specifiers requested. An empty batch does nothing. If the
    /// installer reports failure the whole call fails with the raw output;
    /// anything the manager already installed stays installed.
    ///
    /// Does not refresh the capability inventory.
    pub fn execute(&self, actions: &[InstallAction]) -> AddonResult<Vec<String>> {
        let specifiers: Vec<String> = actions.iter().map(InstallAction::specifier).collect();
        if specifiers.is_empty() {
            return Ok(specifiers);
        }

        info!(
            "Installing via {}: {}",
            self.manager.program(),
            specifiers.join(" ")
        );
        let output = self.manager.install(&specifiers)?;

        if let Some(diagnostic) = self.manager.install_failure(&output) {
            warn!("Install batch failed via {}", self.manager.program());
            return Err(AddonError::Installation(diagnostic));
        }

        Ok(specifiers)
    }
}

impl std::fmt::Debug for DependencyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("manager", &self.manager.program())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::testing::FakePackageManager;
    use pretty_assertions::assert_eq;

    fn caps(entries: &[(&str, &str)]) -> Capabilities {
        entries
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    fn resolver() -> (Arc<FakePackageManager>, DependencyResolver) {
        let fake = Arc::new(FakePackageManager::with_listing(""));
        let resolver = DependencyResolver::new(fake.clone());
        (fake, resolver)
    }

    #[test]
    fn test_satisfied_requirements_emit_nothing() {
        let (_, resolver) = resolver();
        let reqs = vec![
            Requirement::new("foo", "1.2.0"),
            Requirement::new("Bar", "*"),
        ];
        let installed = caps(&[("foo", "1.3"), ("bar", "0.1")]);

        let resolution = resolver.resolve(&reqs, &installed);
        assert!(resolution.is_satisfied());
    }

    #[test]
    fn test_unmet_requirements_keep_order() {
        let (_, resolver) = resolver();
        let reqs = vec![
            Requirement::new("zeta", "2.0"),
            Requirement::new("alpha", "*"),
            Requirement::new("ok", "1.0"),
            Requirement::new("Mid", "v1.5"),
        ];
        let installed = caps(&[("zeta", "1.9.9"), ("ok", "1.0"), ("mid", "1.4")]);

        let specs: Vec<String> = resolver
            .resolve(&reqs, &installed)
            .into_actions()
            .expect("no rejections")
            .iter()
            .map(InstallAction::specifier)
            .collect();
        assert_eq!(specs, vec!["zeta==2.0", "alpha", "mid==1.5"]);
    }

    #[test]
    fn test_duplicates_are_not_collapsed() {
        let (_, resolver) = resolver();
        let reqs = vec![Requirement::new("foo", "1.0"), Requirement::new("foo", "1.0")];
        let resolution = resolver.resolve(&reqs, &Capabilities::new());
        assert_eq!(resolution.actions.len(), 2);
    }

    #[test]
    fn test_malformed_version_is_rejected_not_guessed() {
        let (_, resolver) = resolver();
        let reqs = vec![
            Requirement::new("weird", "1.0"),
            Requirement::new("missing", "2.0"),
        ];
        let installed = caps(&[("weird", "1.0-dev")]);

        let resolution = resolver.resolve(&reqs, &installed);
        assert_eq!(resolution.actions.len(), 1);
        assert_eq!(resolution.actions[0].name, "missing");
        assert_eq!(resolution.rejected.len(), 1);
        assert_eq!(resolution.rejected[0].error.input, "1.0-dev");
        assert!(resolution.into_actions().is_err());
    }

    #[test]
    fn test_malformed_constraint_for_missing_capability_is_rejected() {
        let (fake, resolver) = resolver();
        let reqs = vec![
            Requirement::new("foo", "1.x"),
            Requirement::new("bar", "2.0"),
            Requirement::new("baz", "*"),
        ];

        let resolution = resolver.resolve(&reqs, &Capabilities::new());
        let names: Vec<&str> = resolution.actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["bar", "baz"]);
        assert_eq!(resolution.rejected.len(), 1);
        assert_eq!(resolution.rejected[0].requirement.name, "foo");
        assert_eq!(resolution.rejected[0].error.input, "1.x");

        assert!(resolution.into_actions().is_err());
        assert!(fake.installs().is_empty());
    }

    #[test]
    fn test_execute_single_batch() {
        let (fake, resolver) = resolver();
        let actions = vec![
            InstallAction {
                name: "foo".to_string(),
                version: Some("1.2.0".to_string()),
            },
            InstallAction {
                name: "bar".to_string(),
                version: None,
            },
        ];

        let requested = resolver.execute(&actions).expect("install");
        assert_eq!(requested, vec!["foo==1.2.0", "bar"]);
        assert_eq!(fake.installs(), vec![vec!["foo==1.2.0".to_string(), "bar".to_string()]]);
    }

    #[test]
    fn test_execute_empty_batch_skips_manager() {
        let (fake, resolver) = resolver();
        assert!(resolver.execute(&[]).expect("noop").is_empty());
        assert!(fake.installs().is_empty());
    }

    #[test]
    fn test_execute_surfaces_raw_diagnostic() {
        let (fake, resolver) = resolver();
        fake.set_install_output("Collecting foo\nERROR: No matching distribution found for foo");
        let actions = vec![InstallAction {
            name: "foo".to_string(),
            version: None,
        }];

        match resolver.execute(&actions) {
            Err(AddonError::Installation(raw)) => {
                assert!(raw.contains("No matching distribution"));
                assert!(raw.starts_with("Collecting foo"));
            }
            other => panic!("expected installation error, got {:?}", other),
        }
    }

    #[test]
    fn test_execute_does_not_touch_inventory() {
        let (fake, resolver) = resolver();
        let actions = vec![InstallAction {
            name: "foo".to_string(),
            version: None,
        }];
        resolver.execute(&actions).expect("install");
        assert_eq!(fake.list_calls(), 0);
    }
}

//! Cached inventory of installed capabilities.
//!
//! The inventory is shared between addons as an `Arc<CapabilityInventory>`.
//! Each refresh builds a complete new map and swaps it in whole, so readers
//! holding a snapshot never observe a partially populated inventory.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::error::AddonResult;
use crate::package::{Capabilities, PackageManager};

/// Installed capability snapshot backed by a package manager.
pub struct CapabilityInventory {
    /// Source of truth.
    manager: Arc<dyn PackageManager>,
    /// Current snapshot, `None` until the first successful query.
    snapshot: RwLock<Option<Arc<Capabilities>>>,
    /// Serializes refreshes.
    refresh: Mutex<()>,
}

impl CapabilityInventory {
    /// Creates an empty inventory. Nothing is queried until first use.
    #[must_use]
    pub fn new(manager: Arc<dyn PackageManager>) -> Self {
        Self {
            manager,
            snapshot: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Returns the installed capabilities.
    ///
    /// Queries the package manager on first use or when `force` is set;
    /// otherwise returns the cached snapshot. A failed query leaves the
    /// previous snapshot in place.
    pub fn list(&self, force: bool) -> AddonResult<Arc<Capabilities>> {
        if !force {
            if let Some(snapshot) = self.cached() {
                debug!("Capability inventory cache hit ({} entries)", snapshot.len());
                return Ok(snapshot);
            }
        }

        let _guard = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);

        // Another caller may have populated the cache while we waited.
        if !force {
            if let Some(snapshot) = self.cached() {
                return Ok(snapshot);
            }
        }

        let fresh = match self.query() {
            Ok(caps) => Arc::new(caps),
            Err(e) => {
                warn!("Capability query via {} failed: {}", self.manager.program(), e);
                return Err(e);
            }
        };

        info!(
            "Capability inventory refreshed via {}: {} entries",
            self.manager.program(),
            fresh.len()
        );

        let mut slot = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::clone(&fresh));

        Ok(fresh)
    }

    /// Returns the cached snapshot without querying.
    #[must_use]
    pub fn cached(&self) -> Option<Arc<Capabilities>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Looks up the installed version of a capability, case-insensitively.
    pub fn version_of(&self, name: &str) -> AddonResult<Option<String>> {
        let caps = self.list(false)?;
        Ok(caps.get(&name.to_lowercase()).cloned())
    }

    /// Returns the package manager backing this inventory.
    #[must_use]
    pub fn manager(&self) -> &Arc<dyn PackageManager> {
        &self.manager
    }

    fn query(&self) -> AddonResult<Capabilities> {
        let output = self.manager.list_installed()?;
        self.manager.parse_installed(&output)
    }
}

impl std::fmt::Debug for CapabilityInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityInventory")
            .field("manager", &self.manager.program())
            .field("cached", &self.cached().map(|c| c.len()))
            .finish()
    }
}

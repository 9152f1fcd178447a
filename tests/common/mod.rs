//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::expect_used)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use relative_addons::{AddonError, AddonResult, AddonServices, PackageManager};

/// In-memory package manager that records every call.
///
/// Installs with an empty install output succeed and add the requested
/// specifiers to the listing.
pub struct FakePackageManager {
    listing: Mutex<Vec<(String, String)>>,
    listing_error: Mutex<Option<String>>,
    install_output: Mutex<String>,
    installs: Mutex<Vec<Vec<String>>>,
    list_calls: AtomicUsize,
}

impl FakePackageManager {
    pub fn new(installed: &[(&str, &str)]) -> Self {
        Self {
            listing: Mutex::new(
                installed
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect(),
            ),
            listing_error: Mutex::new(None),
            install_output: Mutex::new(String::new()),
            installs: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn shared(installed: &[(&str, &str)]) -> (Arc<Self>, AddonServices) {
        let fake = Arc::new(Self::new(installed));
        let services = AddonServices::new(fake.clone());
        (fake, services)
    }

    pub fn set_installed(&self, name: &str, version: &str) {
        let mut listing = self.listing.lock().expect("listing lock");
        listing.retain(|(n, _)| n != name);
        listing.push((name.to_string(), version.to_string()));
    }

    pub fn fail_listing(&self, reason: &str) {
        *self.listing_error.lock().expect("error lock") = Some(reason.to_string());
    }

    pub fn set_install_output(&self, output: &str) {
        *self.install_output.lock().expect("output lock") = output.to_string();
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn installs(&self) -> Vec<Vec<String>> {
        self.installs.lock().expect("installs lock").clone()
    }
}

impl PackageManager for FakePackageManager {
    fn program(&self) -> &str {
        "fake-pm"
    }

    fn list_installed(&self) -> AddonResult<String> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.listing_error.lock().expect("error lock").clone() {
            return Err(AddonError::CapabilityQuery(reason));
        }
        let listing = self.listing.lock().expect("listing lock");
        Ok(listing
            .iter()
            .map(|(n, v)| format!("{}=={}\n", n, v))
            .collect())
    }

    fn install(&self, specifiers: &[String]) -> AddonResult<String> {
        self.installs
            .lock()
            .expect("installs lock")
            .push(specifiers.to_vec());

        let output = self.install_output.lock().expect("output lock").clone();
        if output.is_empty() {
            for spec in specifiers {
                let (name, version) = spec.split_once("==").unwrap_or((spec.as_str(), "1.0"));
                self.set_installed(name, version);
            }
        }
        Ok(output)
    }
}

/// Writes an addon directory with the given descriptor JSON.
pub fn write_addon(root: &Path, dir: &str, descriptor: &str) -> PathBuf {
    let path = root.join(dir);
    fs::create_dir_all(&path).expect("create addon dir");
    fs::write(path.join("addon.json"), descriptor).expect("write descriptor");
    path
}

/// Writes a file under an addon directory, creating parents.
pub fn write_file(addon: &Path, relative: &str, content: &str) {
    let path = addon.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, content).expect("write file");
}

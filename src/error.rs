//! Error types for the addon system.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::version::VersionFormatError;

/// Errors that can occur while managing addons.
#[derive(Debug, Error)]
pub enum AddonError {
    /// Descriptor missing, unreadable, or not a valid addon descriptor.
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// A version string could not be parsed.
    #[error(transparent)]
    VersionFormat(#[from] VersionFormatError),

    /// Listing installed capabilities failed.
    #[error("Capability query failed: {0}")]
    CapabilityQuery(String),

    /// The package manager reported a failed install batch.
    ///
    /// Carries the raw installer output.
    #[error("Error occurred while installing: {0}")]
    Installation(String),

    /// An addon code unit failed to resolve or execute.
    #[error("Module load error: {0}")]
    ModuleLoad(String),

    /// A package manager invocation exceeded its timeout.
    #[error("{program} did not finish within {timeout:?}")]
    Timeout {
        /// Program that was running.
        program: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The settings file could not be parsed or written.
    #[error("Settings error: {0}")]
    Settings(String),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Archive creation error.
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

/// A specialized Result type for addon operations.
pub type AddonResult<T> = Result<T, AddonError>;

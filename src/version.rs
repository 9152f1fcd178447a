//! Version comparison for addon requirements.
//!
//! A constraint is either `"*"` (any version) or a dotted numeric version
//! that the installed version must meet or exceed.

use std::cmp::Ordering;

use thiserror::Error;

/// Constraint that every installed version satisfies.
pub const ANY_VERSION: &str = "*";

/// A version string that is not a dotted sequence of numbers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed version string: {input:?}")]
pub struct VersionFormatError {
    /// The rejected input.
    pub input: String,
}

impl VersionFormatError {
    /// Creates an error for the given input.
    #[must_use]
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Parses a version string into its numeric components.
///
/// Surrounding whitespace and a single leading `v` are ignored.
pub fn parse_version(version: &str) -> Result<Vec<u64>, VersionFormatError> {
    let trimmed = version.trim();
    let body = trimmed.strip_prefix('v').unwrap_or(trimmed);

    if body.is_empty() {
        return Err(VersionFormatError::new(version));
    }

    body.split('.')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionFormatError::new(version));
            }
            part.parse::<u64>()
                .map_err(|_| VersionFormatError::new(version))
        })
        .collect()
}

/// Compares two versions component-wise, zero-padding the shorter one.
pub fn compare_versions(a: &str, b: &str) -> Result<Ordering, VersionFormatError> {
    let left = parse_version(a)?;
    let right = parse_version(b)?;
    let len = left.len().max(right.len());

    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return Ok(other),
        }
    }

    Ok(Ordering::Equal)
}

/// Returns true if `actual` satisfies `constraint`.
///
/// `"*"` is satisfied by anything, including versions that would not parse.
pub fn satisfies(constraint: &str, actual: &str) -> Result<bool, VersionFormatError> {
    if is_any(constraint) {
        return Ok(true);
    }
    Ok(compare_versions(actual, constraint)? != Ordering::Less)
}

/// Returns true if the constraint accepts any version.
#[must_use]
pub fn is_any(constraint: &str) -> bool {
    constraint.trim() == ANY_VERSION
}

/// Checks that a constraint is `"*"` or a well-formed version.
pub fn validate_constraint(constraint: &str) -> Result<(), VersionFormatError> {
    if is_any(constraint) {
        return Ok(());
    }
    parse_version(constraint).map(|_| ())
}

/// Normalizes a constraint into the version handed to the package manager.
#[must_use]
pub fn to_library_version(constraint: &str) -> String {
    let trimmed = constraint.trim();
    trimmed.strip_prefix('v').unwrap_or(trimmed).to_string()
}

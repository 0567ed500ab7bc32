//! Declared project version.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// An opaque, comparable version token.
///
/// Versions are never parsed as semver: two versions are the same release
/// exactly when their normalised strings are equal. The release tag is the
/// normalised string itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Normalise and validate a raw version token, e.g. `'1.4.0'` from a source file.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return Err(Error::InvalidInput(format!(
                "version '{}' is empty after normalisation",
                raw
            )));
        }
        if normalized.chars().any(char::is_whitespace) {
            return Err(Error::InvalidInput(format!(
                "version '{}' contains whitespace",
                normalized
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tag under which this version is published.
    pub fn tag(&self) -> String {
        self.0.clone()
    }
}

/// Strip surrounding whitespace and quote characters.
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

// src/db/models.rs

//! Data models for SPM records
//!
//! A [`Package`] is the metadata record carried inside every archive as
//! `package.json` and persisted verbatim in the record store once installed.

use crate::archive;
use crate::error::{Error, Result};
use crate::version::VersionConstraint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named, versioned, content-addressed-verifiable unit of files plus
/// dependency/conflict metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Unique package identifier
    pub name: String,

    /// Display version string; never compared numerically
    pub version: String,

    /// Sole integer ordering key for version comparison
    #[serde(rename = "versionCode")]
    pub version_code: i64,

    /// Root-relative payload paths in install/report order
    #[serde(default)]
    pub files: Vec<String>,

    /// Dependency name -> version-constraint expression
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    /// Packages that must not be simultaneously installed
    #[serde(default)]
    pub conflicts: Vec<String>,

    /// Aggregate payload size in kilobytes, informational
    #[serde(default)]
    pub size: u64,
}

impl Package {
    /// Create a package record with empty file, dependency, and conflict sets
    pub fn new(name: impl Into<String>, version: impl Into<String>, version_code: i64) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            version_code,
            files: Vec::new(),
            dependencies: BTreeMap::new(),
            conflicts: Vec::new(),
            size: 0,
        }
    }

    /// Enforce structural invariants: a positive version code and parseable
    /// dependency constraints
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidMetadata("package name is empty".to_string()));
        }
        if self.version_code < 1 {
            return Err(Error::InvalidMetadata(format!(
                "package {} has non-positive version code {}",
                self.name, self.version_code
            )));
        }
        for (dep, requirement) in &self.dependencies {
            if VersionConstraint::parse(requirement).is_none() {
                return Err(Error::InvalidMetadata(format!(
                    "package {} declares unparseable constraint '{}' on {}",
                    self.name, requirement, dep
                )));
            }
        }
        Ok(())
    }

    /// Parse and validate a record from its JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        let pkg: Package = serde_json::from_str(json)?;
        pkg.validate()?;
        Ok(pkg)
    }

    /// Archive file name for this package, `<name>-<version>.spm`
    pub fn archive_file_name(&self) -> String {
        format!("{}-{}.{}", self.name, self.version, archive::ARCHIVE_EXT)
    }
}

impl std::fmt::Display for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{} (v{})", self.name, self.version, self.version_code)
    }
}

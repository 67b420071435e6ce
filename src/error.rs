// src/error.rs

use thiserror::Error;

/// Core error types for SPM
#[derive(Error, Debug)]
pub enum Error {
    /// Package, snapshot, or repository absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// More than one candidate archive matches a requested package
    #[error("Ambiguous candidates for '{name}': {candidates:?}")]
    AmbiguousCandidate {
        name: String,
        candidates: Vec<String>,
    },

    /// No candidate version satisfies the requested constraint
    #[error("Version mismatch for {name}: requires '{requirement}', found {found}")]
    VersionMismatch {
        name: String,
        requirement: String,
        found: i64,
    },

    /// Declared package conflict or file ownership conflict
    #[error("Conflict detected: {0}")]
    ConflictDetected(String),

    /// Manifest/hash mismatch or missing manifest
    #[error("Integrity failure: {0}")]
    IntegrityFailure(String),

    /// A declared dependency cannot be satisfied
    #[error("Unsatisfied dependency: {0}")]
    DependencyUnsatisfied(String),

    /// Network or archive I/O failure
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Local filesystem failure on the record store or snapshots
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// Package metadata violates a structural invariant
    #[error("Invalid package metadata: {0}")]
    InvalidMetadata(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Result type alias using SPM's Error type
pub type Result<T> = std::result::Result<T, Error>;

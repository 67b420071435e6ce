// src/archive.rs

//! Package archive codec
//!
//! A package archive is a gzip-compressed tar container holding:
//! - `package.json` — the package metadata record
//! - the payload files at their install-relative paths
//! - `META-INF/SPM.SF` — one `<relative-path> SHA256: <hex-digest>` line per
//!   payload file, verified after extraction

use crate::db::models::Package;
use crate::error::{Error, Result};
use crate::{filesystem, hash};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use tar::Archive;
use tempfile::TempDir;
use tracing::debug;

/// Metadata record path inside an archive
pub const METADATA_PATH: &str = "package.json";

/// Integrity manifest path inside an archive
pub const MANIFEST_PATH: &str = "META-INF/SPM.SF";

/// Package archive file extension
pub const ARCHIVE_EXT: &str = "spm";

/// Write a package archive from a fully prepared file tree
///
/// Every regular file under `tree` is appended in enumeration order; the
/// caller is expected to have placed `package.json` and the manifest in the
/// tree beforehand.
pub fn write_archive(tree: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest).map_err(|e| {
        Error::TransportFailure(format!("failed to create archive {}: {}", dest.display(), e))
    })?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for rel in filesystem::collect_files(tree)? {
        builder
            .append_path_with_name(tree.join(&rel), &rel)
            .map_err(|e| {
                Error::TransportFailure(format!(
                    "failed to append {} to archive: {}",
                    rel.display(),
                    e
                ))
            })?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::TransportFailure(format!("failed to finish archive: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::TransportFailure(format!("failed to flush archive: {e}")))?;

    debug!("Wrote archive {}", dest.display());
    Ok(())
}

/// Read only the metadata record out of an archive, without full extraction
pub fn read_metadata(archive_path: &Path) -> Result<Package> {
    let file = open_archive(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    for entry in archive
        .entries()
        .map_err(|e| entry_error(archive_path, e))?
    {
        let mut entry = entry.map_err(|e| entry_error(archive_path, e))?;
        let is_metadata = entry
            .path()
            .map_err(|e| entry_error(archive_path, e))?
            .as_ref()
            == Path::new(METADATA_PATH);

        if is_metadata {
            let mut json = String::new();
            entry
                .read_to_string(&mut json)
                .map_err(|e| entry_error(archive_path, e))?;
            return Package::from_json(&json);
        }
    }

    Err(Error::IntegrityFailure(format!(
        "{} is missing {}",
        archive_path.display(),
        METADATA_PATH
    )))
}

/// Extract an archive into a fresh scratch directory
///
/// The scratch directory is removed when the returned handle is dropped, so
/// a failed extraction leaves nothing behind.
pub fn extract(archive_path: &Path) -> Result<TempDir> {
    let scratch = tempfile::Builder::new().prefix("spm-pkg-").tempdir()?;

    let file = open_archive(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive
        .unpack(scratch.path())
        .map_err(|e| entry_error(archive_path, e))?;

    debug!(
        "Extracted {} into {}",
        archive_path.display(),
        scratch.path().display()
    );
    Ok(scratch)
}

/// Write the integrity manifest for `files` (paths relative to `tree`)
pub fn write_manifest(tree: &Path, files: &[String], dest: &Path) -> Result<()> {
    let mut out = String::new();
    for rel in files {
        let digest = hash::sha256_file(&tree.join(rel))?;
        out.push_str(&format!("{rel} SHA256: {digest}\n"));
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dest, out)?;
    Ok(())
}

/// Verify an extracted tree against its embedded manifest
///
/// Every manifest-listed file must exist and hash to its recorded digest.
/// Returns the number of verified entries.
pub fn verify_manifest(root: &Path) -> Result<usize> {
    let manifest = root.join(MANIFEST_PATH);
    if !manifest.exists() {
        return Err(Error::IntegrityFailure(format!(
            "missing integrity manifest {MANIFEST_PATH}"
        )));
    }

    let text = fs::read_to_string(&manifest)?;
    let mut verified = 0;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((rel, expected)) = line.split_once("SHA256:") else {
            continue;
        };
        let rel = rel.trim();
        let expected = expected.trim();

        let path = root.join(rel);
        if !path.exists() {
            return Err(Error::IntegrityFailure(format!(
                "missing file during verification: {rel}"
            )));
        }

        let actual = hash::sha256_file(&path)?;
        if actual != expected {
            return Err(Error::IntegrityFailure(format!("hash mismatch: {rel}")));
        }
        verified += 1;
    }

    Ok(verified)
}

fn open_archive(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        Error::TransportFailure(format!("failed to open archive {}: {}", path.display(), e))
    })
}

fn entry_error(path: &Path, e: std::io::Error) -> Error {
    Error::TransportFailure(format!("failed to read archive {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_tree() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("usr/bin")).unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("usr/bin/tool"), b"#!/bin/sh\nexit 0\n").unwrap();
        fs::write(dir.path().join("etc/tool.conf"), b"threads = 4\n").unwrap();
        dir
    }

    fn prepare_archive(tree: &Path, dest: &Path, pkg: &Package) {
        write_manifest(
            tree,
            &pkg.files,
            &tree.join(MANIFEST_PATH),
        )
        .unwrap();
        fs::write(
            tree.join(METADATA_PATH),
            serde_json::to_string_pretty(pkg).unwrap(),
        )
        .unwrap();
        write_archive(tree, dest).unwrap();
    }

    fn sample_package() -> Package {
        Package {
            name: "tool".to_string(),
            version: "1.0".to_string(),
            version_code: 1,
            files: vec!["etc/tool.conf".to_string(), "usr/bin/tool".to_string()],
            dependencies: BTreeMap::new(),
            conflicts: Vec::new(),
            size: 1,
        }
    }

    #[test]
    fn test_round_trip_preserves_payload_and_manifest() {
        let tree = sample_tree();
        let out = tempfile::tempdir().unwrap();
        let archive_path = out.path().join("tool-1.0.spm");
        prepare_archive(tree.path(), &archive_path, &sample_package());

        let scratch = extract(&archive_path).unwrap();
        assert_eq!(
            fs::read(scratch.path().join("usr/bin/tool")).unwrap(),
            b"#!/bin/sh\nexit 0\n"
        );
        assert_eq!(
            fs::read(scratch.path().join("etc/tool.conf")).unwrap(),
            b"threads = 4\n"
        );

        // Recomputed digests of the extracted files match the manifest
        let verified = verify_manifest(scratch.path()).unwrap();
        assert_eq!(verified, 2);
    }

    #[test]
    fn test_read_metadata_without_full_extraction() {
        let tree = sample_tree();
        let out = tempfile::tempdir().unwrap();
        let archive_path = out.path().join("tool-1.0.spm");
        let pkg = sample_package();
        prepare_archive(tree.path(), &archive_path, &pkg);

        let read = read_metadata(&archive_path).unwrap();
        assert_eq!(read, pkg);
    }

    #[test]
    fn test_read_metadata_missing_record() {
        let tree = sample_tree();
        let out = tempfile::tempdir().unwrap();
        let archive_path = out.path().join("bare.spm");
        write_archive(tree.path(), &archive_path).unwrap();

        assert!(matches!(
            read_metadata(&archive_path),
            Err(Error::IntegrityFailure(_))
        ));
    }

    #[test]
    fn test_open_malformed_archive_errors() {
        let out = tempfile::tempdir().unwrap();
        let bogus = out.path().join("bogus.spm");
        fs::write(&bogus, b"not a tarball").unwrap();

        assert!(matches!(
            read_metadata(&bogus),
            Err(Error::TransportFailure(_))
        ));
    }

    #[test]
    fn test_verify_manifest_detects_tampering() {
        let tree = sample_tree();
        let pkg = sample_package();
        write_manifest(tree.path(), &pkg.files, &tree.path().join(MANIFEST_PATH)).unwrap();

        fs::write(tree.path().join("usr/bin/tool"), b"tampered").unwrap();

        assert!(matches!(
            verify_manifest(tree.path()),
            Err(Error::IntegrityFailure(_))
        ));
    }

    #[test]
    fn test_verify_manifest_detects_missing_file() {
        let tree = sample_tree();
        let pkg = sample_package();
        write_manifest(tree.path(), &pkg.files, &tree.path().join(MANIFEST_PATH)).unwrap();

        fs::remove_file(tree.path().join("etc/tool.conf")).unwrap();

        assert!(matches!(
            verify_manifest(tree.path()),
            Err(Error::IntegrityFailure(_))
        ));
    }

    #[test]
    fn test_verify_manifest_requires_manifest() {
        let tree = sample_tree();
        assert!(matches!(
            verify_manifest(tree.path()),
            Err(Error::IntegrityFailure(_))
        ));
    }
}

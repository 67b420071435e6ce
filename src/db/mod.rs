// src/db/mod.rs

//! Package record store
//!
//! The single source of truth for "what is installed": one durable JSON
//! record per installed package, named `<package>.json`. Writes go through a
//! temp file and an atomic rename, so a crash mid-write can never corrupt a
//! different package's record. Cross-package atomicity is the snapshot
//! manager's job, not this layer's.

pub mod models;

use crate::error::{Error, Result};
use self::models::Package;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File-backed package record store
#[derive(Debug)]
pub struct Database {
    db_dir: PathBuf,
}

impl Database {
    /// Open (creating if necessary) the record store at `db_dir`
    pub fn open(db_dir: &Path) -> Result<Self> {
        fs::create_dir_all(db_dir).map_err(|e| {
            Error::StorageFailure(format!(
                "failed to create record store at {}: {}",
                db_dir.display(),
                e
            ))
        })?;
        Ok(Self {
            db_dir: db_dir.to_path_buf(),
        })
    }

    /// Directory holding the record files
    pub fn dir(&self) -> &Path {
        &self.db_dir
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.db_dir.join(format!("{name}.json"))
    }

    /// Upsert a package record
    pub fn add(&self, pkg: &Package) -> Result<()> {
        let path = self.record_path(&pkg.name);
        let tmp = self.db_dir.join(format!("{}.json.tmp", pkg.name));

        fs::write(&tmp, serde_json::to_string_pretty(pkg)?)
            .map_err(|e| Error::StorageFailure(format!("failed to write record: {e}")))?;
        fs::rename(&tmp, &path)
            .map_err(|e| Error::StorageFailure(format!("failed to commit record: {e}")))?;

        debug!("Stored record for {}", pkg.name);
        Ok(())
    }

    /// Delete a package record; absent records are a no-op
    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.record_path(name);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| Error::StorageFailure(format!("failed to remove record: {e}")))?;
            debug!("Removed record for {name}");
        }
        Ok(())
    }

    /// Look up the installed record for a package name
    pub fn get(&self, name: &str) -> Result<Option<Package>> {
        let path = self.record_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)
            .map_err(|e| Error::StorageFailure(format!("failed to read record: {e}")))?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Names of all installed packages, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.db_dir)
            .map_err(|e| Error::StorageFailure(format!("failed to list record store: {e}")))?
        {
            let entry = entry?;
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_string_lossy().strip_suffix(".json") {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Installed packages whose dependency map references `name`
    pub fn reverse_dependents(&self, name: &str) -> Result<Vec<String>> {
        let mut dependents = Vec::new();
        for candidate in self.list()? {
            if let Some(pkg) = self.get(&candidate)? {
                if pkg.dependencies.contains_key(name) {
                    dependents.push(candidate);
                }
            }
        }
        Ok(dependents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, code: i64) -> Package {
        let mut pkg = Package::new(name, "1.0", code);
        pkg.files.push(format!("usr/bin/{name}"));
        pkg
    }

    #[test]
    fn test_add_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        let pkg = sample("editor", 2);
        db.add(&pkg).unwrap();
        assert_eq!(db.get("editor").unwrap(), Some(pkg));

        db.remove("editor").unwrap();
        assert_eq!(db.get("editor").unwrap(), None);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        assert!(db.remove("ghost").is_ok());
    }

    #[test]
    fn test_add_is_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.add(&sample("editor", 1)).unwrap();
        db.add(&sample("editor", 2)).unwrap();

        assert_eq!(db.list().unwrap(), vec!["editor".to_string()]);
        assert_eq!(db.get("editor").unwrap().unwrap().version_code, 2);
    }

    #[test]
    fn test_list_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        for name in ["zsh", "awk", "make"] {
            db.add(&sample(name, 1)).unwrap();
        }

        assert_eq!(
            db.list().unwrap(),
            vec!["awk".to_string(), "make".to_string(), "zsh".to_string()]
        );
    }

    #[test]
    fn test_reverse_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        let libcore = sample("libcore", 3);
        let mut app = sample("app", 1);
        app.dependencies
            .insert("libcore".to_string(), ">=2".to_string());
        let mut tool = sample("tool", 1);
        tool.dependencies
            .insert("libcore".to_string(), "*".to_string());
        let lone = sample("lone", 1);

        for pkg in [&libcore, &app, &tool, &lone] {
            db.add(pkg).unwrap();
        }

        assert_eq!(
            db.reverse_dependents("libcore").unwrap(),
            vec!["app".to_string(), "tool".to_string()]
        );
        assert!(db.reverse_dependents("lone").unwrap().is_empty());
    }
}

// src/snapshot.rs

//! Snapshot management
//!
//! Before any mutating transaction the orchestrator captures a snapshot: the
//! affected package records, a full copy of the record store, and a copy of
//! every affected file currently on disk. Restoring a snapshot swaps the
//! record store back wholesale (staged and committed by rename), removes
//! whatever the failed transaction left behind, and copies the captured
//! files into place. Snapshots are consumed on restore and retention-pruned
//! after successful transactions.
//!
//! A small journal records the in-flight transaction so an interrupted
//! process can be reconciled on the next startup.

use crate::config::Config;
use crate::db::models::Package;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::filesystem;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const PACKAGE_LIST_FILE: &str = "packages.json";
const DB_SUBDIR: &str = "db";
const STATE_SUBDIR: &str = "state";
const JOURNAL_FILE: &str = "journal.json";

/// Record of a transaction that has entered its mutating phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionJournal {
    pub snapshot: String,
    pub operation: String,
}

/// Creates, restores, and prunes snapshots under one directory
#[derive(Debug)]
pub struct SnapshotManager {
    snap_dir: PathBuf,
    max_snapshots: usize,
}

impl SnapshotManager {
    pub fn new(snap_dir: &Path, max_snapshots: usize) -> Result<Self> {
        fs::create_dir_all(snap_dir).map_err(|e| {
            Error::StorageFailure(format!(
                "failed to create snapshots directory {}: {}",
                snap_dir.display(),
                e
            ))
        })?;
        Ok(Self {
            snap_dir: snap_dir.to_path_buf(),
            max_snapshots,
        })
    }

    /// Capture a snapshot covering `affected`, returning its name
    ///
    /// The affected records persisted into the snapshot merge the
    /// transaction's view of each package with whatever the store currently
    /// records, so a rollback can clean both the old and the new file sets.
    /// The snapshot is complete before this returns (write-ahead semantics).
    pub fn create(
        &self,
        label: &str,
        affected: &[Package],
        db: &Database,
        config: &Config,
    ) -> Result<String> {
        let label = label.replace(['/', '\\'], "_");
        let stamp = Local::now().format("%Y%m%d%H%M%S");
        let mut name = format!("{stamp}-{label}");
        let mut counter = 1;
        while self.snap_dir.join(&name).exists() {
            counter += 1;
            name = format!("{stamp}-{label}-{counter}");
        }

        let snap_path = self.snap_dir.join(&name);
        let state_dir = snap_path.join(STATE_SUBDIR);
        fs::create_dir_all(&state_dir)?;

        let mut records = Vec::with_capacity(affected.len());
        for pkg in affected {
            let mut merged = pkg.clone();
            if let Some(installed) = db.get(&pkg.name)? {
                for file in installed.files {
                    if !merged.files.contains(&file) {
                        merged.files.push(file);
                    }
                }
            }
            records.push(merged);
        }
        fs::write(
            snap_path.join(PACKAGE_LIST_FILE),
            serde_json::to_string_pretty(&records)?,
        )?;

        if db.dir().exists() {
            filesystem::copy_tree(db.dir(), &snap_path.join(DB_SUBDIR))?;
        }

        for pkg in &records {
            for rel in &pkg.files {
                let rel = rel.trim_start_matches('/');
                let abs = config.root.join(rel);
                if abs.is_file() {
                    let dest = state_dir.join(rel);
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::copy(&abs, &dest)?;
                }
            }
        }

        info!(
            "Created snapshot {} covering {} package(s)",
            name,
            records.len()
        );
        Ok(name)
    }

    /// Restore a snapshot and delete it
    ///
    /// The record store restoration is all-or-nothing; individual file
    /// restoration is best-effort with warnings. Protected paths are never
    /// deleted or restored into.
    pub fn restore(&self, name: &str, db: &Database, config: &Config) -> Result<()> {
        let snap_path = self.snap_dir.join(name);
        if !snap_path.exists() {
            return Err(Error::NotFound(format!("snapshot {name}")));
        }
        info!("Restoring snapshot {name}");

        let db_snap = snap_path.join(DB_SUBDIR);
        if db_snap.exists() {
            swap_in_store(&db_snap, db.dir())?;
        }

        let affected = self.read_affected(&snap_path)?;

        // Remove whatever the failed transaction may have put on disk
        for pkg in &affected {
            for rel in &pkg.files {
                let rel = rel.trim_start_matches('/');
                let abs = config.root.join(rel);
                if config.is_protected(&abs) {
                    continue;
                }
                let outcome = if abs.is_dir() {
                    filesystem::remove_tree(&abs)
                } else if abs.exists() {
                    fs::remove_file(&abs).map_err(Error::Io)
                } else {
                    Ok(())
                };
                if let Err(e) = outcome {
                    warn!("Failed to delete {}: {}", abs.display(), e);
                }
            }
        }

        // Copy captured files back into place
        let state_dir = snap_path.join(STATE_SUBDIR);
        if state_dir.exists() {
            for rel in filesystem::collect_files(&state_dir)? {
                let target = config.root.join(&rel);
                if config.is_protected(&target) {
                    continue;
                }
                let outcome = (|| -> Result<()> {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::copy(state_dir.join(&rel), &target)?;
                    Ok(())
                })();
                if let Err(e) = outcome {
                    warn!("Failed to restore {}: {}", rel.display(), e);
                }
            }
        }

        filesystem::remove_tree(&snap_path)?;
        info!("Snapshot {name} restored");
        Ok(())
    }

    /// Delete the oldest snapshots beyond the retention bound
    pub fn prune(&self) -> Result<()> {
        let mut snaps = Vec::new();
        for entry in fs::read_dir(&self.snap_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                snaps.push(entry.path());
            }
        }
        snaps.sort();

        if snaps.len() > self.max_snapshots {
            let excess = snaps.len() - self.max_snapshots;
            for snap in &snaps[..excess] {
                info!("Pruning old snapshot {}", snap.display());
                filesystem::remove_tree(snap)?;
            }
        }
        Ok(())
    }

    /// Destroy every snapshot (and any pending journal)
    pub fn clear_all(&self) -> Result<()> {
        filesystem::remove_tree(&self.snap_dir)?;
        fs::create_dir_all(&self.snap_dir)?;
        Ok(())
    }

    /// Record that `snapshot` guards an in-flight transaction
    pub fn begin_journal(&self, snapshot: &str, operation: &str) -> Result<()> {
        let journal = TransactionJournal {
            snapshot: snapshot.to_string(),
            operation: operation.to_string(),
        };
        fs::write(
            self.snap_dir.join(JOURNAL_FILE),
            serde_json::to_string_pretty(&journal)?,
        )?;
        Ok(())
    }

    /// Forget the in-flight transaction record
    pub fn clear_journal(&self) -> Result<()> {
        let path = self.snap_dir.join(JOURNAL_FILE);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// The journal left behind by an interrupted transaction, if any
    pub fn pending_journal(&self) -> Result<Option<TransactionJournal>> {
        let path = self.snap_dir.join(JOURNAL_FILE);
        if !path.exists() {
            return Ok(None);
        }
        match serde_json::from_str(&fs::read_to_string(&path)?) {
            Ok(journal) => Ok(Some(journal)),
            Err(e) => {
                warn!("Discarding unreadable transaction journal: {e}");
                Ok(None)
            }
        }
    }

    fn read_affected(&self, snap_path: &Path) -> Result<Vec<Package>> {
        let path = snap_path.join(PACKAGE_LIST_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }
}

/// Replace the live record store with a snapshot copy, staged and committed
/// by rename so a failure cannot leave a half-written store
fn swap_in_store(snapshot_copy: &Path, live: &Path) -> Result<()> {
    let parent = live
        .parent()
        .ok_or_else(|| Error::StorageFailure("record store has no parent directory".to_string()))?;
    let dir_name = live
        .file_name()
        .ok_or_else(|| Error::StorageFailure("record store has no directory name".to_string()))?
        .to_string_lossy()
        .into_owned();
    let staging = parent.join(format!("{dir_name}.staging"));
    let retired = parent.join(format!("{dir_name}.old"));

    filesystem::remove_tree(&staging)?;
    filesystem::copy_tree(snapshot_copy, &staging)?;
    filesystem::remove_tree(&retired)?;
    if live.exists() {
        fs::rename(live, &retired)
            .map_err(|e| Error::StorageFailure(format!("failed to retire record store: {e}")))?;
    }
    fs::rename(&staging, live)
        .map_err(|e| Error::StorageFailure(format!("failed to swap in record store: {e}")))?;
    filesystem::remove_tree(&retired)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _root: tempfile::TempDir,
        config: Config,
        db: Database,
        snaps: SnapshotManager,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_retention(3)
        }

        fn with_retention(max: usize) -> Self {
            let root = tempfile::tempdir().unwrap();
            let config = Config::for_root(root.path());
            let db = Database::open(&config.db_dir).unwrap();
            let snaps = SnapshotManager::new(&config.snapshots_dir, max).unwrap();
            Self {
                _root: root,
                config,
                db,
                snaps,
            }
        }

        fn write_root_file(&self, rel: &str, content: &str) {
            let path = self.config.root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn read_root_file(&self, rel: &str) -> Option<String> {
            fs::read_to_string(self.config.root.join(rel)).ok()
        }
    }

    fn pkg_with_files(name: &str, files: &[&str]) -> Package {
        let mut pkg = Package::new(name, "1.0", 1);
        pkg.files = files.iter().map(|f| f.to_string()).collect();
        pkg
    }

    #[test]
    fn test_restore_reverts_record_and_files() {
        let fx = Fixture::new();
        let pkg = pkg_with_files("editor", &["usr/bin/editor"]);

        fx.db.add(&pkg).unwrap();
        fx.write_root_file("usr/bin/editor", "original");

        let snap = fx
            .snaps
            .create("upgrade-editor", &[pkg.clone()], &fx.db, &fx.config)
            .unwrap();

        // Simulate a partially applied upgrade
        fx.write_root_file("usr/bin/editor", "tampered");
        let mut upgraded = pkg.clone();
        upgraded.version_code = 9;
        fx.db.add(&upgraded).unwrap();

        fx.snaps.restore(&snap, &fx.db, &fx.config).unwrap();

        assert_eq!(fx.read_root_file("usr/bin/editor").unwrap(), "original");
        assert_eq!(fx.db.get("editor").unwrap().unwrap().version_code, 1);
        assert!(!fx.config.snapshots_dir.join(&snap).exists());
    }

    #[test]
    fn test_restore_cleans_fresh_install_leftovers() {
        // The package was not installed at snapshot time; rollback must
        // still remove the files the failed install copied in.
        let fx = Fixture::new();
        let pkg = pkg_with_files("newpkg", &["usr/bin/newpkg"]);

        let snap = fx
            .snaps
            .create("install-newpkg", &[pkg.clone()], &fx.db, &fx.config)
            .unwrap();

        fx.write_root_file("usr/bin/newpkg", "half-installed");
        fx.db.add(&pkg).unwrap();

        fx.snaps.restore(&snap, &fx.db, &fx.config).unwrap();

        assert!(fx.read_root_file("usr/bin/newpkg").is_none());
        assert!(fx.db.get("newpkg").unwrap().is_none());
    }

    #[test]
    fn test_restore_missing_snapshot() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.snaps.restore("19700101000000-ghost", &fx.db, &fx.config),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_protected_paths_survive_restore() {
        let fx = Fixture::new();
        let pkg = pkg_with_files("daemon", &["run/daemon.pid", "usr/bin/daemon"]);

        let snap = fx
            .snaps
            .create("install-daemon", &[pkg.clone()], &fx.db, &fx.config)
            .unwrap();

        fx.write_root_file("run/daemon.pid", "1234");
        fx.write_root_file("usr/bin/daemon", "payload");
        fx.db.add(&pkg).unwrap();

        fx.snaps.restore(&snap, &fx.db, &fx.config).unwrap();

        // The protected file is untouched, the regular one is cleaned
        assert_eq!(fx.read_root_file("run/daemon.pid").unwrap(), "1234");
        assert!(fx.read_root_file("usr/bin/daemon").is_none());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let fx = Fixture::with_retention(2);
        for label in ["op-a", "op-b", "op-c", "op-d"] {
            fx.snaps.create(label, &[], &fx.db, &fx.config).unwrap();
        }

        fx.snaps.prune().unwrap();

        let mut remaining: Vec<String> = fs::read_dir(&fx.config.snapshots_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(remaining.len(), 2);
        assert!(remaining[0].contains("op-c"));
        assert!(remaining[1].contains("op-d"));
    }

    #[test]
    fn test_clear_all_empties_directory() {
        let fx = Fixture::new();
        fx.snaps.create("op", &[], &fx.db, &fx.config).unwrap();
        fx.snaps.clear_all().unwrap();

        let remaining = fs::read_dir(&fx.config.snapshots_dir).unwrap().count();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_journal_round_trip() {
        let fx = Fixture::new();
        assert!(fx.snaps.pending_journal().unwrap().is_none());

        fx.snaps.begin_journal("20260101120000-install-x", "install").unwrap();
        let journal = fx.snaps.pending_journal().unwrap().unwrap();
        assert_eq!(journal.snapshot, "20260101120000-install-x");
        assert_eq!(journal.operation, "install");

        fx.snaps.clear_journal().unwrap();
        assert!(fx.snaps.pending_journal().unwrap().is_none());
    }

    #[test]
    fn test_same_second_snapshots_get_distinct_names() {
        let fx = Fixture::new();
        let first = fx.snaps.create("op", &[], &fx.db, &fx.config).unwrap();
        let second = fx.snaps.create("op", &[], &fx.db, &fx.config).unwrap();
        assert_ne!(first, second);
    }
}

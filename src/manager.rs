// src/manager.rs

//! Package manager orchestrator
//!
//! Composes the resolver, archive codec, record store, and snapshot manager
//! into install/remove transactions. Every transaction walks the same state
//! machine: `Resolving -> Previewing -> Snapshotting -> Applying ->
//! Committed`, with any failure in the mutating phases diverting through
//! `RollingBack -> RolledBack` and restoring the write-ahead snapshot.

use crate::archive;
use crate::config::Config;
use crate::db::models::Package;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::filesystem;
use crate::repository::RepositoryClient;
use crate::resolver::{CandidateSelector, DependencyResolver, ResolvedPackage, StrictSelector};
use crate::snapshot::SnapshotManager;
use crate::version;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, error, warn};

/// Lifecycle of a single install or remove transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Resolving,
    Previewing,
    Snapshotting,
    Applying,
    Committed,
    RollingBack,
    RolledBack,
}

/// Confirmation strategy injected by the front-end
pub trait Prompter {
    /// Ask the user to confirm; `true` proceeds
    fn confirm(&mut self, question: &str) -> bool;
}

/// Confirms everything; the default for non-interactive use
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn confirm(&mut self, _question: &str) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct InstallStats {
    files: usize,
    skipped: usize,
    kilobytes: u64,
}

/// Orchestrates transactional install and remove operations
pub struct PackageManager<'a> {
    config: &'a Config,
    db: Database,
    snapshots: SnapshotManager,
    client: RepositoryClient,
    prompter: Box<dyn Prompter>,
    selector: Box<dyn CandidateSelector>,
    state: TransactionState,
}

impl<'a> PackageManager<'a> {
    pub fn new(config: &'a Config, prompter: Box<dyn Prompter>) -> Result<Self> {
        let db = Database::open(&config.db_dir)?;
        let snapshots = SnapshotManager::new(&config.snapshots_dir, config.max_snapshots)?;
        let client = RepositoryClient::from_config(&config.repo_config)?;
        Ok(Self {
            config,
            db,
            snapshots,
            client,
            prompter,
            selector: Box::new(StrictSelector),
            state: TransactionState::Idle,
        })
    }

    /// Replace the local-candidate disambiguation strategy
    pub fn set_selector(&mut self, selector: Box<dyn CandidateSelector>) {
        self.selector = selector;
    }

    /// State reached by the most recent transaction
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Records of every installed package, sorted by name
    pub fn installed_packages(&self) -> Result<Vec<Package>> {
        let mut packages = Vec::new();
        for name in self.db.list()? {
            if let Some(pkg) = self.db.get(&name)? {
                packages.push(pkg);
            }
        }
        Ok(packages)
    }

    /// Reconcile a transaction interrupted mid-`Applying` by a dead process
    ///
    /// Returns `true` when a snapshot was restored.
    pub fn recover(&mut self) -> Result<bool> {
        let Some(journal) = self.snapshots.pending_journal()? else {
            return Ok(false);
        };
        warn!(
            "Found interrupted {} transaction; restoring snapshot {}",
            journal.operation, journal.snapshot
        );
        match self.snapshots.restore(&journal.snapshot, &self.db, self.config) {
            Ok(()) => {
                self.snapshots.clear_journal()?;
                println!(
                    "Recovered from interrupted {} transaction (snapshot {} restored)",
                    journal.operation, journal.snapshot
                );
                Ok(true)
            }
            Err(Error::NotFound(_)) => {
                // Journal without a snapshot: nothing to reconcile
                self.snapshots.clear_journal()?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Install `names` and their dependencies
    pub fn install(&mut self, names: &[String], force: bool) -> Result<()> {
        self.state = TransactionState::Resolving;

        let mut all = Vec::new();
        {
            let mut resolver = DependencyResolver::new(
                &self.db,
                self.config,
                &mut self.client,
                &*self.selector,
            )?;
            for name in names {
                resolver.clear_visited();
                all.extend(resolver.resolve(name, "*")?);
            }
        }

        // De-duplicate by name, first occurrence wins
        let mut unique: Vec<ResolvedPackage> = Vec::new();
        let mut seen = HashSet::new();
        for resolved in all {
            if seen.insert(resolved.package.name.clone()) {
                unique.push(resolved);
            }
        }

        if unique.is_empty() {
            println!("Nothing to do: all requested packages are already installed.");
            self.state = TransactionState::Committed;
            return Ok(());
        }

        if !force {
            for resolved in &unique {
                self.check_conflicts(&resolved.package)?;
            }
        }

        self.state = TransactionState::Previewing;
        self.show_install_preview(&unique)?;
        if !force && !self.prompter.confirm("Do you want to continue?") {
            println!("Operation cancelled.");
            self.state = TransactionState::Idle;
            return Ok(());
        }

        self.state = TransactionState::Snapshotting;
        let affected: Vec<Package> = unique.iter().map(|r| r.package.clone()).collect();
        let snapshot = self.snapshots.create(
            &format!("install-{}", names.join(",")),
            &affected,
            &self.db,
            self.config,
        )?;
        self.snapshots.begin_journal(&snapshot, "install")?;

        self.state = TransactionState::Applying;
        match self.apply_install(&unique) {
            Ok(stats) => {
                self.snapshots.clear_journal()?;
                self.state = TransactionState::Committed;

                println!("\nSuccessfully installed packages:");
                for resolved in &unique {
                    println!(
                        "  {}-{}",
                        resolved.package.name, resolved.package.version
                    );
                }
                println!("\nTotal files: {}", stats.files);
                if stats.skipped > 0 {
                    println!("Skipped files: {}", stats.skipped);
                }
                println!("Total size: {}", format_size(stats.kilobytes));

                self.snapshots.prune()?;
                Ok(())
            }
            Err(e) => self.roll_back(&snapshot, e, "Installation"),
        }
    }

    /// Remove `names` from the managed root
    pub fn remove(&mut self, names: &[String], force: bool) -> Result<()> {
        self.state = TransactionState::Resolving;

        let mut packages = Vec::new();
        for name in names {
            let pkg = self
                .db
                .get(name)?
                .ok_or_else(|| Error::NotFound(format!("package {name} is not installed")))?;
            packages.push(pkg);
        }

        if !force {
            for pkg in &packages {
                let dependents = self.db.reverse_dependents(&pkg.name)?;
                if !dependents.is_empty() {
                    return Err(Error::DependencyUnsatisfied(format!(
                        "cannot remove {}: required by {} (use --force to override)",
                        pkg.name,
                        dependents.join(", ")
                    )));
                }
            }
        }

        self.state = TransactionState::Previewing;
        self.show_remove_preview(&packages)?;
        if !force && !self.prompter.confirm("Do you want to continue?") {
            println!("Operation cancelled.");
            self.state = TransactionState::Idle;
            return Ok(());
        }

        self.state = TransactionState::Snapshotting;
        let snapshot = self.snapshots.create(
            &format!("remove-{}", names.join(",")),
            &packages,
            &self.db,
            self.config,
        )?;
        self.snapshots.begin_journal(&snapshot, "remove")?;

        self.state = TransactionState::Applying;
        match self.apply_remove(&packages) {
            Ok(()) => {
                self.snapshots.clear_journal()?;
                self.state = TransactionState::Committed;

                println!("\nSuccessfully removed packages:");
                for pkg in &packages {
                    println!("  {}", pkg.name);
                }

                self.snapshots.prune()?;
                Ok(())
            }
            Err(e) => self.roll_back(&snapshot, e, "Removal"),
        }
    }

    /// Destroy every snapshot
    pub fn clear_snapshots(&self) -> Result<()> {
        self.snapshots.clear_all()
    }

    fn roll_back(&mut self, snapshot: &str, cause: Error, operation: &str) -> Result<()> {
        self.state = TransactionState::RollingBack;
        error!("{operation} failed: {cause}; rolling back");
        println!("\n{operation} failed: {cause}, rolling back...");

        if let Err(restore_err) = self.snapshots.restore(snapshot, &self.db, self.config) {
            // The journal stays in place so the next startup can retry
            self.state = TransactionState::RolledBack;
            error!("Snapshot restoration failed: {restore_err}; system may be inconsistent");
            return Err(Error::StorageFailure(format!(
                "rollback after '{cause}' failed: {restore_err}; system may be inconsistent"
            )));
        }

        self.snapshots.clear_journal()?;
        self.snapshots.prune()?;
        self.state = TransactionState::RolledBack;
        Err(cause)
    }

    fn apply_install(&self, resolved: &[ResolvedPackage]) -> Result<InstallStats> {
        let mut stats = InstallStats::default();

        for (i, item) in resolved.iter().enumerate() {
            let pkg = &item.package;
            println!(
                "\n[{}/{}] Installing {}-{}...",
                i + 1,
                resolved.len(),
                pkg.name,
                pkg.version
            );

            // Re-check against the live store: resolution order matters
            self.check_dependencies(pkg)?;

            let scratch = archive::extract(&item.archive_path)?;
            let verified = archive::verify_manifest(scratch.path())?;
            debug!("Verified {verified} manifest entries for {}", pkg.name);
            println!("  Integrity OK");

            self.install_files(pkg, scratch.path(), &mut stats)?;
            self.db.add(pkg)?;
        }

        Ok(stats)
    }

    fn install_files(&self, pkg: &Package, src_root: &Path, stats: &mut InstallStats) -> Result<()> {
        let mut installed = 0;
        let mut skipped = 0;

        for rel in &pkg.files {
            let rel = rel.trim_start_matches('/');
            let src = src_root.join(rel);
            let dest = self.config.root.join(rel);

            if src.is_dir() {
                fs::create_dir_all(&dest)?;
                continue;
            }

            if let Some(owner) = self.file_conflict(rel, &dest)? {
                if owner != pkg.name {
                    debug!("Skipping {} (owned by {})", rel, owner);
                    skipped += 1;
                    continue;
                }
            }

            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&src, &dest)?;
            installed += 1;
            stats.kilobytes += fs::metadata(&src)?.len() / 1024;
        }

        if skipped > 0 {
            println!("  Skipped {skipped} files due to conflicts");
        }
        println!("  Installed {installed} files");
        stats.files += installed;
        stats.skipped += skipped;
        Ok(())
    }

    /// Who owns an existing destination path: an installed package's name, or
    /// "system (unmanaged)" for a file nothing on record claims
    fn file_conflict(&self, rel: &str, dest: &Path) -> Result<Option<String>> {
        if !dest.exists() || dest.is_dir() {
            return Ok(None);
        }

        for name in self.db.list()? {
            if let Some(pkg) = self.db.get(&name)? {
                if pkg.files.iter().any(|f| f.trim_start_matches('/') == rel) {
                    return Ok(Some(name));
                }
            }
        }

        Ok(Some("system (unmanaged)".to_string()))
    }

    fn apply_remove(&self, packages: &[Package]) -> Result<()> {
        for (i, pkg) in packages.iter().enumerate() {
            println!(
                "\n[{}/{}] Removing {}-{}...",
                i + 1,
                packages.len(),
                pkg.name,
                pkg.version
            );

            self.db.remove(&pkg.name)?;

            let mut removed = 0;
            let mut freed_kb = 0u64;

            for rel in &pkg.files {
                let rel = rel.trim_start_matches('/');
                let abs = self.config.root.join(rel);
                if self.config.is_protected(&abs) {
                    continue;
                }
                if abs.is_file() {
                    freed_kb += fs::metadata(&abs)?.len() / 1024;
                    fs::remove_file(&abs)?;
                    removed += 1;
                    if let Some(parent) = abs.parent() {
                        filesystem::cleanup_empty_parents(
                            parent,
                            &self.config.root,
                            &self.config.protected_paths,
                        );
                    }
                } else if abs.is_dir() {
                    filesystem::remove_tree(&abs)?;
                    filesystem::cleanup_empty_parents(
                        &abs,
                        &self.config.root,
                        &self.config.protected_paths,
                    );
                }
            }

            println!("  Removed {} files ({})", removed, format_size(freed_kb));
        }
        Ok(())
    }

    /// Fail if any declared dependency is missing or at an unsatisfying
    /// version in the live store
    fn check_dependencies(&self, pkg: &Package) -> Result<()> {
        for (dep, requirement) in &pkg.dependencies {
            let installed = self.db.get(dep)?.ok_or_else(|| {
                Error::DependencyUnsatisfied(format!(
                    "{dep} required by {} is not installed",
                    pkg.name
                ))
            })?;
            if !version::satisfies(installed.version_code, requirement) {
                return Err(Error::DependencyUnsatisfied(format!(
                    "{} requires {dep} '{requirement}' but found version code {}",
                    pkg.name, installed.version_code
                )));
            }
        }
        Ok(())
    }

    /// Fail if any declared conflict is currently installed
    fn check_conflicts(&self, pkg: &Package) -> Result<()> {
        for conflict in &pkg.conflicts {
            if self.db.get(conflict)?.is_some() {
                return Err(Error::ConflictDetected(format!(
                    "{} conflicts with installed package {conflict}",
                    pkg.name
                )));
            }
        }
        Ok(())
    }

    fn show_install_preview(&self, resolved: &[ResolvedPackage]) -> Result<()> {
        println!("\nPackages to install:");
        let mut new_count = 0u32;
        let mut upgrade_count = 0u32;
        for item in resolved {
            let is_new = self.db.get(&item.package.name)?.is_none();
            if is_new {
                new_count += 1;
            } else {
                upgrade_count += 1;
            }
            println!(
                "  {}-{} ({})",
                item.package.name,
                item.package.version,
                if is_new { "new" } else { "upgrade" }
            );
        }

        let total_kb: u64 = resolved.iter().map(|r| r.package.size).sum();
        println!("\nSummary:");
        println!("  New packages: {new_count}");
        println!("  Upgrades: {upgrade_count}");
        println!("  Total download size: {}", format_size(total_kb));
        println!("  Disk space required: {}", format_size(total_kb));
        Ok(())
    }

    fn show_remove_preview(&self, packages: &[Package]) -> Result<()> {
        println!("\nPackages to remove:");
        for pkg in packages {
            println!("  {}-{}", pkg.name, pkg.version);
        }

        let mut affected = Vec::new();
        for pkg in packages {
            match self.db.reverse_dependents(&pkg.name) {
                Ok(dependents) => {
                    for dep in dependents {
                        if !affected.contains(&dep) {
                            affected.push(dep);
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to get reverse dependents of {}: {}", pkg.name, e);
                }
            }
        }

        let total_kb: u64 = packages.iter().map(|p| p.size).sum();
        println!("\nSummary:");
        println!("  Packages to remove: {}", packages.len());
        if !affected.is_empty() {
            println!("  Affected packages: {}", affected.join(", "));
        }
        println!("  Disk space freed: {}", format_size(total_kb));
        Ok(())
    }
}

/// Render a kilobyte count as a human-readable size
pub fn format_size(size_kb: u64) -> String {
    if size_kb < 1024 {
        format!("{:.1} KB", size_kb as f64)
    } else if size_kb < 1024 * 1024 {
        format!("{:.1} MB", size_kb as f64 / 1024.0)
    } else {
        format!("{:.1} GB", size_kb as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size_units() {
        assert_eq!(format_size(512), "512.0 KB");
        assert_eq!(format_size(2048), "2.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 GB");
    }
}

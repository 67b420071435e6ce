// src/resolver.rs

//! Dependency resolution
//!
//! Given a root package name and version constraint, produces a flattened,
//! de-duplicated, dependency-complete install list in
//! dependency-before-dependent order. Candidates come from the local archive
//! directory first, then from the configured remote repositories.

use crate::archive;
use crate::config::Config;
use crate::db::models::Package;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::repository::RepositoryClient;
use crate::version::{self, VersionConstraint};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Recursion bound; exceeding it means a dependency cycle reached through
/// genuinely different constraints
pub const MAX_RESOLVE_DEPTH: usize = 64;

/// A package scheduled for installation together with the archive providing it
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    pub package: Package,
    pub archive_path: PathBuf,
}

/// Strategy for choosing among multiple matching local archives
pub trait CandidateSelector {
    /// Pick an index into `candidates`, or error
    fn select(&self, name: &str, candidates: &[PathBuf]) -> Result<usize>;
}

/// Refuses to guess: surfaces every candidate to the caller
///
/// The right default for non-interactive contexts.
pub struct StrictSelector;

impl CandidateSelector for StrictSelector {
    fn select(&self, name: &str, candidates: &[PathBuf]) -> Result<usize> {
        Err(Error::AmbiguousCandidate {
            name: name.to_string(),
            candidates: candidates
                .iter()
                .map(|p| {
                    p.file_name()
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or_else(|| p.display().to_string())
                })
                .collect(),
        })
    }
}

/// Picks the candidate with the numerically highest version code
pub struct NewestSelector;

impl CandidateSelector for NewestSelector {
    fn select(&self, name: &str, candidates: &[PathBuf]) -> Result<usize> {
        let mut best: Option<(usize, i64)> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            match archive::read_metadata(candidate) {
                Ok(pkg) => {
                    if best.is_none_or(|(_, code)| pkg.version_code > code) {
                        best = Some((i, pkg.version_code));
                    }
                }
                Err(e) => {
                    warn!("Skipping unreadable candidate {}: {}", candidate.display(), e);
                }
            }
        }
        best.map(|(i, _)| i)
            .ok_or_else(|| Error::NotFound(format!("no readable candidate archive for {name}")))
    }
}

/// Recursive, constraint-checked dependency resolver
pub struct DependencyResolver<'a> {
    db: &'a Database,
    client: &'a mut RepositoryClient,
    selector: &'a dyn CandidateSelector,
    repo_dir: PathBuf,
    cache_dir: PathBuf,
    visited: HashSet<String>,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(
        db: &'a Database,
        config: &Config,
        client: &'a mut RepositoryClient,
        selector: &'a dyn CandidateSelector,
    ) -> Result<Self> {
        fs::create_dir_all(&config.repo_dir)?;
        fs::create_dir_all(&config.cache_dir)?;
        Ok(Self {
            db,
            client,
            selector,
            repo_dir: config.repo_dir.clone(),
            cache_dir: config.cache_dir.clone(),
            visited: HashSet::new(),
        })
    }

    /// Forget visited `name:constraint` keys from previous resolutions
    pub fn clear_visited(&mut self) {
        self.visited.clear();
    }

    /// Resolve `name` under `requirement` into an ordered install list
    ///
    /// Dependencies come before their dependents; packages already installed
    /// at a satisfying version are omitted, as is any `name:constraint` pair
    /// already visited in this session (a shared dependency reached through
    /// multiple paths is not an error).
    pub fn resolve(&mut self, name: &str, requirement: &str) -> Result<Vec<ResolvedPackage>> {
        self.resolve_at(name, requirement, 0)
    }

    fn resolve_at(
        &mut self,
        name: &str,
        requirement: &str,
        depth: usize,
    ) -> Result<Vec<ResolvedPackage>> {
        if depth >= MAX_RESOLVE_DEPTH {
            return Err(Error::DependencyUnsatisfied(format!(
                "resolution depth limit exceeded at {name} (dependency cycle?)"
            )));
        }

        let key = format!("{name}:{requirement}");
        if !self.visited.insert(key) {
            return Ok(Vec::new());
        }

        if let Some(installed) = self.db.get(name)? {
            if version::satisfies(installed.version_code, requirement) {
                debug!("{name} already installed at code {}", installed.version_code);
                return Ok(Vec::new());
            }
        }

        let archive_path = self.locate_archive(name, requirement)?;
        let package = archive::read_metadata(&archive_path)?;

        // The archive's own metadata is authoritative, not the index entry
        if !version::satisfies(package.version_code, requirement) {
            return Err(Error::VersionMismatch {
                name: name.to_string(),
                requirement: requirement.to_string(),
                found: package.version_code,
            });
        }

        debug!(
            "Resolved {name} to {} from {}",
            package, archive_path.display()
        );

        let mut resolved = Vec::new();
        for (dep, dep_requirement) in package.dependencies.clone() {
            resolved.extend(self.resolve_at(&dep, &dep_requirement, depth + 1)?);
        }
        resolved.push(ResolvedPackage {
            package,
            archive_path,
        });
        Ok(resolved)
    }

    /// Find the archive providing `name`: local archives first, then the
    /// remote indexes, downloading into the cache
    fn locate_archive(&mut self, name: &str, requirement: &str) -> Result<PathBuf> {
        let (all_local, mut satisfying) = self.find_local_candidates(name, requirement)?;

        if !satisfying.is_empty() {
            if satisfying.len() == 1 {
                return Ok(satisfying.remove(0));
            }
            let index = self.selector.select(name, &satisfying)?;
            return satisfying
                .get(index)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("candidate index {index} out of range")));
        }

        self.client.ensure_indexes();
        if let Some((repo, meta)) = self.client.find_package(name, requirement).into_iter().next()
        {
            info!(
                "Selected {} (code {}) from repository {}",
                name, meta.version_code, repo
            );
            return self.client.download(&repo, &meta, &self.cache_dir);
        }

        // Nothing satisfies; report the best available code if the name
        // exists at all, otherwise a plain not-found
        let mut best: Option<i64> = None;
        for candidate in &all_local {
            if let Ok(pkg) = archive::read_metadata(candidate) {
                best = Some(best.map_or(pkg.version_code, |b| b.max(pkg.version_code)));
            }
        }
        if let Some((_, meta)) = self.client.find_package(name, "*").into_iter().next() {
            best = Some(best.map_or(meta.version_code, |b| b.max(meta.version_code)));
        }

        match best {
            Some(found) => Err(Error::VersionMismatch {
                name: name.to_string(),
                requirement: requirement.to_string(),
                found,
            }),
            None => Err(Error::NotFound(format!(
                "package {name} not found in local repository or any remote index"
            ))),
        }
    }

    /// Local `.spm` archives whose filename contains `name`, and the subset
    /// satisfying `requirement`
    fn find_local_candidates(
        &self,
        name: &str,
        requirement: &str,
    ) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let mut all = Vec::new();
        if self.repo_dir.exists() {
            let mut entries = fs::read_dir(&self.repo_dir)?.collect::<std::io::Result<Vec<_>>>()?;
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let file_name = entry.file_name().to_string_lossy().into_owned();
                if file_name.ends_with(&format!(".{}", archive::ARCHIVE_EXT))
                    && file_name.contains(name)
                {
                    all.push(entry.path());
                }
            }
        }

        let satisfying = if VersionConstraint::parse(requirement) == Some(VersionConstraint::Any) {
            all.clone()
        } else {
            let mut kept = Vec::new();
            for candidate in &all {
                match archive::read_metadata(candidate) {
                    Ok(pkg) if version::satisfies(pkg.version_code, requirement) => {
                        kept.push(candidate.clone());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            "Skipping invalid package {}: {}",
                            candidate.display(),
                            e
                        );
                    }
                }
            }
            kept
        };

        Ok((all, satisfying))
    }
}

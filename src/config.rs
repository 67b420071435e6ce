// src/config.rs

//! Runtime configuration
//!
//! All paths and limits live in an explicit [`Config`] value passed to each
//! component's constructor; there are no process-wide singletons.

use std::path::{Path, PathBuf};

/// Default number of snapshots retained after a successful transaction
pub const DEFAULT_MAX_SNAPSHOTS: usize = 10;

/// Paths and limits for a managed filesystem root
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the managed filesystem tree
    pub root: PathBuf,
    /// Package record store directory (one JSON record per package)
    pub db_dir: PathBuf,
    /// Snapshot directory (one timestamped subdirectory per snapshot)
    pub snapshots_dir: PathBuf,
    /// Cache directory for downloaded archives
    pub cache_dir: PathBuf,
    /// Local directory searched for package archives
    pub repo_dir: PathBuf,
    /// Repository configuration file (name -> base URL map)
    pub repo_config: PathBuf,
    /// Scratch directory used by the package builder
    pub build_dir: PathBuf,
    /// Snapshot retention bound
    pub max_snapshots: usize,
    /// Prefixes that are never deleted or restored into
    pub protected_paths: Vec<PathBuf>,
}

impl Config {
    /// Derive the standard layout under a managed root
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            db_dir: root.join("var/lib/spm/db"),
            snapshots_dir: root.join("var/lib/spm/snaps"),
            cache_dir: root.join("var/cache/spm/pkg"),
            repo_dir: root.join("repo"),
            repo_config: root.join("etc/spm/repos.json"),
            build_dir: root.join("spm_build"),
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            protected_paths: ["dev", "proc", "sys", "run"]
                .iter()
                .map(|p| root.join(p))
                .collect(),
            root,
        }
    }

    /// Whether a path falls under a protected prefix
    pub fn is_protected(&self, path: &Path) -> bool {
        self.protected_paths.iter().any(|p| path.starts_with(p))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::for_root(".")
    }
}

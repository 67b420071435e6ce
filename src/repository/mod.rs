// src/repository/mod.rs

//! Repository index client
//!
//! This module provides functionality for:
//! - Loading the repository configuration (name -> base URL map)
//! - Fetching per-repository `index.json` files, concurrently across repos
//! - Answering "which repositories carry package X satisfying constraint C"
//! - Downloading archives into the local cache with retry and checksum
//!   verification
//!
//! Indexes live in memory for the lifetime of a resolution session and are
//! never persisted. A fetch failure for one repository only excludes that
//! repository from the session; the others are unaffected.

use crate::error::{Error, Result};
use crate::{hash, version};
use rayon::prelude::*;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed requests
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// One entry in a repository's `index.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePackage {
    /// Display version string, informational
    #[serde(default)]
    pub version: Option<String>,

    /// Integer ordering key; the only field compared against constraints
    #[serde(rename = "versionCode", default)]
    pub version_code: i64,

    /// Archive file name relative to the repository base URL
    #[serde(default)]
    pub filename: Option<String>,

    /// Full download URL, overriding `filename` when present
    #[serde(default)]
    pub url: Option<String>,

    /// Archive size in bytes, informational
    #[serde(default)]
    pub size: u64,

    /// Archive digest verified after download, when the index carries one
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Per-repository package index, rebuilt fully on each fetch
pub type RepositoryIndex = HashMap<String, RemotePackage>;

/// HTTP client over a configured set of repositories
pub struct RepositoryClient {
    client: Client,
    repos: BTreeMap<String, String>,
    indexes: HashMap<String, RepositoryIndex>,
    fetched: bool,
    max_retries: u32,
}

impl RepositoryClient {
    /// Create a client from a `repos.json` configuration file
    ///
    /// A missing configuration file yields a client with no repositories;
    /// resolution then falls back to local archives only.
    pub fn from_config(config_path: &Path) -> Result<Self> {
        let repos: BTreeMap<String, String> = if config_path.exists() {
            serde_json::from_str(&fs::read_to_string(config_path)?)?
        } else {
            warn!(
                "Repository config not found: {}; remote lookups disabled",
                config_path.display()
            );
            BTreeMap::new()
        };

        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::TransportFailure(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            repos,
            indexes: HashMap::new(),
            fetched: false,
            max_retries: MAX_RETRIES,
        })
    }

    /// Build a client with preloaded indexes, bypassing the network
    #[cfg(test)]
    pub(crate) fn with_indexes(
        repos: BTreeMap<String, String>,
        indexes: HashMap<String, RepositoryIndex>,
    ) -> Self {
        Self {
            client: Client::new(),
            repos,
            indexes,
            fetched: true,
            max_retries: 1,
        }
    }

    /// Configured repository name -> base URL map
    pub fn repos(&self) -> &BTreeMap<String, String> {
        &self.repos
    }

    /// Fetch indexes once per session
    pub fn ensure_indexes(&mut self) {
        if !self.fetched {
            self.refresh_indexes();
        }
    }

    /// Fetch `index.json` from every configured repository
    ///
    /// Fetches run concurrently across repositories; a failure excludes only
    /// the failing repository. Returns the number of repositories whose index
    /// loaded.
    pub fn refresh_indexes(&mut self) -> usize {
        let fetched: Vec<(String, Result<RepositoryIndex>)> = self
            .repos
            .par_iter()
            .map(|(name, base_url)| (name.clone(), self.fetch_index(base_url)))
            .collect();

        self.indexes.clear();
        for (name, outcome) in fetched {
            match outcome {
                Ok(index) => {
                    info!("Loaded index for repository {} ({} packages)", name, index.len());
                    self.indexes.insert(name, index);
                }
                Err(e) => {
                    warn!("Failed to fetch index from {}: {}", name, e);
                }
            }
        }
        self.fetched = true;
        self.indexes.len()
    }

    /// All (repository, metadata) pairs for `name` satisfying `requirement`,
    /// sorted descending by version code
    pub fn find_package(&self, name: &str, requirement: &str) -> Vec<(String, RemotePackage)> {
        let mut candidates: Vec<(String, RemotePackage)> = self
            .indexes
            .iter()
            .filter_map(|(repo, index)| index.get(name).map(|meta| (repo.clone(), meta.clone())))
            .filter(|(_, meta)| version::satisfies(meta.version_code, requirement))
            .collect();

        candidates.sort_by(|a, b| b.1.version_code.cmp(&a.1.version_code));
        candidates
    }

    /// Download an archive into `dest_dir`, reusing a cached copy if present
    pub fn download(
        &self,
        repo: &str,
        meta: &RemotePackage,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let base_url = self
            .repos
            .get(repo)
            .ok_or_else(|| Error::NotFound(format!("repository {repo}")))?;

        let (url, filename) = match (&meta.url, &meta.filename) {
            (Some(url), _) => {
                let name = url.rsplit('/').next().unwrap_or("package.spm");
                (url.clone(), name.to_string())
            }
            (None, Some(filename)) => (
                format!("{}/{}", base_url.trim_end_matches('/'), filename),
                filename.clone(),
            ),
            (None, None) => {
                return Err(Error::TransportFailure(
                    "index entry carries neither filename nor url".to_string(),
                ));
            }
        };

        fs::create_dir_all(dest_dir)?;
        let dest_path = dest_dir.join(&filename);
        if dest_path.exists() {
            debug!("Using cached archive {}", dest_path.display());
            return Ok(dest_path);
        }

        self.download_file(&url, &dest_path)?;

        if let Some(expected) = &meta.sha256 {
            let actual = hash::sha256_file(&dest_path)?;
            if &actual != expected {
                fs::remove_file(&dest_path).ok();
                return Err(Error::IntegrityFailure(format!(
                    "checksum mismatch for {filename}: expected {expected}, got {actual}"
                )));
            }
            debug!("Checksum verified for {filename}");
        }

        Ok(dest_path)
    }

    /// Fetch and parse one repository's index with retry support
    fn fetch_index(&self, base_url: &str) -> Result<RepositoryIndex> {
        let index_url = if base_url.ends_with('/') {
            format!("{base_url}index.json")
        } else {
            format!("{base_url}/index.json")
        };

        info!("Fetching repository index from {}", index_url);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(&index_url).send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::TransportFailure(format!(
                            "HTTP {} from {}",
                            response.status(),
                            index_url
                        )));
                    }

                    return response.json::<RepositoryIndex>().map_err(|e| {
                        Error::TransportFailure(format!("failed to parse index JSON: {e}"))
                    });
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::TransportFailure(format!(
                            "failed to fetch index after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Index fetch attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }

    /// Download a file to the specified path with retry support
    fn download_file(&self, url: &str, dest_path: &Path) -> Result<()> {
        info!("Downloading {} to {}", url, dest_path.display());

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(mut response) => {
                    if !response.status().is_success() {
                        return Err(Error::TransportFailure(format!(
                            "HTTP {} from {}",
                            response.status(),
                            url
                        )));
                    }

                    // Write to a temporary file first, then rename atomically
                    let temp_path = dest_path.with_extension("tmp");
                    let mut file = File::create(&temp_path)?;
                    io::copy(&mut response, &mut file).map_err(|e| {
                        Error::TransportFailure(format!("failed to write downloaded data: {e}"))
                    })?;
                    fs::rename(&temp_path, dest_path)?;

                    info!("Successfully downloaded to {}", dest_path.display());
                    return Ok(());
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::TransportFailure(format!(
                            "failed to download after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(code: i64, filename: &str) -> RemotePackage {
        RemotePackage {
            version: None,
            version_code: code,
            filename: Some(filename.to_string()),
            url: None,
            size: 0,
            sha256: None,
        }
    }

    fn client_with(entries: &[(&str, &str, i64)]) -> RepositoryClient {
        // entries: (repo, package, versionCode)
        let mut repos = BTreeMap::new();
        let mut indexes: HashMap<String, RepositoryIndex> = HashMap::new();
        for (repo, pkg, code) in entries {
            repos.insert(repo.to_string(), format!("http://{repo}.invalid"));
            indexes
                .entry(repo.to_string())
                .or_default()
                .insert(pkg.to_string(), remote(*code, &format!("{pkg}-{code}.spm")));
        }
        RepositoryClient::with_indexes(repos, indexes)
    }

    #[test]
    fn test_find_package_sorts_newest_first() {
        let client = client_with(&[
            ("alpha", "web-server", 3),
            ("beta", "web-server", 7),
            ("gamma", "web-server", 5),
        ]);

        let found = client.find_package("web-server", "*");
        let codes: Vec<i64> = found.iter().map(|(_, m)| m.version_code).collect();
        assert_eq!(codes, vec![7, 5, 3]);
    }

    #[test]
    fn test_find_package_filters_by_constraint() {
        let client = client_with(&[("alpha", "web-server", 3), ("beta", "web-server", 7)]);

        let found = client.find_package("web-server", ">=5");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "beta");
        assert_eq!(found[0].1.version_code, 7);

        assert!(client.find_package("web-server", ">=9").is_empty());
        assert!(client.find_package("missing", "*").is_empty());
    }

    #[test]
    fn test_index_entry_tolerates_minimal_fields() {
        let json = r#"{"tool": {"versionCode": 4, "filename": "tool-1.0.spm"}}"#;
        let index: RepositoryIndex = serde_json::from_str(json).unwrap();
        let entry = &index["tool"];
        assert_eq!(entry.version_code, 4);
        assert_eq!(entry.filename.as_deref(), Some("tool-1.0.spm"));
        assert!(entry.url.is_none());
        assert!(entry.sha256.is_none());
    }

    #[test]
    fn test_index_entry_full_form() {
        let json = r#"{
            "tool": {
                "version": "1.0",
                "versionCode": 4,
                "filename": "tool-1.0.spm",
                "size": 2048,
                "sha256": "deadbeef"
            }
        }"#;
        let index: RepositoryIndex = serde_json::from_str(json).unwrap();
        assert_eq!(index["tool"].size, 2048);
        assert_eq!(index["tool"].sha256.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn test_download_uses_cached_archive() {
        let client = client_with(&[("alpha", "tool", 4)]);
        let cache = tempfile::tempdir().unwrap();
        fs::write(cache.path().join("tool-4.spm"), b"cached").unwrap();

        let meta = remote(4, "tool-4.spm");
        let path = client.download("alpha", &meta, cache.path()).unwrap();
        assert_eq!(path, cache.path().join("tool-4.spm"));
        assert_eq!(fs::read(&path).unwrap(), b"cached");
    }

    #[test]
    fn test_download_unknown_repository() {
        let client = client_with(&[("alpha", "tool", 4)]);
        let cache = tempfile::tempdir().unwrap();
        let meta = remote(4, "tool-4.spm");

        assert!(matches!(
            client.download("missing", &meta, cache.path()),
            Err(Error::NotFound(_))
        ));
    }
}

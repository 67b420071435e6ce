// src/filesystem.rs

//! Filesystem helpers shared by the codec, snapshots, and the orchestrator

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Enumerate every regular file under `root`, returning root-relative paths
///
/// Entries are sorted per directory so enumeration order is deterministic.
pub fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    fn walk(abs: &Path, rel: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        let mut entries = fs::read_dir(abs)?.collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let child_rel = rel.join(entry.file_name());
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                walk(&entry.path(), &child_rel, out)?;
            } else if file_type.is_file() {
                out.push(child_rel);
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    if root.exists() {
        walk(root, Path::new(""), &mut out)?;
    }
    Ok(out)
}

/// Recursively copy a directory tree, creating destination directories
pub fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Delete a directory tree; a missing path is not an error
pub fn remove_tree(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    Ok(())
}

/// Delete now-empty parent directories from `start` up to (but excluding)
/// `root`, stopping at the first non-empty directory or protected prefix
pub fn cleanup_empty_parents(start: &Path, root: &Path, protected: &[PathBuf]) {
    let mut current = start.to_path_buf();

    while current != *root && current.starts_with(root) {
        if protected.iter().any(|p| current.starts_with(p)) {
            break;
        }
        // remove_dir refuses non-empty directories, which ends the walk
        if fs::remove_dir(&current).is_err() {
            break;
        }
        debug!("Removed empty directory {}", current.display());
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_files_is_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        fs::write(dir.path().join("b/nested/deep.txt"), "x").unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        fs::write(dir.path().join("b/z.txt"), "x").unwrap();

        let files = collect_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("b/nested/deep.txt"),
                PathBuf::from("b/z.txt"),
            ]
        );
    }

    #[test]
    fn test_collect_files_missing_root() {
        let files = collect_files(Path::new("/nonexistent/tree")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_copy_tree_round_trip() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("sub")).unwrap();
        fs::write(src.path().join("top.txt"), "top").unwrap();
        fs::write(src.path().join("sub/inner.txt"), "inner").unwrap();

        let dest = tempfile::tempdir().unwrap();
        let target = dest.path().join("copy");
        copy_tree(src.path(), &target).unwrap();

        assert_eq!(fs::read_to_string(target.join("top.txt")).unwrap(), "top");
        assert_eq!(
            fs::read_to_string(target.join("sub/inner.txt")).unwrap(),
            "inner"
        );
    }

    #[test]
    fn test_remove_tree_tolerates_missing() {
        assert!(remove_tree(Path::new("/nonexistent/tree")).is_ok());
    }

    #[test]
    fn test_cleanup_empty_parents_stops_at_non_empty() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("usr/share/doc/pkg")).unwrap();
        fs::write(root.path().join("usr/keep.txt"), "x").unwrap();

        cleanup_empty_parents(&root.path().join("usr/share/doc/pkg"), root.path(), &[]);

        assert!(!root.path().join("usr/share").exists());
        assert!(root.path().join("usr").exists());
        assert!(root.path().join("usr/keep.txt").exists());
    }

    #[test]
    fn test_cleanup_empty_parents_respects_protected() {
        let root = tempfile::tempdir().unwrap();
        let protected = root.path().join("run");
        fs::create_dir_all(protected.join("lock")).unwrap();

        cleanup_empty_parents(&protected.join("lock"), root.path(), &[protected.clone()]);

        assert!(protected.join("lock").exists());
    }
}

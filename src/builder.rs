// src/builder.rs

//! Package builder
//!
//! The inverse of the install pipeline: copies a source tree into a clean
//! scratch build area, enumerates the payload, embeds the file list and
//! aggregate size into the metadata record, writes the integrity manifest,
//! and hands the prepared tree to the archive codec.

use crate::archive;
use crate::config::Config;
use crate::db::models::Package;
use crate::error::{Error, Result};
use crate::filesystem;
use crate::manager::format_size;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Builds signed package archives from source trees
pub struct PackageBuilder<'a> {
    config: &'a Config,
}

impl<'a> PackageBuilder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Produce `<name>-<version>.spm` in `output_dir` from `source`
    pub fn build(&self, source: &Path, output_dir: &Path, mut meta: Package) -> Result<PathBuf> {
        meta.validate()?;

        if !source.exists() {
            return Err(Error::NotFound(format!(
                "source directory {}",
                source.display()
            )));
        }

        let build_dir = &self.config.build_dir;
        filesystem::remove_tree(build_dir)?;
        fs::create_dir_all(build_dir)?;

        self.copy_source(source, build_dir)?;

        // Enumerate the payload before metadata and manifest are written, so
        // neither appears in the file list or manifest
        let files = filesystem::collect_files(build_dir)?;
        let file_names: Vec<String> = files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        let mut total_bytes = 0u64;
        for rel in &files {
            total_bytes += fs::metadata(build_dir.join(rel))?.len();
        }

        meta.files = file_names.clone();
        meta.size = total_bytes / 1024;

        fs::write(
            build_dir.join(archive::METADATA_PATH),
            serde_json::to_string_pretty(&meta)?,
        )?;
        archive::write_manifest(
            build_dir,
            &file_names,
            &build_dir.join(archive::MANIFEST_PATH),
        )?;

        fs::create_dir_all(output_dir)?;
        let dest = output_dir.join(meta.archive_file_name());
        archive::write_archive(build_dir, &dest)?;

        info!("Built package {} at {}", meta, dest.display());
        println!("\nPackage created: {}", dest.display());
        println!("  Files: {}", file_names.len());
        println!("  Size: {}", format_size(meta.size));

        filesystem::remove_tree(build_dir)?;
        Ok(dest)
    }

    /// Copy the source tree, excluding version control and build artifacts
    fn copy_source(&self, source: &Path, dest: &Path) -> Result<()> {
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            let name = entry.file_name();
            if should_ignore(&name.to_string_lossy()) {
                debug!("Ignoring {}", name.to_string_lossy());
                continue;
            }
            let target = dest.join(&name);
            if entry.file_type()?.is_dir() {
                self.copy_source(&entry.path(), &target)?;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &target)?;
            }
        }
        Ok(())
    }
}

fn should_ignore(name: &str) -> bool {
    name == ".git" || name == "build" || name == ".gitignore"
}

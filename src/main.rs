// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use spm::builder::PackageBuilder;
use spm::config::Config;
use spm::db::models::Package;
use spm::manager::{PackageManager, Prompter};
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::info;

#[derive(Parser)]
#[command(name = "spm")]
#[command(author, version, about = "Transactional package manager with snapshot rollback", long_about = None)]
struct Cli {
    /// Managed filesystem root
    #[arg(short, long, default_value = ".", global = true)]
    root: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages and their dependencies
    Install {
        /// Package names to install
        #[arg(required = true)]
        names: Vec<String>,
        /// Skip conflict checks and confirmation
        #[arg(long)]
        force: bool,
    },
    /// Remove installed packages
    Remove {
        /// Package names to remove
        #[arg(required = true)]
        names: Vec<String>,
        /// Ignore reverse dependencies and skip confirmation
        #[arg(long)]
        force: bool,
    },
    /// Build a package archive from a source tree
    Build {
        /// Source directory
        source: String,
        /// Package name
        #[arg(long)]
        name: String,
        /// Display version string
        #[arg(long)]
        version: String,
        /// Integer version ordering key
        #[arg(long = "versionCode")]
        version_code: i64,
        /// Dependency as name=constraint (repeatable)
        #[arg(long = "dep")]
        deps: Vec<String>,
        /// Conflicting package name (repeatable)
        #[arg(long = "conflict")]
        conflicts: Vec<String>,
        /// Output directory for the archive
        #[arg(long, default_value = ".")]
        output: String,
    },
    /// List installed packages
    List,
    /// Destroy all snapshots
    Clear,
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Reads confirmations from stdin; empty input means yes
struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&mut self, question: &str) -> bool {
        print!("\n{question} [Y/n] ");
        io::stdout().flush().ok();

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        let resp = line.trim().to_lowercase();
        resp.is_empty() || resp == "y" || resp == "yes"
    }
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::for_root(&cli.root);

    match cli.command {
        Some(Commands::Install { names, force }) => {
            info!("Installing packages: {}", names.join(", "));
            let mut pm = PackageManager::new(&config, Box::new(StdinPrompter))?;
            pm.recover()?;
            pm.install(&names, force)?;
            Ok(())
        }
        Some(Commands::Remove { names, force }) => {
            info!("Removing packages: {}", names.join(", "));
            let mut pm = PackageManager::new(&config, Box::new(StdinPrompter))?;
            pm.recover()?;
            pm.remove(&names, force)?;
            Ok(())
        }
        Some(Commands::Build {
            source,
            name,
            version,
            version_code,
            deps,
            conflicts,
            output,
        }) => {
            let mut meta = Package::new(name, version, version_code);
            for dep in deps {
                let (dep_name, requirement) = match dep.split_once('=') {
                    Some((n, r)) => (n.to_string(), r.to_string()),
                    None => (dep, "*".to_string()),
                };
                meta.dependencies.insert(dep_name, requirement);
            }
            meta.conflicts = conflicts;

            let builder = PackageBuilder::new(&config);
            builder.build(Path::new(&source), Path::new(&output), meta)?;
            Ok(())
        }
        Some(Commands::List) => {
            let pm = PackageManager::new(&config, Box::new(StdinPrompter))?;
            let packages = pm.installed_packages()?;

            if packages.is_empty() {
                println!("No packages installed.");
            } else {
                println!("Installed packages:");
                for pkg in &packages {
                    println!("  {} {}", pkg.name, pkg.version);
                }
                println!("\nTotal: {} package(s)", packages.len());
            }
            Ok(())
        }
        Some(Commands::Clear) => {
            print!("Are you sure you want to delete all snapshots? [y/N] ");
            io::stdout().flush().ok();

            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            let resp = line.trim().to_lowercase();

            if resp == "y" || resp == "yes" {
                let pm = PackageManager::new(&config, Box::new(StdinPrompter))?;
                pm.clear_snapshots()?;
                println!("All snapshots cleared.");
            } else {
                println!("Operation cancelled.");
            }
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "spm", &mut io::stdout());
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("SPM Package Manager v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'spm --help' for usage information");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_install_with_force() {
        let cli = Cli::parse_from(["spm", "install", "web-server", "tool", "--force"]);
        match cli.command {
            Some(Commands::Install { names, force }) => {
                assert_eq!(names, vec!["web-server", "tool"]);
                assert!(force);
            }
            _ => panic!("expected install command"),
        }
    }

    #[test]
    fn test_cli_parses_build_arguments() {
        let cli = Cli::parse_from([
            "spm",
            "build",
            "./src-tree",
            "--name",
            "tool",
            "--version",
            "1.2",
            "--versionCode",
            "3",
            "--dep",
            "libcore=>=2",
            "--dep",
            "libextra",
            "--conflict",
            "oldtool",
            "--output",
            "./out",
        ]);
        match cli.command {
            Some(Commands::Build {
                source,
                name,
                version,
                version_code,
                deps,
                conflicts,
                output,
            }) => {
                assert_eq!(source, "./src-tree");
                assert_eq!(name, "tool");
                assert_eq!(version, "1.2");
                assert_eq!(version_code, 3);
                assert_eq!(deps, vec!["libcore=>=2", "libextra"]);
                assert_eq!(conflicts, vec!["oldtool"]);
                assert_eq!(output, "./out");
            }
            _ => panic!("expected build command"),
        }
    }

    #[test]
    fn test_cli_global_root_flag() {
        let cli = Cli::parse_from(["spm", "--root", "/srv/target", "list"]);
        assert_eq!(cli.root, "/srv/target");
        assert!(matches!(cli.command, Some(Commands::List)));
    }

    #[test]
    fn test_dep_argument_splits_on_first_equals() {
        // name=constraint where the constraint itself contains '='
        let (name, requirement) = match "libcore=>=2".split_once('=') {
            Some((n, r)) => (n, r),
            None => panic!(),
        };
        assert_eq!(name, "libcore");
        assert_eq!(requirement, ">=2");
    }
}

// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("spm")
        .version(env!("CARGO_PKG_VERSION"))
        .author("SPM Contributors")
        .about("Transactional package manager with snapshot rollback")
        .subcommand_required(false)
        .arg(
            Arg::new("root")
                .short('r')
                .long("root")
                .default_value(".")
                .global(true)
                .help("Managed filesystem root"),
        )
        .subcommand(
            Command::new("install")
                .about("Install packages and their dependencies")
                .arg(
                    Arg::new("names")
                        .required(true)
                        .num_args(1..)
                        .help("Package names to install"),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(clap::ArgAction::SetTrue)
                        .help("Skip conflict checks and confirmation"),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove installed packages")
                .arg(
                    Arg::new("names")
                        .required(true)
                        .num_args(1..)
                        .help("Package names to remove"),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(clap::ArgAction::SetTrue)
                        .help("Ignore reverse dependencies and skip confirmation"),
                ),
        )
        .subcommand(
            Command::new("build")
                .about("Build a package archive from a source tree")
                .arg(Arg::new("source").required(true).help("Source directory"))
                .arg(Arg::new("name").long("name").required(true).help("Package name"))
                .arg(
                    Arg::new("version")
                        .long("version")
                        .required(true)
                        .help("Display version string"),
                )
                .arg(
                    Arg::new("versionCode")
                        .long("versionCode")
                        .required(true)
                        .help("Integer version ordering key"),
                )
                .arg(
                    Arg::new("dep")
                        .long("dep")
                        .action(clap::ArgAction::Append)
                        .help("Dependency as name=constraint"),
                )
                .arg(
                    Arg::new("conflict")
                        .long("conflict")
                        .action(clap::ArgAction::Append)
                        .help("Conflicting package name"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .default_value(".")
                        .help("Output directory for the archive"),
                ),
        )
        .subcommand(Command::new("list").about("List installed packages"))
        .subcommand(Command::new("clear").about("Destroy all snapshots"))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("spm.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}

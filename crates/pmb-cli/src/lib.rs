//! `pmbootstrap`: the command-line frontend over `pmb_core`.
//!
//! This crate owns argument parsing, the terminal [`reporter::TerminalReporter`]
//! implementation, and one `cmd` module per verb. Everything that touches a
//! chroot, a mount, or a recipe lives in `pmb_core`; this crate's job is to
//! turn a parsed [`Commands`] into calls against that engine and render the
//! result.

use clap::{Parser, Subcommand};
use pmb_schema::Arch;
use std::path::PathBuf;

pub mod cmd;
pub mod context;
pub mod reporter;

pub use reporter::TerminalReporter;

/// Cross-building toolkit for postmarketOS.
#[derive(Debug, Parser)]
#[command(name = "pmbootstrap", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Suppress informational output; only errors are printed.
    #[arg(long, short, global = true)]
    pub quiet: bool,

    /// Override the work directory for this invocation.
    #[arg(long, global = true, env = "PMB_WORK")]
    pub work: Option<PathBuf>,
}

/// One subcommand per verb this binary understands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Interactive config wizard; creates the work directory and config file.
    Init,

    /// Resolve and build one or more packages, plus their closure.
    Build {
        /// Package names to build.
        #[arg(required = true)]
        packages: Vec<String>,

        /// Target architecture; defaults to the configured device's arch.
        #[arg(long)]
        arch: Option<Arch>,

        /// Build from a local source tree instead of fetching `source=` entries.
        #[arg(long)]
        src: Option<PathBuf>,

        /// Rebuild even if an up-to-date binary package already exists.
        #[arg(long)]
        force: bool,

        /// Fail on any recipe the constrained evaluator cannot parse,
        /// rather than falling back to chroot evaluation.
        #[arg(long)]
        strict: bool,

        /// Skip dependency resolution; build only the named packages.
        #[arg(long = "no-depends")]
        no_depends: bool,
    },

    /// Enter a chroot and run a command inside it.
    Chroot {
        /// Target architecture's buildroot chroot; defaults to native.
        #[arg(short = 'b', long)]
        arch: Option<Arch>,

        /// Run as the unprivileged `pmos` build user instead of root.
        #[arg(long)]
        user: bool,

        /// The command and its arguments to run inside the chroot.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },

    /// Destroy chroots, optionally purging caches, packages, or obsolete chroots.
    Zap {
        /// Also purge the built-package repository.
        #[arg(short = 'p', long)]
        packages: bool,

        /// Also purge the apk/git mirror caches.
        #[arg(short = 'm', long)]
        mirror: bool,

        /// Only zap chroots not matching the currently configured device/arch.
        #[arg(short = 'o', long)]
        obsolete: bool,
    },

    /// Regenerate local repository indexes (`APKINDEX.tar.gz`).
    Index,

    /// List aports with no matching binary package in the local repository.
    RepoMissing {
        /// Restrict the check to one architecture; defaults to all known.
        #[arg(long)]
        arch: Option<Arch>,
    },

    /// Bump `pkgrel` for aports whose built binary is outdated.
    PkgrelBump {
        /// Automatically bump every aport whose dependency closure changed,
        /// iterating until no further bump is required.
        #[arg(long)]
        auto: bool,

        /// Report what would change without writing any `APKBUILD`.
        #[arg(long)]
        dry: bool,
    },

    /// Release all mounts and the work-dir lock held by a stuck invocation.
    Shutdown,

    /// Apply any pending work-directory migrations.
    WorkMigrate,

    /// Print a summary of work-dir, configuration, and chroot health.
    Status,

    /// Generate shell completion scripts.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

//! The crate-wide error taxonomy.
//!
//! Every fallible operation in `pmb_core` and `pmb_cli` returns
//! `Result<_, PmbError>`. Each variant carries the machine-checkable fields a
//! caller needs to react (a chain, a path, a pid) plus enough text for the
//! single-line summary `pmb-cli` prints on failure.

use std::path::PathBuf;
use thiserror::Error;

/// The crate-wide error type.
#[derive(Error, Debug)]
pub enum PmbError {
    // -- Input --
    /// The CLI was invoked with invalid arguments.
    #[error("usage error: {0}")]
    UsageError(String),

    /// The requested aport does not exist.
    #[error("no such aport: {0}")]
    NoSuchAport(String),

    /// The requested architecture is not supported.
    #[error("unsupported architecture: {0}")]
    UnsupportedArch(String),

    /// The configuration file or value is invalid.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    // -- Resolution --
    /// Dependency resolution found a conflict.
    #[error("dependency conflict: {}", chain.join(" -> "))]
    DependencyConflict {
        /// The chain of packages leading to the conflict.
        chain: Vec<String>,
    },

    /// Dependency resolution found a makedepends cycle requiring bootstrap.
    #[error("bootstrap required, cyclic makedepends: {}", cycle.join(" -> "))]
    BootstrapRequired {
        /// The cyclic chain of package names.
        cycle: Vec<String>,
    },

    /// No package provides the required name.
    #[error("no provider found for {0}")]
    MissingProvider(String),

    // -- Environment --
    /// The work directory is locked by another process.
    #[error("work dir is locked by pid {0}")]
    WorkdirLocked(u32),

    /// The work directory format is newer than this tool understands.
    #[error("work dir version {0} is newer than this pmbootstrap understands")]
    WorkdirFromFuture(u32),

    /// None of the configured mirrors were reachable.
    #[error("no mirror available, tried: {}", urls.join(", "))]
    MirrorUnavailable {
        /// The mirror URLs that were tried.
        urls: Vec<String>,
    },

    /// Escalating privileges (e.g. via sudo) failed.
    #[error("privilege escalation failed: {0}")]
    PrivilegeEscalationFailed(String),

    // -- Execution --
    /// A spawned command exited with a non-zero status.
    #[error("command exited with status {status}: {}", argv.join(" "))]
    NonZeroExit {
        /// The process exit status.
        status: i32,
        /// The command and its arguments.
        argv: Vec<String>,
        /// The final lines of the command's stderr.
        stderr_tail: Vec<String>,
    },

    /// A spawned command exceeded its allotted time.
    #[error("command timed out after {elapsed_secs}s: {}", argv.join(" "))]
    Timeout {
        /// The command and its arguments.
        argv: Vec<String>,
        /// How long the command ran before being killed.
        elapsed_secs: u64,
    },

    /// A command could not be spawned.
    #[error("failed to spawn command: {0}")]
    SpawnFailed(String),

    /// A build step failed.
    #[error("build failed at step '{step}': {message}")]
    BuildFailed {
        /// The name of the build step that failed.
        step: String,
        /// The failure message.
        message: String,
    },

    /// A chroot left mounts behind after teardown.
    #[error("mount leak detected: {}", paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    MountLeak {
        /// The paths that remained mounted.
        paths: Vec<PathBuf>,
    },

    // -- Data --
    /// A downloaded file's checksum did not match the expected value.
    #[error("checksum mismatch for {file}: want {want}, got {got}")]
    ChecksumMismatch {
        /// The file whose checksum was checked.
        file: String,
        /// The expected checksum.
        want: String,
        /// The actual checksum.
        got: String,
    },

    /// A version string could not be parsed.
    #[error("malformed version: {0}")]
    VersionMalformed(String),

    /// The APKINDEX data was corrupt or unparsable.
    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    // -- Recipe parsing (expansion) --
    /// The recipe used a shell construct the constrained evaluator can't handle.
    #[error("recipe construct not supported by the constrained evaluator: {0}")]
    RecipeUnsupported(String),

    /// Repeatedly bumping pkgrel did not converge.
    #[error("pkgrel bump did not converge after {0} iterations")]
    PkgrelBumpNonConverging(u32),

    /// An underlying I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PmbError {
    /// The process exit code `pmb-cli` should use for this error.
    ///
    /// 130 (SIGINT) is produced directly by the CLI's signal handler and
    /// never routed through this method.
    pub fn exit_code(&self) -> i32 {
        match self {
            PmbError::UsageError(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_error_exit_code_is_two() {
        assert_eq!(PmbError::UsageError("bad flag".into()).exit_code(), 2);
    }

    #[test]
    fn other_errors_exit_code_is_one() {
        assert_eq!(PmbError::NoSuchAport("foo".into()).exit_code(), 1);
        assert_eq!(
            PmbError::BootstrapRequired {
                cycle: vec!["a".into(), "b".into()]
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn display_includes_chain() {
        let e = PmbError::DependencyConflict {
            chain: vec!["a".into(), "b".into(), "c".into()],
        };
        assert_eq!(e.to_string(), "dependency conflict: a -> b -> c");
    }
}

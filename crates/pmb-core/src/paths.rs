//! Filesystem path helpers for the pmbootstrap work directory layout.
//!
//! Every path here is either derived from a work-dir root (passed in by the
//! caller, never read from a global) or from the user's XDG config
//! directory for the one file that lives outside the work dir: the config
//! itself.

use pmb_schema::{Arch, ChrootId};
use std::path::{Path, PathBuf};

/// The persisted config file path: `${XDG_CONFIG_HOME}/pmbootstrap.cfg`,
/// falling back to `~/.config/pmbootstrap.cfg`.
pub fn config_path() -> PathBuf {
    if let Ok(val) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(val).join("pmbootstrap.cfg");
    }
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("pmbootstrap.cfg")
}

/// The default work directory, `~/.local/var/pmbootstrap`, used when the
/// config does not override `work=`.
pub fn default_work_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".local/var/pmbootstrap")
}

/// The root directory of one chroot, `<work>/<chroot_dir_name>`.
pub fn chroot_dir(work: &Path, id: ChrootId) -> PathBuf {
    work.join(id.dir_name())
}

/// The per-arch `apk` package cache, shared across every chroot of that
/// arch so packages are not re-downloaded per chroot.
pub fn cache_apk_dir(work: &Path, arch: Arch) -> PathBuf {
    work.join(format!("cache_apk_{arch}"))
}

/// A named git cache clone, e.g. `aports` or `pmaports`.
pub fn cache_git_dir(work: &Path, name: &str) -> PathBuf {
    work.join("cache_git").join(name)
}

/// The built-package repository for one arch, `<work>/packages/<arch>`.
pub fn packages_dir(work: &Path, arch: Arch) -> PathBuf {
    work.join("packages").join(arch.to_string())
}

/// The default aports checkout, `<work>/cache_git/pmaports`.
pub fn default_aports_dir(work: &Path) -> PathBuf {
    cache_git_dir(work, "pmaports")
}

/// Build log directory, `<work>/logs`.
pub fn log_dir(work: &Path) -> PathBuf {
    work.join("logs")
}

/// Generate a build log path for one package build attempt.
pub fn build_log_path(work: &Path, pkgname: &str, version: &str, timestamp: &str) -> PathBuf {
    log_dir(work).join(format!("build-{pkgname}-{version}-{timestamp}.log"))
}

/// Extract the filename from a URL, used when staging a fetched source file.
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chroot_dir_uses_dir_name() {
        let id = ChrootId {
            kind: pmb_schema::ChrootKind::Buildroot,
            arch: Arch::Armhf,
        };
        assert_eq!(chroot_dir(Path::new("/work"), id), Path::new("/work").join(id.dir_name()));
    }

    #[test]
    fn packages_dir_nests_by_arch() {
        assert_eq!(packages_dir(Path::new("/work"), Arch::X86_64), Path::new("/work/packages/x86_64"));
    }

    #[test]
    fn filename_from_url_takes_last_segment() {
        assert_eq!(filename_from_url("https://example.com/src/foo-1.0.tar.gz"), "foo-1.0.tar.gz");
    }
}

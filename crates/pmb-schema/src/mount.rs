//! Mount record and chroot identity value types.

use crate::arch::Arch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The kind of chroot tree, paired with an [`Arch`] to form a
/// [`ChrootId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChrootKind {
    /// The host-architecture chroot used to run aports tooling and native
    /// builds.
    Native,
    /// A foreign-arch chroot used to build packages for a target device.
    Buildroot,
    /// The rootfs staged for flashing onto a device.
    Rootfs,
    /// The rootfs used to build a bootable installer image.
    Installer,
}

/// A chroot identity: `(kind, arch)`. At most one chroot exists per
/// identity within a work directory; `Native` always pairs with the host's
/// architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChrootId {
    /// The kind of chroot tree.
    pub kind: ChrootKind,
    /// The architecture this chroot is for.
    pub arch: Arch,
}

impl ChrootId {
    /// The on-disk directory name this identity maps to under the work
    /// directory, e.g. `chroot_native` or `chroot_buildroot_armhf`.
    pub fn dir_name(&self) -> String {
        match self.kind {
            ChrootKind::Native => "chroot_native".to_string(),
            ChrootKind::Buildroot => format!("chroot_buildroot_{}", self.arch),
            ChrootKind::Rootfs => format!("chroot_rootfs_{}", self.arch),
            ChrootKind::Installer => format!("chroot_installer_{}", self.arch),
        }
    }
}

impl fmt::Display for ChrootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// The kind of kernel mount a [`MountRecord`] tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// A bind mount of a host path into the chroot.
    Bind,
    /// A tmpfs mount.
    Tmpfs,
    /// A `/proc` mount.
    Proc,
    /// A `/sys` mount.
    Sys,
    /// A `/dev` mount.
    Dev,
    /// A binfmt_misc mount, used for foreign-arch emulation.
    Binfmt,
}

/// One live mount belonging to a chroot. Records for a single chroot form
/// an ordered list; teardown releases them in reverse acquisition order.
#[derive(Debug, Clone)]
pub struct MountRecord {
    /// The chroot this mount belongs to.
    pub chroot: ChrootId,
    /// The mount's source path.
    pub source: PathBuf,
    /// The mount's target path inside the chroot.
    pub target: PathBuf,
    /// The kind of mount.
    pub kind: MountKind,
    /// Whether this process created the mount (as opposed to discovering
    /// it already present via `reconcile()`).
    pub created_by_this_invocation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_dir_name_has_no_arch_suffix() {
        let id = ChrootId {
            kind: ChrootKind::Native,
            arch: Arch::X86_64,
        };
        assert_eq!(id.dir_name(), "chroot_native");
    }

    #[test]
    fn buildroot_dir_name_includes_arch() {
        let id = ChrootId {
            kind: ChrootKind::Buildroot,
            arch: Arch::Armhf,
        };
        assert_eq!(id.dir_name(), "chroot_buildroot_armhf");
    }
}

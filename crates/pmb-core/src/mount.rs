//! The mount registry: single writer of mount state for the whole process.
//!
//! A [`MountRegistry`] is a `Mutex<HashMap<ChrootId, Vec<MountRecord>>>`.
//! Every mount acquired for a chroot is appended to that chroot's list;
//! teardown releases them in reverse order. `reconcile()` heals aborted
//! prior runs by unmounting anything under the work dir that the registry
//! does not know about.

use pmb_schema::{ChrootId, MountKind, MountRecord, PmbError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Process-wide map from chroot identity to its live, ordered mounts.
#[derive(Debug, Default)]
pub struct MountRegistry {
    state: Mutex<HashMap<ChrootId, Vec<MountRecord>>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and perform one mount for `chroot`.
    ///
    /// # Errors
    ///
    /// Returns [`PmbError::SpawnFailed`] if the underlying `mount(2)` call
    /// fails.
    pub async fn mount(
        &self,
        chroot: ChrootId,
        source: &Path,
        target: &Path,
        kind: MountKind,
    ) -> Result<(), PmbError> {
        perform_mount(source, target, kind)?;
        let record = MountRecord {
            chroot,
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            kind,
            created_by_this_invocation: true,
        };
        self.state.lock().await.entry(chroot).or_default().push(record);
        Ok(())
    }

    /// Release every mount recorded for `chroot`, in reverse acquisition
    /// order, then drop its entry from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`PmbError::MountLeak`] naming any targets that could not be
    /// unmounted; the registry still drops what it could release.
    pub async fn unmount_all(&self, chroot: ChrootId) -> Result<(), PmbError> {
        let mut state = self.state.lock().await;
        let Some(mut records) = state.remove(&chroot) else {
            return Ok(());
        };
        let mut failed = Vec::new();
        while let Some(record) = records.pop() {
            if perform_unmount(&record.target).is_err() {
                failed.push(record.target.clone());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(PmbError::MountLeak { paths: failed })
        }
    }

    /// Whether `chroot` currently has any live mounts recorded.
    pub async fn is_mounted(&self, chroot: &ChrootId) -> bool {
        self.state
            .lock()
            .await
            .get(chroot)
            .is_some_and(|mounts| !mounts.is_empty())
    }

    /// Fail fast if a command is about to run inside a chroot that has no
    /// live mounts, per the command runner's contract in spec §4.2.
    ///
    /// # Errors
    ///
    /// Returns [`PmbError::UsageError`] if `chroot` is not currently mounted.
    pub async fn require_live(&self, chroot: &ChrootId) -> Result<(), PmbError> {
        if self.is_mounted(chroot).await {
            Ok(())
        } else {
            Err(PmbError::UsageError(format!(
                "chroot {chroot} has no live mounts; enter it via the chroot manager first"
            )))
        }
    }

    /// Reconcile against a parsed `/proc/self/mountinfo`: unmount anything
    /// under `work_dir` that the registry does not itself track, healing a
    /// prior aborted run. Returns the list of paths it had to heal.
    ///
    /// # Errors
    ///
    /// Returns [`PmbError::MountLeak`] if any stray mount could not be
    /// released.
    pub async fn reconcile(&self, work_dir: &Path, live_mountpoints: &[PathBuf]) -> Result<Vec<PathBuf>, PmbError> {
        let known: Vec<PathBuf> = {
            let state = self.state.lock().await;
            state.values().flatten().map(|r| r.target.clone()).collect()
        };

        let mut healed = Vec::new();
        let mut failed = Vec::new();
        for mountpoint in live_mountpoints {
            if !mountpoint.starts_with(work_dir) || known.contains(mountpoint) {
                continue;
            }
            if perform_unmount(mountpoint).is_ok() {
                healed.push(mountpoint.clone());
            } else {
                failed.push(mountpoint.clone());
            }
        }

        if failed.is_empty() {
            Ok(healed)
        } else {
            Err(PmbError::MountLeak { paths: failed })
        }
    }
}

/// Parse `/proc/self/mountinfo` lines into their mount-point column (the
/// fifth whitespace-separated field), for feeding into [`MountRegistry::reconcile`].
pub fn parse_mountinfo(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(PathBuf::from)
        .collect()
}

#[allow(unsafe_code)]
fn perform_mount(source: &Path, target: &Path, kind: MountKind) -> Result<(), PmbError> {
    use nix::mount::MsFlags;

    let (fstype, flags, data): (Option<&str>, MsFlags, Option<&str>) = match kind {
        MountKind::Bind => (None, MsFlags::MS_BIND, None),
        MountKind::Tmpfs => (Some("tmpfs"), MsFlags::empty(), None),
        MountKind::Proc => (Some("proc"), MsFlags::empty(), None),
        MountKind::Sys => (Some("sysfs"), MsFlags::empty(), None),
        MountKind::Dev => (Some("devtmpfs"), MsFlags::empty(), None),
        MountKind::Binfmt => (Some("binfmt_misc"), MsFlags::empty(), None),
    };

    // SAFETY: `source`/`target` are caller-validated paths under the chroot
    // tree; this mirrors a plain `mount(8)` invocation with no untrusted
    // input reaching the kernel beyond path strings.
    nix::mount::mount(Some(source), target, fstype, flags, data)
        .map_err(|errno| PmbError::SpawnFailed(format!("mount({}): {errno}", target.display())))
}

#[allow(unsafe_code)]
fn perform_unmount(target: &Path) -> Result<(), PmbError> {
    // SAFETY: unmounting a path this process (or a prior aborted run of it)
    // itself mounted under the work dir.
    nix::mount::umount2(target, nix::mount::MntFlags::MNT_DETACH)
        .map_err(|errno| PmbError::SpawnFailed(format!("umount({}): {errno}", target.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmb_schema::{Arch, ChrootKind};

    fn id() -> ChrootId {
        ChrootId {
            kind: ChrootKind::Buildroot,
            arch: Arch::Aarch64,
        }
    }

    #[tokio::test]
    async fn fresh_registry_reports_unmounted() {
        let reg = MountRegistry::new();
        assert!(!reg.is_mounted(&id()).await);
        assert!(reg.require_live(&id()).await.is_err());
    }

    #[test]
    fn parse_mountinfo_extracts_mountpoint_column() {
        let sample = "23 1 0:21 / /proc rw,nosuid shared:5 - proc proc rw\n\
                       24 1 0:22 / /sys rw shared:6 - sysfs sysfs rw";
        let mounts = parse_mountinfo(sample);
        assert_eq!(mounts, vec![PathBuf::from("/proc"), PathBuf::from("/sys")]);
    }

    #[tokio::test]
    async fn reconcile_ignores_mounts_outside_work_dir() {
        let reg = MountRegistry::new();
        let work_dir = PathBuf::from("/home/user/.local/share/pmbootstrap");
        let live = vec![PathBuf::from("/proc"), PathBuf::from("/sys")];
        // Neither mountpoint is under work_dir, and perform_unmount is never
        // invoked for them, so this must succeed without touching the kernel.
        let healed = reg.reconcile(&work_dir, &live).await.unwrap();
        assert!(healed.is_empty());
    }
}

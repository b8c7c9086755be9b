//! The chroot manager: drives one chroot through its state machine and owns
//! the shared [`MountRegistry`].

use crate::command::{CommandRunner, ExecContext, RunSpec};
use crate::mount::MountRegistry;
use crate::{apkindex, mirror};
use pmb_schema::{Arch, ChrootId, ChrootKind, MountKind, PmbError, Sha256Digest};
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// The package `apk.static` is extracted from; its `APKINDEX` checksum is
/// the pinned hash the downloaded `.apk` must match before extraction.
const APK_TOOLS_STATIC_PKGNAME: &str = "apk-tools-static";

/// States of one chroot, per spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChrootState {
    Absent,
    Initializing,
    Ready,
    Mounted,
    Zapping,
}

/// Drives a single chroot through `absent -> initializing -> ready <->
/// mounted -> zapping -> absent`.
#[derive(Debug)]
pub struct ChrootManager {
    id: ChrootId,
    work_dir: PathBuf,
    state: Mutex<ChrootState>,
    /// Reentrant-entry acquisition count: release only unmounts at zero.
    acquisitions: Mutex<u32>,
    /// Set by a failed build step (spec §4.5 step 10); cleared only by `zap`.
    contaminated: Mutex<bool>,
    mounts: Arc<MountRegistry>,
    runner: Arc<CommandRunner>,
}

impl ChrootManager {
    pub fn new(id: ChrootId, work_dir: PathBuf, mounts: Arc<MountRegistry>, runner: Arc<CommandRunner>) -> Self {
        let state = if work_dir.join(id.dir_name()).is_dir() {
            ChrootState::Ready
        } else {
            ChrootState::Absent
        };
        ChrootManager {
            id,
            work_dir,
            state: Mutex::new(state),
            acquisitions: Mutex::new(0),
            contaminated: Mutex::new(false),
            mounts,
            runner,
        }
    }

    pub fn id(&self) -> ChrootId {
        self.id
    }

    pub async fn state(&self) -> ChrootState {
        *self.state.lock().await
    }

    pub async fn is_contaminated(&self) -> bool {
        *self.contaminated.lock().await
    }

    /// Mark this chroot contaminated after a failed build step, per spec
    /// §4.5 step 10: the chroot stays mounted for inspection, but the next
    /// `enter` (or build) zaps it first.
    pub async fn mark_contaminated(&self) {
        warn!(chroot = %self.id.dir_name(), "marked contaminated after a failed build step");
        *self.contaminated.lock().await = true;
    }

    pub fn path(&self) -> PathBuf {
        self.work_dir.join(self.id.dir_name())
    }

    /// `absent -> initializing -> ready`: create the directory, download and
    /// verify the pinned `apk.static`, register mirrors and arch, seed
    /// `alpine-base`.
    ///
    /// # Errors
    ///
    /// Returns [`PmbError::MirrorUnavailable`] if the index or package
    /// cannot be fetched, [`PmbError::ChecksumMismatch`] if the downloaded
    /// `apk-tools-static` package doesn't match the index's pinned
    /// checksum, and otherwise propagates command/mount failures.
    pub async fn bootstrap(&self, client: &reqwest::Client, mirror_url: &str) -> Result<(), PmbError> {
        {
            let mut state = self.state.lock().await;
            if *state != ChrootState::Absent {
                return Ok(());
            }
            *state = ChrootState::Initializing;
        }
        debug!(chroot = %self.id.dir_name(), "bootstrapping");

        let path = self.path();
        tokio::fs::create_dir_all(&path).await?;
        let apk_static = fetch_apk_static(client, mirror_url).await?;
        let apk_static_path = path.join("apk.static");
        tokio::fs::write(&apk_static_path, &apk_static).await?;
        set_executable(&apk_static_path).await?;

        tokio::fs::create_dir_all(path.join("etc/apk")).await?;
        tokio::fs::write(path.join("etc/apk/arch"), format!("{}\n", self.id.arch)).await?;
        tokio::fs::write(
            path.join("etc/apk/repositories"),
            format!("{mirror_url}/{}/main\n{mirror_url}/{}/community\n", alpine_branch(), alpine_branch()),
        )
        .await?;

        self.runner
            .run(
                RunSpec::new([
                    "apk.static".to_string(),
                    "--root".to_string(),
                    path.to_string_lossy().to_string(),
                    "--initdb".to_string(),
                    "add".to_string(),
                    "alpine-base".to_string(),
                ])
                .as_root(true),
            )
            .await?;

        *self.state.lock().await = ChrootState::Ready;
        info!(chroot = %self.id.dir_name(), "bootstrap complete");
        Ok(())
    }

    /// `ready -> mounted`: acquire every mount in the fixed order from spec
    /// §4.3. Bumps the acquisition count; a chroot already mounted just
    /// bumps the count again.
    ///
    /// # Errors
    ///
    /// Returns [`PmbError::UsageError`] if called while the chroot is
    /// `absent`, `initializing`, or `zapping`; otherwise propagates mount
    /// errors from the [`MountRegistry`].
    pub async fn enter(&self, aports_dir: &Path, cache_apk_dir: &Path, packages_dir: &Path, native_chroot: Option<&Path>) -> Result<(), PmbError> {
        {
            let mut state = self.state.lock().await;
            match *state {
                ChrootState::Ready => *state = ChrootState::Mounted,
                ChrootState::Mounted => {}
                other => {
                    return Err(PmbError::UsageError(format!(
                        "cannot enter chroot {} from state {other:?}",
                        self.id
                    )))
                }
            }
        }

        let mut acquisitions = self.acquisitions.lock().await;
        *acquisitions += 1;
        let first_acquisition = *acquisitions == 1;
        drop(acquisitions);
        if !first_acquisition {
            return Ok(());
        }

        let path = self.path();
        let mounts: &[(&str, &str, MountKind)] = &[
            ("proc", "proc", MountKind::Proc),
            ("sys", "sys", MountKind::Sys),
            ("dev", "dev", MountKind::Dev),
            ("dev/pts", "dev/pts", MountKind::Dev),
        ];
        for (source, target, kind) in mounts {
            self.mounts.mount(self.id, Path::new("/"), &path.join(target), *kind).await?;
            let _ = source;
        }

        self.mounts
            .mount(self.id, aports_dir, &path.join("home/pmos/aports"), MountKind::Bind)
            .await?;
        self.mounts
            .mount(self.id, cache_apk_dir, &path.join("var/cache/apk"), MountKind::Bind)
            .await?;
        self.mounts
            .mount(self.id, packages_dir, &path.join("mnt/packages"), MountKind::Bind)
            .await?;

        if self.id.arch.is_foreign() {
            if let Some(native) = native_chroot {
                self.mounts.mount(self.id, native, &path.join("native"), MountKind::Bind).await?;
            }
            self.install_binfmt().await?;
        }

        Ok(())
    }

    /// `mounted -> ready`: release all recorded mounts in reverse order
    /// once the acquisition count reaches zero.
    ///
    /// # Errors
    ///
    /// Propagates [`PmbError::MountLeak`] if any mount could not be
    /// released.
    pub async fn leave(&self) -> Result<(), PmbError> {
        let mut acquisitions = self.acquisitions.lock().await;
        if *acquisitions == 0 {
            return Ok(());
        }
        *acquisitions -= 1;
        if *acquisitions > 0 {
            return Ok(());
        }
        drop(acquisitions);

        self.mounts.unmount_all(self.id).await?;
        *self.state.lock().await = ChrootState::Ready;
        Ok(())
    }

    /// `-> zapping -> absent`: refuse while mounted, else remove the tree.
    ///
    /// # Errors
    ///
    /// Returns [`PmbError::UsageError`] if the chroot still has live mounts.
    pub async fn zap(&self) -> Result<(), PmbError> {
        if self.mounts.is_mounted(&self.id).await {
            return Err(PmbError::UsageError(format!(
                "refusing to zap {}: mounts are still live",
                self.id
            )));
        }
        *self.state.lock().await = ChrootState::Zapping;
        let path = self.path();
        if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        }
        *self.state.lock().await = ChrootState::Absent;
        *self.contaminated.lock().await = false;
        info!(chroot = %self.id.dir_name(), "zapped");
        Ok(())
    }

    /// Run a command inside this chroot as `root` or as the `pmos` build
    /// user, per spec §4.3's sanitized-environment entry contract.
    ///
    /// # Errors
    ///
    /// Returns [`PmbError::UsageError`] if the chroot is not mounted,
    /// otherwise propagates [`CommandRunner`] errors.
    pub async fn run(&self, argv: Vec<String>, as_unprivileged_user: bool) -> Result<crate::command::RunOutcome, PmbError> {
        self.run_with_env(argv, as_unprivileged_user, &[]).await
    }

    /// Like [`Self::run`], additionally re-exporting `env` into the
    /// escalated command (a build strategy's `CHOST`/`CTARGET`/
    /// `DISTCC_HOSTS`, for example).
    ///
    /// # Errors
    ///
    /// Same as [`Self::run`].
    pub async fn run_with_env(&self, argv: Vec<String>, as_unprivileged_user: bool, env: &[(String, String)]) -> Result<crate::command::RunOutcome, PmbError> {
        self.mounts.require_live(&self.id).await?;
        let context = if as_unprivileged_user {
            ExecContext::UserInChroot(self.id)
        } else {
            ExecContext::Chroot(self.id)
        };
        let mut spec = RunSpec::new(argv).context(context).as_root(true);
        for (k, v) in env {
            spec = spec.env(k.clone(), v.clone());
        }
        self.runner.run(spec).await
    }

    async fn install_binfmt(&self) -> Result<(), PmbError> {
        let tag = format!("qemu-{}", self.id.arch.kernel_name());
        let flag_path = format!("/proc/sys/fs/binfmt_misc/{tag}");
        if tokio::fs::metadata(&flag_path).await.is_ok() {
            return Ok(());
        }
        // Registration content format is fixed by the kernel's binfmt_misc
        // ABI; installed once per arch per host boot.
        self.runner
            .run(
                RunSpec::new([
                    "sh".to_string(),
                    "-c".to_string(),
                    format!("echo ':{tag}:M::::/native/usr/bin/qemu-{}-static:F' > /proc/sys/fs/binfmt_misc/register", self.id.arch.kernel_name()),
                ])
                .as_root(true),
            )
            .await?;
        Ok(())
    }
}

fn alpine_branch() -> &'static str {
    "edge"
}

/// Download `apk-tools-static` for the host's native arch from `mirror_url`,
/// verify it against the checksum its own `APKINDEX` entry carries, and pull
/// `apk.static` out of the package tarball. The index checksum is the only
/// pin available short of vendoring one: it is fetched over the same TLS
/// connection the package itself comes over, so a mismatch still catches a
/// truncated download or a mirror serving the wrong file.
async fn fetch_apk_static(client: &reqwest::Client, mirror_url: &str) -> Result<Vec<u8>, PmbError> {
    let arch = Arch::native();
    let mut cache = mirror::MirrorCache::new();
    let index_bytes = mirror::fetch_index(client, &[mirror_url.to_string()], arch, &mut cache).await?;
    let entries = apkindex::read_index_archive(&index_bytes, arch)?;
    let entry = entries
        .into_iter()
        .find(|e| e.pkgname.as_str() == APK_TOOLS_STATIC_PKGNAME)
        .ok_or_else(|| PmbError::IndexCorrupt(format!("{mirror_url} has no {APK_TOOLS_STATIC_PKGNAME} entry for {arch}")))?;

    let url = format!("{mirror_url}/{arch}/{}-{}.apk", entry.pkgname, entry.version);
    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| PmbError::MirrorUnavailable { urls: vec![format!("{url}: {e}")] })?;
    if !resp.status().is_success() {
        return Err(PmbError::MirrorUnavailable {
            urls: vec![format!("{url}: HTTP {}", resp.status())],
        });
    }
    let package_bytes = resp
        .bytes()
        .await
        .map_err(|e| PmbError::MirrorUnavailable { urls: vec![format!("{url}: {e}")] })?
        .to_vec();

    let got = Sha256Digest::compute(&package_bytes);
    if got != entry.checksum {
        return Err(PmbError::ChecksumMismatch {
            file: url,
            want: entry.checksum.to_string(),
            got: got.to_string(),
        });
    }

    extract_apk_static(&package_bytes)
}

/// `.apk` packages are gzip'd tarballs; pull the `sbin/apk.static` member
/// out without writing the whole package to disk first.
fn extract_apk_static(package_bytes: &[u8]) -> Result<Vec<u8>, PmbError> {
    let decoder = flate2::read::GzDecoder::new(package_bytes);
    let mut archive = tar::Archive::new(decoder);
    let entries = archive.entries().map_err(|e| PmbError::IndexCorrupt(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| PmbError::IndexCorrupt(e.to_string()))?;
        let path = entry.path().map_err(|e| PmbError::IndexCorrupt(e.to_string()))?;
        if path.file_name().and_then(|n| n.to_str()) == Some("apk.static") {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).map_err(|e| PmbError::IndexCorrupt(e.to_string()))?;
            return Ok(bytes);
        }
    }
    Err(PmbError::IndexCorrupt(format!("{APK_TOOLS_STATIC_PKGNAME} package has no apk.static member")))
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<(), PmbError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o755);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privilege::PrivilegeChannel;
    use tempfile::tempdir;

    fn manager(work_dir: PathBuf) -> ChrootManager {
        let mounts = Arc::new(MountRegistry::new());
        let runner = Arc::new(CommandRunner::new(Arc::new(PrivilegeChannel::for_test()), mounts.clone()));
        ChrootManager::new(
            ChrootId {
                kind: ChrootKind::Native,
                arch: Arch::native(),
            },
            work_dir,
            mounts,
            runner,
        )
    }

    #[tokio::test]
    async fn fresh_chroot_starts_absent() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path().to_path_buf());
        assert_eq!(mgr.state().await, ChrootState::Absent);
    }

    #[tokio::test]
    async fn zap_on_absent_chroot_is_a_noop() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path().to_path_buf());
        assert!(mgr.zap().await.is_ok());
    }

    #[tokio::test]
    async fn enter_from_absent_is_rejected() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path().to_path_buf());
        let err = mgr.enter(Path::new("/aports"), Path::new("/cache"), Path::new("/pkgs"), None).await;
        assert!(err.is_err());
    }
}

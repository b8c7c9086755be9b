//! The invocation context: the loaded config, an open work dir, and the
//! shared engine handles every `cmd` module builds its work from.

use pmb_core::chroot::ChrootManager;
use pmb_core::command::CommandRunner;
use pmb_core::mount::MountRegistry;
use pmb_core::privilege::PrivilegeChannel;
use pmb_core::workdir::WorkDir;
use pmb_core::{paths, Reporter};
use pmb_schema::{Arch, ChrootId, ChrootKind, Config, PmbError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Aggregates everything a verb needs to act: configuration, the locked
/// work directory, and the shared mount/command/privilege plumbing.
///
/// Built once per invocation and passed explicitly down into `cmd`
/// functions, per the engine's process-wide-state contract: nothing here is
/// read from a global, and dropping a `Context` releases the work-dir lock.
pub struct Context {
    pub config: Config,
    pub work_dir: WorkDir,
    pub mounts: Arc<MountRegistry>,
    pub runner: Arc<CommandRunner>,
    pub reporter: Arc<dyn Reporter>,
    chroots: std::sync::Mutex<HashMap<ChrootId, Arc<ChrootManager>>>,
}

impl Context {
    /// Build a context that takes the work directory's exclusive lock. Used
    /// by every verb except `init`/`status`/`repo_missing`: those either
    /// create the work dir fresh or must not block behind (or be blocked
    /// by) a running build, so they work from [`paths`]/[`pmb_core::workdir::peek`]
    /// directly instead of going through a full `Context`.
    ///
    /// # Errors
    ///
    /// Propagates [`PmbError::WorkdirLocked`] if another invocation holds the
    /// lock, and [`PmbError::PrivilegeEscalationFailed`] if no escalator can
    /// be resolved.
    pub fn new(config: Config, reporter: Arc<dyn Reporter>) -> Result<Self, PmbError> {
        let work_dir = WorkDir::open(&config.work, false)?;
        Self::build(config, work_dir, reporter)
    }

    fn build(config: Config, work_dir: WorkDir, reporter: Arc<dyn Reporter>) -> Result<Self, PmbError> {
        let privilege = Arc::new(PrivilegeChannel::resolve()?);
        let mounts = Arc::new(MountRegistry::new());
        let log_path = paths::log_dir(work_dir.root()).join("pmbootstrap.log");
        let runner = Arc::new(CommandRunner::with_log_file(privilege, mounts.clone(), log_path));
        Ok(Context {
            config,
            work_dir,
            mounts,
            runner,
            reporter,
            chroots: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// The shared `ChrootManager` for `id`, constructing it on first use.
    pub fn chroot(&self, id: ChrootId) -> Arc<ChrootManager> {
        let mut chroots = self.chroots.lock().expect("chroot registry mutex poisoned");
        chroots
            .entry(id)
            .or_insert_with(|| {
                Arc::new(ChrootManager::new(
                    id,
                    self.work_dir.root().to_path_buf(),
                    self.mounts.clone(),
                    self.runner.clone(),
                ))
            })
            .clone()
    }

    /// The native-architecture chroot.
    pub fn native_chroot(&self) -> Arc<ChrootManager> {
        self.chroot(ChrootId {
            kind: ChrootKind::Native,
            arch: Arch::native(),
        })
    }

    /// The buildroot chroot for `arch` (native arch still gets a
    /// `Buildroot`-kind entry distinct from [`Self::native_chroot`] when a
    /// caller explicitly asked to cross-build for the host's own arch).
    pub fn buildroot_chroot(&self, arch: Arch) -> Arc<ChrootManager> {
        if arch.is_native() {
            return self.native_chroot();
        }
        self.chroot(ChrootId {
            kind: ChrootKind::Buildroot,
            arch,
        })
    }

    pub fn packages_dir(&self, arch: Arch) -> PathBuf {
        paths::packages_dir(self.work_dir.root(), arch)
    }

    pub fn cache_apk_dir(&self, arch: Arch) -> PathBuf {
        paths::cache_apk_dir(self.work_dir.root(), arch)
    }

    pub fn aports_dir(&self) -> PathBuf {
        self.config.aports.clone()
    }
}

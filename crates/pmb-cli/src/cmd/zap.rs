//! `pmbootstrap zap`: destroy chroots, optionally purging caches and
//! packages too.
//!
//! `-o`/`--obsolete` restricts zapping to chroots that do not match the
//! currently configured device's architecture, leaving the active one
//! untouched; without it, every chroot under the work dir is zapped.

use crate::context::Context;
use pmb_schema::{Arch, ChrootId, ChrootKind, PmbError};

/// Zap every chroot under the work dir (or only obsolete ones), then
/// optionally purge the package repository and/or mirror caches.
///
/// # Errors
///
/// Propagates [`pmb_core::chroot::ChrootManager::zap`]'s error if a chroot
/// still has live mounts.
pub async fn run(ctx: &Context, packages: bool, mirror: bool, obsolete: bool) -> Result<(), PmbError> {
    let keep_arch = ctx.config.target_arch();

    for kind in [ChrootKind::Native, ChrootKind::Buildroot, ChrootKind::Rootfs, ChrootKind::Installer] {
        for arch in Arch::ALL {
            if kind == ChrootKind::Native && arch != Arch::native() {
                continue;
            }
            let id = ChrootId { kind, arch };
            let path = ctx.work_dir.root().join(id.dir_name());
            if !path.is_dir() {
                continue;
            }
            if obsolete && keep_arch == Some(arch) {
                continue;
            }
            ctx.reporter.zapping(id);
            ctx.chroot(id).zap().await?;
        }
    }

    if packages {
        let dir = ctx.work_dir.root().join("packages");
        if dir.is_dir() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        ctx.reporter.info("purged built-package repository");
    }

    if mirror {
        for arch in Arch::ALL {
            let dir = ctx.cache_apk_dir(arch);
            if dir.is_dir() {
                tokio::fs::remove_dir_all(&dir).await?;
            }
        }
        let git_cache = ctx.work_dir.root().join("cache_git");
        if git_cache.is_dir() {
            tokio::fs::remove_dir_all(&git_cache).await?;
        }
        ctx.reporter.info("purged apk/git mirror caches");
    }

    ctx.reporter.success("zap complete");
    Ok(())
}

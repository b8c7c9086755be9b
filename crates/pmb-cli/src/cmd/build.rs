//! `pmbootstrap build`: plan and build one or more packages.

use crate::cmd::load_catalog;
use crate::context::Context;
use pmb_core::build::{BuildTarget, CatalogSource, Planner};
use pmb_core::resolver::{resolve_dependencies, PackageSource};
use pmb_schema::{Arch, PmbError, Pkgname};
use std::collections::HashMap;
use std::path::PathBuf;

/// Build every package in `packages`, plus (unless `no_depends`) its
/// dependency closure, for `arch` (defaulting to the configured device's
/// architecture, falling back to native if none is configured).
///
/// `--no-depends` still resolves the closure to validate it, but refuses to
/// recursively build any member of it that is not already an up-to-date
/// binary package, rather than silently pulling in a rebuild.
///
/// # Errors
///
/// Returns [`PmbError::UsageError`] if `--no-depends` finds a dependency
/// that needs building, and otherwise propagates whatever the planner's
/// ten-step algorithm fails on.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    ctx: &Context,
    packages: Vec<String>,
    arch: Option<Arch>,
    src: Option<PathBuf>,
    force: bool,
    strict: bool,
    no_depends: bool,
) -> Result<(), PmbError> {
    let arch = arch.or_else(|| ctx.config.target_arch()).unwrap_or_else(Arch::native);

    let catalog = load_catalog(&ctx.aports_dir(), strict)?;
    let native = ctx.native_chroot();
    let mut target_chroots = HashMap::new();
    if !arch.is_native() {
        target_chroots.insert(arch, ctx.buildroot_chroot(arch));
    }
    let packages_root = ctx.work_dir.root().join("packages");

    if no_depends {
        for name in &packages {
            let pkgname = Pkgname::new(name);
            let recipe = catalog
                .find(&pkgname)
                .ok_or_else(|| PmbError::NoSuchAport(pkgname.to_string()))?
                .clone();

            let index_entries = read_local_index(&packages_root, arch).unwrap_or_default();
            let source = CatalogSource::new(&catalog, &index_entries);
            let mut roots: Vec<Pkgname> = recipe.makedepends.iter().map(|r| r.name.clone()).collect();
            roots.extend(recipe.depends.iter().map(|r| r.name.clone()));
            let resolution = resolve_dependencies(&roots, &source)?;
            if let Some(unbuilt) = resolution.chosen.iter().find(|p| p.needs_build && p.pkgname != pkgname) {
                return Err(PmbError::UsageError(format!(
                    "{unbuilt} needs building but --no-depends forbids recursive builds",
                    unbuilt = unbuilt.pkgname
                )));
            }
        }
    }

    let planner = Planner::new(catalog, native, target_chroots, packages_root, HashMap::new());

    let start = std::time::Instant::now();
    let mut built_count = 0usize;
    for name in &packages {
        let target = BuildTarget {
            pkgname: Pkgname::new(name),
            arch,
            src_override: if packages.len() == 1 { src.clone() } else { None },
            force,
        };
        ctx.reporter.building(&target.pkgname, "resolving");
        let report = planner.plan_and_build(target).await?;
        built_count += report.built.len();
        for p in &report.built {
            ctx.reporter.done(p, "built");
        }
        for p in &report.already_built {
            ctx.reporter.info(&format!("{p}: already up to date"));
        }
    }

    ctx.reporter.summary(built_count, "built", start.elapsed().as_secs_f64());
    Ok(())
}

fn read_local_index(packages_root: &std::path::Path, arch: Arch) -> Option<Vec<pmb_schema::IndexEntry>> {
    let path = packages_root.join(arch.to_string()).join("APKINDEX.tar.gz");
    let bytes = std::fs::read(path).ok()?;
    pmb_core::apkindex::read_index_archive(&bytes, arch).ok()
}

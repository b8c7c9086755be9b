//! `pmbootstrap pkgrel_bump`: bump `pkgrel` for aports whose built binary is
//! outdated relative to their dependency closure.
//!
//! `--auto` iterates to a fixed point: a round bumps every recipe whose
//! declared dependencies needed a rebuild in the previous round, and stops
//! once a round bumps nothing. Bounded at 50 rounds; a catalog that still
//! hasn't converged by then almost certainly has a cyclic freshness
//! dependency and is reported as [`PmbError::PkgrelBumpNonConverging`]
//! rather than guessed at further.

use crate::cmd::load_recipes;
use crate::context::Context;
use pmb_core::apkindex;
use pmb_schema::{Arch, PmbError, Pkgname, Recipe};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;

const MAX_ITERATIONS: u32 = 50;

/// Run one pass (`--dry`/write-back as requested) or, with `--auto`, iterate
/// to a fixed point.
///
/// # Errors
///
/// Returns [`PmbError::PkgrelBumpNonConverging`] if `--auto` does not reach
/// a fixed point within the iteration bound.
pub async fn run(ctx: &Context, auto: bool, dry: bool) -> Result<(), PmbError> {
    let arch = ctx.config.target_arch().unwrap_or_else(Arch::native);
    let recipes = load_recipes(&ctx.aports_dir(), false)?;
    let mut outdated_versions: HashMap<Pkgname, String> = recipes.iter().map(|r| (r.pkgname.clone(), r.version_string())).collect();

    let mut total_bumped: HashSet<Pkgname> = HashSet::new();
    let mut iteration = 0u32;
    loop {
        iteration += 1;
        let index_entries = read_local_index(&ctx.packages_dir(arch).join("APKINDEX.tar.gz"), arch).unwrap_or_default();
        let built_versions: HashMap<Pkgname, String> = index_entries.into_iter().map(|e| (e.pkgname, e.version)).collect();

        let mut to_bump = Vec::new();
        for recipe in &recipes {
            let current_version = outdated_versions.get(&recipe.pkgname).cloned().unwrap_or_else(|| recipe.version_string());
            let binary_is_fresh = built_versions.get(&recipe.pkgname) == Some(&current_version);
            let dependency_rebuilt = recipe
                .depends
                .iter()
                .chain(recipe.makedepends.iter())
                .any(|req| total_bumped.contains(&req.name));
            if !binary_is_fresh || dependency_rebuilt {
                to_bump.push(recipe.pkgname.clone());
            }
        }

        if to_bump.is_empty() || !auto {
            if to_bump.is_empty() {
                ctx.reporter.info("no outdated aports found");
            }
            for pkgname in &to_bump {
                bump_one(ctx, &recipes, pkgname, dry, &mut outdated_versions)?;
                total_bumped.insert(pkgname.clone());
            }
            break;
        }

        for pkgname in &to_bump {
            bump_one(ctx, &recipes, pkgname, dry, &mut outdated_versions)?;
            total_bumped.insert(pkgname.clone());
        }

        if iteration >= MAX_ITERATIONS {
            return Err(PmbError::PkgrelBumpNonConverging(MAX_ITERATIONS));
        }
    }

    ctx.reporter.summary_plain(total_bumped.len(), if dry { "would be bumped" } else { "bumped" });
    Ok(())
}

fn bump_one(ctx: &Context, recipes: &[Recipe], pkgname: &Pkgname, dry: bool, outdated_versions: &mut HashMap<Pkgname, String>) -> Result<(), PmbError> {
    let recipe = recipes
        .iter()
        .find(|r| r.pkgname == *pkgname)
        .ok_or_else(|| PmbError::NoSuchAport(pkgname.to_string()))?;
    let new_rel = recipe.pkgrel + 1;

    if dry {
        ctx.reporter.info(&format!("{pkgname}: pkgrel {} -> {new_rel} (dry run)", recipe.pkgrel));
    } else {
        let apkbuild_path = find_apkbuild(&ctx.aports_dir(), &recipe.origin_repo, pkgname);
        if let Some(path) = apkbuild_path {
            write_pkgrel(&path, new_rel)?;
        }
        ctx.reporter.done(pkgname, &format!("pkgrel bumped to {new_rel}"));
    }
    outdated_versions.insert(pkgname.clone(), format!("{}-r{new_rel}", recipe.pkgver));
    Ok(())
}

fn find_apkbuild(aports_dir: &Path, origin_repo: &str, pkgname: &Pkgname) -> Option<std::path::PathBuf> {
    let candidate = aports_dir.join(origin_repo).join(pkgname.as_str()).join("APKBUILD");
    candidate.is_file().then_some(candidate)
}

fn write_pkgrel(path: &Path, new_rel: u64) -> Result<(), PmbError> {
    let text = std::fs::read_to_string(path)?;
    let re = Regex::new(r"(?m)^pkgrel=\d+$").expect("static pkgrel regex is valid");
    let replaced = re.replace(&text, format!("pkgrel={new_rel}")).into_owned();
    std::fs::write(path, replaced)?;
    Ok(())
}

fn read_local_index(path: &Path, arch: Arch) -> Option<Vec<pmb_schema::IndexEntry>> {
    let bytes = std::fs::read(path).ok()?;
    apkindex::read_index_archive(&bytes, arch).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_pkgrel_replaces_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("APKBUILD");
        std::fs::write(&path, "pkgname=foo\npkgver=1.0\npkgrel=3\n").unwrap();
        write_pkgrel(&path, 4).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("pkgrel=4"));
        assert!(!text.contains("pkgrel=3"));
    }
}

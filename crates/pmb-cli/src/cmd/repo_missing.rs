//! `pmbootstrap repo_missing`: list aports with no matching binary package.

use crate::cmd::load_recipes;
use comfy_table::{presets::UTF8_FULL, Table};
use pmb_core::{apkindex, paths};
use pmb_schema::arch::arch_list_permits;
use pmb_schema::{Arch, Config, PmbError};

/// Print a table of `(pkgname, arch)` pairs for which the configured aports
/// tree declares a recipe but the local `APKINDEX` has no entry at the
/// matching version. Restricted to one architecture if `arch` is given,
/// otherwise checked for every known architecture.
///
/// This is a read-only diagnostic and does not take the work directory's
/// exclusive lock.
///
/// # Errors
///
/// Propagates [`PmbError::RecipeUnsupported`] if a recipe cannot be parsed.
pub fn run(config: &Config, arch: Option<Arch>) -> Result<(), PmbError> {
    let recipes = load_recipes(&config.aports, false)?;
    let arches: Vec<Arch> = arch.map_or_else(|| Arch::ALL.to_vec(), |a| vec![a]);

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["pkgname", "arch", "recipe version"]);
    let mut missing = 0usize;

    for arch in arches {
        let index_path = paths::packages_dir(&config.work, arch).join("APKINDEX.tar.gz");
        let index_entries = if index_path.is_file() {
            let bytes = std::fs::read(&index_path)?;
            apkindex::read_index_archive(&bytes, arch).unwrap_or_default()
        } else {
            Vec::new()
        };

        for recipe in &recipes {
            if !arch_list_permits(&recipe.arch, arch) {
                continue;
            }
            let version = recipe.version_string();
            let has_match = index_entries.iter().any(|e| e.pkgname == recipe.pkgname && e.version == version);
            if !has_match {
                table.add_row(vec![recipe.pkgname.to_string(), arch.to_string(), version]);
                missing += 1;
            }
        }
    }

    println!("{table}");
    println!("{missing} aport(s) missing a matching binary package");
    Ok(())
}

//! One module per verb, plus the shared recipe-catalog loader every
//! build-adjacent verb needs.

pub mod build;
pub mod chroot;
pub mod index;
pub mod init;
pub mod pkgrel_bump;
pub mod repo_missing;
pub mod shutdown;
pub mod status;
pub mod work_migrate;
pub mod zap;

use pmb_core::build::RecipeCatalog;
use pmb_schema::{PmbError, Recipe};
use std::path::Path;

/// Walk `aports_dir` for `APKBUILD` files and evaluate each into a
/// [`Recipe`], deriving `origin_repo` from the path segment directly under
/// the aports root (e.g. `main`, `community`, `device/testing`).
///
/// When `strict` is false (the default), a recipe the constrained evaluator
/// cannot parse is skipped rather than failing the whole load; it simply
/// will not be buildable until `eval_in_chroot` is invoked for it directly.
/// When `strict` is true, the first unparseable recipe is fatal.
///
/// # Errors
///
/// Returns [`PmbError::RecipeUnsupported`] if `strict` is true and a recipe
/// cannot be parsed, or an I/O error if an `APKBUILD` cannot be read.
pub fn load_recipes(aports_dir: &Path, strict: bool) -> Result<Vec<Recipe>, PmbError> {
    let mut recipes: Vec<Recipe> = Vec::new();
    for entry in walkdir::WalkDir::new(aports_dir).into_iter().filter_map(Result::ok) {
        if entry.file_name() != "APKBUILD" {
            continue;
        }
        let origin_repo = entry
            .path()
            .strip_prefix(aports_dir)
            .ok()
            .and_then(|rel| rel.components().next())
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .unwrap_or_else(|| "main".to_string());

        let text = std::fs::read_to_string(entry.path())?;
        match pmb_core::apkbuild::eval(&text, &origin_repo) {
            Ok(recipe) => recipes.push(recipe),
            Err(PmbError::RecipeUnsupported(_)) if !strict => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(recipes)
}

/// Like [`load_recipes`], wrapped into a [`RecipeCatalog`] for the build
/// planner's subpackage-aware lookups.
///
/// # Errors
///
/// Same as [`load_recipes`].
pub fn load_catalog(aports_dir: &Path, strict: bool) -> Result<RecipeCatalog, PmbError> {
    Ok(RecipeCatalog::new(load_recipes(aports_dir, strict)?))
}

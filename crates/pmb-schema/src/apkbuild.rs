//! The `APKBUILD` recipe record.
//!
//! This module defines the value type only; parsing lives in
//! `pmb_core::apkbuild` since it needs the shell-evaluator machinery. Keeping
//! the record here lets `pmb_schema` stay the single source of truth for
//! recipe identity used by both the resolver and the index reader.

use crate::arch::ArchSpec;
use crate::types::{Pkgname, Requirement};
use serde::{Deserialize, Serialize};

/// A single parsed `APKBUILD`.
///
/// Recipe identity is `(pkgname, origin_repo)`; a subpackage is a distinct
/// [`Subpackage`] entry, not a separate `Recipe`.
#[derive(Debug, Clone)]
pub struct Recipe {
    /// The package name.
    pub pkgname: Pkgname,
    /// The aports repository this recipe came from (e.g. `main`, `community`).
    pub origin_repo: String,
    /// The upstream version string.
    pub pkgver: String,
    /// The recipe's release number, bumped on packaging-only changes.
    pub pkgrel: u64,
    /// The architectures this recipe can build for.
    pub arch: Vec<ArchSpec>,
    /// Runtime dependencies.
    pub depends: Vec<Requirement>,
    /// Build-time dependencies.
    pub makedepends: Vec<Requirement>,
    /// Dependencies needed only to run `check()`.
    pub checkdepends: Vec<Requirement>,
    /// Subpackages produced alongside the main package.
    pub subpackages: Vec<Subpackage>,
    /// Additional names this package provides.
    pub provides: Vec<String>,
    /// Source files and patches this recipe fetches or applies.
    pub sources: Vec<SourceEntry>,
    /// Recipe-level build options.
    pub options: Vec<RecipeOption>,
}

impl Recipe {
    /// The combined `pkgver-pkgrel` string as it appears in an `APKINDEX`.
    pub fn version_string(&self) -> String {
        format!("{}-r{}", self.pkgver, self.pkgrel)
    }
}

/// A logical package produced by a recipe's `subpackages=` entry, e.g.
/// `$pkgname-dev` or `$pkgname-doc`.
#[derive(Debug, Clone)]
pub struct Subpackage {
    /// The subpackage's name.
    pub pkgname: Pkgname,
    /// The shell function name that populates this subpackage (`dev`, `doc`,
    /// or a custom name for `pkgname:custom_fn`).
    pub split_fn: String,
}

/// One `source=` entry: a URL (or bare filename for local patches) plus its
/// recorded checksum.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// The source URL, or bare filename for a local patch.
    pub url: String,
    /// The recorded checksum for this source.
    pub checksum: ChecksumEntry,
}

/// The checksum recorded for a [`SourceEntry`], matching whichever of
/// `sha512sums`/`sha256sums` the recipe declares.
#[derive(Debug, Clone)]
pub enum ChecksumEntry {
    /// A SHA-256 checksum (`sha256sums`).
    Sha256(crate::hash::Sha256Digest),
    /// A SHA-512 checksum (`sha512sums`).
    Sha512(crate::hash::Sha512Digest),
}

/// A recipe `options=` flag, e.g. `!check` or `!strip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeOption {
    /// `!check`: skip the `check()` function during build.
    NoCheck,
    /// `!strip`: skip stripping debug symbols from built binaries.
    NoStrip,
    /// `!fhs`: not subject to Filesystem Hierarchy Standard layout checks.
    NoFhs,
    /// `net`: build requires network access (disables build sandboxing for it).
    Net,
}

impl RecipeOption {
    /// Parse one `options=` token, e.g. `!check` -> `Some(NoCheck)`.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "!check" => Some(RecipeOption::NoCheck),
            "!strip" => Some(RecipeOption::NoStrip),
            "!fhs" => Some(RecipeOption::NoFhs),
            "net" => Some(RecipeOption::Net),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_format() {
        let r = Recipe {
            pkgname: Pkgname::new("foo"),
            origin_repo: "main".into(),
            pkgver: "1.2.3".into(),
            pkgrel: 4,
            arch: vec![],
            depends: vec![],
            makedepends: vec![],
            checkdepends: vec![],
            subpackages: vec![],
            provides: vec![],
            sources: vec![],
            options: vec![],
        };
        assert_eq!(r.version_string(), "1.2.3-r4");
    }

    #[test]
    fn recipe_option_parse() {
        assert_eq!(RecipeOption::parse("!check"), Some(RecipeOption::NoCheck));
        assert_eq!(RecipeOption::parse("bogus"), None);
    }
}

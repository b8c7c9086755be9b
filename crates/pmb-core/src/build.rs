//! The build planner and executor: spec §4.5's ten-step algorithm from
//! recipe lookup through committing the built APK.

use crate::apkindex;
use crate::chroot::{ChrootManager, ChrootState};
use crate::resolver::{resolve_dependencies, PackageSource};
use pmb_schema::{AlpineVersion, Arch, PmbError, Pkgname, Recipe, Requirement, Sha512Digest};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One package build request.
#[derive(Debug, Clone)]
pub struct BuildTarget {
    /// The package to build.
    pub pkgname: Pkgname,
    /// The target architecture.
    pub arch: Arch,
    /// A local source tree to build from instead of fetching (`abuild -s`'s
    /// `--src` equivalent).
    pub src_override: Option<PathBuf>,
    /// Rebuild even if an up-to-date package already exists.
    pub force: bool,
}

/// What the planner actually did with a target and its closure.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Packages that were built during this run.
    pub built: Vec<Pkgname>,
    /// Packages that were already up to date and skipped.
    pub already_built: Vec<Pkgname>,
}

/// How the builder reaches the target architecture, selected deterministically
/// in this order (spec §4.5 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Build directly on the host architecture.
    Native,
    /// Cross-compile directly for the target architecture.
    CrossDirect,
    /// Cross-compile using distcc with QEMU user-mode emulation.
    DistccQemu,
    /// Build under QEMU emulation only, with no cross toolchain.
    QemuOnly,
}

/// Read-only view over every known recipe, keyed by pkgname and by every
/// subpackage name it declares.
pub struct RecipeCatalog {
    pub(crate) by_pkgname: HashMap<Pkgname, Recipe>,
    subpackage_owner: HashMap<Pkgname, Pkgname>,
}

impl RecipeCatalog {
    /// Build a catalog from a list of parsed recipes.
    pub fn new(recipes: Vec<Recipe>) -> Self {
        let mut subpackage_owner = HashMap::new();
        for recipe in &recipes {
            for sub in &recipe.subpackages {
                subpackage_owner.insert(sub.pkgname.clone(), recipe.pkgname.clone());
            }
        }
        let by_pkgname = recipes.into_iter().map(|r| (r.pkgname.clone(), r)).collect();
        RecipeCatalog { by_pkgname, subpackage_owner }
    }

    /// Locate the recipe whose pkgname or subpackage list contains `name`.
    pub fn find(&self, name: &Pkgname) -> Option<&Recipe> {
        self.by_pkgname
            .get(name)
            .or_else(|| self.subpackage_owner.get(name).and_then(|owner| self.by_pkgname.get(owner)))
    }
}

/// Where a [`CatalogSource`] version record came from, for the aport-over-
/// index precedence rule and provider tie-breaking (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Aport,
    Index,
}

/// A [`PackageSource`] over the union of a [`RecipeCatalog`] and the
/// already-built `APKINDEX` entries for one arch, flattened once at
/// construction into owned per-package records so lookups can return
/// borrows without re-deriving anything.
pub struct CatalogSource {
    versions: HashMap<Pkgname, String>,
    requirements: HashMap<Pkgname, Vec<Requirement>>,
    provides: HashMap<Pkgname, Pkgname>,
    needs_build: HashMap<Pkgname, bool>,
}

impl CatalogSource {
    /// Build a source over a recipe catalog and a set of index entries for
    /// one architecture.
    pub fn new(catalog: &RecipeCatalog, index_entries: &[pmb_schema::IndexEntry]) -> Self {
        let mut versions: HashMap<Pkgname, String> = HashMap::new();
        let mut origins: HashMap<Pkgname, Origin> = HashMap::new();
        let mut requirements = HashMap::new();
        let mut needs_build = HashMap::new();
        let mut provider_candidates: HashMap<Pkgname, Vec<Pkgname>> = HashMap::new();

        for entry in index_entries {
            versions.insert(entry.pkgname.clone(), entry.version.clone());
            origins.insert(entry.pkgname.clone(), Origin::Index);
            needs_build.insert(entry.pkgname.clone(), false);
            for p in &entry.provides {
                provider_candidates.entry(Pkgname::new(p)).or_default().push(entry.pkgname.clone());
            }
        }

        for (pkgname, recipe) in &catalog.by_pkgname {
            let aport_version = recipe.version_string();
            let already_built = versions.get(pkgname) == Some(&aport_version);
            needs_build.insert(pkgname.clone(), !already_built);

            // Prefer the aport when its pkgver-pkgrel is >= the indexed
            // binary's, so local recipe edits take effect; otherwise the
            // index already names the newer version, so keep it.
            let prefer_aport = match (AlpineVersion::parse(&aport_version), versions.get(pkgname)) {
                (Ok(aport), Some(indexed)) => AlpineVersion::parse(indexed).is_ok_and(|index| aport >= index),
                _ => true,
            };
            if prefer_aport {
                versions.insert(pkgname.clone(), aport_version);
                origins.insert(pkgname.clone(), Origin::Aport);
            }

            let mut reqs = recipe.depends.clone();
            reqs.extend(recipe.makedepends.clone());
            requirements.insert(pkgname.clone(), reqs);

            for p in &recipe.provides {
                provider_candidates.entry(Pkgname::new(p)).or_default().push(pkgname.clone());
            }
        }

        let provides = resolve_providers(&provider_candidates, &versions, &origins);

        CatalogSource {
            versions,
            requirements,
            provides,
            needs_build,
        }
    }
}

/// Pick one winning provider per virtual name, per spec §4.6's tie-break:
/// (1) higher pkgver; (2) lower pkgrel if pkgver is equal; (3) aport over
/// index; (4) alphabetical pkgname, as the last deterministic resort.
fn resolve_providers(
    candidates: &HashMap<Pkgname, Vec<Pkgname>>,
    versions: &HashMap<Pkgname, String>,
    origins: &HashMap<Pkgname, Origin>,
) -> HashMap<Pkgname, Pkgname> {
    let mut resolved = HashMap::new();
    for (virtual_name, providers) in candidates {
        let winner = providers
            .iter()
            .filter_map(|name| {
                let version = AlpineVersion::parse(versions.get(name)?).ok()?;
                let origin = origins.get(name).copied().unwrap_or(Origin::Index);
                Some((name, version, origin))
            })
            .max_by(|(name_a, ver_a, origin_a), (name_b, ver_b, origin_b)| {
                ver_a
                    .pkgver_cmp(ver_b)
                    .then_with(|| ver_b.pkgrel().cmp(&ver_a.pkgrel()))
                    .then_with(|| match (origin_a, origin_b) {
                        (Origin::Aport, Origin::Index) => Ordering::Greater,
                        (Origin::Index, Origin::Aport) => Ordering::Less,
                        _ => Ordering::Equal,
                    })
                    .then_with(|| name_b.as_str().cmp(name_a.as_str()))
            });
        if let Some((name, ..)) = winner {
            resolved.insert(virtual_name.clone(), name.clone());
        }
    }
    resolved
}

impl PackageSource for CatalogSource {
    fn version_of(&self, name: &Pkgname) -> Option<&str> {
        self.versions.get(name).map(String::as_str)
    }

    fn requirements_of(&self, name: &Pkgname) -> &[Requirement] {
        self.requirements.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn contains(&self, name: &Pkgname) -> bool {
        self.versions.contains_key(name)
    }

    fn needs_build(&self, name: &Pkgname) -> bool {
        self.needs_build.get(name).copied().unwrap_or(false)
    }

    fn resolve_provider(&self, name: &Pkgname) -> Option<Pkgname> {
        self.provides.get(name).cloned()
    }
}

/// Drives [`BuildTarget`]s through the ten-step algorithm.
pub struct Planner {
    catalog: RecipeCatalog,
    native: Arc<ChrootManager>,
    target_chroots: HashMap<Arch, Arc<ChrootManager>>,
    packages_dir: PathBuf,
    cross_available: HashMap<Arch, bool>,
}

impl Planner {
    /// Build a planner over a recipe catalog, the native chroot, any
    /// per-architecture target chroots, and the packages output directory.
    pub fn new(catalog: RecipeCatalog, native: Arc<ChrootManager>, target_chroots: HashMap<Arch, Arc<ChrootManager>>, packages_dir: PathBuf, cross_available: HashMap<Arch, bool>) -> Self {
        Planner {
            catalog,
            native,
            target_chroots,
            packages_dir,
            cross_available,
        }
    }

    fn chroot_for(&self, arch: Arch) -> Result<&Arc<ChrootManager>, PmbError> {
        if arch.is_native() {
            Ok(&self.native)
        } else {
            self.target_chroots.get(&arch).ok_or_else(|| PmbError::UnsupportedArch(arch.to_string()))
        }
    }

    /// Run the full algorithm for one target, recursively planning any
    /// closure member that itself needs building.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchAport`/`UnsupportedArch` from steps 1-2,
    /// `BuildFailed { step, .. }` naming whichever of steps 6-9 failed, and
    /// propagates resolver/command-runner errors.
    pub async fn plan_and_build(&self, target: BuildTarget) -> Result<BuildReport, PmbError> {
        let mut report = BuildReport::default();
        self.build_one(&target, &mut report).await?;
        Ok(report)
    }

    async fn build_one(&self, target: &BuildTarget, report: &mut BuildReport) -> Result<(), PmbError> {
        // Step 1: recipe lookup.
        let recipe = self
            .catalog
            .find(&target.pkgname)
            .ok_or_else(|| PmbError::NoSuchAport(target.pkgname.to_string()))?
            .clone();

        // Step 2: arch validation.
        if !pmb_schema::arch::arch_list_permits(&recipe.arch, target.arch) && !target.force {
            return Err(PmbError::UnsupportedArch(format!("{} does not build for {}", recipe.pkgname, target.arch)));
        }

        // Step 3: freshness check.
        let index_entries = self.read_local_index(target.arch).await.unwrap_or_default();
        if !target.force {
            if let Some(existing) = index_entries.iter().find(|e| e.pkgname == recipe.pkgname) {
                if existing.version == recipe.version_string() {
                    report.already_built.push(recipe.pkgname.clone());
                    return Ok(());
                }
            }
        }

        // Step 4: dependency closure.
        let source = CatalogSource::new(&self.catalog, &index_entries);
        let mut roots: Vec<Pkgname> = recipe.makedepends.iter().map(|r| r.name.clone()).collect();
        roots.extend(recipe.depends.iter().map(|r| r.name.clone()));
        let resolution = resolve_dependencies(&roots, &source)?;

        for layer in &resolution.build_layers {
            for pkgname in layer {
                if source.needs_build(pkgname) && *pkgname != recipe.pkgname {
                    Box::pin(self.build_one(
                        &BuildTarget {
                            pkgname: pkgname.clone(),
                            arch: target.arch,
                            src_override: None,
                            force: false,
                        },
                        report,
                    ))
                    .await?;
                }
            }
        }

        // Step 5: strategy selection.
        let strategy = self.select_strategy(&recipe, target.arch);

        // Step 6: chroot preparation.
        let chroot = self.chroot_for(target.arch)?;
        if chroot.is_contaminated().await {
            chroot.zap().await.map_err(|e| PmbError::BuildFailed {
                step: "chroot preparation".to_string(),
                message: e.to_string(),
            })?;
        }
        if chroot.state().await == ChrootState::Absent {
            return Err(PmbError::BuildFailed {
                step: "chroot preparation".to_string(),
                message: format!("chroot {} was never bootstrapped", chroot.id()),
            });
        }
        self.install_closure(chroot, &resolution.chosen.iter().map(|p| p.pkgname.clone()).collect::<Vec<_>>())
            .await
            .map_err(|e| PmbError::BuildFailed {
                step: "chroot preparation".to_string(),
                message: e.to_string(),
            })?;

        // Step 7: source staging.
        if let Some(src) = &target.src_override {
            self.stage_local_source(chroot, src).await.map_err(|e| PmbError::BuildFailed {
                step: "source staging".to_string(),
                message: e.to_string(),
            })?;
        } else {
            self.fetch_and_verify_sources(&recipe).await.map_err(|e| PmbError::BuildFailed {
                step: "source staging".to_string(),
                message: e.to_string(),
            })?;
        }

        // Step 8: build invocation.
        let env = strategy_env(strategy, target.arch);
        let mut argv = vec!["abuild".to_string(), "-r".to_string()];
        if target.src_override.is_some() {
            argv.push("-s".to_string());
        }
        let build_result = chroot.run_with_env(argv, true, &env).await;
        if let Err(e) = build_result {
            chroot.mark_contaminated().await;
            return Err(PmbError::BuildFailed {
                step: "build invocation".to_string(),
                message: e.to_string(),
            });
        }

        // Step 9: commit.
        self.commit_built_packages(chroot, target.arch).await.map_err(|e| {
            PmbError::BuildFailed {
                step: "commit".to_string(),
                message: e.to_string(),
            }
        })?;

        report.built.push(recipe.pkgname.clone());
        Ok(())
    }

    fn select_strategy(&self, recipe: &Recipe, target_arch: Arch) -> Strategy {
        if target_arch.is_native() {
            return Strategy::Native;
        }
        let cross_ok = *self.cross_available.get(&target_arch).unwrap_or(&false);
        let opts_allow_cross = !recipe.options.iter().any(|o| matches!(o, pmb_schema::RecipeOption::Net));
        if cross_ok && opts_allow_cross {
            return Strategy::CrossDirect;
        }
        if cross_ok {
            return Strategy::DistccQemu;
        }
        Strategy::QemuOnly
    }

    async fn read_local_index(&self, arch: Arch) -> Result<Vec<pmb_schema::IndexEntry>, PmbError> {
        let path = self.packages_dir.join(arch.to_string()).join("APKINDEX.tar.gz");
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let bytes = tokio::fs::read(&path).await?;
        apkindex::read_index_archive(&bytes, arch)
    }

    async fn install_closure(&self, chroot: &ChrootManager, packages: &[Pkgname]) -> Result<(), PmbError> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut argv = vec!["apk".to_string(), "add".to_string()];
        argv.extend(packages.iter().map(|p| p.to_string()));
        chroot.run(argv, false).await?;
        Ok(())
    }

    async fn stage_local_source(&self, chroot: &ChrootManager, src: &Path) -> Result<(), PmbError> {
        let target = chroot.path().join("home/pmos/build/src");
        tokio::fs::create_dir_all(&target).await?;
        for entry in walkdir::WalkDir::new(src).into_iter().filter_map(Result::ok) {
            let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
            let dest = target.join(relative);
            if entry.file_type().is_dir() {
                tokio::fs::create_dir_all(&dest).await?;
            } else if entry.file_type().is_file() {
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(entry.path(), &dest).await?;
            }
        }
        Ok(())
    }

    async fn fetch_and_verify_sources(&self, recipe: &Recipe) -> Result<(), PmbError> {
        let client = reqwest::Client::new();
        for source in &recipe.sources {
            if !source.url.contains("://") {
                continue;
            }
            let bytes = client
                .get(&source.url)
                .send()
                .await
                .map_err(|e| PmbError::MirrorUnavailable { urls: vec![format!("{}: {e}", source.url)] })?
                .bytes()
                .await
                .map_err(|e| PmbError::MirrorUnavailable { urls: vec![format!("{}: {e}", source.url)] })?;

            match &source.checksum {
                pmb_schema::ChecksumEntry::Sha512(want) => {
                    let got = Sha512Digest::compute(&bytes);
                    if &got != want {
                        return Err(PmbError::ChecksumMismatch {
                            file: source.url.clone(),
                            want: want.to_string(),
                            got: got.to_string(),
                        });
                    }
                }
                pmb_schema::ChecksumEntry::Sha256(want) => {
                    let got = pmb_schema::Sha256Digest::compute(&bytes);
                    if &got != want {
                        return Err(PmbError::ChecksumMismatch {
                            file: source.url.clone(),
                            want: want.to_string(),
                            got: got.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    async fn commit_built_packages(&self, chroot: &ChrootManager, arch: Arch) -> Result<(), PmbError> {
        let built_dir = chroot.path().join("home/pmos/packages");
        let dest_dir = self.packages_dir.join(arch.to_string());
        tokio::fs::create_dir_all(&dest_dir).await?;

        if built_dir.is_dir() {
            let mut entries = tokio::fs::read_dir(&built_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("apk") {
                    let dest = dest_dir.join(entry.file_name());
                    tokio::fs::rename(entry.path(), dest).await?;
                }
            }
        }

        chroot.run(vec!["apk".to_string(), "index".to_string(), "-o".to_string(), "APKINDEX.tar.gz".to_string()], false).await?;
        Ok(())
    }
}

fn strategy_env(strategy: Strategy, target_arch: Arch) -> Vec<(String, String)> {
    match strategy {
        Strategy::Native => Vec::new(),
        Strategy::CrossDirect => vec![
            ("CHOST".to_string(), target_arch.hostspec().to_string()),
            ("CTARGET".to_string(), target_arch.hostspec().to_string()),
        ],
        Strategy::DistccQemu => vec![
            ("DISTCC_HOSTS".to_string(), "127.0.0.1:3632/native".to_string()),
            ("CTARGET".to_string(), target_arch.hostspec().to_string()),
        ],
        Strategy::QemuOnly => vec![("CTARGET".to_string(), target_arch.hostspec().to_string())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmb_schema::ArchSpec;

    fn recipe(name: &str, version: &str, arch: Vec<ArchSpec>) -> Recipe {
        let (pkgver, pkgrel) = version.split_once("-r").unwrap();
        Recipe {
            pkgname: Pkgname::new(name),
            origin_repo: "main".to_string(),
            pkgver: pkgver.to_string(),
            pkgrel: pkgrel.parse().unwrap(),
            arch,
            depends: vec![],
            makedepends: vec![],
            checkdepends: vec![],
            subpackages: vec![],
            provides: vec![],
            sources: vec![],
            options: vec![],
        }
    }

    #[test]
    fn catalog_finds_by_subpackage() {
        let mut r = recipe("foo", "1.0-r0", vec![ArchSpec::All]);
        r.subpackages.push(pmb_schema::Subpackage {
            pkgname: Pkgname::new("foo-dev"),
            split_fn: "dev".to_string(),
        });
        let catalog = RecipeCatalog::new(vec![r]);
        assert_eq!(catalog.find(&Pkgname::new("foo-dev")).unwrap().pkgname.as_str(), "foo");
    }

    #[test]
    fn strategy_native_for_matching_arch() {
        let planner = Planner::new(RecipeCatalog::new(vec![]), Arc::new(dummy_manager()), HashMap::new(), PathBuf::from("/tmp"), HashMap::new());
        let r = recipe("foo", "1.0-r0", vec![ArchSpec::All]);
        assert_eq!(planner.select_strategy(&r, Arch::native()), Strategy::Native);
    }

    #[test]
    fn strategy_qemu_only_without_cross() {
        let foreign = if Arch::native() == Arch::X86_64 { Arch::Armv7 } else { Arch::X86_64 };
        let planner = Planner::new(RecipeCatalog::new(vec![]), Arc::new(dummy_manager()), HashMap::new(), PathBuf::from("/tmp"), HashMap::new());
        let r = recipe("foo", "1.0-r0", vec![ArchSpec::All]);
        assert_eq!(planner.select_strategy(&r, foreign), Strategy::QemuOnly);
    }

    fn dummy_manager() -> ChrootManager {
        let mounts = Arc::new(crate::mount::MountRegistry::new());
        let runner = Arc::new(crate::command::CommandRunner::new(Arc::new(crate::privilege::PrivilegeChannel::for_test()), mounts.clone()));
        ChrootManager::new(
            pmb_schema::ChrootId {
                kind: pmb_schema::ChrootKind::Native,
                arch: Arch::native(),
            },
            PathBuf::from("/tmp/pmb-test-nonexistent"),
            mounts,
            runner,
        )
    }

    fn index_entry(name: &str, version: &str, provides: Vec<&str>) -> pmb_schema::IndexEntry {
        pmb_schema::IndexEntry {
            pkgname: Pkgname::new(name),
            version: version.to_string(),
            arch: Arch::native(),
            provides: provides.into_iter().map(str::to_string).collect(),
            depends: vec![],
            origin: None,
            size: 0,
            checksum: pmb_schema::Sha256Digest::compute(name.as_bytes()),
        }
    }

    #[test]
    fn aport_overrides_index_when_newer_or_equal() {
        let r = recipe("foo", "1.1-r0", vec![ArchSpec::All]);
        let catalog = RecipeCatalog::new(vec![r]);
        let index = vec![index_entry("foo", "1.0-r5", vec![])];
        let source = CatalogSource::new(&catalog, &index);
        assert_eq!(source.version_of(&Pkgname::new("foo")), Some("1.1-r0"));
    }

    #[test]
    fn newer_index_wins_over_a_stale_aport() {
        let r = recipe("foo", "1.0-r0", vec![ArchSpec::All]);
        let catalog = RecipeCatalog::new(vec![r]);
        let index = vec![index_entry("foo", "1.1-r0", vec![])];
        let source = CatalogSource::new(&catalog, &index);
        assert_eq!(source.version_of(&Pkgname::new("foo")), Some("1.1-r0"));
    }

    #[test]
    fn provider_tie_break_prefers_higher_pkgver() {
        let catalog = RecipeCatalog::new(vec![]);
        let index = vec![
            index_entry("libfoo1", "1.0-r0", vec!["libfoo"]),
            index_entry("libfoo2", "2.0-r0", vec!["libfoo"]),
        ];
        let source = CatalogSource::new(&catalog, &index);
        assert_eq!(source.resolve_provider(&Pkgname::new("libfoo")).unwrap().as_str(), "libfoo2");
    }

    #[test]
    fn provider_tie_break_prefers_lower_pkgrel_on_equal_pkgver() {
        let catalog = RecipeCatalog::new(vec![]);
        let index = vec![
            index_entry("libfoo1", "1.0-r5", vec!["libfoo"]),
            index_entry("libfoo2", "1.0-r1", vec!["libfoo"]),
        ];
        let source = CatalogSource::new(&catalog, &index);
        assert_eq!(source.resolve_provider(&Pkgname::new("libfoo")).unwrap().as_str(), "libfoo2");
    }

    #[test]
    fn provider_tie_break_prefers_aport_over_index_on_equal_version() {
        let mut r = recipe("libfoo-aport", "1.0-r0", vec![ArchSpec::All]);
        r.provides.push("libfoo".to_string());
        let catalog = RecipeCatalog::new(vec![r]);
        let index = vec![index_entry("libfoo-index", "1.0-r0", vec!["libfoo"])];
        let source = CatalogSource::new(&catalog, &index);
        assert_eq!(source.resolve_provider(&Pkgname::new("libfoo")).unwrap().as_str(), "libfoo-aport");
    }
}

//! Dependency graph value types shared between the resolver and the build
//! planner.

use crate::types::{Pkgname, Requirement};

/// A single edge in the dependency graph: a consumer package and the
/// requirement it declares on another package or virtual provider.
#[derive(Debug, Clone)]
pub struct DependencyEdge {
    /// The package declaring the requirement.
    pub consumer: Pkgname,
    /// The requirement being declared.
    pub requirement: Requirement,
}

/// A resolver's choice of concrete version for one package, satisfying every
/// constraint gathered against it.
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    /// The package name.
    pub pkgname: Pkgname,
    /// The chosen version string.
    pub version: String,
    /// True if this entry came from a recipe that still needs building,
    /// false if an existing `APKINDEX` entry already satisfies it.
    pub needs_build: bool,
}

/// The full output of one dependency resolution pass: a topologically
/// sorted build order plus the chosen version for every package touched.
#[derive(Debug, Clone, Default)]
pub struct ResolutionResult {
    /// The chosen version for every package touched by resolution.
    pub chosen: Vec<ResolvedPackage>,
    /// Build order layers: packages within a layer have no dependency on
    /// each other and so may be built in parallel.
    pub build_layers: Vec<Vec<Pkgname>>,
}

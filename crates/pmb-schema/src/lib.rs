//! Shared value types and the error taxonomy for pmbootstrap.
//!
//! This crate defines the canonical data structures used across
//! `pmb_core` and `pmb_cli`: architectures, the Alpine version algebra,
//! recipe/index records, dependency graph edges, mount/chroot identity, the
//! configuration record, and checksum newtypes. None of it touches the
//! filesystem or a subprocess — that lives in `pmb_core`.

/// CPU architecture representation and `arch=` wildcard matching.
pub mod arch;
/// The `APKBUILD` recipe record.
pub mod apkbuild;
/// The `APKINDEX` record.
pub mod apkindex;
/// The persisted configuration record.
pub mod config;
/// Dependency graph value types shared by the resolver and planner.
pub mod depgraph;
/// The crate-wide error taxonomy.
pub mod error;
/// Typed wrappers for SHA-256/SHA-512 checksums.
pub mod hash;
/// Mount record and chroot identity types.
pub mod mount;
/// Small shared value types (package names, dependency requirements).
pub mod types;
/// Alpine package version parsing, comparison, and constraint matching.
pub mod version;

pub use arch::{Arch, ArchSpec, UnknownArch};
pub use apkbuild::{ChecksumEntry, Recipe, RecipeOption, SourceEntry, Subpackage};
pub use apkindex::IndexEntry;
pub use config::Config;
pub use depgraph::{DependencyEdge, ResolutionResult, ResolvedPackage};
pub use error::PmbError;
pub use hash::{DigestError, Sha256Digest, Sha512Digest};
pub use mount::{ChrootId, ChrootKind, MountKind, MountRecord};
pub use types::{DependencyKind, Pkgname, Requirement};
pub use version::{AlpineVersion, Constraint, VersionError};

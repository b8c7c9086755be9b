//! The `APKINDEX` record.
//!
//! `APKINDEX` files are single-letter-keyed text records (`P:`, `V:`, `A:`,
//! ...), one blank-line-terminated block per package. Parsing lives in
//! `pmb_core::apkindex`; this is the value type it produces.

use crate::arch::Arch;
use crate::hash::Sha256Digest;
use crate::types::Pkgname;

/// One package entry read from an `APKINDEX.tar.gz`.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// The package name.
    pub pkgname: Pkgname,
    /// Combined `pkgver-pkgrel` string, e.g. `1.2.3-r4`.
    pub version: String,
    /// The architecture this entry was built for.
    pub arch: Arch,
    /// Names this package provides.
    pub provides: Vec<String>,
    /// This package's runtime dependencies.
    pub depends: Vec<String>,
    /// The recipe this entry was built from, if recorded (`o:` line).
    pub origin: Option<String>,
    /// The package file size in bytes.
    pub size: u64,
    /// The package file's checksum.
    pub checksum: Sha256Digest,
}

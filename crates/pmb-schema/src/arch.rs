//! CPU architecture handling for chroots and cross builds.
//!
//! pmbootstrap juggles the host's architecture and a target device's
//! architecture simultaneously; this module gives both a single closed-set
//! representation plus the two derived attributes recipes and cross
//! toolchains actually need: a kernel (`uname -m`) name and a GNU `hostspec`
//! triplet.
//!
//! # Example
//!
//! ```
//! use pmb_schema::Arch;
//!
//! let a = Arch::Armhf;
//! assert_eq!(a.kernel_name(), "armv6l");
//! assert_eq!(a.hostspec(), "armv6-alpine-linux-musleabihf");
//! ```

use std::fmt;
use std::str::FromStr;

/// One of the architectures pmbootstrap knows how to build for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// 32-bit x86.
    X86,
    /// 64-bit x86.
    X86_64,
    /// 32-bit ARM, hard-float (armv6).
    Armhf,
    /// 32-bit ARM, v7.
    Armv7,
    /// 64-bit ARM.
    Aarch64,
    /// 64-bit RISC-V.
    Riscv64,
    /// 64-bit PowerPC, little-endian.
    Ppc64le,
    /// IBM Z (s390x).
    S390x,
    /// 64-bit little-endian MIPS.
    Mips64el,
}

impl Arch {
    /// All architectures pmbootstrap recognizes, in a stable order.
    pub const ALL: [Arch; 9] = [
        Arch::X86,
        Arch::X86_64,
        Arch::Armhf,
        Arch::Armv7,
        Arch::Aarch64,
        Arch::Riscv64,
        Arch::Ppc64le,
        Arch::S390x,
        Arch::Mips64el,
    ];

    /// The Alpine `apkbuild`/`APKINDEX` arch tag (e.g. `x86_64`, `armhf`).
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
            Arch::Armhf => "armhf",
            Arch::Armv7 => "armv7",
            Arch::Aarch64 => "aarch64",
            Arch::Riscv64 => "riscv64",
            Arch::Ppc64le => "ppc64le",
            Arch::S390x => "s390x",
            Arch::Mips64el => "mips64el",
        }
    }

    /// The `uname -m` style kernel name reported inside a chroot of this arch.
    pub fn kernel_name(self) -> &'static str {
        match self {
            Arch::X86 => "i686",
            Arch::X86_64 => "x86_64",
            Arch::Armhf => "armv6l",
            Arch::Armv7 => "armv7l",
            Arch::Aarch64 => "aarch64",
            Arch::Riscv64 => "riscv64",
            Arch::Ppc64le => "ppc64le",
            Arch::S390x => "s390x",
            Arch::Mips64el => "mips64el",
        }
    }

    /// The GNU triplet (`CHOST`/`CTARGET`) used by cross toolchains.
    pub fn hostspec(self) -> &'static str {
        match self {
            Arch::X86 => "i586-alpine-linux-musl",
            Arch::X86_64 => "x86_64-alpine-linux-musl",
            Arch::Armhf => "armv6-alpine-linux-musleabihf",
            Arch::Armv7 => "armv7-alpine-linux-musleabihf",
            Arch::Aarch64 => "aarch64-alpine-linux-musl",
            Arch::Riscv64 => "riscv64-alpine-linux-musl",
            Arch::Ppc64le => "powerpc64le-alpine-linux-musl",
            Arch::S390x => "s390x-alpine-linux-musl",
            Arch::Mips64el => "mips64el-alpine-linux-musl",
        }
    }

    /// Detect the architecture of the host this process runs on.
    ///
    /// # Panics
    ///
    /// Panics if the host's `std::env::consts::ARCH` is not one pmbootstrap
    /// knows how to build for.
    pub fn native() -> Self {
        match std::env::consts::ARCH {
            "x86" => Arch::X86,
            "x86_64" => Arch::X86_64,
            "arm" => Arch::Armv7,
            "aarch64" => Arch::Aarch64,
            "riscv64" => Arch::Riscv64,
            "powerpc64" => Arch::Ppc64le,
            "s390x" => Arch::S390x,
            "mips64" => Arch::Mips64el,
            other => panic!("unsupported host architecture: {other}"),
        }
    }

    /// Whether this architecture matches the host pmbootstrap is running on.
    pub fn is_native(self) -> bool {
        self == Arch::native()
    }

    /// Whether this architecture requires emulation/cross-compilation from
    /// the host pmbootstrap is running on.
    pub fn is_foreign(self) -> bool {
        !self.is_native()
    }

    /// The cross-compiler aport name expected for building *for* this arch
    /// (e.g. `gcc-armhf`), used by the cross-direct strategy.
    pub fn cross_gcc_pkgname(self) -> String {
        format!("gcc-{self}")
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a string does not name a known [`Arch`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown architecture: {0}")]
pub struct UnknownArch(pub String);

impl FromStr for Arch {
    type Err = UnknownArch;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86" => Ok(Arch::X86),
            "x86_64" => Ok(Arch::X86_64),
            "armhf" => Ok(Arch::Armhf),
            "armv7" => Ok(Arch::Armv7),
            "aarch64" => Ok(Arch::Aarch64),
            "riscv64" => Ok(Arch::Riscv64),
            "ppc64le" => Ok(Arch::Ppc64le),
            "s390x" => Ok(Arch::S390x),
            "mips64el" => Ok(Arch::Mips64el),
            other => Err(UnknownArch(other.to_string())),
        }
    }
}

/// Arch wildcards/negations as they appear in an APKBUILD `arch=` line.
///
/// `all`/`noarch` match any [`Arch`]; `!armhf` excludes one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchSpec {
    /// Matches every architecture (`all` or `noarch`).
    All,
    /// Matches exactly this architecture.
    Only(Arch),
    /// Matches every architecture except this one (`!armhf`).
    Not(Arch),
}

impl ArchSpec {
    /// Parse a single whitespace-delimited token from an APKBUILD `arch=` line.
    pub fn parse(token: &str) -> Option<Self> {
        if token == "all" || token == "noarch" {
            return Some(ArchSpec::All);
        }
        if let Some(rest) = token.strip_prefix('!') {
            return Arch::from_str(rest).ok().map(ArchSpec::Not);
        }
        Arch::from_str(token).ok().map(ArchSpec::Only)
    }
}

/// Decide whether a recipe's `arch=` list permits building for `target`.
///
/// Per spec: any `Not(target)` entry excludes it outright regardless of
/// other entries; otherwise an `All`/`Only(target)` entry must be present.
pub fn arch_list_permits(specs: &[ArchSpec], target: Arch) -> bool {
    if specs.iter().any(|s| *s == ArchSpec::Not(target)) {
        return false;
    }
    specs.iter().any(|s| match s {
        ArchSpec::All => true,
        ArchSpec::Only(a) => *a == target,
        ArchSpec::Not(_) => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostspec_matches_known_triplets() {
        assert_eq!(Arch::Armv7.hostspec(), "armv7-alpine-linux-musleabihf");
        assert_eq!(Arch::Aarch64.hostspec(), "aarch64-alpine-linux-musl");
    }

    #[test]
    fn roundtrip_as_str() {
        for a in Arch::ALL {
            assert_eq!(Arch::from_str(a.as_str()).unwrap(), a);
        }
    }

    #[test]
    fn arch_spec_negation_wins() {
        let specs = vec![ArchSpec::All, ArchSpec::Not(Arch::Armhf)];
        assert!(!arch_list_permits(&specs, Arch::Armhf));
        assert!(arch_list_permits(&specs, Arch::X86_64));
    }

    #[test]
    fn arch_spec_only() {
        let specs = vec![ArchSpec::Only(Arch::Aarch64)];
        assert!(arch_list_permits(&specs, Arch::Aarch64));
        assert!(!arch_list_permits(&specs, Arch::X86_64));
    }

    #[test]
    fn unknown_arch_rejected() {
        assert!(Arch::from_str("sparc64").is_err());
    }
}

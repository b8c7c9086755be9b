//! Small shared value types used across the recipe, index, and dependency
//! graph modules.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// A normalized Alpine package name (`pkgname`), lowercase by Alpine
/// convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pkgname(String);

impl Pkgname {
    /// Build a `Pkgname`, lowercasing the input to match Alpine's naming rule.
    pub fn new(name: &str) -> Self {
        Self(name.to_lowercase())
    }

    /// The package name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pkgname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for Pkgname {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for Pkgname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Pkgname {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Pkgname {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl PartialEq<&str> for Pkgname {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl From<&str> for Pkgname {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Pkgname {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

/// The three dependency relations a recipe can declare, distinguished by the
/// resolver because only `makedepends` cycles are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// `depends=`: runtime dependency, may legally form cycles.
    Runtime,
    /// `makedepends=`: build-time dependency, must be acyclic.
    Make,
    /// `checkdepends=`: only needed for the `check()` function.
    Check,
}

/// A single parsed dependency token, e.g. `musl>=1.2.0` split into name and
/// constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// The required package or provider name.
    pub name: Pkgname,
    /// The version constraint, if any.
    pub constraint: crate::version::Constraint,
    /// Which APKBUILD array this requirement came from.
    pub kind: DependencyKind,
}

impl Requirement {
    /// Parse a single dependency token (no `kind` context; caller assigns it
    /// based on which APKBUILD array it came from).
    ///
    /// # Errors
    ///
    /// Returns an error if the token has a version comparator but a
    /// malformed version operand.
    pub fn parse(token: &str, kind: DependencyKind) -> Result<Self, crate::version::VersionError> {
        let split_at = token
            .find(|c: char| matches!(c, '>' | '<' | '=' | '~'))
            .unwrap_or(token.len());
        let (name, rest) = token.split_at(split_at);
        Ok(Requirement {
            name: Pkgname::new(name),
            constraint: crate::version::Constraint::parse(rest)?,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkgname_lowercases() {
        assert_eq!(Pkgname::new("MyPkg").as_str(), "mypkg");
    }

    #[test]
    fn pkgname_eq_str_is_case_insensitive() {
        assert_eq!(Pkgname::new("busybox"), "BusyBox");
    }

    #[test]
    fn requirement_parses_bare_name() {
        let r = Requirement::parse("musl", DependencyKind::Runtime).unwrap();
        assert_eq!(r.name.as_str(), "musl");
        assert_eq!(r.constraint, crate::version::Constraint::Any);
    }

    #[test]
    fn requirement_parses_versioned_token() {
        let r = Requirement::parse("musl>=1.2.0", DependencyKind::Make).unwrap();
        assert_eq!(r.name.as_str(), "musl");
        assert!(r.constraint.matches("1.2.0"));
    }
}

//! Alpine package version comparison.
//!
//! Alpine versions are not semver: `1.2.3_alpha1-r4` is a dotted numeric
//! stem, an optional single-letter suffix, zero or more `_suffix<n>`
//! pre/post-release tags ordered `alpha < beta < pre < rc < (none) < cvs <
//! svn < git < hg < p`, and a trailing `-r<rel>` package revision ("pkgrel").
//! This is its own module, hand-rolled, because `semver` cannot parse or
//! order any of that.

use std::cmp::Ordering;
use std::fmt;

/// A parsed Alpine package version, e.g. `1.2.3_alpha1-r4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlpineVersion {
    raw: String,
    numeric: Vec<u64>,
    letter: Option<char>,
    suffixes: Vec<(Suffix, u64)>,
    pkgrel: u64,
}

/// Ordered pre/post-release tags, per `apk`'s `version_compare`.
///
/// `Release` is the implicit "no suffix" position between `rc` and `cvs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Suffix {
    Alpha,
    Beta,
    Pre,
    Rc,
    Release,
    Cvs,
    Svn,
    Git,
    Hg,
    P,
}

impl Suffix {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "alpha" => Some(Suffix::Alpha),
            "beta" => Some(Suffix::Beta),
            "pre" => Some(Suffix::Pre),
            "rc" => Some(Suffix::Rc),
            "cvs" => Some(Suffix::Cvs),
            "svn" => Some(Suffix::Svn),
            "git" => Some(Suffix::Git),
            "hg" => Some(Suffix::Hg),
            "p" => Some(Suffix::P),
            _ => None,
        }
    }
}

/// Error parsing an Alpine version string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed alpine version: {0}")]
pub struct VersionError(pub String);

impl AlpineVersion {
    /// Parse a version string as it appears in an APKBUILD `pkgver`/`pkgrel`
    /// pair, or the combined `pkgver-r<pkgrel>` form from an `APKINDEX`.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let raw = s.to_string();
        let (body, pkgrel) = match s.rsplit_once("-r") {
            Some((body, rel)) if rel.chars().all(|c| c.is_ascii_digit()) && !rel.is_empty() => {
                (body, rel.parse().unwrap_or(0))
            }
            _ => (s, 0),
        };

        if body.is_empty() {
            return Err(VersionError(raw));
        }

        let mut parts = body.split('_');
        let stem = parts.next().unwrap();
        if stem.is_empty() || !stem.chars().next().unwrap().is_ascii_digit() {
            return Err(VersionError(raw));
        }

        let mut numeric = Vec::new();
        let mut letter = None;
        for (i, seg) in stem.split('.').enumerate() {
            let digits: String = seg.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                return Err(VersionError(raw));
            }
            numeric.push(digits.parse::<u64>().map_err(|_| VersionError(raw.clone()))?);
            let rest = &seg[digits.len()..];
            if !rest.is_empty() {
                if i + 1 == stem.split('.').count() && rest.len() == 1 && rest.chars().all(|c| c.is_ascii_alphabetic())
                {
                    letter = rest.chars().next();
                } else {
                    return Err(VersionError(raw));
                }
            }
        }

        let mut suffixes = Vec::new();
        for tag in parts {
            let alpha_len = tag.chars().take_while(|c| c.is_ascii_alphabetic()).count();
            let (name, num) = tag.split_at(alpha_len);
            let suffix = Suffix::from_tag(name).ok_or_else(|| VersionError(raw.clone()))?;
            let n: u64 = if num.is_empty() {
                0
            } else {
                num.parse().map_err(|_| VersionError(raw.clone()))?
            };
            suffixes.push((suffix, n));
        }

        Ok(AlpineVersion {
            raw,
            numeric,
            letter,
            suffixes,
            pkgrel,
        })
    }

    /// The package revision (`-r<N>` suffix), zero if absent.
    pub fn pkgrel(&self) -> u64 {
        self.pkgrel
    }

    /// The original string this was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Construct the next `pkgrel` bump of this version as a new string,
    /// e.g. `1.2.3-r4` -> `1.2.3-r5`. Used by the `pkgrel_bump` operation.
    pub fn bumped(&self) -> String {
        let body = self.raw.rsplit_once("-r").map_or(self.raw.as_str(), |(b, _)| b);
        format!("{body}-r{}", self.pkgrel + 1)
    }

    /// Compare only the `pkgver` portion (numeric segments, trailing
    /// letter, pre/post-release suffixes), ignoring `pkgrel`. Provider
    /// tie-breaking treats the two as separate criteria: higher `pkgver`
    /// wins outright, and `pkgrel` only decides a `pkgver` tie.
    pub fn pkgver_cmp(&self, other: &Self) -> Ordering {
        compare_pkgver(self, other)
    }
}

fn compare_pkgver(a: &AlpineVersion, b: &AlpineVersion) -> Ordering {
    let len = a.numeric.len().max(b.numeric.len());
    for i in 0..len {
        let x = a.numeric.get(i).copied().unwrap_or(0);
        let y = b.numeric.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other_ord => return other_ord,
        }
    }

    match a.letter.cmp(&b.letter) {
        Ordering::Equal => {}
        o => return o,
    }

    suffix_key(&a.suffixes).cmp(&suffix_key(&b.suffixes))
}

impl fmt::Display for AlpineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn suffix_key(suffixes: &[(Suffix, u64)]) -> Vec<(Suffix, u64)> {
    if suffixes.is_empty() {
        vec![(Suffix::Release, 0)]
    } else {
        suffixes.to_vec()
    }
}

impl PartialOrd for AlpineVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AlpineVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match compare_pkgver(self, other) {
            Ordering::Equal => self.pkgrel.cmp(&other.pkgrel),
            o => o,
        }
    }
}

/// A version constraint from an APKBUILD `depends=`/`makedepends=` entry,
/// e.g. `musl>=1.2.0` or `busybox~1.36`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// No version requirement.
    Any,
    /// `=`: exact version match.
    Eq(String),
    /// `<`: strictly less than.
    Lt(String),
    /// `<=`: less than or equal to.
    Le(String),
    /// `>`: strictly greater than.
    Gt(String),
    /// `>=`: greater than or equal to.
    Ge(String),
    /// `><`: fuzzy not-equal, Alpine's inequality constraint.
    Ne(String),
    /// `~`: fuzzy match, same semantics as [`Constraint::Fuzzy`] in Alpine's `apk`.
    Fuzzy(String),
    /// `=~` / prefix match used for `-dev`-style loose pinning.
    Tilde(String),
}

impl Constraint {
    /// Parse the version-comparison portion of a dependency token, e.g. the
    /// `>=1.2.0` in `musl>=1.2.0`. Returns [`Constraint::Any`] if `rest` is
    /// empty (no version requirement given).
    pub fn parse(rest: &str) -> Result<Self, VersionError> {
        if rest.is_empty() {
            return Ok(Constraint::Any);
        }
        let ops: &[(&str, fn(String) -> Constraint)] = &[
            (">=", Constraint::Ge as fn(String) -> Constraint),
            ("<=", Constraint::Le as fn(String) -> Constraint),
            ("><", Constraint::Ne as fn(String) -> Constraint),
            ("=~", Constraint::Tilde as fn(String) -> Constraint),
            ("~", Constraint::Fuzzy as fn(String) -> Constraint),
            ("=", Constraint::Eq as fn(String) -> Constraint),
            (">", Constraint::Gt as fn(String) -> Constraint),
            ("<", Constraint::Lt as fn(String) -> Constraint),
        ];
        for (op, ctor) in ops {
            if let Some(ver) = rest.strip_prefix(*op) {
                if ver.is_empty() {
                    return Err(VersionError(rest.to_string()));
                }
                return Ok(ctor(ver.to_string()));
            }
        }
        Err(VersionError(rest.to_string()))
    }

    /// Whether `candidate` satisfies this constraint.
    pub fn matches(&self, candidate: &str) -> bool {
        let Ok(cand) = AlpineVersion::parse(candidate) else {
            return false;
        };
        match self {
            Constraint::Any => true,
            Constraint::Eq(v) => AlpineVersion::parse(v).is_ok_and(|v| v == cand),
            Constraint::Lt(v) => AlpineVersion::parse(v).is_ok_and(|v| cand < v),
            Constraint::Le(v) => AlpineVersion::parse(v).is_ok_and(|v| cand <= v),
            Constraint::Gt(v) => AlpineVersion::parse(v).is_ok_and(|v| cand > v),
            Constraint::Ge(v) => AlpineVersion::parse(v).is_ok_and(|v| cand >= v),
            Constraint::Ne(v) => AlpineVersion::parse(v).is_ok_and(|v| v != cand),
            Constraint::Fuzzy(v) | Constraint::Tilde(v) => candidate.starts_with(v.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> AlpineVersion {
        AlpineVersion::parse(s).unwrap()
    }

    #[test]
    fn numeric_ordering() {
        assert!(v("1.2.3") < v("1.2.4"));
        assert!(v("1.9.0") < v("1.10.0"));
    }

    #[test]
    fn suffix_ordering_alpha_before_beta() {
        assert!(v("1.0_alpha1") < v("1.0_beta1"));
        assert!(v("1.0_rc1") < v("1.0"));
        assert!(v("1.0") < v("1.0_git1"));
    }

    #[test]
    fn pkgrel_breaks_ties() {
        assert!(v("1.0-r1") < v("1.0-r2"));
        assert_eq!(v("1.0-r0").pkgrel(), 0);
    }

    #[test]
    fn trailing_letter_orders_after_bare() {
        assert!(v("1.0") < v("1.0a"));
        assert!(v("1.0a") < v("1.0b"));
    }

    #[test]
    fn bumped_increments_pkgrel() {
        assert_eq!(v("1.2.3-r4").bumped(), "1.2.3-r5");
        assert_eq!(v("1.2.3").bumped(), "1.2.3-r1");
    }

    #[test]
    fn malformed_versions_rejected() {
        assert!(AlpineVersion::parse("").is_err());
        assert!(AlpineVersion::parse("abc").is_err());
    }

    #[test]
    fn constraint_ge_matches() {
        let c = Constraint::parse(">=1.2.0").unwrap();
        assert!(c.matches("1.2.0"));
        assert!(c.matches("1.3.0"));
        assert!(!c.matches("1.1.0"));
    }

    #[test]
    fn constraint_any_on_empty() {
        assert_eq!(Constraint::parse("").unwrap(), Constraint::Any);
        assert!(Constraint::Any.matches("anything-r9"));
    }

    #[test]
    fn constraint_fuzzy_is_prefix() {
        let c = Constraint::parse("~1.36").unwrap();
        assert!(c.matches("1.36.1-r0"));
        assert!(!c.matches("1.37.0-r0"));
    }

    #[test]
    fn constraint_ne_excludes_the_named_version() {
        let c = Constraint::parse("><1.2.3").unwrap();
        assert_eq!(c, Constraint::Ne("1.2.3".to_string()));
        assert!(!c.matches("1.2.3"));
        assert!(c.matches("1.2.4"));
        assert!(c.matches("1.2.2"));
    }
}

//! Typed wrappers for the checksums recorded in APKBUILD `sha512sums`/
//! `sha256sums` arrays and `APKINDEX` `C:` lines.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A validated SHA-256 digest (64 hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

/// A validated SHA-512 digest (128 hex characters), the default checksum
/// algorithm for APKBUILD `source=` entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha512Digest(String);

/// Error returned when a digest string is the wrong length or contains
/// non-hex characters.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {algo} digest: expected {expected} hex characters, got {actual} in '{input}'")]
pub struct DigestError {
    algo: &'static str,
    expected: usize,
    actual: usize,
    input: String,
}

macro_rules! digest_newtype {
    ($name:ident, $algo:literal, $len:literal, $hasher:ty) => {
        impl $name {
            /// Validate and wrap a hex digest string.
            ///
            /// # Errors
            ///
            /// Returns [`DigestError`] if `s` is not exactly the expected
            /// number of ASCII hex characters.
            pub fn new(s: impl Into<String>) -> Result<Self, DigestError> {
                let s = s.into();
                if s.len() != $len || !s.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(DigestError {
                        algo: $algo,
                        expected: $len,
                        actual: s.len(),
                        input: s,
                    });
                }
                Ok(Self(s.to_lowercase()))
            }

            /// The digest as a lowercase hex string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Compute the digest of a byte slice.
            pub fn compute(data: &[u8]) -> Self {
                use sha2::Digest as _;
                Self(hex::encode(<$hasher>::digest(data)))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::new(s).map_err(serde::de::Error::custom)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

digest_newtype!(Sha256Digest, "sha256", 64, sha2::Sha256);
digest_newtype!(Sha512Digest, "sha512", 128, sha2::Sha512);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_compute_roundtrips_length() {
        let d = Sha256Digest::compute(b"hello world");
        assert_eq!(d.as_str().len(), 64);
    }

    #[test]
    fn sha512_compute_roundtrips_length() {
        let d = Sha512Digest::compute(b"hello world");
        assert_eq!(d.as_str().len(), 128);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Sha256Digest::new("deadbeef").is_err());
    }

    #[test]
    fn rejects_non_hex() {
        let bad = "z".repeat(64);
        assert!(Sha256Digest::new(bad).is_err());
    }

    #[test]
    fn deterministic() {
        let a = Sha256Digest::compute(b"same input");
        let b = Sha256Digest::compute(b"same input");
        assert_eq!(a, b);
    }
}

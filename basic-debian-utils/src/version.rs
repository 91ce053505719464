// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: LGPL-3.0-or-later

//! # Version handling
//!
//! This module handles versions of Debian packages, including the full dpkg
//! comparison algorithm.
//!
//! ```
//! use basic_debian_utils::version::Version;
//!
//! let ver1 = Version::try_from("1.0-2").expect("Failed to parse version");
//! assert_eq!(ver1.to_string(), "1.0-2");
//! assert!(!ver1.has_epoch());
//!
//! let ver2 = Version::try_from("1:0.2~rc1").expect("Failed to parse version");
//! assert!(ver2.has_epoch());
//! assert!(ver1 < ver2);
//! ```

use std::{
    cmp::Ordering,
    fmt::{self, Display},
};

use serde::{Deserialize, Serialize, de};
use thiserror::Error;

/// Version errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    /// Epoch is not a small decimal integer
    #[error("Invalid epoch '{0}'")]
    InvalidEpoch(String),
    /// Upstream version violates the allowed syntax
    #[error("Invalid upstream version syntax '{0}'")]
    InvalidUpstreamVersion(String),
    /// Upstream version contains a colon although the epoch is zero
    #[error("Invalid upstream version '{0}', it should not contain a colon since epoch is 0")]
    ColonWithoutEpoch(String),
    /// Upstream version contains a hyphen although the revision is zero
    #[error("Invalid upstream version '{0}', it should not contain an hyphen since debian revision is 0")]
    HyphenWithoutRevision(String),
}

/// A version number of a Debian package
///
/// Version numbers consist of three components: an epoch defaulting to 0, the
/// upstream version, and a Debian revision defaulting to `"0"`. The textual
/// form omits a zero epoch and a zero revision.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Version {
    /// The epoch, 0 if not present
    pub epoch: u32,
    /// The upstream version, never empty
    pub upstream: String,
    /// The Debian revision, `"0"` if not present
    pub revision: String,
}

fn valid_upstream(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || ".+~:-".contains(c))
}

fn valid_revision(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || ".+~".contains(c))
}

impl Version {
    /// Parse a textual version into its components.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let mut epoch = 0;
        let mut rest = s;
        if let Some((prefix, suffix)) = s.split_once(':') {
            if !prefix.is_empty()
                && !prefix.starts_with('0')
                && prefix.chars().all(|c| c.is_ascii_digit())
            {
                epoch = prefix
                    .parse::<u32>()
                    .map_err(|_| VersionError::InvalidEpoch(prefix.to_owned()))?;
                rest = suffix;
            }
        }

        let mut revision = "0";
        if let Some((prefix, suffix)) = rest.rsplit_once('-') {
            if valid_revision(suffix) {
                revision = suffix;
                rest = prefix;
            }
        }

        if !valid_upstream(rest) {
            return Err(VersionError::InvalidUpstreamVersion(rest.to_owned()));
        }
        if epoch == 0 && rest.contains(':') {
            return Err(VersionError::ColonWithoutEpoch(rest.to_owned()));
        }
        if revision == "0" && rest.contains('-') {
            return Err(VersionError::HyphenWithoutRevision(rest.to_owned()));
        }

        Ok(Self {
            epoch,
            upstream: rest.to_owned(),
            revision: revision.to_owned(),
        })
    }

    /// Return whether the version has a non-zero epoch.
    pub fn has_epoch(&self) -> bool {
        self.epoch != 0
    }

    /// Return whether the version has a non-zero Debian revision.
    pub fn has_revision(&self) -> bool {
        self.revision != "0"
    }
}

impl TryFrom<&str> for Version {
    type Error = VersionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.upstream)?;
        if self.revision != "0" {
            write!(f, "-{}", self.revision)?;
        }
        Ok(())
    }
}

// Character weight of the dpkg algorithm: tilde sorts before everything
// including the end of the string, letters before all other characters.
fn char_order(c: u8) -> i32 {
    match c {
        b'~' => -1,
        b'0'..=b'9' => 0,
        b'a'..=b'z' | b'A'..=b'Z' => i32::from(c),
        _ => i32::from(c) + 256,
    }
}

fn compare_part(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let wa = if i < a.len() { char_order(a[i]) } else { 0 };
            let wb = if j < b.len() { char_order(b[j]) } else { 0 };
            if wa != wb {
                return wa.cmp(&wb);
            }
            if i < a.len() {
                i += 1;
            }
            if j < b.len() {
                j += 1;
            }
        }

        while i < a.len() && a[i] == b'0' {
            i += 1;
        }
        while j < b.len() && b[j] == b'0' {
            j += 1;
        }

        let mut first_diff = Ordering::Equal;
        while i < a.len() && a[i].is_ascii_digit() && j < b.len() && b[j].is_ascii_digit() {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }
        if i < a.len() && a[i].is_ascii_digit() {
            return Ordering::Greater;
        }
        if j < b.len() && b[j].is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }
    Ordering::Equal
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_part(&self.upstream, &other.upstream))
            .then_with(|| compare_part(&self.revision, &other.revision))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct VersionVisitor;

        impl de::Visitor<'_> for VersionVisitor {
            type Value = Version;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a version string")
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Version::parse(s)
                    .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(s), &self))
            }
        }

        deserializer.deserialize_str(VersionVisitor)
    }
}

#[cfg(test)]
mod test {
    use super::{Version, VersionError};

    #[test]
    fn conversion() {
        let version = Version::try_from("3:1.2.3~4-1").unwrap();
        assert_eq!(version.epoch, 3);
        assert_eq!(version.upstream, "1.2.3~4");
        assert_eq!(version.revision, "1");
        assert_eq!(version.to_string(), "3:1.2.3~4-1");
    }

    #[test]
    fn defaults_are_omitted() {
        let version = Version::try_from("1.0").unwrap();
        assert_eq!(version.epoch, 0);
        assert_eq!(version.revision, "0");
        assert_eq!(version.to_string(), "1.0");
    }

    #[test]
    fn colon_without_epoch() {
        assert_eq!(
            Version::try_from("1.2.3:4-1").unwrap_err(),
            VersionError::ColonWithoutEpoch("1.2.3:4".into())
        );
        assert_eq!(
            Version::try_from("1.2.3:4-1").unwrap_err().to_string(),
            "Invalid upstream version '1.2.3:4', it should not contain a colon since epoch is 0"
        );
    }

    #[test]
    fn hyphen_without_revision() {
        // the trailing dash makes the revision match fail, so the hyphens
        // stay in the upstream part
        assert_eq!(
            Version::try_from("1.0-2-").unwrap_err(),
            VersionError::HyphenWithoutRevision("1.0-2-".into())
        );
    }

    #[test]
    fn invalid_upstream_version() {
        assert!(Version::try_from("").is_err());
        assert!(Version::try_from("abc").is_err());
        assert!(Version::try_from("1.0!2").is_err());
    }

    #[test]
    fn multi_dash() {
        let version = Version::try_from("1.0-2-1").unwrap();
        assert_eq!(version.upstream, "1.0-2");
        assert_eq!(version.revision, "1");
    }

    #[test]
    fn epoch_compare() {
        let version1 = Version::try_from("2.0-1").unwrap();
        let version2 = Version::try_from("2:1.0-1").unwrap();
        assert!(version1 < version2);
    }

    #[test]
    fn tilde_sorts_before_empty() {
        assert!(Version::try_from("1.0~rc1").unwrap() < Version::try_from("1.0").unwrap());
        assert!(Version::try_from("1.0~~").unwrap() < Version::try_from("1.0~").unwrap());
        assert!(Version::try_from("1.0~rc1-1").unwrap() < Version::try_from("1.0-1").unwrap());
    }

    #[test]
    fn digits_compare_numerically() {
        assert!(Version::try_from("1.9").unwrap() < Version::try_from("1.10").unwrap());
        assert_eq!(
            Version::try_from("1.01")
                .unwrap()
                .cmp(&Version::try_from("1.1").unwrap()),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn letters_before_non_letters() {
        assert!(Version::try_from("1.0a").unwrap() < Version::try_from("1.0+b").unwrap());
    }

    #[test]
    fn revision_compare() {
        assert!(Version::try_from("1.0-1").unwrap() < Version::try_from("1.0-2").unwrap());
        assert!(Version::try_from("1.0").unwrap() < Version::try_from("1.0-1").unwrap());
    }

    #[test]
    fn roundtrip() {
        for s in ["3:1.2.3~4-1", "1.0", "1.0-1", "2:4.4+dfsg-1ubuntu2"] {
            let version = Version::try_from(s).unwrap();
            assert_eq!(Version::try_from(version.to_string().as_str()).unwrap(), version);
        }
    }
}

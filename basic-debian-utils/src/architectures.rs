// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: LGPL-3.0-or-later

//! # Helpers to handle Debian architectures
//!
//! This module provides the closed set of architectures known to the build
//! pipeline. `Any` and `All` are wildcards that only appear in manifests;
//! `Source` marks source uploads in `.changes` architecture lists.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use crate::ParseError;

/// Debian architectures
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Hash, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// The `any` wildcard for any architecture-dependent target
    Any,
    /// The `all` architecture for architecture independent packages
    All,
    /// The `source` pseudo architecture of source uploads
    Source,
    /// The `amd64` architecture
    Amd64,
    /// The `i386` architecture
    I386,
    /// The `armel` architecture
    Armel,
}

impl Architecture {
    /// Return whether this is a real build target rather than a manifest
    /// wildcard or the source pseudo architecture.
    pub fn is_concrete(self) -> bool {
        !matches!(
            self,
            Architecture::Any | Architecture::All | Architecture::Source
        )
    }

    /// Name as used in file names and control fields.
    pub fn name(self) -> &'static str {
        match self {
            Architecture::Any => "any",
            Architecture::All => "all",
            Architecture::Source => "source",
            Architecture::Amd64 => "amd64",
            Architecture::I386 => "i386",
            Architecture::Armel => "armel",
        }
    }
}

impl Display for Architecture {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TryFrom<&str> for Architecture {
    type Error = ParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "any" => Ok(Architecture::Any),
            "all" => Ok(Architecture::All),
            "source" => Ok(Architecture::Source),
            "amd64" => Ok(Architecture::Amd64),
            "i386" => Ok(Architecture::I386),
            "armel" => Ok(Architecture::Armel),
            _ => Err(ParseError::InvalidArchitecture),
        }
    }
}

impl FromStr for Architecture {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Architecture::try_from(s)
    }
}

#[cfg(test)]
mod test {
    use super::Architecture;

    #[test]
    fn roundtrip() {
        for s in ["any", "all", "source", "amd64", "i386", "armel"] {
            assert_eq!(Architecture::try_from(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn invalid() {
        assert!(Architecture::try_from("mips").is_err());
        assert!(Architecture::try_from("").is_err());
        assert!(Architecture::try_from("AMD64").is_err());
    }

    #[test]
    fn concrete() {
        assert!(Architecture::Amd64.is_concrete());
        assert!(!Architecture::Any.is_concrete());
        assert!(!Architecture::All.is_concrete());
        assert!(!Architecture::Source.is_concrete());
    }
}

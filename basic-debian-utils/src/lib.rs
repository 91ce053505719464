// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: LGPL-3.0-or-later

//! # Domain model for Debian packaging tools
//!
//! This crate consists of the following modules:
//! * [architectures]: Debian architectures including the manifest wildcards
//! * [archive]: codenames, vendors and components of the supported archives
//! * [control]: a lexer and table-driven parser for control-file formatted data
//! * [changes]: typed `.changes` records
//! * [source_control]: typed `.dsc` records
//! * [package]: source/binary package references and checksummed file references
//! * [version]: package versions with the dpkg comparison algorithm

#![warn(missing_debug_implementations)]

use std::fmt::{self, Display, Formatter};

use thiserror::Error;

pub mod architectures;
pub mod archive;
pub mod changes;
pub mod control;
pub mod package;
pub mod source_control;
pub mod version;

/// Parsing error for the simple domain identifiers.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Given string is not a valid architecture
    #[error("invalid architecture")]
    InvalidArchitecture,
    /// Given string is not a valid version
    #[error("{0}")]
    InvalidVersion(#[from] version::VersionError),
    /// Given string is not a valid codename
    #[error("invalid codename")]
    InvalidCodename,
    /// Given string is not a valid component
    #[error("invalid component")]
    InvalidComponent,
    /// Given string is not a valid package file name
    #[error("invalid file name {0}")]
    InvalidFileName(String),
}

/// Maintainer or uploader address as found in control files.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Address {
    /// Display name part of the address
    pub name: String,
    /// Bare email address
    pub email: String,
}

impl Address {
    /// Parse an RFC-5322-style `Name <local@domain>` mailbox.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (name, rest) = match value.find('<') {
            Some(idx) => (value[..idx].trim(), &value[idx..]),
            None => ("", value),
        };
        let email = rest.strip_prefix('<')?.strip_suffix('>')?.trim();
        if email.is_empty() || !email.contains('@') {
            return None;
        }
        Some(Self {
            name: name.trim_matches('"').to_owned(),
            email: email.to_owned(),
        })
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "<{}>", self.email)
        } else {
            write!(f, "{} <{}>", self.name, self.email)
        }
    }
}

#[cfg(test)]
mod test {
    use super::Address;

    #[test]
    fn address_with_name() {
        let address = Address::parse("Axel Beckert <abe@debian.org>").unwrap();
        assert_eq!(address.name, "Axel Beckert");
        assert_eq!(address.email, "abe@debian.org");
        assert_eq!(address.to_string(), "Axel Beckert <abe@debian.org>");
    }

    #[test]
    fn address_without_name() {
        let address = Address::parse("<abe@debian.org>").unwrap();
        assert_eq!(address.name, "");
        assert_eq!(address.to_string(), "<abe@debian.org>");
    }

    #[test]
    fn invalid_address() {
        assert!(Address::parse("abe@debian.org").is_none());
        assert!(Address::parse("Axel Beckert <not-a-mailbox>").is_none());
        assert!(Address::parse("<>").is_none());
    }
}

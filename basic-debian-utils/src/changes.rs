// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: LGPL-3.0-or-later

//! # Typed `.changes` records
//!
//! A change manifest describes one upload: the built binaries, the target
//! distribution, the maintainer and three checksummed file lists.

use std::fmt::{self, Display, Formatter};
use std::io::BufRead;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Address;
use crate::ParseError;
use crate::architectures::Architecture;
use crate::archive::Codename;
use crate::control::{
    ControlError, ControlField, ControlLexer, FieldSpec, expect_multi_line, expect_single_line,
    parse_date, parse_fields, parse_file_list,
};
use crate::package::{BinaryPackageRef, FileReference, SourcePackageRef};
use crate::version::Version;

/// Identifier of a change manifest: the source package plus a suffix
/// (an architecture name, `source` or `multi`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangesFileRef {
    /// The source package the manifest belongs to
    pub identifier: SourcePackageRef,
    /// Suffix encoded in the file name
    pub suffix: String,
}

impl ChangesFileRef {
    /// Expected file name of the manifest.
    pub fn file_name(&self) -> String {
        format!("{}_{}.changes", self.identifier, self.suffix)
    }
}

impl Display for ChangesFileRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// A parsed `.changes` document.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangesFile {
    /// Identifier of this manifest
    pub reference: ChangesFileRef,
    /// Format of the change file itself; epoch and revision must be zero
    pub format: Version,
    /// Upload date, normalized to UTC
    pub date: DateTime<Utc>,
    /// Names of the binary packages produced by the upload
    pub binaries: Vec<String>,
    /// Architectures covered by the upload, including `source`
    pub architectures: Vec<Architecture>,
    /// Target distribution
    pub distribution: Codename,
    /// Package maintainer
    pub maintainer: Address,
    /// Short description block
    pub description: String,
    /// Changelog excerpt
    pub changes: String,
    /// Files listed with MD5 checksums
    pub md5_files: Vec<FileReference>,
    /// Files listed with SHA-1 checksums
    pub sha1_files: Vec<FileReference>,
    /// Files listed with SHA-256 checksums
    pub sha256_files: Vec<FileReference>,
}

#[derive(Debug, Default)]
struct Builder {
    source: Option<String>,
    version: Option<Version>,
    format: Option<Version>,
    date: Option<DateTime<Utc>>,
    binaries: Vec<String>,
    architectures: Vec<Architecture>,
    distribution: Option<Codename>,
    maintainer: Option<Address>,
    description: String,
    changes: String,
    md5_files: Vec<FileReference>,
    sha1_files: Vec<FileReference>,
    sha256_files: Vec<FileReference>,
}

fn set_format(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    let value = expect_single_line(field)?;
    let version = Version::parse(value).map_err(|err| ControlError::value(field, err.to_string()))?;
    if version.has_epoch() || version.has_revision() {
        return Err(ControlError::value(
            field,
            format!("format version '{version}' must have zero epoch and revision"),
        ));
    }
    builder.format = Some(version);
    Ok(())
}

fn set_date(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    builder.date = Some(parse_date(field)?);
    Ok(())
}

fn set_source(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    builder.source = Some(expect_single_line(field)?.to_owned());
    Ok(())
}

fn set_binaries(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    let value = expect_single_line(field)?;
    builder.binaries = value.split_ascii_whitespace().map(String::from).collect();
    Ok(())
}

fn set_architectures(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    let value = expect_single_line(field)?;
    builder.architectures = value
        .split_ascii_whitespace()
        .map(|arch| {
            Architecture::try_from(arch)
                .map_err(|_| ControlError::value(field, format!("unknown architecture '{arch}'")))
        })
        .collect::<Result<_, _>>()?;
    Ok(())
}

fn set_version(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    let value = expect_single_line(field)?;
    builder.version =
        Some(Version::parse(value).map_err(|err| ControlError::value(field, err.to_string()))?);
    Ok(())
}

fn set_distribution(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    let value = expect_single_line(field)?;
    builder.distribution = Some(
        Codename::try_from(value)
            .map_err(|_| ControlError::value(field, format!("unknown codename '{value}'")))?,
    );
    Ok(())
}

fn set_maintainer(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    let value = expect_single_line(field)?;
    builder.maintainer = Some(
        Address::parse(value)
            .ok_or_else(|| ControlError::value(field, format!("invalid address '{value}'")))?,
    );
    Ok(())
}

fn set_description(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    builder.description = expect_multi_line(field)?.join("\n");
    Ok(())
}

fn set_changes(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    builder.changes = expect_multi_line(field)?.join("\n");
    Ok(())
}

fn set_md5_files(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    builder.md5_files = parse_file_list(field)?;
    Ok(())
}

fn set_sha1_files(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    builder.sha1_files = parse_file_list(field)?;
    Ok(())
}

fn set_sha256_files(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    builder.sha256_files = parse_file_list(field)?;
    Ok(())
}

const CHANGES_FIELDS: &[FieldSpec<Builder>] = &[
    FieldSpec::required("Format", set_format),
    FieldSpec::required("Date", set_date),
    FieldSpec::required("Source", set_source),
    FieldSpec::required("Binary", set_binaries),
    FieldSpec::required("Architecture", set_architectures),
    FieldSpec::required("Version", set_version),
    FieldSpec::required("Distribution", set_distribution),
    FieldSpec::ignored("Urgency"),
    FieldSpec::required("Maintainer", set_maintainer),
    FieldSpec::ignored("Changed-By"),
    FieldSpec::required("Description", set_description),
    FieldSpec::required("Changes", set_changes),
    FieldSpec::ignored("Closes"),
    FieldSpec::ignored("Launchpad-Bugs-Fixed"),
    FieldSpec::required("Checksums-Sha1", set_sha1_files),
    FieldSpec::required("Checksums-Sha256", set_sha256_files),
    FieldSpec::required("Files", set_md5_files),
];

impl ChangesFile {
    /// Parse a plaintext (not clear-signed) change manifest.
    pub fn parse(reader: impl BufRead) -> Result<Self, ControlError> {
        let mut builder = Builder::default();
        let mut lexer = ControlLexer::new(reader);
        parse_fields(&mut lexer, CHANGES_FIELDS, &mut builder)?;

        Ok(Self {
            reference: ChangesFileRef {
                identifier: SourcePackageRef {
                    source: builder.source.ok_or(ControlError::MissingField("Source"))?,
                    version: builder.version.ok_or(ControlError::MissingField("Version"))?,
                },
                suffix: String::new(),
            },
            format: builder.format.ok_or(ControlError::MissingField("Format"))?,
            date: builder.date.ok_or(ControlError::MissingField("Date"))?,
            binaries: builder.binaries,
            architectures: builder.architectures,
            distribution: builder
                .distribution
                .ok_or(ControlError::MissingField("Distribution"))?,
            maintainer: builder
                .maintainer
                .ok_or(ControlError::MissingField("Maintainer"))?,
            description: builder.description,
            changes: builder.changes,
            md5_files: builder.md5_files,
            sha1_files: builder.sha1_files,
            sha256_files: builder.sha256_files,
        })
    }

    /// Derive the binary package references from the MD5 file list, in
    /// arrival order. Every `.deb`/`.udeb` entry must parse.
    pub fn binary_packages(&self) -> Result<Vec<BinaryPackageRef>, ParseError> {
        self.md5_files
            .iter()
            .filter(|file| file.name.ends_with(".deb") || file.name.ends_with(".udeb"))
            .map(|file| BinaryPackageRef::from_file_name(&file.name))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn changes_file_ref_name() {
        let reference = ChangesFileRef {
            identifier: SourcePackageRef {
                source: "foo-bar".into(),
                version: Version::try_from("3:1.2.3~4-0ubuntu1").unwrap(),
            },
            suffix: "multi".into(),
        };
        assert_eq!(reference.file_name(), "foo-bar_3:1.2.3~4-0ubuntu1_multi.changes");
    }

    fn with_md5_files(names: &[&str]) -> ChangesFile {
        ChangesFile {
            reference: ChangesFileRef {
                identifier: SourcePackageRef {
                    source: "libfoo".into(),
                    version: Version::try_from("3:1.2.3~4-1").unwrap(),
                },
                suffix: String::new(),
            },
            format: Version::try_from("1.8").unwrap(),
            date: DateTime::UNIX_EPOCH,
            binaries: vec![],
            architectures: vec![],
            distribution: Codename::Unstable,
            maintainer: Address {
                name: String::new(),
                email: "nobody@example.org".into(),
            },
            description: String::new(),
            changes: String::new(),
            md5_files: names
                .iter()
                .map(|name| FileReference {
                    checksum: vec![],
                    size: 0,
                    name: (*name).to_owned(),
                })
                .collect(),
            sha1_files: vec![],
            sha256_files: vec![],
        }
    }

    #[test]
    fn binary_package_listing() {
        let changes = with_md5_files(&[
            "libfoo_3:1.2.3~4-1.dsc",
            "libfoo_1.2.3~4.orig.tar.gz",
            "libfoo_3:1.2.3~4-1.debian.tar.gz",
            "libfoo0_3:1.2.3~4-1_amd64.deb",
            "libfoo-dev_3:1.2.3~4-1_amd64.deb",
            "libfoo-dbg_3:1.2.3~4-1_amd64.deb",
            "libfoo0_3:1.2.3~4-1_i386.deb",
            "libfoo-dev_3:1.2.3~4-1_i386.deb",
            "libfoo-dbg_3:1.2.3~4-1_i386.deb",
            "libfoo-doc_3:1.2.3~4-1_all.deb",
        ]);

        let version = Version::try_from("3:1.2.3~4-1").unwrap();
        let packages = changes.binary_packages().unwrap();
        assert_eq!(packages.len(), 7);
        assert_eq!(
            packages[0],
            BinaryPackageRef {
                name: "libfoo0".into(),
                version: version.clone(),
                arch: Architecture::Amd64,
            }
        );
        assert_eq!(packages[3].arch, Architecture::I386);
        assert_eq!(
            packages[6],
            BinaryPackageRef {
                name: "libfoo-doc".into(),
                version,
                arch: Architecture::All,
            }
        );
    }

    #[test]
    fn binary_package_listing_rejects_invalid_entries() {
        let changes = with_md5_files(&["libfoo_1.2.3:3-4-4_amd64.deb"]);
        assert!(changes.binary_packages().is_err());

        let changes = with_md5_files(&["libfoo_1.2.3-1.deb"]);
        assert!(changes.binary_packages().is_err());
    }
}

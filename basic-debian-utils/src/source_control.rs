// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: LGPL-3.0-or-later

//! # Typed `.dsc` records
//!
//! Only the fields the pipeline acts upon are decoded; the long tail of
//! optional metadata fields is accepted and ignored.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Address;
use crate::architectures::Architecture;
use crate::control::{
    ControlError, ControlField, ControlLexer, FieldSpec, expect_single_line, parse_fields,
    parse_file_list,
};
use crate::package::{FileReference, SourcePackageRef};
use crate::version::Version;

/// A parsed `.dsc` document.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceControlFile {
    /// The source package described by this document
    pub identifier: SourcePackageRef,
    /// Directory holding the document and its companion files
    pub base_path: PathBuf,
    /// Source format: `1.0`, `3.0 (native)` or `3.0 (quilt)`
    pub format: String,
    /// Architectures the package builds for, including wildcards
    pub architectures: Vec<Architecture>,
    /// Package maintainer
    pub maintainer: Address,
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
    format: Option<String>,
    architectures: Vec<Architecture>,
    maintainer: Option<Address>,
    md5_files: Vec<FileReference>,
    sha1_files: Vec<FileReference>,
    sha256_files: Vec<FileReference>,
}

fn set_format(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    let value = expect_single_line(field)?;
    match value {
        "1.0" | "3.0 (native)" | "3.0 (quilt)" => {
            builder.format = Some(value.to_owned());
            Ok(())
        }
        _ => Err(ControlError::value(field, format!("invalid format {value}"))),
    }
}

fn set_source(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    builder.source = Some(expect_single_line(field)?.to_owned());
    Ok(())
}

fn set_version(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    let value = expect_single_line(field)?;
    builder.version =
        Some(Version::parse(value).map_err(|err| ControlError::value(field, err.to_string()))?);
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

fn set_maintainer(field: &ControlField, builder: &mut Builder) -> Result<(), ControlError> {
    let value = expect_single_line(field)?;
    builder.maintainer = Some(
        Address::parse(value)
            .ok_or_else(|| ControlError::value(field, format!("invalid address '{value}'")))?,
    );
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

const DSC_FIELDS: &[FieldSpec<Builder>] = &[
    FieldSpec::required("Format", set_format),
    FieldSpec::required("Source", set_source),
    FieldSpec::ignored("Binary"),
    // present in practice but not mandated by policy
    FieldSpec::optional("Architecture", set_architectures),
    FieldSpec::required("Version", set_version),
    FieldSpec::required("Maintainer", set_maintainer),
    FieldSpec::ignored("Uploaders"),
    FieldSpec::ignored("Homepage"),
    FieldSpec::ignored("Vcs-Browser"),
    FieldSpec::ignored("Vcs-Arch"),
    FieldSpec::ignored("Vcs-Bzr"),
    FieldSpec::ignored("Vcs-Cvs"),
    FieldSpec::ignored("Vcs-Darcs"),
    FieldSpec::ignored("Vcs-Git"),
    FieldSpec::ignored("Vcs-Hg"),
    FieldSpec::ignored("Vcs-Mtn"),
    FieldSpec::ignored("Vcs-Svn"),
    FieldSpec::ignored("Dgit"),
    FieldSpec::ignored("Standards-Version"),
    FieldSpec::ignored("Build-Depends"),
    FieldSpec::ignored("Build-Depends-Indep"),
    FieldSpec::ignored("Build-Conflicts"),
    FieldSpec::ignored("Build-Conflicts-Indep"),
    FieldSpec::ignored("Package-List"),
    FieldSpec::ignored("Testsuite"),
    FieldSpec::ignored("Original-Maintainer"),
    FieldSpec::required("Checksums-Sha1", set_sha1_files),
    FieldSpec::required("Checksums-Sha256", set_sha256_files),
    FieldSpec::required("Files", set_md5_files),
];

fn check_consistent_lists(
    md5: &[FileReference],
    other: &[FileReference],
    field: &'static str,
) -> Result<(), ControlError> {
    let mismatch = md5.len() != other.len()
        || md5.iter().any(|file| {
            !other
                .iter()
                .any(|candidate| candidate.name == file.name && candidate.size == file.size)
        });
    if mismatch {
        return Err(ControlError::Value {
            field: field.to_owned(),
            message: "file list does not match Files".to_owned(),
        });
    }
    Ok(())
}

impl SourceControlFile {
    /// Parse a plaintext (not clear-signed) `.dsc`. `base_path` records
    /// where the document and its companions live.
    pub fn parse(reader: impl BufRead, base_path: &Path) -> Result<Self, ControlError> {
        let mut builder = Builder::default();
        let mut lexer = ControlLexer::new(reader);
        parse_fields(&mut lexer, DSC_FIELDS, &mut builder)?;

        check_consistent_lists(&builder.md5_files, &builder.sha1_files, "Checksums-Sha1")?;
        check_consistent_lists(&builder.md5_files, &builder.sha256_files, "Checksums-Sha256")?;

        Ok(Self {
            identifier: SourcePackageRef {
                source: builder.source.ok_or(ControlError::MissingField("Source"))?,
                version: builder.version.ok_or(ControlError::MissingField("Version"))?,
            },
            base_path: base_path.to_owned(),
            format: builder.format.ok_or(ControlError::MissingField("Format"))?,
            architectures: builder.architectures,
            maintainer: builder
                .maintainer
                .ok_or(ControlError::MissingField("Maintainer"))?,
            md5_files: builder.md5_files,
            sha1_files: builder.sha1_files,
            sha256_files: builder.sha256_files,
        })
    }

    /// Expected file name of the `.dsc` itself.
    pub fn file_name(&self) -> String {
        format!("{}.dsc", self.identifier)
    }

    /// Expected file name of the source-only change manifest.
    pub fn changes_file_name(&self) -> String {
        format!("{}_source.changes", self.identifier)
    }
}

/// Check that a basename has the `<name>_<version>.dsc` shape.
pub fn is_dsc_file_name(path: impl AsRef<Path>) -> bool {
    SourcePackageRef::from_file_name(&path).is_ok()
        && path
            .as_ref()
            .extension()
            .is_some_and(|extension| extension == "dsc")
}

#[cfg(test)]
mod test {
    use super::*;

    const DSC: &str = "\
Format: 3.0 (quilt)
Source: aha
Binary: aha
Architecture: any
Version: 0.4.7.2-1
Maintainer: Axel Beckert <abe@debian.org>
Homepage: http://ziz.delphigl.com/tool_aha.php
Standards-Version: 3.9.5
Vcs-Git: git://git.debian.org/git/collab-maint/aha.git
Build-Depends: debhelper (>= 9)
Checksums-Sha1:
 150b67f98d44126d9e9cd47cb7c5638fb6d93cd5 12288 aha_0.4.7.2.orig.tar.gz
 cbd17390b21f4267b0565d1df8a03def9bb249a4 4892 aha_0.4.7.2-1.debian.tar.gz
Checksums-Sha256:
 71a287a7b7b56f8e3b5e4fdef03a196ac5b2b5b14e3bba1b6b75868ac5c856fd 12288 aha_0.4.7.2.orig.tar.gz
 450f24a52791b2e0dcaf834a9b744ba2e389c67e5b6a0cd2a86cdfbba62a8b64 4892 aha_0.4.7.2-1.debian.tar.gz
Files:
 e3505c58dbacecab32031a4e6df60d4e 12288 aha_0.4.7.2.orig.tar.gz
 dbc50036f79f1b4050b63b2d582df5a0 4892 aha_0.4.7.2-1.debian.tar.gz
";

    #[test]
    fn parse_dsc() {
        let dsc = SourceControlFile::parse(DSC.as_bytes(), Path::new("/tmp")).unwrap();
        assert_eq!(dsc.identifier.source, "aha");
        assert_eq!(dsc.identifier.version, Version::try_from("0.4.7.2-1").unwrap());
        assert_eq!(dsc.format, "3.0 (quilt)");
        assert_eq!(dsc.architectures, vec![Architecture::Any]);
        assert_eq!(dsc.maintainer.email, "abe@debian.org");
        assert_eq!(dsc.md5_files.len(), 2);
        assert_eq!(dsc.file_name(), "aha_0.4.7.2-1.dsc");
        assert_eq!(dsc.changes_file_name(), "aha_0.4.7.2-1_source.changes");
    }

    #[test]
    fn invalid_format_fails() {
        let input = DSC.replace("3.0 (quilt)", "2.0");
        assert!(SourceControlFile::parse(input.as_bytes(), Path::new("/tmp")).is_err());
    }

    #[test]
    fn unknown_field_fails() {
        let input = format!("{DSC}X-Unknown: yes\n");
        assert!(SourceControlFile::parse(input.as_bytes(), Path::new("/tmp")).is_err());
    }

    #[test]
    fn missing_required_field_fails() {
        let input = DSC.replace("Maintainer: Axel Beckert <abe@debian.org>\n", "");
        assert!(matches!(
            SourceControlFile::parse(input.as_bytes(), Path::new("/tmp")).unwrap_err(),
            ControlError::MissingField("Maintainer")
        ));
    }

    #[test]
    fn inconsistent_file_lists_fail() {
        let input = DSC.replace(" 4892 aha_0.4.7.2-1.debian.tar.gz\nChecksums-Sha256", " 4893 aha_0.4.7.2-1.debian.tar.gz\nChecksums-Sha256");
        assert!(SourceControlFile::parse(input.as_bytes(), Path::new("/tmp")).is_err());
    }

    #[test]
    fn dsc_file_name_check() {
        assert!(is_dsc_file_name("aha_0.4.7.2-1.dsc"));
        assert!(!is_dsc_file_name("aha_0.4.7.2-1.deb"));
        assert!(!is_dsc_file_name("aha.dsc"));
    }
}

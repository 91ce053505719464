// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: LGPL-3.0-or-later

//! # Package and file references
//!
//! References identify source packages (name + version), binary packages
//! (name + version + architecture) and files listed in manifests (checksum +
//! size + basename). File references can be validated against the filesystem
//! under the checksum algorithm of the manifest field that listed them.

use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::io;
use std::path::Path;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;

use crate::ParseError;
use crate::architectures::Architecture;
use crate::version::Version;

/// Reference to a source package.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SourcePackageRef {
    /// Name of the source package
    pub source: String,
    /// Version of the source package
    pub version: Version,
}

impl SourcePackageRef {
    /// Extract the reference from a `.dsc` or `.debian.tar.gz` file name.
    pub fn from_file_name(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let base = path
            .as_ref()
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ParseError::InvalidFileName(path.as_ref().display().to_string()))?;
        let stem = base
            .strip_suffix(".dsc")
            .or_else(|| base.strip_suffix(".debian.tar.gz"))
            .ok_or_else(|| ParseError::InvalidFileName(base.to_owned()))?;
        let (source, version) = stem
            .rsplit_once('_')
            .ok_or_else(|| ParseError::InvalidFileName(base.to_owned()))?;
        Ok(Self {
            source: source.to_owned(),
            version: Version::parse(version)?,
        })
    }
}

impl Display for SourcePackageRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.source, self.version)
    }
}

/// Reference to a binary package.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BinaryPackageRef {
    /// Name of the binary package
    pub name: String,
    /// Version of the binary package
    pub version: Version,
    /// Architecture the package was built for
    pub arch: Architecture,
}

impl BinaryPackageRef {
    /// Extract the reference from a `.deb` or `.udeb` file name.
    pub fn from_file_name(base: &str) -> Result<Self, ParseError> {
        let stem = base
            .strip_suffix(".deb")
            .or_else(|| base.strip_suffix(".udeb"))
            .ok_or_else(|| ParseError::InvalidFileName(base.to_owned()))?;
        let mut parts = stem.split('_');
        let (Some(name), Some(version), Some(arch), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::InvalidFileName(base.to_owned()));
        };
        Ok(Self {
            name: name.to_owned(),
            version: Version::parse(version)?,
            arch: Architecture::try_from(arch)
                .map_err(|_| ParseError::InvalidFileName(base.to_owned()))?,
        })
    }
}

impl Display for BinaryPackageRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.name, self.version, self.arch)
    }
}

/// Checksum algorithm implied by the manifest field listing a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumKind {
    /// MD5 from a `Files:` field
    Md5,
    /// SHA-1 from a `Checksums-Sha1:` field
    Sha1,
    /// SHA-256 from a `Checksums-Sha256:` field
    Sha256,
}

/// Validation failure of a [FileReference].
#[derive(Debug, Error)]
pub enum FileError {
    /// On-disk size does not match the manifest
    #[error("{name}: expected size {expected}, got {actual}")]
    SizeMismatch {
        /// File basename
        name: String,
        /// Size listed in the manifest
        expected: u64,
        /// Size found on disk
        actual: u64,
    },
    /// On-disk checksum does not match the manifest
    #[error("{name}: checksum mismatch, expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// File basename
        name: String,
        /// Checksum listed in the manifest
        expected: String,
        /// Checksum computed from disk
        actual: String,
    },
    /// Underlying I/O failure
    #[error("could not check {name}: {source}")]
    Io {
        /// File basename
        name: String,
        /// The I/O error
        source: io::Error,
    },
}

/// A file listed in a manifest: checksum, size and basename.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileReference {
    /// Checksum bytes
    #[serde(with = "hex")]
    pub checksum: Vec<u8>,
    /// Size in bytes
    pub size: u64,
    /// File basename
    pub name: String,
}

/// Compute the checksum of a file under the given algorithm.
pub fn file_checksum(path: &Path, kind: ChecksumKind) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    Ok(match kind {
        ChecksumKind::Md5 => {
            let mut hasher = Md5::new();
            io::copy(&mut file, &mut hasher)?;
            hasher.finalize().to_vec()
        }
        ChecksumKind::Sha1 => {
            let mut hasher = Sha1::new();
            io::copy(&mut file, &mut hasher)?;
            hasher.finalize().to_vec()
        }
        ChecksumKind::Sha256 => {
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher)?;
            hasher.finalize().to_vec()
        }
    })
}

impl FileReference {
    /// Check size and checksum of this file below `basepath`.
    pub fn check_file(&self, basepath: &Path, kind: ChecksumKind) -> Result<(), FileError> {
        let path = basepath.join(&self.name);
        let io_err = |source| FileError::Io {
            name: self.name.clone(),
            source,
        };

        let metadata = path.metadata().map_err(io_err)?;
        if metadata.len() != self.size {
            return Err(FileError::SizeMismatch {
                name: self.name.clone(),
                expected: self.size,
                actual: metadata.len(),
            });
        }

        let actual = file_checksum(&path, kind).map_err(io_err)?;
        if actual != self.checksum {
            return Err(FileError::ChecksumMismatch {
                name: self.name.clone(),
                expected: hex::encode(&self.checksum),
                actual: hex::encode(actual),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    #[test]
    fn source_ref_from_file_name() {
        let reference = SourcePackageRef::from_file_name("libfoo_3:1.2.3~4-1.dsc").unwrap();
        assert_eq!(reference.source, "libfoo");
        assert_eq!(reference.version, Version::try_from("3:1.2.3~4-1").unwrap());
        assert_eq!(reference.to_string(), "libfoo_3:1.2.3~4-1");

        let reference =
            SourcePackageRef::from_file_name("/tmp/incoming/aha_0.4.7.2-1.debian.tar.gz").unwrap();
        assert_eq!(reference.source, "aha");

        assert!(SourcePackageRef::from_file_name("aha_0.4.7.2-1.deb").is_err());
        assert!(SourcePackageRef::from_file_name("aha.dsc").is_err());
    }

    #[test]
    fn binary_ref_from_file_name() {
        let reference = BinaryPackageRef::from_file_name("libfoo-dev_3:1.2.3~4-1_amd64.deb").unwrap();
        assert_eq!(reference.name, "libfoo-dev");
        assert_eq!(reference.arch, Architecture::Amd64);

        assert!(BinaryPackageRef::from_file_name("libfoo_1.2.3-1.deb").is_err());
        assert!(BinaryPackageRef::from_file_name("libfoo_1.2.3:3-4-4_amd64.deb").is_err());
        assert!(BinaryPackageRef::from_file_name("libfoo_1.2.3-1_mips.deb").is_err());
    }

    #[test]
    fn check_file_matches() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data"), b"hello world\n").unwrap();

        let reference = FileReference {
            checksum: hex::decode("6f5902ac237024bdd0c176cb93063dc4").unwrap(),
            size: 12,
            name: "data".into(),
        };
        reference.check_file(dir.path(), ChecksumKind::Md5).unwrap();

        let bad_size = FileReference {
            size: 13,
            ..reference.clone()
        };
        assert!(matches!(
            bad_size.check_file(dir.path(), ChecksumKind::Md5),
            Err(FileError::SizeMismatch { .. })
        ));

        let bad_sum = FileReference {
            checksum: vec![0; 16],
            ..reference
        };
        assert!(matches!(
            bad_sum.check_file(dir.path(), ChecksumKind::Md5),
            Err(FileError::ChecksumMismatch { .. })
        ));
    }
}

// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! Content-addressed store for source uploads and build results.
//!
//! Sources live under `<base>/sources/<abbrev>/<name>/`, binaries under
//! `<base>/binary/<abbrev>/<name>/`, where `<abbrev>` is `lib<c>` for
//! library packages and the first letter otherwise. Upstream tarballs are
//! deduplicated by MD5. All operations stage into a `stage/` subdirectory
//! and promote with renames, so a failure never leaves a partial entry; a
//! JSON sidecar per entry allows O(1) reload.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::Command;

use fd_lock::RwLock;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use basic_debian_utils::{
    changes::ChangesFile,
    control::ControlError,
    package::{ChecksumKind, FileError, SourcePackageRef, file_checksum},
    source_control::SourceControlFile,
};

use crate::authenticator::{AuthError, Authenticator};
use crate::builder::BuildResult;

/// Errors of the archiver.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The global archive lock is held elsewhere
    #[error("Could not lock {0}")]
    Lock(PathBuf),
    /// Package name must not be empty
    #[error("Package name should not be empty")]
    EmptyName,
    /// Lookup of an entry that was never archived
    #[error("{0} is not archived")]
    NotArchived(SourcePackageRef),
    /// An upstream tarball of the same name with a different checksum
    #[error("File {0} already exists and has a different checksum")]
    TarballConflict(PathBuf),
    /// A file listed in the manifest fails validation
    #[error(transparent)]
    File(#[from] FileError),
    /// A required file is missing
    #[error("Missing required file {0}")]
    MissingFile(PathBuf),
    /// Signature handling failed
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// A manifest does not parse
    #[error(transparent)]
    Control(#[from] ControlError),
    /// A dpkg tool exited with a failure
    #[error("{command} failed:\n{output}")]
    Subprocess {
        /// The command line that failed
        command: String,
        /// Combined stdout and stderr
        output: String,
    },
    /// A sidecar does not decode or encode
    #[error("Could not handle sidecar {path}: {source}")]
    Sidecar {
        /// Path of the sidecar
        path: PathBuf,
        /// The underlying error
        source: serde_json::Error,
    },
    /// Underlying I/O failure
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A source package archived in the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchivedSource {
    /// The source-only change manifest, generated if the upload had none
    pub changes: ChangesFile,
    /// The archived `.dsc`, with `base_path` pointing into the store
    pub dsc: SourceControlFile,
    /// Store directory holding the entry
    pub base_path: PathBuf,
}

/// Capability set of the archiver.
pub trait PackageArchiver: Send {
    /// Validate and archive a source upload, generating and signing the
    /// source change manifest when missing.
    fn archive_source(&mut self, dsc: SourceControlFile) -> Result<ArchivedSource, ArchiveError>;

    /// Validate and archive the binaries of a build result; returns the
    /// result with its base path moved into the store.
    fn archive_build_result(&mut self, result: BuildResult) -> Result<BuildResult, ArchiveError>;

    /// Reload an archived source entry from its sidecar.
    fn archived_source(
        &mut self,
        reference: &SourcePackageRef,
    ) -> Result<ArchivedSource, ArchiveError>;

    /// Reload an archived build result from its sidecar.
    fn build_result(&mut self, reference: &SourcePackageRef)
    -> Result<BuildResult, ArchiveError>;
}

/// Archiver rooted at a base directory, guarded by a global lock file.
pub struct DiskArchiver<A> {
    base_path: PathBuf,
    lock_path: PathBuf,
    lock: RwLock<File>,
    auth: A,
}

impl<A> std::fmt::Debug for DiskArchiver<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskArchiver")
            .field("base_path", &self.base_path)
            .finish()
    }
}

fn abbreviation(name: &str) -> &str {
    if name.starts_with("lib") && name.len() > 3 {
        &name[..4]
    } else {
        &name[..1]
    }
}

fn source_store_path(base: &Path, reference: &SourcePackageRef) -> Result<PathBuf, ArchiveError> {
    if reference.source.is_empty() {
        return Err(ArchiveError::EmptyName);
    }
    let key = reference.source.to_lowercase();
    Ok(base.join("sources").join(abbreviation(&key)).join(key))
}

fn binary_store_path(base: &Path, reference: &SourcePackageRef) -> Result<PathBuf, ArchiveError> {
    if reference.source.is_empty() {
        return Err(ArchiveError::EmptyName);
    }
    let key = reference.source.to_lowercase();
    Ok(base.join("binary").join(abbreviation(&key)).join(key))
}

fn source_sidecar(reference: &SourcePackageRef) -> String {
    format!("{reference}.source.json")
}

fn binary_sidecar(reference: &SourcePackageRef) -> String {
    format!("{reference}.binary.json")
}

fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    let mut reader = File::open(from)?;
    let mut writer = File::create(to)?;
    io::copy(&mut reader, &mut writer)?;
    writer.sync_all()
}

fn write_sidecar<T: Serialize>(path: &Path, value: &T) -> Result<(), ArchiveError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, value).map_err(|source| ArchiveError::Sidecar {
        path: path.to_owned(),
        source,
    })
}

fn read_sidecar<T: serde::de::DeserializeOwned>(
    path: &Path,
    reference: &SourcePackageRef,
) -> Result<T, ArchiveError> {
    if !path.exists() {
        return Err(ArchiveError::NotArchived(reference.clone()));
    }
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|source| ArchiveError::Sidecar {
        path: path.to_owned(),
        source,
    })
}

fn run_captured(command: &mut Command) -> Result<Vec<u8>, ArchiveError> {
    let rendered = format!("{command:?}");
    let output = command.output()?;
    if !output.status.success() {
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        return Err(ArchiveError::Subprocess {
            command: rendered,
            output: String::from_utf8_lossy(&combined).into_owned(),
        });
    }
    Ok(output.stdout)
}

// Validate the upload and return the basenames that must be staged.
// Deduplicated upstream tarballs are checked against the archived copy and
// left out of the list.
fn list_and_check_files(
    dsc: &SourceControlFile,
    dest: &Path,
) -> Result<Vec<String>, ArchiveError> {
    let mut to_copy = Vec::new();

    for file in &dsc.md5_files {
        file.check_file(&dsc.base_path, ChecksumKind::Md5)?;
        if !file.name.contains(".orig.tar") {
            to_copy.push(file.name.clone());
            continue;
        }

        let archived = dest.join(&file.name);
        if !archived.exists() {
            to_copy.push(file.name.clone());
            continue;
        }
        let checksum = file_checksum(&archived, ChecksumKind::Md5)?;
        if checksum != file.checksum {
            return Err(ArchiveError::TarballConflict(archived));
        }
        debug!("{} already archived, skipping copy", file.name);
    }

    to_copy.push(dsc.file_name());
    if dsc.base_path.join(dsc.changes_file_name()).exists() {
        to_copy.push(dsc.changes_file_name());
    }
    Ok(to_copy)
}

// Parse the source change manifest from the stage, generating and signing it
// first if the upload did not provide one.
fn ensure_source_changes<A: Authenticator>(
    auth: &A,
    dsc: &SourceControlFile,
    stage: &Path,
    final_dest: &Path,
    files: &mut Vec<String>,
) -> Result<ChangesFile, ArchiveError> {
    let changes_path = stage.join(dsc.changes_file_name());
    if changes_path.exists() {
        let data = fs::read(&changes_path)?;
        let plaintext = auth.check_clearsigned(&data)?.trusted_or_unsigned()?;
        return Ok(ChangesFile::parse(plaintext.as_slice())?);
    }

    let scratch = tempfile::Builder::new()
        .prefix("deb-foundry-source-package_")
        .tempdir()?;

    // deduplicated tarballs are only present in the final directory
    for file in &dsc.md5_files {
        let staged = stage.join(&file.name);
        let source = if staged.exists() {
            staged
        } else {
            final_dest.join(&file.name)
        };
        copy_file(&source, &scratch.path().join(&file.name))?;
    }
    copy_file(
        &stage.join(dsc.file_name()),
        &scratch.path().join(dsc.file_name()),
    )?;

    run_captured(
        Command::new("dpkg-source")
            .args(["-x", &dsc.file_name()])
            .current_dir(scratch.path()),
    )?;

    let extracted = scratch.path().join(format!(
        "{}-{}",
        dsc.identifier.source, dsc.identifier.version.upstream
    ));
    let content = run_captured(
        Command::new("dpkg-genchanges")
            .arg("-S")
            .current_dir(&extracted),
    )?;

    let changes = ChangesFile::parse(content.as_slice())?;
    fs::write(&changes_path, &content)?;
    files.push(dsc.changes_file_name());
    auth.sign_changes(&changes_path)?;

    Ok(changes)
}

fn archive_source_staged<A: Authenticator>(
    auth: &A,
    mut dsc: SourceControlFile,
    dest: &Path,
    stage: &Path,
) -> Result<ArchivedSource, ArchiveError> {
    let mut files = list_and_check_files(&dsc, dest)?;

    fs::create_dir_all(stage)?;
    for name in &files {
        copy_file(&dsc.base_path.join(name), &stage.join(name))?;
    }

    let changes = ensure_source_changes(auth, &dsc, stage, dest, &mut files)?;

    // everything validated and signed: promote with renames
    for name in &files {
        fs::rename(stage.join(name), dest.join(name))?;
    }
    dsc.base_path = dest.to_owned();

    let archived = ArchivedSource {
        changes,
        dsc,
        base_path: dest.to_owned(),
    };
    write_sidecar(
        &dest.join(source_sidecar(&archived.dsc.identifier)),
        &archived,
    )?;
    Ok(archived)
}

impl<A: Authenticator> DiskArchiver<A> {
    /// Open the store at `base_path`, creating it if necessary.
    pub fn new(base_path: PathBuf, auth: A) -> Result<Self, ArchiveError> {
        fs::create_dir_all(&base_path)?;
        let lock_path = base_path.join("global.lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        Ok(Self {
            base_path,
            lock_path,
            lock: RwLock::new(lock_file),
            auth,
        })
    }
}

impl<A: Authenticator> PackageArchiver for DiskArchiver<A> {
    fn archive_source(&mut self, dsc: SourceControlFile) -> Result<ArchivedSource, ArchiveError> {
        let Self {
            base_path,
            lock_path,
            lock,
            auth,
        } = self;
        let _guard = lock
            .try_write()
            .map_err(|_| ArchiveError::Lock(lock_path.clone()))?;

        let dest = source_store_path(base_path, &dsc.identifier)?;
        let stage = dest.join("stage");
        info!("archiving source {}", dsc.identifier);

        let result = archive_source_staged(auth, dsc, &dest, &stage);
        // whatever happened, the stage directory is gone afterwards
        if stage.exists() {
            let _ = fs::remove_dir_all(&stage);
        }
        result
    }

    fn archive_build_result(
        &mut self,
        mut result: BuildResult,
    ) -> Result<BuildResult, ArchiveError> {
        let Self {
            base_path,
            lock_path,
            lock,
            auth,
        } = self;
        let _guard = lock
            .try_write()
            .map_err(|_| ArchiveError::Lock(lock_path.clone()))?;

        let changes_path = result.base_path.join(&result.changes_path);
        if !changes_path.exists() {
            return Err(ArchiveError::MissingFile(changes_path));
        }

        let reference = result.changes.reference.identifier.clone();
        info!("archiving build result {reference}");
        let dest = binary_store_path(base_path, &reference)?;
        fs::create_dir_all(&dest)?;

        for file in &result.changes.md5_files {
            file.check_file(&result.base_path, ChecksumKind::Md5)?;
            copy_file(&result.base_path.join(&file.name), &dest.join(&file.name))?;
        }

        let final_changes = dest.join(&result.changes_path);
        copy_file(&changes_path, &final_changes)?;
        result.base_path = dest.clone();

        auth.sign_changes(&final_changes)?;

        write_sidecar(&dest.join(binary_sidecar(&reference)), &result)?;
        Ok(result)
    }

    fn archived_source(
        &mut self,
        reference: &SourcePackageRef,
    ) -> Result<ArchivedSource, ArchiveError> {
        let dest = source_store_path(&self.base_path, reference)?;
        let _guard = self
            .lock
            .try_write()
            .map_err(|_| ArchiveError::Lock(self.lock_path.clone()))?;
        read_sidecar(&dest.join(source_sidecar(reference)), reference)
    }

    fn build_result(
        &mut self,
        reference: &SourcePackageRef,
    ) -> Result<BuildResult, ArchiveError> {
        let dest = binary_store_path(&self.base_path, reference)?;
        let _guard = self
            .lock
            .try_write()
            .map_err(|_| ArchiveError::Lock(self.lock_path.clone()))?;
        read_sidecar(&dest.join(binary_sidecar(reference)), reference)
    }
}

#[cfg(test)]
mod test {
    use basic_debian_utils::package::FileReference;

    use super::*;
    use crate::authenticator::stub::StubAuthenticator;

    const ORIG_TARBALL: &[u8] = b"orig tarball payload";
    const DEBIAN_TARBALL: &[u8] = b"debian tarball payload";

    fn file_reference(dir: &Path, name: &str, content: &[u8]) -> FileReference {
        fs::write(dir.join(name), content).unwrap();
        FileReference {
            checksum: {
                use md5::{Digest, Md5};
                let mut hasher = Md5::new();
                hasher.update(content);
                hasher.finalize().to_vec()
            },
            size: content.len() as u64,
            name: name.to_owned(),
        }
    }

    fn upload(dir: &Path) -> SourceControlFile {
        let orig = file_reference(dir, "aha_0.4.7.2.orig.tar.gz", ORIG_TARBALL);
        let debian = file_reference(dir, "aha_0.4.7.2-1.debian.tar.gz", DEBIAN_TARBALL);
        fs::write(dir.join("aha_0.4.7.2-1.dsc"), b"the dsc itself").unwrap();
        fs::write(
            dir.join("aha_0.4.7.2-1_source.changes"),
            "Format: 1.8
Date: Sat, 14 Dec 2013 12:17:50 +0100
Source: aha
Binary: aha
Architecture: source
Version: 0.4.7.2-1
Distribution: unstable
Urgency: low
Maintainer: Axel Beckert <abe@debian.org>
Description:
 aha        - ANSI color to HTML converter
Changes:
 aha (0.4.7.2-1) unstable; urgency=low
 .
   * New upstream release
Checksums-Sha1:
 cfb9ed3544af90d0a6490844b79e04fa4b39e976 1059 aha_0.4.7.2-1.dsc
Checksums-Sha256:
 0490f7a3e9577b1053b4e9211e73b0fb149d58e76f7fa53ab2add0b3c3929f52 1059 aha_0.4.7.2-1.dsc
Files:
 ec8ed1ab14b6a363d06d2b58cca2e85d 1059 text extra aha_0.4.7.2-1.dsc
",
        )
        .unwrap();

        SourceControlFile {
            identifier: SourcePackageRef {
                source: "aha".into(),
                version: basic_debian_utils::version::Version::try_from("0.4.7.2-1").unwrap(),
            },
            base_path: dir.to_owned(),
            format: "3.0 (quilt)".into(),
            architectures: vec![basic_debian_utils::architectures::Architecture::Any],
            maintainer: basic_debian_utils::Address {
                name: "Axel Beckert".into(),
                email: "abe@debian.org".into(),
            },
            md5_files: vec![orig, debian],
            sha1_files: vec![],
            sha256_files: vec![],
        }
    }

    #[test]
    fn abbreviations() {
        assert_eq!(abbreviation("aha"), "a");
        assert_eq!(abbreviation("libfoo"), "libf");
        assert_eq!(abbreviation("lib"), "l");
        assert_eq!(abbreviation("zlib"), "z");
    }

    #[test]
    fn archive_source_and_reload() {
        let store = tempfile::tempdir().unwrap();
        let incoming = tempfile::tempdir().unwrap();

        let mut archiver =
            DiskArchiver::new(store.path().to_owned(), StubAuthenticator).unwrap();
        let archived = archiver.archive_source(upload(incoming.path())).unwrap();

        let entry = store.path().join("sources/a/aha");
        assert_eq!(archived.base_path, entry);
        assert!(entry.join("aha_0.4.7.2.orig.tar.gz").exists());
        assert!(entry.join("aha_0.4.7.2-1.dsc").exists());
        assert!(entry.join("aha_0.4.7.2-1_source.changes").exists());
        assert!(entry.join("aha_0.4.7.2-1.source.json").exists());
        assert!(!entry.join("stage").exists());
        assert_eq!(archived.changes.reference.identifier.source, "aha");

        let reloaded = archiver.archived_source(&archived.dsc.identifier).unwrap();
        assert_eq!(reloaded.dsc.identifier, archived.dsc.identifier);
        assert_eq!(reloaded.base_path, entry);
    }

    #[test]
    fn duplicate_tarball_with_matching_checksum_is_deduplicated() {
        let store = tempfile::tempdir().unwrap();
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();

        let mut archiver =
            DiskArchiver::new(store.path().to_owned(), StubAuthenticator).unwrap();
        archiver.archive_source(upload(first.path())).unwrap();
        archiver.archive_source(upload(second.path())).unwrap();
    }

    #[test]
    fn duplicate_tarball_with_divergent_checksum_conflicts() {
        let store = tempfile::tempdir().unwrap();
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();

        let mut archiver =
            DiskArchiver::new(store.path().to_owned(), StubAuthenticator).unwrap();
        archiver.archive_source(upload(first.path())).unwrap();

        let mut dsc = upload(second.path());
        fs::write(
            second.path().join("aha_0.4.7.2.orig.tar.gz"),
            b"different payload ...",
        )
        .unwrap();
        dsc.md5_files[0] =
            file_reference(second.path(), "aha_0.4.7.2.orig.tar.gz", b"different payload ...");

        let err = archiver.archive_source(dsc).unwrap_err();
        assert!(matches!(err, ArchiveError::TarballConflict(_)));
        // the failed transaction left no stage behind
        assert!(!store.path().join("sources/a/aha/stage").exists());
    }

    #[test]
    fn checksum_mismatch_leaves_store_unchanged() {
        let store = tempfile::tempdir().unwrap();
        let incoming = tempfile::tempdir().unwrap();

        let mut archiver =
            DiskArchiver::new(store.path().to_owned(), StubAuthenticator).unwrap();
        let mut dsc = upload(incoming.path());
        dsc.md5_files[1].checksum = vec![0; 16];

        assert!(matches!(
            archiver.archive_source(dsc),
            Err(ArchiveError::File(_))
        ));
        assert!(!store.path().join("sources/a/aha").join("aha_0.4.7.2-1.dsc").exists());
    }

    #[test]
    fn lookup_of_unarchived_entry_fails() {
        let store = tempfile::tempdir().unwrap();
        let mut archiver =
            DiskArchiver::new(store.path().to_owned(), StubAuthenticator).unwrap();
        let reference = SourcePackageRef {
            source: "nope".into(),
            version: basic_debian_utils::version::Version::try_from("1.0").unwrap(),
        };
        assert!(matches!(
            archiver.archived_source(&reference),
            Err(ArchiveError::NotArchived(_))
        ));
    }
}

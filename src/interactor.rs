// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! The orchestrator tying archiver, repository, builder and the small
//! stores together. This is the only place holding references to all of
//! them; the components themselves never talk to each other.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use log::{info, warn};

use basic_debian_utils::{
    Address,
    architectures::Architecture,
    archive::{Codename, Component},
    changes::ChangesFile,
    source_control::SourceControlFile,
};

use crate::access::{AccessError, DepsManager, DiskDepsManager, RepositoryAccess};
use crate::archiver::{DiskArchiver, PackageArchiver};
use crate::authenticator::{Authenticator, GnupgAuthenticator, SignatureStatus};
use crate::builder::{BuildArguments, BuildResult, DebianBuilder};
use crate::config::{Config, Layout};
use crate::dist_config::{DiskDistConfig, UserDistConfig};
use crate::history::{DiskHistory, History};
use crate::ppa;
use crate::receiver::QueueFileRef;
use crate::repository::{AptRepository, RepreproRepository};
use crate::rpc::ClientBuilder;

/// The orchestrator.
pub struct Interactor {
    pub(crate) archiver: Box<dyn PackageArchiver>,
    pub(crate) repository: Box<dyn AptRepository>,
    pub(crate) builder: Box<dyn DebianBuilder>,
    pub(crate) history: Box<dyn History>,
    pub(crate) dist_config: Box<dyn UserDistConfig>,
    pub(crate) deps: Box<dyn DepsManager>,
    pub(crate) auth: Box<dyn Authenticator>,
}

impl std::fmt::Debug for Interactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interactor").finish_non_exhaustive()
    }
}

/// Everything the listener needs to report one processed change manifest.
#[derive(Debug, Default)]
pub struct IncludeOutcome {
    /// Addresses of the verified uploader, if any
    pub send_to: Vec<Address>,
    /// Whether the failure should also reach the administrator
    pub should_report: bool,
    /// Companion files named by the manifest, to be released from staging
    pub files_to_release: Vec<QueueFileRef>,
    /// Combined output of the repository tool
    pub output: String,
}

impl Interactor {
    /// Wire up the real components: the RPC client builder, the XDG stores
    /// and the reprepro-backed repository.
    pub fn new(config: &Config, builder_socket: PathBuf) -> Result<Self> {
        let layout = Layout::new();
        let auth = GnupgAuthenticator::new(config)?;
        let archiver_auth = GnupgAuthenticator::new(config)?;

        Ok(Self {
            archiver: Box::new(DiskArchiver::new(
                layout.data_dir("archives")?,
                archiver_auth,
            )?),
            repository: Box::new(RepreproRepository::new(
                config,
                layout.data_dir("local_reprepro")?,
                config.gnupg_home()?,
            )?),
            builder: Box::new(ClientBuilder::new(builder_socket)),
            history: Box::new(DiskHistory::open(layout.data_file("history/data.json")?)?),
            dist_config: Box::new(DiskDistConfig::open(
                layout.config_file("dist-config.json")?,
            )?),
            deps: Box::new(DiskDepsManager::open(
                layout.data_file("apt_deps/data.json")?,
            )?),
            auth: Box::new(auth),
        })
    }

    fn dependency_accesses(&self) -> Vec<RepositoryAccess> {
        let mut accesses: Vec<_> = self.deps.list().values().cloned().collect();
        accesses.push(self.repository.access());
        accesses
    }

    /// Archive a source package, build it for every architecture the user
    /// policy selects, archive the result and publish it locally.
    pub fn build_package(
        &mut self,
        dsc: SourceControlFile,
        output: &mut (dyn Write + Send),
    ) -> Result<BuildResult> {
        let identifier = dsc.identifier.clone();
        let archived = self
            .archiver
            .archive_source(dsc)
            .with_context(|| format!("Could not archive source package '{identifier}'"))?;

        let target_dist = archived.changes.distribution;
        let supported = self.dist_config.supported();
        let archs = match supported.get(&target_dist) {
            Some(archs) if !archs.is_empty() => archs.clone(),
            _ => bail!(
                "Target distribution '{target_dist}' of source package '{identifier}' is not supported"
            ),
        };
        let available = self.builder.available_architectures(target_dist);
        for arch in &archs {
            if !available.contains(arch) {
                bail!("System consistency error: builder does not support {target_dist}-{arch}");
            }
        }

        // build out of a scratch copy so the builder never touches the store
        let dest = tempfile::Builder::new()
            .prefix("deb-foundry-build_")
            .tempdir()?;
        let mut dsc = archived.dsc.clone();
        for file in &dsc.md5_files {
            fs::copy(
                archived.base_path.join(&file.name),
                dest.path().join(&file.name),
            )?;
        }
        fs::copy(
            archived.base_path.join(dsc.file_name()),
            dest.path().join(dsc.file_name()),
        )?;
        dsc.base_path = dest.path().to_owned();

        let build = self.builder.build_package(
            BuildArguments {
                source_package: dsc,
                dist: target_dist,
                archs,
                deps: self.dependency_accesses(),
                dest: dest.path().to_owned(),
            },
            output,
        );

        let archive_result = match &build {
            Ok(result) => {
                let archived = self.archiver.archive_build_result(result.clone());
                match archived {
                    Ok(result) => {
                        let changes_path = result.base_path.join(&result.changes_path);
                        self.repository
                            .include(&result.changes, &changes_path, &[])
                            .map(|_| result)
                            .map_err(anyhow::Error::from)
                    }
                    Err(err) => Err(err.into()),
                }
            }
            Err(_) => Err(anyhow!("nothing to archive")),
        };

        match (build, archive_result) {
            (Ok(_), Ok(result)) => {
                if let Err(err) = self.history.append(result.changes.reference.identifier.clone())
                {
                    warn!("could not record build history: {err}");
                }
                Ok(result)
            }
            (Ok(_), Err(err)) => {
                if let Err(history_err) = self.history.remove_front(&identifier) {
                    warn!("could not update build history: {history_err}");
                }
                Err(err.context(format!(
                    "Failed to archive build result of '{identifier}'"
                )))
            }
            (Err(err), _) => Err(err.into()),
        }
    }

    /// Authenticate, parse and publish one staged change manifest.
    ///
    /// The outcome is always populated so the caller can release companion
    /// files and report; the `Result` carries the first failure.
    pub fn process_changes(
        &mut self,
        reference: &QueueFileRef,
    ) -> (IncludeOutcome, Result<()>) {
        let mut outcome = IncludeOutcome::default();

        if !reference.name.ends_with(".changes") {
            return (outcome, Err(anyhow!("Invalid filename {}", reference.name)));
        }

        let data = match fs::read(reference.path()) {
            Ok(data) => data,
            Err(err) => return (outcome, Err(err.into())),
        };
        let checked = match self.auth.check_clearsigned(&data) {
            Ok(checked) => checked,
            Err(err) => return (outcome, Err(err.into())),
        };

        let auth_failure = match &checked.status {
            SignatureStatus::Verified(signer) => {
                outcome.send_to = signer.addresses();
                None
            }
            SignatureStatus::NotSigned => {
                outcome.should_report = true;
                Some(anyhow!("Unauthorized upload {}: not signed", reference.id()))
            }
            SignatureStatus::Invalid(message) => {
                outcome.should_report = true;
                Some(anyhow!(
                    "Unauthorized upload {}: {message}",
                    reference.id()
                ))
            }
        };

        let changes = match ChangesFile::parse(checked.plaintext.as_slice()) {
            Ok(changes) => changes,
            Err(err) => return (outcome, Err(err.into())),
        };
        if !outcome.send_to.contains(&changes.maintainer) {
            outcome.send_to.push(changes.maintainer.clone());
        }

        for file in &changes.md5_files {
            outcome
                .files_to_release
                .push(reference.companion(&file.name));
        }

        if let Some(failure) = auth_failure {
            return (outcome, Err(failure));
        }

        let comps: Vec<Component> = reference.component.into_iter().collect();
        match self
            .repository
            .include(&changes, &reference.path(), &comps)
        {
            Ok(output) => {
                outcome.output = output;
                info!("included {}", reference.id());
                (outcome, Ok(()))
            }
            Err(err) => {
                if let crate::repository::RepoError::Subprocess { output, .. } = &err {
                    outcome.output = output.clone();
                }
                (outcome, Err(err.into()))
            }
        }
    }

    /// Enable a distribution/architecture pair: create the chroot when the
    /// builder lacks it, record the user policy, extend the repository.
    pub fn add_distribution_support(
        &mut self,
        dist: Codename,
        arch: Architecture,
        output: &mut (dyn Write + Send),
    ) -> Result<()> {
        let available = self.builder.available_architectures(dist);
        if !available.contains(&arch) {
            self.builder
                .init_distribution(dist, arch, output)
                .with_context(|| format!("Builder could not initialize distribution {dist}-{arch}"))?;
            info!("builder initialized {dist}-{arch}");
        }

        self.dist_config
            .add(dist, arch)
            .context("Could not modify user settings")?;
        self.repository
            .add(dist, &[arch], &[Component::Main])?;
        info!("enabled user distribution support for {dist}-{arch}");
        Ok(())
    }

    /// Disable a distribution/architecture pair; with `remove_chroot` the
    /// builder image is erased as well (local builders only).
    pub fn remove_distribution_support(
        &mut self,
        dist: Codename,
        arch: Architecture,
        remove_chroot: bool,
    ) -> Result<()> {
        self.dist_config.remove(dist, arch)?;
        self.repository.remove(dist, &[arch], &[])?;
        if remove_chroot {
            self.builder.remove_distribution(dist, arch)?;
        }
        Ok(())
    }

    /// Cross-reference the user policy with the builder's images. Fails on
    /// a policy entry the builder cannot serve.
    pub fn supported_distributions(
        &mut self,
    ) -> Result<BTreeMap<Codename, Vec<(Architecture, bool)>>> {
        let mut report: BTreeMap<Codename, Vec<(Architecture, bool)>> = BTreeMap::new();
        for dist in self.builder.available_distributions() {
            report.insert(
                dist,
                self.builder
                    .available_architectures(dist)
                    .into_iter()
                    .map(|arch| (arch, false))
                    .collect(),
            );
        }

        for (dist, archs) in self.dist_config.supported() {
            for arch in archs {
                let enabled = report
                    .get_mut(&dist)
                    .and_then(|entries| {
                        entries
                            .iter_mut()
                            .find(|(candidate, _)| *candidate == arch)
                    })
                    .ok_or_else(|| {
                        anyhow!(
                            "System consistency error: user policy lists {dist}-{arch}, but the builder does not support it"
                        )
                    })?;
                enabled.1 = true;
            }
        }
        Ok(report)
    }

    /// Update the chroot of an enabled distribution/architecture pair.
    pub fn update_distribution(
        &mut self,
        dist: Codename,
        arch: Architecture,
        output: &mut (dyn Write + Send),
    ) -> Result<()> {
        if !self.builder.available_architectures(dist).contains(&arch) {
            bail!("Distribution {dist}-{arch} is not supported by the builder, could not update it");
        }
        Ok(self.builder.update_distribution(dist, arch, output)?)
    }

    /// Store a PPA dependency after resolving its signing key.
    pub fn create_ppa_dependency(&mut self, address: &str) -> Result<String> {
        let access = ppa::resolve(address)?;
        if self.deps.list().contains_key(&access.id) {
            return Err(AccessError::AlreadyExists(access.id).into());
        }
        let id = access.id.clone();
        self.deps.store(access)?;
        Ok(id)
    }

    /// Store a plain remote dependency with its armored public key.
    pub fn create_remote_dependency(&mut self, address: &str, key: &[u8]) -> Result<String> {
        use sequoia_openpgp::{Cert, parse::Parse, serialize::SerializeInto};

        let cert = Cert::from_bytes(key)
            .map_err(|err| anyhow!("not a usable PGP public key: {err}"))?;
        let armored = cert
            .armored()
            .to_vec()
            .map_err(|err| anyhow!("could not armor key: {err}"))?;

        if self.deps.list().contains_key(address) {
            return Err(AccessError::AlreadyExists(address.to_owned()).into());
        }
        let access = RepositoryAccess {
            id: address.to_owned(),
            address: address.to_owned(),
            armored_public_key: Some(String::from_utf8(armored)?),
            components: BTreeMap::new(),
        };
        let id = access.id.clone();
        self.deps.store(access)?;
        Ok(id)
    }

    /// Edit the per-codename component sets of a stored dependency. PPA ids
    /// are restricted to `main`; a dependency left without components is
    /// removed entirely.
    pub fn edit_dependency(
        &mut self,
        id: &str,
        to_add: &BTreeMap<Codename, Vec<Component>>,
        to_remove: &BTreeMap<Codename, Vec<Component>>,
    ) -> Result<()> {
        let Some(mut access) = self.deps.list().get(id).cloned() else {
            return Err(AccessError::NotListed(id.to_owned()).into());
        };

        for (dist, comps) in to_add {
            let comps = if access.is_ppa() {
                if comps.iter().any(|comp| *comp != Component::Main) {
                    return Err(AccessError::PpaComponentRestriction(comps.clone()).into());
                }
                vec![Component::Main]
            } else {
                comps.clone()
            };
            let entry = access.components.entry(*dist).or_default();
            for comp in comps {
                if !entry.contains(&comp) {
                    entry.push(comp);
                }
            }
            if entry.is_empty() {
                access.components.remove(dist);
            }
        }

        for (dist, comps) in to_remove {
            if let Some(entry) = access.components.get_mut(dist) {
                entry.retain(|comp| !comps.contains(comp));
                if entry.is_empty() {
                    access.components.remove(dist);
                }
            }
        }

        if access.components.is_empty() {
            return Ok(self.deps.remove(id)?);
        }
        Ok(self.deps.store(access)?)
    }

    /// Remove a stored dependency.
    pub fn remove_dependency(&mut self, id: &str) -> Result<()> {
        Ok(self.deps.remove(id)?)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use basic_debian_utils::{package::SourcePackageRef, version::Version};

    use super::*;
    use crate::access::DiskDepsManager;
    use crate::archiver::{ArchiveError, ArchivedSource};
    use crate::authenticator::stub::StubAuthenticator;
    use crate::builder::stub::StubBuilder;
    use crate::builder::BuildError;
    use crate::jsonstore::StoreError;
    use crate::repository::{RepoDist, RepoError};
    use regex::Regex;

    #[derive(Debug, Default)]
    struct StubArchiver;

    impl PackageArchiver for StubArchiver {
        fn archive_source(
            &mut self,
            _dsc: SourceControlFile,
        ) -> Result<ArchivedSource, ArchiveError> {
            Err(ArchiveError::EmptyName)
        }

        fn archive_build_result(
            &mut self,
            result: crate::builder::BuildResult,
        ) -> Result<crate::builder::BuildResult, ArchiveError> {
            Ok(result)
        }

        fn archived_source(
            &mut self,
            reference: &SourcePackageRef,
        ) -> Result<ArchivedSource, ArchiveError> {
            Err(ArchiveError::NotArchived(reference.clone()))
        }

        fn build_result(
            &mut self,
            reference: &SourcePackageRef,
        ) -> Result<crate::builder::BuildResult, ArchiveError> {
            Err(ArchiveError::NotArchived(reference.clone()))
        }
    }

    #[derive(Debug, Default)]
    struct StubRepository {
        dists: std::collections::BTreeMap<Codename, RepoDist>,
        included: Mutex<Vec<(Codename, Vec<Component>)>>,
        fail_include: bool,
    }

    impl AptRepository for StubRepository {
        fn add(
            &mut self,
            dist: Codename,
            archs: &[Architecture],
            comps: &[Component],
        ) -> Result<(), RepoError> {
            let record = self.dists.entry(dist).or_insert(RepoDist {
                codename: dist,
                vendor: dist.vendor(),
                components: Vec::new(),
                architectures: Vec::new(),
            });
            for arch in archs {
                if !record.architectures.contains(arch) {
                    record.architectures.push(*arch);
                }
            }
            for comp in comps {
                if !record.components.contains(comp) {
                    record.components.push(*comp);
                }
            }
            Ok(())
        }

        fn remove(
            &mut self,
            dist: Codename,
            _archs: &[Architecture],
            _comps: &[Component],
        ) -> Result<(), RepoError> {
            self.dists.remove(&dist);
            Ok(())
        }

        fn list(&self) -> &std::collections::BTreeMap<Codename, RepoDist> {
            &self.dists
        }

        fn include(
            &mut self,
            changes: &ChangesFile,
            _changes_path: &std::path::Path,
            comps: &[Component],
        ) -> Result<String, RepoError> {
            if self.fail_include {
                return Err(RepoError::Subprocess {
                    command: "reprepro".into(),
                    output: "include failed".into(),
                });
            }
            self.included
                .lock()
                .unwrap()
                .push((changes.distribution, comps.to_vec()));
            Ok("included\n".into())
        }

        fn list_packages(
            &mut self,
            _dist: Codename,
            _pattern: &Regex,
        ) -> Result<Vec<basic_debian_utils::package::BinaryPackageRef>, RepoError> {
            Ok(Vec::new())
        }

        fn remove_package(
            &mut self,
            _dist: Codename,
            _reference: &basic_debian_utils::package::BinaryPackageRef,
        ) -> Result<(), RepoError> {
            Ok(())
        }

        fn access(&self) -> RepositoryAccess {
            RepositoryAccess {
                id: "local:/tmp/repo".into(),
                address: "file:/tmp/repo".into(),
                armored_public_key: None,
                components: BTreeMap::new(),
            }
        }
    }

    #[derive(Debug, Default)]
    struct MemoryHistory(Vec<SourcePackageRef>);

    impl History for MemoryHistory {
        fn append(&mut self, reference: SourcePackageRef) -> Result<(), StoreError> {
            self.0.insert(0, reference);
            Ok(())
        }

        fn get(&self) -> &[SourcePackageRef] {
            &self.0
        }

        fn remove_front(&mut self, reference: &SourcePackageRef) -> Result<(), StoreError> {
            let run = self.0.iter().take_while(|entry| *entry == reference).count();
            self.0.drain(..run);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct MemoryDistConfig(BTreeMap<Codename, Vec<Architecture>>);

    impl UserDistConfig for MemoryDistConfig {
        fn add(&mut self, dist: Codename, arch: Architecture) -> Result<(), StoreError> {
            let entry = self.0.entry(dist).or_default();
            if !entry.contains(&arch) {
                entry.push(arch);
            }
            Ok(())
        }

        fn remove(&mut self, dist: Codename, arch: Architecture) -> Result<(), StoreError> {
            if let Some(entry) = self.0.get_mut(&dist) {
                entry.retain(|candidate| *candidate != arch);
                if entry.is_empty() {
                    self.0.remove(&dist);
                }
            }
            Ok(())
        }

        fn supported(&self) -> BTreeMap<Codename, Vec<Architecture>> {
            self.0.clone()
        }
    }

    fn interactor(dir: &std::path::Path) -> Interactor {
        Interactor {
            archiver: Box::new(StubArchiver),
            repository: Box::new(StubRepository::default()),
            builder: Box::new(StubBuilder {
                dists: vec![(Codename::Unstable, Architecture::Amd64)],
                built: Mutex::new(Vec::new()),
                result: None,
            }),
            history: Box::new(MemoryHistory::default()),
            dist_config: Box::new(MemoryDistConfig::default()),
            deps: Box::new(DiskDepsManager::open(dir.join("deps.json")).unwrap()),
            auth: Box::new(StubAuthenticator),
        }
    }

    #[test]
    fn add_distribution_support_records_policy_and_repository() {
        let dir = tempfile::tempdir().unwrap();
        let mut interactor = interactor(dir.path());

        let mut sink = Vec::new();
        interactor
            .add_distribution_support(Codename::Unstable, Architecture::Amd64, &mut sink)
            .unwrap();

        assert_eq!(
            interactor.dist_config.supported()[&Codename::Unstable],
            vec![Architecture::Amd64]
        );
        assert_eq!(
            interactor.repository.list()[&Codename::Unstable].components,
            vec![Component::Main]
        );
    }

    #[test]
    fn consistency_report_flags_policy_without_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut interactor = interactor(dir.path());

        interactor
            .dist_config
            .add(Codename::Trusty, Architecture::Amd64)
            .unwrap();
        assert!(interactor.supported_distributions().is_err());
    }

    #[test]
    fn consistency_report_marks_enabled_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let mut interactor = interactor(dir.path());

        interactor
            .dist_config
            .add(Codename::Unstable, Architecture::Amd64)
            .unwrap();
        let report = interactor.supported_distributions().unwrap();
        assert_eq!(report[&Codename::Unstable], vec![(Architecture::Amd64, true)]);
    }

    #[test]
    fn edit_dependency_restricts_ppa_to_main() {
        let dir = tempfile::tempdir().unwrap();
        let mut interactor = interactor(dir.path());
        interactor
            .deps
            .store(RepositoryAccess {
                id: "ppa:owner/name".into(),
                address: "http://ppa.launchpad.net/owner/name/ubuntu".into(),
                armored_public_key: None,
                components: BTreeMap::new(),
            })
            .unwrap();

        let add = BTreeMap::from([(Codename::Trusty, vec![Component::Universe])]);
        assert!(
            interactor
                .edit_dependency("ppa:owner/name", &add, &BTreeMap::new())
                .is_err()
        );

        let add = BTreeMap::from([(Codename::Trusty, vec![Component::Main])]);
        interactor
            .edit_dependency("ppa:owner/name", &add, &BTreeMap::new())
            .unwrap();
        assert_eq!(
            interactor.deps.list()["ppa:owner/name"].components[&Codename::Trusty],
            vec![Component::Main]
        );
    }

    #[test]
    fn edit_dependency_removes_empty_access() {
        let dir = tempfile::tempdir().unwrap();
        let mut interactor = interactor(dir.path());
        interactor
            .deps
            .store(RepositoryAccess {
                id: "http://example.org".into(),
                address: "http://example.org".into(),
                armored_public_key: None,
                components: BTreeMap::from([(Codename::Unstable, vec![Component::Main])]),
            })
            .unwrap();

        let remove = BTreeMap::from([(Codename::Unstable, vec![Component::Main])]);
        interactor
            .edit_dependency("http://example.org", &BTreeMap::new(), &remove)
            .unwrap();
        assert!(interactor.deps.list().is_empty());
    }

    #[test]
    fn build_of_unsupported_distribution_fails_early() {
        let dir = tempfile::tempdir().unwrap();
        let mut interactor = interactor(dir.path());
        // the stub archiver rejects everything, so the build fails before
        // touching the builder
        let dsc = SourceControlFile {
            identifier: SourcePackageRef {
                source: "aha".into(),
                version: Version::try_from("1.0-1").unwrap(),
            },
            base_path: dir.path().to_owned(),
            format: "3.0 (quilt)".into(),
            architectures: vec![Architecture::Any],
            maintainer: Address {
                name: String::new(),
                email: "abe@debian.org".into(),
            },
            md5_files: vec![],
            sha1_files: vec![],
            sha256_files: vec![],
        };
        let mut sink = Vec::new();
        assert!(interactor.build_package(dsc, &mut sink).is_err());
    }

    const CHANGES: &str = "Format: 1.8
Date: Sat, 14 Dec 2013 12:17:50 +0100
Source: aha
Binary: aha
Architecture: source amd64
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
 e40f4269a1e50a09575cb0b2a5791c45 11508 text extra aha_0.4.7.2-1_amd64.deb
";

    #[test]
    fn process_changes_releases_companions_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let mut interactor = interactor(dir.path());

        let staging = dir.path().join("incoming-staging");
        fs::create_dir_all(&staging).unwrap();
        let reference = QueueFileRef::staged_at(
            "aha_0.4.7.2-1_amd64.changes",
            None,
            staging.clone(),
        );
        fs::write(reference.path(), CHANGES).unwrap();

        let (outcome, result) = interactor.process_changes(&reference);
        // the stub authenticator cannot verify anything, so the unsigned
        // manifest is a reportable authorization failure
        assert!(result.is_err());
        assert!(outcome.should_report);
        assert_eq!(outcome.send_to.len(), 1);
        assert_eq!(outcome.send_to[0].email, "abe@debian.org");
        assert_eq!(
            outcome
                .files_to_release
                .iter()
                .map(|file| file.name.as_str())
                .collect::<Vec<_>>(),
            vec!["aha_0.4.7.2-1.dsc", "aha_0.4.7.2-1_amd64.deb"]
        );
    }

    #[test]
    fn process_changes_rejects_non_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let mut interactor = interactor(dir.path());
        let reference =
            QueueFileRef::staged_at("aha_0.4.7.2-1.dsc", None, dir.path().to_owned());
        let (outcome, result) = interactor.process_changes(&reference);
        assert!(result.is_err());
        assert!(outcome.files_to_release.is_empty());
    }

    #[test]
    fn remove_distribution_over_rpc_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut interactor = interactor(dir.path());
        interactor.builder = Box::new(crate::rpc::ClientBuilder::new(dir.path().join("none.sock")));
        assert!(matches!(
            interactor
                .remove_distribution_support(Codename::Unstable, Architecture::Amd64, true)
                .unwrap_err()
                .downcast::<BuildError>(),
            Ok(BuildError::RemoteRemoveRefused)
        ));
    }
}

// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! The locally managed signed repository, driven through reprepro.
//!
//! The distribution matrix is persisted as reprepro's `conf/distributions`
//! control file and mirrored in memory. A lock file guards reads and writes;
//! failed persists restore the previous in-memory state. Package operations
//! shell out to reprepro with `GNUPGHOME` pointing at the signing keyring.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use fd_lock::RwLock;
use log::{debug, info};
use regex::Regex;
use thiserror::Error;

use basic_debian_utils::{
    architectures::Architecture,
    archive::{Codename, Component, Vendor},
    changes::ChangesFile,
    control::{ControlError, ControlLexer, ControlToken},
    package::BinaryPackageRef,
    version::Version,
};

use crate::access::RepositoryAccess;
use crate::config::Config;

/// Errors of the repository publisher.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The repository lock is held elsewhere
    #[error("Could not lock {0}")]
    Lock(PathBuf),
    /// A codename outside the membership table
    #[error("Unknown distribution codename {0}")]
    UnknownCodename(String),
    /// An architecture outside the membership table
    #[error("Invalid architecture {0}")]
    UnknownArchitecture(String),
    /// An unknown component name
    #[error("Invalid component {0}")]
    UnknownComponent(String),
    /// Operation on a distribution the repository does not host
    #[error("Distribution {0} is not supported")]
    UnsupportedDistribution(Codename),
    /// Removal of an architecture the distribution does not list
    #[error("{0} does not list {1} architecture")]
    ArchitectureNotListed(Codename, Architecture),
    /// Removal of a component the distribution does not list
    #[error("{0} does not list {1} component")]
    ComponentNotListed(Codename, Component),
    /// A distribution record without components
    #[error("Invalid {0} definition: missing at least one component")]
    EmptyComponents(Codename),
    /// A distribution record without architectures
    #[error("Invalid {0} definition: missing at least one architecture")]
    EmptyArchitectures(Codename),
    /// A repository-wide field with two different values
    #[error("Could not set {name} to {new}, as it has value {old}")]
    FieldConflict {
        /// Field name
        name: &'static str,
        /// Value already in place
        old: String,
        /// Conflicting value from the configuration file
        new: String,
    },
    /// A paragraph missing one of its mandatory fields
    #[error("missing {0}:")]
    MissingParagraphField(&'static str),
    /// The configuration file does not lex
    #[error("{path} parse error: {source}")]
    Config {
        /// Path of the configuration file
        path: PathBuf,
        /// The parse error
        source: ControlError,
    },
    /// A change manifest lists an invalid binary package
    #[error(transparent)]
    InvalidPackage(#[from] basic_debian_utils::ParseError),
    /// reprepro exited with a failure; the combined output is attached
    #[error("{command} failed:\n{output}")]
    Subprocess {
        /// The command line that failed
        command: String,
        /// Combined stdout and stderr
        output: String,
    },
    /// Underlying I/O failure
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One hosted distribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoDist {
    /// The distribution codename
    pub codename: Codename,
    /// Vendor resolved from the codename table
    pub vendor: Vendor,
    /// Hosted components
    pub components: Vec<Component>,
    /// Hosted architectures
    pub architectures: Vec<Architecture>,
}

/// Capability set of the repository publisher.
pub trait AptRepository: Send {
    /// Union the given architectures and components into a distribution,
    /// creating it if new.
    fn add(
        &mut self,
        dist: Codename,
        archs: &[Architecture],
        comps: &[Component],
    ) -> Result<(), RepoError>;

    /// Subtract architectures and components; an empty residual record
    /// deletes the distribution.
    fn remove(
        &mut self,
        dist: Codename,
        archs: &[Architecture],
        comps: &[Component],
    ) -> Result<(), RepoError>;

    /// Current distribution matrix.
    fn list(&self) -> &BTreeMap<Codename, RepoDist>;

    /// Include an upload into the given components (empty = all). Returns
    /// the combined reprepro log.
    fn include(
        &mut self,
        changes: &ChangesFile,
        changes_path: &Path,
        comps: &[Component],
    ) -> Result<String, RepoError>;

    /// Binary packages of a distribution whose name matches `pattern`.
    fn list_packages(
        &mut self,
        dist: Codename,
        pattern: &Regex,
    ) -> Result<Vec<BinaryPackageRef>, RepoError>;

    /// Remove a binary package from a distribution.
    fn remove_package(
        &mut self,
        dist: Codename,
        reference: &BinaryPackageRef,
    ) -> Result<(), RepoError>;

    /// The repository itself as a build dependency.
    fn access(&self) -> RepositoryAccess;
}

/// Publisher persisting its matrix in reprepro's configuration layout.
#[derive(Debug)]
pub struct RepreproRepository {
    working_dir: PathBuf,
    keyring_dir: PathBuf,
    dist_config_path: PathBuf,
    lock_path: PathBuf,
    lock: RwLock<File>,
    dists: BTreeMap<Codename, RepoDist>,
    origin: String,
    label: String,
    description: String,
    sign_with: String,
}

fn set_field(current: &mut String, name: &'static str, value: &str) -> Result<(), RepoError> {
    let value = value.trim();
    if current.is_empty() {
        *current = value.to_owned();
    }
    if current != value {
        return Err(RepoError::FieldConflict {
            name,
            old: current.clone(),
            new: value.to_owned(),
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Paragraph {
    codename: Option<Codename>,
    components: Vec<Component>,
    architectures: Vec<Architecture>,
}

impl Paragraph {
    fn is_empty(&self) -> bool {
        self.codename.is_none() && self.components.is_empty() && self.architectures.is_empty()
    }

    fn into_dist(self) -> Result<RepoDist, RepoError> {
        let codename = self
            .codename
            .ok_or(RepoError::MissingParagraphField("Codename"))?;
        if self.architectures.is_empty() {
            return Err(RepoError::MissingParagraphField("Architectures"));
        }
        if self.components.is_empty() {
            return Err(RepoError::MissingParagraphField("Components"));
        }
        Ok(RepoDist {
            codename,
            vendor: codename.vendor(),
            components: self.components,
            architectures: self.architectures,
        })
    }
}

impl RepreproRepository {
    /// Open the repository below `working_dir`, creating the configuration
    /// on first use, and load the distribution matrix.
    pub fn new(
        config: &Config,
        working_dir: PathBuf,
        keyring_dir: PathBuf,
    ) -> Result<Self, RepoError> {
        let conf_dir = working_dir.join("conf");
        fs::create_dir_all(&conf_dir)?;

        let dist_config_path = conf_dir.join("distributions");
        if !dist_config_path.exists() {
            File::create(&dist_config_path)?;
        }

        let lock_path = conf_dir.join("conf.lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        let mut res = Self {
            working_dir,
            keyring_dir,
            dist_config_path,
            lock_path,
            lock: RwLock::new(lock_file),
            dists: BTreeMap::new(),
            origin: config.origin.clone(),
            label: config.label.clone(),
            description: config.description.clone(),
            sign_with: config.sign_with.clone(),
        };
        res.load()?;
        Ok(res)
    }

    fn load(&mut self) -> Result<(), RepoError> {
        let Self {
            dist_config_path,
            lock_path,
            lock,
            dists,
            origin,
            label,
            description,
            sign_with,
            ..
        } = self;
        let _guard = lock
            .try_write()
            .map_err(|_| RepoError::Lock(lock_path.clone()))?;

        let file = File::open(&*dist_config_path)?;
        let config_err = |source| RepoError::Config {
            path: dist_config_path.clone(),
            source,
        };

        let mut paragraph = Paragraph::default();
        for token in ControlLexer::new(BufReader::new(file)) {
            let field = match token.map_err(config_err)? {
                ControlToken::ParagraphBreak => {
                    if !paragraph.is_empty() {
                        let dist = std::mem::take(&mut paragraph).into_dist()?;
                        dists.insert(dist.codename, dist);
                    }
                    continue;
                }
                ControlToken::Field(field) => field,
            };

            let value = match field.lines.as_slice() {
                [value] => value.trim(),
                _ => {
                    return Err(config_err(ControlError::ExpectedSingleLine(
                        field.name.clone(),
                    )));
                }
            };

            match field.name.as_str() {
                "Codename" => {
                    paragraph.codename = Some(
                        Codename::try_from(value)
                            .map_err(|_| RepoError::UnknownCodename(value.to_owned()))?,
                    );
                }
                "Architectures" => {
                    for arch in value.split_ascii_whitespace() {
                        paragraph.architectures.push(
                            Architecture::try_from(arch)
                                .map_err(|_| RepoError::UnknownArchitecture(arch.to_owned()))?,
                        );
                    }
                }
                "Components" => {
                    for comp in value.split_ascii_whitespace() {
                        paragraph.components.push(
                            Component::try_from(comp)
                                .map_err(|_| RepoError::UnknownComponent(comp.to_owned()))?,
                        );
                    }
                }
                "Origin" => set_field(origin, "Origin", value)?,
                "Label" => set_field(label, "Label", value)?,
                "Description" => set_field(description, "Description", value)?,
                "SignWith" => set_field(sign_with, "SignWith", value)?,
                other => {
                    return Err(config_err(ControlError::UnknownField(other.to_owned())));
                }
            }
        }
        if !paragraph.is_empty() {
            let dist = paragraph.into_dist()?;
            dists.insert(dist.codename, dist);
        }

        Ok(())
    }

    fn save(&mut self) -> Result<(), RepoError> {
        let Self {
            working_dir,
            dist_config_path,
            lock_path,
            lock,
            dists,
            origin,
            label,
            description,
            sign_with,
            ..
        } = self;
        let _guard = lock
            .try_write()
            .map_err(|_| RepoError::Lock(lock_path.clone()))?;

        let mut file = File::create(&*dist_config_path)?;
        for dist in dists.values() {
            writeln!(file, "# {}/{}", dist.vendor, dist.codename)?;
            writeln!(file, "Codename: {}", dist.codename)?;
            writeln!(file, "Origin: {origin}")?;
            writeln!(file, "Label: {label}")?;
            writeln!(file, "Description: {description}")?;
            writeln!(file, "SignWith: {sign_with}")?;
            write!(file, "Components:")?;
            for comp in &dist.components {
                write!(file, " {comp}")?;
            }
            writeln!(file)?;
            write!(file, "Architectures:")?;
            for arch in &dist.architectures {
                write!(file, " {arch}")?;
            }
            writeln!(file)?;
            writeln!(file)?;
        }

        let mut options = File::create(working_dir.join("conf/options"))?;
        writeln!(options, "verbose")?;
        writeln!(options, "basedir .")?;
        Ok(())
    }

    fn tool(&self) -> Reprepro<'_> {
        Reprepro {
            working_dir: &self.working_dir,
            keyring_dir: &self.keyring_dir,
        }
    }

    // union the requested architectures/components into the in-memory
    // matrix and persist; restores the previous state on failure
    fn apply_add(
        &mut self,
        dist: Codename,
        archs: &[Architecture],
        comps: &[Component],
    ) -> Result<(), RepoError> {
        let saved = self.dists.get(&dist).cloned();
        let mut record = saved.clone().unwrap_or(RepoDist {
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

        if record.components.is_empty() {
            return Err(RepoError::EmptyComponents(dist));
        }
        if record.architectures.is_empty() {
            return Err(RepoError::EmptyArchitectures(dist));
        }

        self.dists.insert(dist, record);
        if let Err(err) = self.save() {
            match saved {
                Some(saved) => self.dists.insert(dist, saved),
                None => self.dists.remove(&dist),
            };
            return Err(err);
        }
        Ok(())
    }

    fn apply_remove(
        &mut self,
        dist: Codename,
        archs: &[Architecture],
        comps: &[Component],
    ) -> Result<(), RepoError> {
        let Some(saved) = self.dists.get(&dist).cloned() else {
            return Err(RepoError::UnsupportedDistribution(dist));
        };
        let mut record = saved.clone();

        for arch in archs {
            let Some(idx) = record.architectures.iter().position(|a| a == arch) else {
                return Err(RepoError::ArchitectureNotListed(dist, *arch));
            };
            record.architectures.remove(idx);
        }
        for comp in comps {
            let Some(idx) = record.components.iter().position(|c| c == comp) else {
                return Err(RepoError::ComponentNotListed(dist, *comp));
            };
            record.components.remove(idx);
        }

        if record.architectures.is_empty() || record.components.is_empty() {
            self.dists.remove(&dist);
        } else {
            self.dists.insert(dist, record);
        }

        if let Err(err) = self.save() {
            self.dists.insert(dist, saved);
            return Err(err);
        }
        Ok(())
    }

}

// The reprepro invocations, separated from the matrix state so they can run
// while the repository lock guard is held.
#[derive(Clone, Copy, Debug)]
struct Reprepro<'a> {
    working_dir: &'a Path,
    keyring_dir: &'a Path,
}

impl Reprepro<'_> {
    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new("reprepro");
        command
            .args(args)
            .current_dir(self.working_dir)
            .env("GNUPGHOME", self.keyring_dir);
        command
    }

    fn run(&self, args: &[&str], log: Option<&mut String>) -> Result<(), RepoError> {
        let mut command = self.command(args);
        let rendered = format!("{command:?}");
        debug!("running {rendered}");
        let output = command.output()?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if let Some(log) = log {
            log.push_str(&format!("--- Running {rendered}\n"));
            log.push_str(&combined);
        }
        if !output.status.success() {
            return Err(RepoError::Subprocess {
                command: rendered,
                output: combined,
            });
        }
        Ok(())
    }

    fn list_packages(&self, dist: Codename) -> Result<Vec<BinaryPackageRef>, RepoError> {
        let mut command = self.command(&[
            "--list-format",
            "${package} ${version} ${architecture}\\n",
            "list",
            dist.name(),
        ]);
        let rendered = format!("{command:?}");
        let output = command.output()?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(RepoError::Subprocess {
                command: rendered,
                output: combined,
            });
        }

        let line_format = Regex::new(r"^([a-z0-9][a-z0-9+\-.]+) ([^ ]+) ([^ ]+)$")
            .expect("static regex compiles");
        let mut packages = Vec::new();
        for line in combined.lines() {
            let Some(captures) = line_format.captures(line) else {
                continue;
            };
            let Ok(version) = Version::parse(&captures[2]) else {
                continue;
            };
            let Ok(arch) = Architecture::try_from(&captures[3]) else {
                continue;
            };
            packages.push(BinaryPackageRef {
                name: captures[1].to_owned(),
                version,
                arch,
            });
        }
        Ok(packages)
    }

    fn remove_package(
        &self,
        dist: Codename,
        name: &str,
        log: Option<&mut String>,
    ) -> Result<(), RepoError> {
        self.run(&["remove", dist.name(), name], log)
    }
}

impl AptRepository for RepreproRepository {
    fn add(
        &mut self,
        dist: Codename,
        archs: &[Architecture],
        comps: &[Component],
    ) -> Result<(), RepoError> {
        info!("adding {dist} ({archs:?}, {comps:?}) to the repository");
        self.apply_add(dist, archs, comps)?;

        // bootstrap the exported indices, then pull arch-independent
        // packages into the new architectures
        self.tool().run(&["export", dist.name()], None)?;
        for arch in archs {
            self.tool().run(&["flood", dist.name(), arch.name()], None)?;
        }
        Ok(())
    }

    fn remove(
        &mut self,
        dist: Codename,
        archs: &[Architecture],
        comps: &[Component],
    ) -> Result<(), RepoError> {
        info!("removing ({archs:?}, {comps:?}) from {dist}");
        self.apply_remove(dist, archs, comps)?;
        self.tool().run(&["--delete", "clearvanished"], None)?;
        Ok(())
    }

    fn list(&self) -> &BTreeMap<Codename, RepoDist> {
        &self.dists
    }

    fn include(
        &mut self,
        changes: &ChangesFile,
        changes_path: &Path,
        comps: &[Component],
    ) -> Result<String, RepoError> {
        let Self {
            working_dir,
            keyring_dir,
            lock_path,
            lock,
            dists,
            ..
        } = self;
        let dist = changes.distribution;
        let Some(record) = dists.get(&dist) else {
            return Err(RepoError::UnsupportedDistribution(dist));
        };

        let _guard = lock
            .try_write()
            .map_err(|_| RepoError::Lock(lock_path.clone()))?;
        let tool = Reprepro {
            working_dir: working_dir.as_path(),
            keyring_dir: keyring_dir.as_path(),
        };

        let mut log = String::new();

        // replace semantics: drop binaries that are already present in the
        // same version before importing the new upload
        let uploaded = changes.binary_packages()?;
        let existing = tool.list_packages(dist)?;
        for package in &uploaded {
            if existing.contains(package) {
                debug!("replacing {package} in {dist}");
                tool.remove_package(dist, &package.name, Some(&mut log))?;
            }
        }

        let path = changes_path.display().to_string();
        if comps.is_empty() {
            log.push_str(&format!(
                "including {} in all components\n",
                changes.reference.file_name()
            ));
            tool.run(&["include", dist.name(), &path], Some(&mut log))?;
        } else {
            for comp in comps {
                if !record.components.contains(comp) {
                    return Err(RepoError::ComponentNotListed(dist, *comp));
                }
                log.push_str(&format!(
                    "including {} in {comp}\n",
                    changes.reference.file_name()
                ));
                tool.run(
                    &["-C", comp.name(), "include", dist.name(), &path],
                    Some(&mut log),
                )?;
            }
        }
        Ok(log)
    }

    fn list_packages(
        &mut self,
        dist: Codename,
        pattern: &Regex,
    ) -> Result<Vec<BinaryPackageRef>, RepoError> {
        let Self {
            working_dir,
            keyring_dir,
            lock_path,
            lock,
            dists,
            ..
        } = self;
        if !dists.contains_key(&dist) {
            return Err(RepoError::UnsupportedDistribution(dist));
        }
        let _guard = lock
            .try_write()
            .map_err(|_| RepoError::Lock(lock_path.clone()))?;
        let tool = Reprepro {
            working_dir: working_dir.as_path(),
            keyring_dir: keyring_dir.as_path(),
        };

        Ok(tool
            .list_packages(dist)?
            .into_iter()
            .filter(|package| pattern.is_match(&package.name))
            .collect())
    }

    fn remove_package(
        &mut self,
        dist: Codename,
        reference: &BinaryPackageRef,
    ) -> Result<(), RepoError> {
        let Self {
            working_dir,
            keyring_dir,
            lock_path,
            lock,
            dists,
            ..
        } = self;
        if !dists.contains_key(&dist) {
            return Err(RepoError::UnsupportedDistribution(dist));
        }
        let _guard = lock
            .try_write()
            .map_err(|_| RepoError::Lock(lock_path.clone()))?;
        let tool = Reprepro {
            working_dir: working_dir.as_path(),
            keyring_dir: keyring_dir.as_path(),
        };
        tool.remove_package(dist, &reference.name, None)
    }

    fn access(&self) -> RepositoryAccess {
        let absolute = fs::canonicalize(&self.working_dir)
            .unwrap_or_else(|_| self.working_dir.clone());
        RepositoryAccess {
            id: format!("local:{}", absolute.display()),
            address: format!("file:{}", absolute.display()),
            armored_public_key: None,
            components: self
                .dists
                .values()
                .map(|dist| (dist.codename, dist.components.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> Config {
        Config {
            sign_with: "DEADBEEF".into(),
            ..Config::default()
        }
    }

    fn repository(dir: &Path) -> RepreproRepository {
        RepreproRepository::new(
            &config(),
            dir.join("repository"),
            dir.join("gnupg"),
        )
        .unwrap()
    }

    #[test]
    fn fresh_repository_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(dir.path());
        assert!(repo.list().is_empty());
        assert!(dir.path().join("repository/conf/distributions").exists());
    }

    #[test]
    fn add_unions_and_replays() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = repository(dir.path());

        repo.apply_add(Codename::Unstable, &[Architecture::Amd64], &[Component::Main])
            .unwrap();
        repo.apply_add(Codename::Unstable, &[Architecture::I386], &[Component::Main])
            .unwrap();

        let record = &repo.list()[&Codename::Unstable];
        assert_eq!(record.architectures, vec![Architecture::Amd64, Architecture::I386]);
        assert_eq!(record.components, vec![Component::Main]);
        assert_eq!(record.vendor, Vendor::Debian);

        // re-adding the same pair is a no-op
        repo.apply_add(Codename::Unstable, &[Architecture::Amd64], &[Component::Main])
            .unwrap();
        let record = &repo.list()[&Codename::Unstable];
        assert_eq!(record.architectures.len(), 2);

        repo.apply_remove(Codename::Unstable, &[Architecture::Amd64], &[])
            .unwrap();
        assert_eq!(
            repo.list()[&Codename::Unstable].architectures,
            vec![Architecture::I386]
        );

        repo.apply_remove(Codename::Unstable, &[Architecture::I386], &[Component::Main])
            .unwrap();
        assert!(repo.list().is_empty());
    }

    #[test]
    fn remove_of_unlisted_architecture_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = repository(dir.path());
        repo.apply_add(Codename::Unstable, &[Architecture::Amd64], &[Component::Main])
            .unwrap();
        assert!(matches!(
            repo.apply_remove(Codename::Unstable, &[Architecture::Armel], &[]),
            Err(RepoError::ArchitectureNotListed(_, _))
        ));
    }

    #[test]
    fn new_distribution_requires_components() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = repository(dir.path());
        assert!(matches!(
            repo.apply_add(Codename::Unstable, &[Architecture::Amd64], &[]),
            Err(RepoError::EmptyComponents(_))
        ));
    }

    #[test]
    fn matrix_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut repo = repository(dir.path());
            repo.apply_add(
                Codename::Unstable,
                &[Architecture::Amd64, Architecture::I386],
                &[Component::Main, Component::Contrib],
            )
            .unwrap();
            repo.apply_add(Codename::Trusty, &[Architecture::Amd64], &[Component::Main])
                .unwrap();
        }

        let repo = repository(dir.path());
        assert_eq!(repo.list().len(), 2);
        let record = &repo.list()[&Codename::Unstable];
        assert_eq!(record.components, vec![Component::Main, Component::Contrib]);
        assert_eq!(repo.list()[&Codename::Trusty].vendor, Vendor::Ubuntu);

        let content = fs::read_to_string(dir.path().join("repository/conf/distributions")).unwrap();
        assert!(content.contains("Codename: unstable\n"));
        assert!(content.contains("SignWith: DEADBEEF\n"));
        assert!(content.contains("Components: main contrib\n"));
        let options = fs::read_to_string(dir.path().join("repository/conf/options")).unwrap();
        assert_eq!(options, "verbose\nbasedir .\n");
    }

    #[test]
    fn access_lists_hosted_components() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = repository(dir.path());
        repo.apply_add(Codename::Unstable, &[Architecture::Amd64], &[Component::Main])
            .unwrap();

        let access = repo.access();
        assert!(access.id.starts_with("local:"));
        assert!(access.address.starts_with("file:"));
        assert_eq!(access.components[&Codename::Unstable], vec![Component::Main]);
        assert!(access.armored_public_key.is_none());
    }
}

// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! Build interface shared by the cowbuilder backend and the RPC client.

use std::io::{self, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use basic_debian_utils::{
    architectures::Architecture, archive::Codename, changes::ChangesFile, control::ControlError,
    source_control::SourceControlFile,
};

use crate::access::RepositoryAccess;

/// Errors of build and chroot management operations.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The requested distribution/architecture pair has no chroot
    #[error("Distribution {0}-{1} is not supported")]
    UnsupportedDistribution(Codename, Architecture),
    /// The architecture cannot be built on this host
    #[error("Architecture {0} is not in the supported architecture list")]
    UnsupportedArchitecture(Architecture),
    /// The chroot already exists
    #[error("Distribution {0}-{1} is already supported")]
    AlreadySupported(Codename, Architecture),
    /// A required build product is missing
    #[error("Missing expected result file {0}")]
    MissingResult(PathBuf),
    /// Every architecture was skipped
    #[error("No architecture was built")]
    NothingBuilt,
    /// The startup lock of the chroot base is held elsewhere
    #[error("Could not lock {0}")]
    Lock(PathBuf),
    /// A tool exited with a failure; its combined output is attached
    #[error("{command} failed:\n{output}")]
    Subprocess {
        /// The command line that failed
        command: String,
        /// Combined stdout and stderr
        output: String,
    },
    /// Decoding a produced change manifest failed
    #[error(transparent)]
    Control(#[from] ControlError),
    /// Underlying I/O failure
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Failure reported by the remote builder
    #[error("{0}")]
    Rpc(String),
    /// The server refuses distribution removal for remote clients
    #[error("Client builders are not allowed to remove distributions")]
    RemoteRemoveRefused,
}

/// Result of a package build.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildResult {
    /// Combined output of the chroot tool invocations
    pub build_log: String,
    /// The parsed change manifest describing the built binaries
    pub changes: ChangesFile,
    /// Name of the change manifest, relative to `base_path`
    pub changes_path: String,
    /// Directory holding the build products
    pub base_path: PathBuf,
}

/// Arguments of a package build.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildArguments {
    /// The source package to build
    pub source_package: SourceControlFile,
    /// Target distribution
    pub dist: Codename,
    /// Ordered architectures to build for; the last one also builds
    /// architecture-independent binaries
    pub archs: Vec<Architecture>,
    /// External repositories made available inside the chroot
    pub deps: Vec<RepositoryAccess>,
    /// Directory receiving the build products
    pub dest: PathBuf,
}

/// Interface of a module that can build packages and manage chroots.
pub trait DebianBuilder: Send + Sync {
    /// Build a source package for the given architectures, streaming tool
    /// output to `output`.
    fn build_package(
        &self,
        args: BuildArguments,
        output: &mut (dyn Write + Send),
    ) -> Result<BuildResult, BuildError>;

    /// Create the chroot for a distribution/architecture pair.
    fn init_distribution(
        &self,
        dist: Codename,
        arch: Architecture,
        output: &mut (dyn Write + Send),
    ) -> Result<(), BuildError>;

    /// Erase the chroot of a distribution/architecture pair.
    fn remove_distribution(&self, dist: Codename, arch: Architecture) -> Result<(), BuildError>;

    /// Update the chroot of a distribution/architecture pair.
    fn update_distribution(
        &self,
        dist: Codename,
        arch: Architecture,
        output: &mut (dyn Write + Send),
    ) -> Result<(), BuildError>;

    /// Distributions with at least one chroot.
    fn available_distributions(&self) -> Vec<Codename>;

    /// Architectures with a chroot for the given distribution.
    fn available_architectures(&self, dist: Codename) -> Vec<Architecture>;
}

#[cfg(test)]
pub(crate) mod stub {
    use std::sync::Mutex;

    use super::*;

    /// Test double recording build requests.
    #[derive(Debug, Default)]
    pub(crate) struct StubBuilder {
        pub(crate) dists: Vec<(Codename, Architecture)>,
        pub(crate) built: Mutex<Vec<BuildArguments>>,
        pub(crate) result: Option<BuildResult>,
    }

    impl DebianBuilder for StubBuilder {
        fn build_package(
            &self,
            args: BuildArguments,
            output: &mut (dyn Write + Send),
        ) -> Result<BuildResult, BuildError> {
            let _ = writeln!(output, "building {}", args.source_package.identifier);
            self.built.lock().unwrap().push(args);
            self.result.clone().ok_or(BuildError::NothingBuilt)
        }

        fn init_distribution(
            &self,
            _dist: Codename,
            _arch: Architecture,
            output: &mut (dyn Write + Send),
        ) -> Result<(), BuildError> {
            let _ = writeln!(output, "created");
            Ok(())
        }

        fn remove_distribution(
            &self,
            _dist: Codename,
            _arch: Architecture,
        ) -> Result<(), BuildError> {
            Ok(())
        }

        fn update_distribution(
            &self,
            _dist: Codename,
            _arch: Architecture,
            _output: &mut (dyn Write + Send),
        ) -> Result<(), BuildError> {
            Ok(())
        }

        fn available_distributions(&self) -> Vec<Codename> {
            let mut dists: Vec<_> = self.dists.iter().map(|(dist, _)| *dist).collect();
            dists.dedup();
            dists
        }

        fn available_architectures(&self, dist: Codename) -> Vec<Architecture> {
            self.dists
                .iter()
                .filter(|(candidate, _)| *candidate == dist)
                .map(|(_, arch)| *arch)
                .collect()
        }
    }
}

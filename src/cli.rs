// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use basic_debian_utils::{
    architectures::Architecture,
    archive::{Codename, Component},
};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
pub struct BaseOptions {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
    /// Unix socket of the builder daemon
    #[clap(long, short = 's', default_value = "/var/lib/deb-foundry/builder.sock")]
    pub builder_socket: PathBuf,
}

#[derive(Debug, Parser)]
#[clap(name = "deb-foundry", version, about)]
pub struct DebFoundryOptions {
    #[clap(flatten)]
    pub base: BaseOptions,
    #[clap(subcommand)]
    pub command: DebFoundryCommands,
}

#[derive(Debug, Parser)]
pub struct DistPairOptions {
    /// Distribution codename
    #[clap(long = "dist", short = 'D')]
    pub dist: Codename,
    /// Target architecture
    #[clap(long = "arch", short = 'A')]
    pub arch: Architecture,
}

#[derive(Debug, Parser)]
pub struct MatrixOptions {
    /// Distribution codename
    #[clap(long = "dist", short = 'D')]
    pub dist: Codename,
    /// Architectures to add or remove
    #[clap(long = "arch", short = 'A')]
    pub archs: Vec<Architecture>,
    /// Components to add or remove
    #[clap(long = "comp", short = 'C')]
    pub comps: Vec<Component>,
}

#[derive(Debug, Parser)]
pub struct ServeBuilderOptions {
    /// Base path holding the chroot images
    #[clap(long, short = 'b', default_value = "/var/lib/deb-foundry")]
    pub base_path: PathBuf,
    /// Listening socket, relative to the base path
    #[clap(long, default_value = "builder.sock")]
    pub socket: String,
}

#[derive(Debug, Parser)]
pub struct RemoveDistOptions {
    #[clap(flatten)]
    pub pair: DistPairOptions,
    /// Also erase the builder chroot (requires a local builder)
    #[clap(long)]
    pub chroot: bool,
}

#[derive(Debug, Parser)]
pub struct BuildOptions {
    /// The source control file (`.dsc`) to build
    pub dsc: PathBuf,
}

#[derive(Debug, Parser)]
pub struct ListenOptions {
    /// Directory watched for incoming uploads; defaults to `~/incoming`
    #[clap(long, short = 'D')]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct AddDependencyOptions {
    /// Codenames the dependency provides
    #[clap(long = "dist", short = 'D', required = true)]
    pub dists: Vec<Codename>,
    /// Components to enable per codename
    #[clap(long = "comp", short = 'C')]
    pub comps: Vec<Component>,
    /// PGP public key file for non-PPA repositories
    #[clap(long = "key", short = 'K')]
    pub key_file: Option<PathBuf>,
    /// Repository addresses or `ppa:<owner>/<name>` ids
    #[clap(required = true)]
    pub addresses: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct RemoveDependencyOptions {
    /// Codenames to disable; all of them when omitted
    #[clap(long = "dist", short = 'D')]
    pub dists: Vec<Codename>,
    /// Components to disable; all of them when omitted
    #[clap(long = "comp", short = 'C')]
    pub comps: Vec<Component>,
    /// Stored dependency ids
    #[clap(required = true)]
    pub ids: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct InitOptions {
    /// `Origin:` of the published repository
    #[clap(long)]
    pub origin: Option<String>,
    /// `Label:` of the published repository
    #[clap(long)]
    pub label: Option<String>,
    /// `Description:` of the published repository
    #[clap(long)]
    pub description: Option<String>,
    /// Short id of the repository signing key
    #[clap(long = "sign-with")]
    pub sign_with: Option<String>,
    /// Name used for report mail
    #[clap(long = "key-name")]
    pub key_name: Option<String>,
    /// Address receiving administrator reports
    #[clap(long = "key-email")]
    pub key_email: Option<String>,
}

#[derive(Debug, Parser)]
pub struct AuthorizeKeyOptions {
    /// Armored or binary PGP public key file
    pub key_file: PathBuf,
}

#[derive(Debug, Parser)]
pub struct UnauthorizeKeyOptions {
    /// Hex key id (or a suffix of it)
    pub key_id: String,
}

#[derive(Debug, Subcommand)]
pub enum DebFoundryCommands {
    /// Claim the chroot base and serve builds to local clients
    ServeBuilder(ServeBuilderOptions),
    /// Create a chroot and enable a distribution/architecture pair
    InitDist(DistPairOptions),
    /// Disable a distribution/architecture pair
    RemoveDist(RemoveDistOptions),
    /// Cross-reference the user policy with the builder's chroots
    ListDist,
    /// Update the chroot of a distribution/architecture pair
    UpdateDist(DistPairOptions),
    /// Archive, build and publish a source package
    Build(BuildOptions),
    /// Watch an incoming directory and publish uploaded packages
    Listen(ListenOptions),
    /// Add architectures/components to a repository distribution
    Add(MatrixOptions),
    /// Remove architectures/components from a repository distribution
    Remove(MatrixOptions),
    /// List the repository distributions
    List,
    /// Add or extend an external repository dependency
    AddDependency(AddDependencyOptions),
    /// Shrink or drop an external repository dependency
    RemoveDependency(RemoveDependencyOptions),
    /// List the external repository dependencies
    ListDependencies,
    /// Write the repository-wide configuration
    Init(InitOptions),
    /// Show the log of successful builds
    History,
    /// Import a public key into the upload keyring
    AuthorizeKey(AuthorizeKeyOptions),
    /// Remove a public key from the upload keyring
    UnauthorizeKey(UnauthorizeKeyOptions),
    /// List the keys of the upload keyring
    ListKeys,
}

// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use itertools::Itertools;
use sequoia_openpgp::{Cert, parse::Parse};

use basic_debian_utils::{Address, archive::Codename, archive::Component, source_control::SourceControlFile};

mod access;
mod archiver;
mod authenticator;
mod builder;
mod cli;
pub(crate) mod config;
mod cowbuilder;
mod dist_config;
mod history;
mod interactor;
mod jsonstore;
mod listen;
mod mailer;
mod ppa;
mod receiver;
mod repository;
mod rpc;

use access::DepsManager;
use authenticator::{Authenticator, GnupgAuthenticator};
use cli::{DebFoundryCommands, DebFoundryOptions};
use config::{Config, Layout};
use cowbuilder::Cowbuilder;
use history::{DiskHistory, History};
use interactor::Interactor;
use listen::Listener;
use mailer::SendmailMailer;
use repository::AptRepository;
use rpc::RpcServer;

fn serve_builder(options: cli::ServeBuilderOptions) -> Result<()> {
    // do not build an interactor here, the daemon must not touch the
    // calling user's stores
    let builder =
        Cowbuilder::new(options.base_path.clone()).context("Cowbuilder initialization error")?;
    let socket_path = options.base_path.join(&options.socket);
    let server = RpcServer::new(Arc::new(builder), socket_path);
    server.serve()?;
    Ok(())
}

fn build(interactor: &mut Interactor, config: &Config, options: cli::BuildOptions) -> Result<()> {
    if !basic_debian_utils::source_control::is_dsc_file_name(&options.dsc) {
        bail!("{} is not a source control file name", options.dsc.display());
    }
    let data = fs::read(&options.dsc)
        .with_context(|| format!("Could not read {}", options.dsc.display()))?;
    let auth = GnupgAuthenticator::new(config)?;
    let plaintext = auth.check_clearsigned(&data)?.trusted_or_unsigned()?;

    let base_path = options
        .dsc
        .canonicalize()?
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let dsc = SourceControlFile::parse(plaintext.as_slice(), &base_path)?;

    let mut output = io::stdout();
    let result = interactor.build_package(dsc, &mut output)?;
    println!(
        "Built {} ({})",
        result.changes.reference.identifier, result.changes_path
    );
    Ok(())
}

fn listen(interactor: &mut Interactor, config: &Config, options: cli::ListenOptions) -> Result<()> {
    let dir = match options.dir {
        Some(dir) => dir,
        None => match env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join("incoming"),
            None => bail!("--dir not given and HOME is not set"),
        },
    };

    let admin = (!config.key_email.is_empty()).then(|| Address {
        name: config.key_name.clone(),
        email: config.key_email.clone(),
    });
    let mailer = SendmailMailer::new(&config.key_name, &config.key_email);
    let mut listener = Listener::new(&dir, Box::new(mailer), admin)?;
    listener.run(interactor)
}

fn list_distributions(interactor: &mut Interactor) -> Result<()> {
    let report = interactor.supported_distributions()?;
    if report.is_empty() {
        println!("No distribution is supported by the builder.");
        return Ok(());
    }
    for (dist, archs) in report {
        let rendered = archs
            .iter()
            .map(|(arch, enabled)| {
                if *enabled {
                    format!("{arch} (enabled)")
                } else {
                    arch.to_string()
                }
            })
            .join(", ");
        println!("{dist}: {rendered}");
    }
    Ok(())
}

fn add_dependency(interactor: &mut Interactor, options: cli::AddDependencyOptions) -> Result<()> {
    let mut to_add: BTreeMap<Codename, Vec<Component>> = BTreeMap::new();
    for dist in &options.dists {
        to_add.insert(*dist, options.comps.clone());
    }

    for address in &options.addresses {
        let id = if interactor.deps.list().contains_key(address) {
            address.clone()
        } else if address.starts_with("ppa:") {
            interactor.create_ppa_dependency(address)?
        } else {
            let Some(key_file) = &options.key_file else {
                bail!("Missing PGP key file for creating a dependency on {address}");
            };
            let key = fs::read(key_file)
                .with_context(|| format!("Could not read {}", key_file.display()))?;
            interactor.create_remote_dependency(address, &key)?
        };

        interactor.edit_dependency(&id, &to_add, &BTreeMap::new())?;
        println!("Added {:?} {:?} to {address}", options.dists, options.comps);
    }
    Ok(())
}

fn remove_dependency(
    interactor: &mut Interactor,
    options: cli::RemoveDependencyOptions,
) -> Result<()> {
    for id in &options.ids {
        if options.dists.is_empty() && options.comps.is_empty() {
            interactor.remove_dependency(id)?;
            println!("Removed dependency on {id}");
            continue;
        }

        let Some(access) = interactor.deps.list().get(id).cloned() else {
            bail!("Unknown repository {id}");
        };
        let dists: Vec<Codename> = if options.dists.is_empty() {
            access.components.keys().copied().collect()
        } else {
            options.dists.clone()
        };

        let mut to_remove: BTreeMap<Codename, Vec<Component>> = BTreeMap::new();
        for dist in dists {
            let comps = if options.comps.is_empty() {
                access.components.get(&dist).cloned().unwrap_or_default()
            } else {
                options.comps.clone()
            };
            to_remove.insert(dist, comps);
        }
        interactor.edit_dependency(id, &BTreeMap::new(), &to_remove)?;
        println!("Removed {:?} {:?} from {id}", options.dists, options.comps);
    }
    Ok(())
}

fn list_dependencies(interactor: &Interactor) -> Result<()> {
    for (id, access) in interactor.deps.list() {
        let key = match &access.armored_public_key {
            None => "none".to_owned(),
            Some(armored) => Cert::from_bytes(armored.as_bytes())
                .map(|cert| cert.keyid().to_hex())
                .unwrap_or_else(|_| "error".to_owned()),
        };
        println!("{id} (key {key})");
        for (dist, comps) in &access.components {
            println!("  {dist}: {}", comps.iter().join(" "));
        }
    }
    Ok(())
}

fn init(options: cli::InitOptions) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(origin) = options.origin {
        config.origin = origin;
    }
    if let Some(label) = options.label {
        config.label = label;
    }
    if let Some(description) = options.description {
        config.description = description;
    }
    if let Some(sign_with) = options.sign_with {
        config.sign_with = sign_with;
    }
    if let Some(key_name) = options.key_name {
        config.key_name = key_name;
    }
    if let Some(key_email) = options.key_email {
        config.key_email = key_email;
    }
    config.save()
}

fn history() -> Result<()> {
    let layout = Layout::new();
    let history = DiskHistory::open(layout.data_file("history/data.json")?)?;
    for reference in history.get() {
        println!("{reference}");
    }
    Ok(())
}

fn run(options: DebFoundryOptions) -> Result<()> {
    let config = Config::load()?;

    match options.command {
        DebFoundryCommands::ServeBuilder(serve_options) => serve_builder(serve_options),
        DebFoundryCommands::Init(init_options) => init(init_options),
        DebFoundryCommands::History => history(),
        DebFoundryCommands::AuthorizeKey(key_options) => {
            let mut auth = GnupgAuthenticator::new(&config)?;
            let key = fs::read(&key_options.key_file)
                .with_context(|| format!("Could not read {}", key_options.key_file.display()))?;
            let identity = auth.add_key(&key)?;
            println!("Authorized {} ({})", identity.key_id, identity.identities.iter().join(", "));
            Ok(())
        }
        DebFoundryCommands::UnauthorizeKey(key_options) => {
            let mut auth = GnupgAuthenticator::new(&config)?;
            auth.remove_key(&key_options.key_id)?;
            Ok(())
        }
        DebFoundryCommands::ListKeys => {
            let auth = GnupgAuthenticator::new(&config)?;
            for identity in auth.list_keys() {
                println!("{} {}", identity.key_id, identity.identities.iter().join(", "));
            }
            Ok(())
        }
        command => {
            let mut interactor = Interactor::new(&config, options.base.builder_socket.clone())?;
            match command {
                DebFoundryCommands::InitDist(pair) => {
                    let mut output = io::stdout();
                    interactor.add_distribution_support(pair.dist, pair.arch, &mut output)
                }
                DebFoundryCommands::RemoveDist(remove_options) => interactor
                    .remove_distribution_support(
                        remove_options.pair.dist,
                        remove_options.pair.arch,
                        remove_options.chroot,
                    ),
                DebFoundryCommands::ListDist => list_distributions(&mut interactor),
                DebFoundryCommands::UpdateDist(pair) => {
                    let mut output = io::stdout();
                    interactor.update_distribution(pair.dist, pair.arch, &mut output)
                }
                DebFoundryCommands::Build(build_options) => {
                    build(&mut interactor, &config, build_options)
                }
                DebFoundryCommands::Listen(listen_options) => {
                    listen(&mut interactor, &config, listen_options)
                }
                DebFoundryCommands::Add(matrix) => Ok(interactor.repository.add(
                    matrix.dist,
                    &matrix.archs,
                    &matrix.comps,
                )?),
                DebFoundryCommands::Remove(matrix) => Ok(interactor.repository.remove(
                    matrix.dist,
                    &matrix.archs,
                    &matrix.comps,
                )?),
                DebFoundryCommands::List => {
                    for (dist, record) in interactor.repository.list() {
                        println!(
                            "{dist} ({}): {} | {}",
                            record.vendor,
                            record.architectures.iter().join(" "),
                            record.components.iter().join(" "),
                        );
                    }
                    Ok(())
                }
                DebFoundryCommands::AddDependency(dependency_options) => {
                    add_dependency(&mut interactor, dependency_options)
                }
                DebFoundryCommands::RemoveDependency(dependency_options) => {
                    remove_dependency(&mut interactor, dependency_options)
                }
                DebFoundryCommands::ListDependencies => list_dependencies(&interactor),
                _ => unreachable!("handled above"),
            }
        }
    }
}

fn main() -> Result<()> {
    let options = DebFoundryOptions::parse();
    stderrlog::new()
        .verbosity(options.base.verbose.log_level_filter())
        .init()?;

    run(options)
}

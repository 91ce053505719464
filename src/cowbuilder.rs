// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chroot-backed builder driving cowbuilder.
//!
//! A `<codename>-<arch>` pair is supported exactly when
//! `<base>/images/<codename>-<arch>/base.cow` exists. The base directory is
//! claimed with a lock file at startup so two daemons never share it, and a
//! capacity-1 semaphore serializes every operation within the process.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};

use fd_lock::{RwLock, RwLockWriteGuard};
use log::{info, warn};

use basic_debian_utils::{
    architectures::Architecture, archive::Codename, changes::ChangesFile,
};

use crate::access::RepositoryAccess;
use crate::builder::{BuildArguments, BuildError, BuildResult, DebianBuilder};

/// Builder owning the chroot images below a base directory.
pub struct Cowbuilder {
    base_path: PathBuf,
    image_path: PathBuf,
    hooks_path: PathBuf,
    conf_path: PathBuf,
    supported: Vec<Architecture>,
    semaphore: Mutex<()>,
    _base_claim: RwLockWriteGuard<'static, File>,
}

impl std::fmt::Debug for Cowbuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cowbuilder")
            .field("base_path", &self.base_path)
            .field("supported", &self.supported)
            .finish()
    }
}

fn host_architectures() -> Vec<Architecture> {
    match std::env::consts::ARCH {
        "x86_64" => vec![Architecture::Amd64, Architecture::I386],
        "x86" => vec![Architecture::I386],
        "arm" => vec![Architecture::Armel],
        _ => Vec::new(),
    }
}

// Writer that keeps the full log and forwards to the caller's stream.
// Failures of the forwarded stream are swallowed so a vanished consumer
// never interrupts a running build; its output is simply discarded.
struct TeeWriter<'a> {
    log: &'a mut Vec<u8>,
    output: &'a mut (dyn Write + Send),
    output_alive: bool,
}

impl Write for TeeWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.extend_from_slice(buf);
        if self.output_alive && self.output.write_all(buf).is_err() {
            self.output_alive = false;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.output_alive {
            let _ = self.output.flush();
        }
        Ok(())
    }
}

fn pump(mut reader: impl Read, sink: &Mutex<&mut (dyn Write + Send)>) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
                if sink.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
        }
    }
}

// Run a command with stdout and stderr streamed into `writer`.
fn run_streamed(
    command: &mut Command,
    writer: &mut (dyn Write + Send),
) -> Result<(), BuildError> {
    let rendered = format!("{command:?}");
    let _ = writeln!(writer, "--- Executing: {rendered}");

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let sink = Mutex::new(writer);
    std::thread::scope(|scope| {
        if let Some(stdout) = stdout {
            scope.spawn(|| pump(stdout, &sink));
        }
        if let Some(stderr) = stderr {
            scope.spawn(|| pump(stderr, &sink));
        }
    });

    let status = child.wait()?;
    if !status.success() {
        return Err(BuildError::Subprocess {
            command: rendered,
            output: String::new(),
        });
    }
    Ok(())
}

impl Cowbuilder {
    /// Claim `base_path` and prepare the directory layout.
    pub fn new(base_path: PathBuf) -> Result<Self, BuildError> {
        fs::create_dir_all(&base_path)?;

        let lock_path = base_path.join("global.lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        // the claim lives as long as the process
        let lock: &'static mut RwLock<File> = Box::leak(Box::new(RwLock::new(lock_file)));
        let base_claim = lock
            .try_write()
            .map_err(|_| BuildError::Lock(lock_path))?;

        let image_path = base_path.join("images");
        let hooks_path = base_path.join("hooks");
        let conf_path = base_path.join(".pbuilderrc");

        fs::create_dir_all(&image_path)?;
        fs::create_dir_all(&hooks_path)?;
        if !conf_path.exists() {
            File::create(&conf_path)?;
        }

        Ok(Self {
            base_path,
            image_path,
            hooks_path,
            conf_path,
            supported: host_architectures(),
            semaphore: Mutex::new(()),
            _base_claim: base_claim,
        })
    }

    fn image_dir(&self, dist: Codename, arch: Architecture) -> PathBuf {
        self.image_path.join(format!("{dist}-{arch}"))
    }

    fn supported_image_dir(
        &self,
        dist: Codename,
        arch: Architecture,
    ) -> Result<PathBuf, BuildError> {
        let dir = self.image_dir(dist, arch);
        if dir.join("base.cow").is_dir() {
            Ok(dir)
        } else {
            Err(BuildError::UnsupportedDistribution(dist, arch))
        }
    }

    fn all_images(&self) -> Vec<(Codename, Architecture)> {
        let Ok(entries) = fs::read_dir(&self.image_path) else {
            return Vec::new();
        };

        let mut images = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some((dist, arch)) = name.rsplit_once('-') else {
                continue;
            };
            let (Ok(dist), Ok(arch)) = (Codename::try_from(dist), Architecture::try_from(arch))
            else {
                continue;
            };
            if entry.path().join("base.cow").is_dir() {
                images.push((dist, arch));
            }
        }
        images.sort();
        images
    }

    // Write the hook installing apt source entries for the configured
    // dependencies; returns the bind mounts needed for file: repositories.
    fn write_dep_hooks(
        &self,
        dist: Codename,
        deps: &[RepositoryAccess],
    ) -> Result<Vec<String>, BuildError> {
        let mut content = String::from(
            "#!/bin/bash\nlistfile=/etc/apt/sources.list.d/deps.list\nif [ -e $listfile ]\nthen\n\trm -Rf $listfile\nfi\n\n",
        );
        let mut bindmounts = Vec::new();

        for dep in deps {
            let Some(comps) = dep.components.get(&dist) else {
                warn!("dependency {dep} does not provide {dist}, skipping");
                continue;
            };

            let mut trusted = "";
            match &dep.armored_public_key {
                Some(key) => {
                    content.push_str(&format!("echo \"{key}\" | apt-key add -\n"));
                }
                None => trusted = "[trusted=yes] ",
            }

            if let Some(local) = dep.address.strip_prefix("file:") {
                if !Path::new(local).join("dists").exists() {
                    warn!("skipping dependency {}: no dists directory", dep.address);
                    continue;
                }
                bindmounts.push(local.to_owned());
            }

            content.push_str(&format!("echo \"deb {trusted}{} {dist}", dep.address));
            for comp in comps {
                content.push_str(&format!(" {comp}"));
            }
            content.push_str("\" >> $listfile\n");
        }
        content.push_str("\n\napt-get update\n");

        let hook_path = self.hooks_path.join("D01_apt_dep.sh");
        fs::write(&hook_path, content)?;
        fs::set_permissions(&hook_path, fs::Permissions::from_mode(0o755))?;

        Ok(bindmounts)
    }

    // Recreate the hook and cache directories, write the configuration and
    // return the prepared cowbuilder command.
    fn cowbuilder_command(
        &self,
        dist: Codename,
        arch: Architecture,
        deps: &[RepositoryAccess],
        command: &str,
        args: &[&str],
    ) -> Result<Command, BuildError> {
        let vendor = dist.vendor();
        let image_dir = self.image_dir(dist, arch);
        let base_cow = image_dir.join("base.cow");
        let build_place = image_dir.join("build");
        let apt_cache = self.image_path.join("aptcache");
        let ccache = self.image_path.join("ccache");

        for stale in [&self.conf_path, &self.hooks_path] {
            if stale.exists() {
                if stale.is_dir() {
                    fs::remove_dir_all(stale)?;
                } else {
                    fs::remove_file(stale)?;
                }
            }
        }
        for needed in [&build_place, &apt_cache, &ccache, &self.hooks_path] {
            fs::create_dir_all(needed)?;
        }

        let bindmounts = self.write_dep_hooks(dist, deps)?;

        let mut conf = String::new();
        conf.push_str(&format!("BASEPATH=\"{}\"\n", base_cow.display()));
        conf.push_str(&format!("BUILDPLACE=\"{}\"\n", build_place.display()));
        conf.push_str(&format!("HOOKDIR=\"{}\"\n", self.hooks_path.display()));
        conf.push_str(&format!("DISTRIBUTION=\"{dist}\"\n"));
        conf.push_str(&format!("ARCHITECTURE=\"{arch}\"\n"));
        conf.push_str(&format!("APTCACHE=\"{}\"\n", apt_cache.display()));
        conf.push_str(&format!(
            "DEBOOTSTRAPOPTS=(\"--arch\" \"{arch}\" \"${{DEBOOTSTRAPOPTS[@]}}\" \"--keyring={}\")\n",
            vendor.keyring()
        ));
        conf.push_str(&format!("MIRROR=\"{}\"\n", vendor.mirror()));
        conf.push_str(&format!("MIRRORSITE=\"{}\"\n", vendor.mirror()));
        let components = vendor
            .bootstrap_components()
            .iter()
            .map(|comp| comp.name())
            .collect::<Vec<_>>()
            .join(" ");
        conf.push_str(&format!("COMPONENTS=\"{components}\"\n"));
        conf.push_str(&format!("BINDMOUNTS=\"{}\"\n", bindmounts.join(" ")));
        fs::write(&self.conf_path, conf)?;

        let mut cowbuilder = Command::new("cowbuilder");
        cowbuilder.arg(command).args(args);
        cowbuilder.env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cowbuilder.env("PATH", path);
        }
        cowbuilder.env("HOME", &self.base_path);
        Ok(cowbuilder)
    }

    fn acquire(&self) -> std::sync::MutexGuard<'_, ()> {
        self.semaphore.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DebianBuilder for Cowbuilder {
    fn build_package(
        &self,
        args: BuildArguments,
        output: &mut (dyn Write + Send),
    ) -> Result<BuildResult, BuildError> {
        let _permit = self.acquire();

        for arch in &args.archs {
            self.supported_image_dir(args.dist, *arch)?;
        }

        let dsc_file = args
            .source_package
            .base_path
            .join(args.source_package.file_name());
        if !dsc_file.exists() {
            return Err(BuildError::MissingResult(dsc_file));
        }
        fs::create_dir_all(&args.dest)?;

        let mut log = Vec::new();
        let mut writer = TeeWriter {
            log: &mut log,
            output,
            output_alive: true,
        };

        let mut changes_files: Vec<PathBuf> = Vec::new();
        let mut last_built_arch = None;
        for (idx, arch) in args.archs.iter().enumerate() {
            let debbuildopts = if idx == args.archs.len() - 1 {
                // only the last architecture builds arch-independent packages
                "-b"
            } else {
                let wanted = args
                    .source_package
                    .architectures
                    .iter()
                    .any(|target| *target == Architecture::Any || target == arch);
                if !wanted {
                    let _ = writeln!(
                        writer,
                        "Skipping build for {arch}, as it will produce no package"
                    );
                    continue;
                }
                "-B"
            };

            let mut command = self.cowbuilder_command(
                args.dist,
                *arch,
                &args.deps,
                "--build",
                &[
                    "--debbuildopts",
                    &format!("\"{debbuildopts}\""),
                    "--buildresult",
                    &args.dest.display().to_string(),
                    &dsc_file.display().to_string(),
                ],
            )?;
            run_streamed(&mut command, &mut writer)?;

            let changes_name = args.dest.join(format!(
                "{}_{arch}.changes",
                args.source_package.identifier
            ));
            if !changes_name.exists() {
                return Err(BuildError::MissingResult(changes_name));
            }
            changes_files.push(changes_name);
            last_built_arch = Some(*arch);
        }

        let Some(last_built_arch) = last_built_arch else {
            return Err(BuildError::NothingBuilt);
        };

        let mut changes_path = changes_files[0]
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut suffix = last_built_arch.to_string();

        if changes_files.len() > 1 {
            // merge the per-architecture manifests into one multi upload
            let mut command = Command::new("mergechanges");
            command.args(&changes_files).stdin(Stdio::null());
            let _ = writeln!(writer, "--- Executing: {command:?}");
            let merged = command.output()?;
            writer.write_all(&merged.stderr)?;
            if !merged.status.success() {
                return Err(BuildError::Subprocess {
                    command: format!("{command:?}"),
                    output: String::from_utf8_lossy(&merged.stderr).into_owned(),
                });
            }

            changes_path = format!("{}_multi.changes", args.source_package.identifier);
            fs::write(args.dest.join(&changes_path), &merged.stdout)?;
            suffix = "multi".to_owned();
        }

        let changes_file = File::open(args.dest.join(&changes_path))?;
        let mut changes = ChangesFile::parse(io::BufReader::new(changes_file))?;
        changes.reference.suffix = suffix;

        Ok(BuildResult {
            build_log: String::from_utf8_lossy(&log).into_owned(),
            changes,
            changes_path,
            base_path: args.dest,
        })
    }

    fn init_distribution(
        &self,
        dist: Codename,
        arch: Architecture,
        output: &mut (dyn Write + Send),
    ) -> Result<(), BuildError> {
        let _permit = self.acquire();

        if self.supported_image_dir(dist, arch).is_ok() {
            return Err(BuildError::AlreadySupported(dist, arch));
        }
        if !self.supported.contains(&arch) {
            return Err(BuildError::UnsupportedArchitecture(arch));
        }

        info!("creating chroot for {dist}-{arch}");
        let mut command = self.cowbuilder_command(dist, arch, &[], "--create", &[])?;
        run_streamed(&mut command, output)
    }

    fn remove_distribution(&self, dist: Codename, arch: Architecture) -> Result<(), BuildError> {
        let _permit = self.acquire();

        let image_dir = self.supported_image_dir(dist, arch)?;
        info!("removing chroot for {dist}-{arch}");
        fs::remove_dir_all(image_dir)?;
        Ok(())
    }

    fn update_distribution(
        &self,
        dist: Codename,
        arch: Architecture,
        output: &mut (dyn Write + Send),
    ) -> Result<(), BuildError> {
        let _permit = self.acquire();

        self.supported_image_dir(dist, arch)?;
        info!("updating chroot for {dist}-{arch}");
        let mut command = self.cowbuilder_command(dist, arch, &[], "--update", &[])?;
        run_streamed(&mut command, output)
    }

    fn available_distributions(&self) -> Vec<Codename> {
        let _permit = self.acquire();

        let mut dists: Vec<_> = self.all_images().into_iter().map(|(dist, _)| dist).collect();
        dists.dedup();
        dists
    }

    fn available_architectures(&self, dist: Codename) -> Vec<Architecture> {
        let _permit = self.acquire();

        self.all_images()
            .into_iter()
            .filter(|(candidate, _)| *candidate == dist)
            .map(|(_, arch)| arch)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use basic_debian_utils::archive::Component;

    use super::*;

    fn fake_image(base: &Path, dist: &str, arch: &str) {
        fs::create_dir_all(base.join(format!("images/{dist}-{arch}/base.cow"))).unwrap();
    }

    #[test]
    fn scans_images_for_supported_pairs() {
        let dir = tempfile::tempdir().unwrap();
        fake_image(dir.path(), "unstable", "amd64");
        fake_image(dir.path(), "unstable", "i386");
        fake_image(dir.path(), "trusty", "amd64");
        // no base.cow, not supported
        fs::create_dir_all(dir.path().join("images/sid-amd64")).unwrap();

        let builder = Cowbuilder::new(dir.path().to_owned()).unwrap();
        assert_eq!(
            builder.available_distributions(),
            vec![Codename::Unstable, Codename::Trusty]
        );
        assert_eq!(
            builder.available_architectures(Codename::Unstable),
            vec![Architecture::Amd64, Architecture::I386]
        );
        assert!(builder.available_architectures(Codename::Sid).is_empty());
    }

    #[test]
    fn init_refuses_existing_pair() {
        let dir = tempfile::tempdir().unwrap();
        fake_image(dir.path(), "unstable", "amd64");

        let builder = Cowbuilder::new(dir.path().to_owned()).unwrap();
        let mut sink = Vec::new();
        assert!(matches!(
            builder.init_distribution(Codename::Unstable, Architecture::Amd64, &mut sink),
            Err(BuildError::AlreadySupported(_, _))
        ));
    }

    #[test]
    fn init_refuses_unbuildable_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let builder = Cowbuilder::new(dir.path().to_owned()).unwrap();
        let mut sink = Vec::new();
        // the source pseudo architecture is never buildable
        assert!(matches!(
            builder.init_distribution(Codename::Unstable, Architecture::Source, &mut sink),
            Err(BuildError::UnsupportedArchitecture(_))
        ));
    }

    #[test]
    fn remove_erases_the_image() {
        let dir = tempfile::tempdir().unwrap();
        fake_image(dir.path(), "unstable", "amd64");

        let builder = Cowbuilder::new(dir.path().to_owned()).unwrap();
        builder
            .remove_distribution(Codename::Unstable, Architecture::Amd64)
            .unwrap();
        assert!(builder.available_distributions().is_empty());
        assert!(matches!(
            builder.remove_distribution(Codename::Unstable, Architecture::Amd64),
            Err(BuildError::UnsupportedDistribution(_, _))
        ));
    }

    #[test]
    fn dep_hooks_emit_sources_and_bindmounts() {
        let dir = tempfile::tempdir().unwrap();
        let local_repo = tempfile::tempdir().unwrap();
        fs::create_dir_all(local_repo.path().join("dists")).unwrap();

        let builder = Cowbuilder::new(dir.path().to_owned()).unwrap();
        let deps = vec![
            RepositoryAccess {
                id: format!("local:{}", local_repo.path().display()),
                address: format!("file:{}", local_repo.path().display()),
                armored_public_key: None,
                components: BTreeMap::from([(Codename::Unstable, vec![Component::Main])]),
            },
            RepositoryAccess {
                id: "ppa:owner/name".into(),
                address: "http://ppa.launchpad.net/owner/name/ubuntu".into(),
                armored_public_key: Some("KEY".into()),
                // does not provide unstable, must be skipped
                components: BTreeMap::from([(Codename::Trusty, vec![Component::Main])]),
            },
        ];

        let bindmounts = builder.write_dep_hooks(Codename::Unstable, &deps).unwrap();
        assert_eq!(bindmounts, vec![local_repo.path().display().to_string()]);

        let hook = fs::read_to_string(dir.path().join("hooks/D01_apt_dep.sh")).unwrap();
        assert!(hook.starts_with("#!/bin/bash"));
        assert!(hook.contains(&format!(
            "deb [trusted=yes] file:{} unstable main",
            local_repo.path().display()
        )));
        assert!(!hook.contains("ppa.launchpad.net"));
        assert!(hook.ends_with("apt-get update\n"));
    }
}

// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-user configuration and the XDG state layout.
//!
//! The configuration itself is a small JSON document in the XDG config
//! directory; everything the pipeline persists (archives, the local
//! repository, history, dependency accesses) lives below the XDG data
//! directory under the same prefix.

use std::env;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use xdg::BaseDirectories;

const XDG_PREFIX: &str = "deb-foundry";
const CONFIG_FILE: &str = "config.json";

/// Repository-wide settings persisted in the XDG config directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// `Origin:` value of the published repository
    pub origin: String,
    /// `Label:` value of the published repository
    pub label: String,
    /// `Description:` value of the published repository
    pub description: String,
    /// Short id of the key reprepro signs exports with
    pub sign_with: String,
    /// Display name used for outgoing report mail
    pub key_name: String,
    /// Address receiving administrator reports
    pub key_email: String,
    /// Override for the GnuPG home holding the keyrings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gnupg_home: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: "Local deb-foundry repository".into(),
            label: "Local deb-foundry repository".into(),
            description: "Local deb-foundry repository".into(),
            sign_with: String::new(),
            key_name: String::new(),
            key_email: String::new(),
            gnupg_home: None,
        }
    }
}

impl Config {
    /// Load the configuration, falling back to the defaults if the user
    /// never ran `init`.
    pub fn load() -> Result<Self> {
        let directories = BaseDirectories::with_prefix(XDG_PREFIX);
        match directories.find_config_file(CONFIG_FILE) {
            Some(path) => {
                let file = File::open(&path)
                    .with_context(|| format!("Could not open {}", path.display()))?;
                serde_json::from_reader(BufReader::new(file))
                    .with_context(|| format!("Could not parse {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Persist the configuration.
    pub fn save(&self) -> Result<()> {
        let directories = BaseDirectories::with_prefix(XDG_PREFIX);
        let path = directories
            .place_config_file(CONFIG_FILE)
            .context("Could not create config directory")?;
        let file =
            File::create(&path).with_context(|| format!("Could not create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Could not write {}", path.display()))?;
        Ok(())
    }

    /// Directory holding the GnuPG keyrings used for verification and
    /// signing: the configured override, `$GNUPGHOME`, or `~/.gnupg`.
    pub fn gnupg_home(&self) -> Result<PathBuf> {
        if let Some(home) = &self.gnupg_home {
            return Ok(home.clone());
        }
        if let Some(home) = env::var_os("GNUPGHOME") {
            return Ok(PathBuf::from(home));
        }
        match env::var_os("HOME") {
            Some(home) => Ok(PathBuf::from(home).join(".gnupg")),
            None => bail!("Neither GNUPGHOME nor HOME is set"),
        }
    }
}

/// Helpers to place persistent state below the XDG directories.
#[derive(Debug)]
pub struct Layout {
    directories: BaseDirectories,
}

impl Layout {
    /// Layout with the default prefix.
    pub fn new() -> Self {
        Self {
            directories: BaseDirectories::with_prefix(XDG_PREFIX),
        }
    }

    /// Place a file below the data directory, creating parent directories.
    pub fn data_file(&self, name: &str) -> io::Result<PathBuf> {
        self.directories.place_data_file(name)
    }

    /// Place a file below the config directory, creating parent directories.
    pub fn config_file(&self, name: &str) -> io::Result<PathBuf> {
        self.directories.place_config_file(name)
    }

    /// Directory below the data directory, created on demand.
    pub fn data_dir(&self, name: &str) -> io::Result<PathBuf> {
        let dir = self
            .directories
            .get_data_home()
            .ok_or_else(|| io::Error::other("HOME is not set"))?
            .join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new()
    }
}

// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! The user's selected distribution/architecture subset.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use basic_debian_utils::{architectures::Architecture, archive::Codename};

use crate::jsonstore::{JsonStore, StoreError};

/// Capability set of the user distribution policy.
pub trait UserDistConfig: Send {
    /// Enable a distribution/architecture pair.
    fn add(&mut self, dist: Codename, arch: Architecture) -> Result<(), StoreError>;
    /// Disable a distribution/architecture pair.
    fn remove(&mut self, dist: Codename, arch: Architecture) -> Result<(), StoreError>;
    /// Ordered copy of the current policy.
    fn supported(&self) -> BTreeMap<Codename, Vec<Architecture>>;
}

/// Policy persisted as JSON under a lock.
#[derive(Debug)]
pub struct DiskDistConfig {
    store: JsonStore<BTreeMap<Codename, BTreeSet<Architecture>>>,
    data: BTreeMap<Codename, BTreeSet<Architecture>>,
}

impl DiskDistConfig {
    /// Open the policy at `path` and load the current state.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let mut store = JsonStore::open(path)?;
        let data = store.load()?;
        Ok(Self { store, data })
    }
}

impl UserDistConfig for DiskDistConfig {
    fn add(&mut self, dist: Codename, arch: Architecture) -> Result<(), StoreError> {
        let saved = self.data.get(&dist).cloned();
        self.data.entry(dist).or_default().insert(arch);
        if let Err(err) = self.store.save(&self.data) {
            match saved {
                Some(saved) => self.data.insert(dist, saved),
                None => self.data.remove(&dist),
            };
            return Err(err);
        }
        Ok(())
    }

    fn remove(&mut self, dist: Codename, arch: Architecture) -> Result<(), StoreError> {
        let saved = self.data.get(&dist).cloned();
        if let Some(archs) = self.data.get_mut(&dist) {
            archs.remove(&arch);
            if archs.is_empty() {
                self.data.remove(&dist);
            }
        }
        if let Err(err) = self.store.save(&self.data) {
            if let Some(saved) = saved {
                self.data.insert(dist, saved);
            }
            return Err(err);
        }
        Ok(())
    }

    fn supported(&self) -> BTreeMap<Codename, Vec<Architecture>> {
        self.data
            .iter()
            .map(|(dist, archs)| (*dist, archs.iter().copied().collect()))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dist-config.json");

        let mut config = DiskDistConfig::open(path.clone()).unwrap();
        config.add(Codename::Unstable, Architecture::Amd64).unwrap();
        config.add(Codename::Unstable, Architecture::I386).unwrap();
        config.add(Codename::Trusty, Architecture::Amd64).unwrap();

        let config = DiskDistConfig::open(path).unwrap();
        let supported = config.supported();
        assert_eq!(
            supported[&Codename::Unstable],
            vec![Architecture::Amd64, Architecture::I386]
        );
        assert_eq!(supported[&Codename::Trusty], vec![Architecture::Amd64]);
    }

    #[test]
    fn remove_last_arch_drops_distribution() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DiskDistConfig::open(dir.path().join("dist-config.json")).unwrap();
        config.add(Codename::Unstable, Architecture::Amd64).unwrap();
        config.remove(Codename::Unstable, Architecture::Amd64).unwrap();
        assert!(config.supported().is_empty());
    }
}

// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! External repositories a build may depend on.
//!
//! An access record names an apt repository (a plain address or a PPA), the
//! armored public key it is signed with, and the components it provides per
//! codename. The records are persisted as JSON under a lock; store and
//! remove restore the in-memory state when persisting fails.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use basic_debian_utils::archive::{Codename, Component};

use crate::jsonstore::{JsonStore, StoreError};

/// Access to an external apt repository.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryAccess {
    /// Identifier: a `ppa:<owner>/<name>` id, a `local:` path or the address
    pub id: String,
    /// Base URL of the repository as used in apt source lines
    pub address: String,
    /// Armored public key the repository signs with, if known
    pub armored_public_key: Option<String>,
    /// Components provided per codename
    pub components: BTreeMap<Codename, Vec<Component>>,
}

impl RepositoryAccess {
    /// Whether this record refers to a Launchpad PPA.
    pub fn is_ppa(&self) -> bool {
        self.id.starts_with("ppa:")
    }
}

impl Display for RepositoryAccess {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Errors of the dependency-access store.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The id is not in the store
    #[error("{0} is not listed")]
    NotListed(String),
    /// The id is already in the store
    #[error("Repository {0} already exists")]
    AlreadyExists(String),
    /// PPA repositories only provide `main`
    #[error("PPA repositories can only list main, but {0:?} was asked")]
    PpaComponentRestriction(Vec<Component>),
    /// Persisting failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Capability set of the persisted dependency list.
pub trait DepsManager: Send {
    /// Insert or replace an access record.
    fn store(&mut self, access: RepositoryAccess) -> Result<(), AccessError>;
    /// Remove a record by id.
    fn remove(&mut self, id: &str) -> Result<(), AccessError>;
    /// Current records, keyed by id.
    fn list(&self) -> &BTreeMap<String, RepositoryAccess>;
}

/// Dependency list persisted as JSON under a lock.
#[derive(Debug)]
pub struct DiskDepsManager {
    store: JsonStore<BTreeMap<String, RepositoryAccess>>,
    data: BTreeMap<String, RepositoryAccess>,
}

impl DiskDepsManager {
    /// Open the store at `path` and load the current records.
    pub fn open(path: PathBuf) -> Result<Self, AccessError> {
        let mut store = JsonStore::open(path)?;
        let data = store.load()?;
        Ok(Self { store, data })
    }
}

impl DepsManager for DiskDepsManager {
    fn store(&mut self, access: RepositoryAccess) -> Result<(), AccessError> {
        let saved = self.data.insert(access.id.clone(), access.clone());
        if let Err(err) = self.store.save(&self.data) {
            match saved {
                Some(saved) => self.data.insert(access.id.clone(), saved),
                None => self.data.remove(&access.id),
            };
            return Err(err.into());
        }
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<(), AccessError> {
        let Some(saved) = self.data.remove(id) else {
            return Err(AccessError::NotListed(id.to_owned()));
        };
        if let Err(err) = self.store.save(&self.data) {
            self.data.insert(id.to_owned(), saved);
            return Err(err.into());
        }
        Ok(())
    }

    fn list(&self) -> &BTreeMap<String, RepositoryAccess> {
        &self.data
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn access(id: &str) -> RepositoryAccess {
        RepositoryAccess {
            id: id.to_owned(),
            address: "http://example.org/debian".to_owned(),
            armored_public_key: None,
            components: BTreeMap::from([(Codename::Unstable, vec![Component::Main])]),
        }
    }

    #[test]
    fn store_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        let mut manager = DiskDepsManager::open(path.clone()).unwrap();
        manager.store(access("http://example.org/debian")).unwrap();
        manager.store(access("ppa:owner/name")).unwrap();
        assert_eq!(manager.list().len(), 2);

        let manager = DiskDepsManager::open(path).unwrap();
        assert_eq!(manager.list().len(), 2);
        assert!(manager.list()["ppa:owner/name"].is_ppa());
    }

    #[test]
    fn remove_unknown_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = DiskDepsManager::open(dir.path().join("data.json")).unwrap();
        assert!(matches!(
            manager.remove("nope"),
            Err(AccessError::NotListed(_))
        ));
    }

    #[test]
    fn remove_stored_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = DiskDepsManager::open(dir.path().join("data.json")).unwrap();
        manager.store(access("a")).unwrap();
        manager.remove("a").unwrap();
        assert!(manager.list().is_empty());
    }
}

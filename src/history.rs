// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bounded log of successfully built source packages.

use std::path::PathBuf;

use basic_debian_utils::package::SourcePackageRef;

use crate::jsonstore::{JsonStore, StoreError};

const HISTORY_LIMIT: usize = 20;

/// Capability set of the build history.
pub trait History: Send {
    /// Record a successful build, newest first.
    fn append(&mut self, reference: SourcePackageRef) -> Result<(), StoreError>;
    /// The log, newest first.
    fn get(&self) -> &[SourcePackageRef];
    /// Strip the contiguous run of `reference` entries at the front.
    fn remove_front(&mut self, reference: &SourcePackageRef) -> Result<(), StoreError>;
}

/// History persisted as JSON under a lock.
#[derive(Debug)]
pub struct DiskHistory {
    store: JsonStore<Vec<SourcePackageRef>>,
    data: Vec<SourcePackageRef>,
}

impl DiskHistory {
    /// Open the history at `path` and load the current log.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let mut store = JsonStore::open(path)?;
        let data = store.load()?;
        Ok(Self { store, data })
    }
}

impl History for DiskHistory {
    fn append(&mut self, reference: SourcePackageRef) -> Result<(), StoreError> {
        self.data.truncate(HISTORY_LIMIT - 1);
        self.data.insert(0, reference);
        self.store.save(&self.data)
    }

    fn get(&self) -> &[SourcePackageRef] {
        &self.data
    }

    fn remove_front(&mut self, reference: &SourcePackageRef) -> Result<(), StoreError> {
        let run = self
            .data
            .iter()
            .take_while(|entry| *entry == reference)
            .count();
        if run == 0 {
            return Ok(());
        }
        self.data.drain(..run);
        self.store.save(&self.data)
    }
}

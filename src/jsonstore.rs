// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! Locked JSON persistence shared by the small stores.
//!
//! Every persistent store is guarded by a lock file next to the data; lock
//! acquisition is fail-fast and never waits on a holder.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::marker::PhantomData;
use std::path::PathBuf;

use fd_lock::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Errors of the persisted stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The lock file is held by somebody else
    #[error("Could not lock {0}")]
    Lock(PathBuf),
    /// Underlying I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The stored data does not decode
    #[error("Could not decode {path}: {source}")]
    Decode {
        /// Path of the offending file
        path: PathBuf,
        /// The decoding error
        source: serde_json::Error,
    },
    /// The data does not encode
    #[error("Could not save {path}: {source}")]
    Encode {
        /// Path of the offending file
        path: PathBuf,
        /// The encoding error
        source: serde_json::Error,
    },
}

/// A JSON document on disk, guarded by a sibling lock file.
#[derive(Debug)]
pub struct JsonStore<T> {
    path: PathBuf,
    lock_path: PathBuf,
    lock: RwLock<File>,
    _marker: PhantomData<T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Open the store at `path`; the lock file lives next to it.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        Ok(Self {
            path,
            lock_path,
            lock: RwLock::new(lock_file),
            _marker: PhantomData,
        })
    }

    /// Read the stored value; a missing or empty file yields the default.
    pub fn load(&mut self) -> Result<T, StoreError> {
        let _guard = self
            .lock
            .try_write()
            .map_err(|_| StoreError::Lock(self.lock_path.clone()))?;

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(T::default()),
            Err(err) => return Err(err.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(T::default());
        }
        serde_json::from_reader(BufReader::new(file)).map_err(|source| StoreError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the stored value.
    pub fn save(&mut self, value: &T) -> Result<(), StoreError> {
        let _guard = self
            .lock
            .try_write()
            .map_err(|_| StoreError::Lock(self.lock_path.clone()))?;

        let file = File::create(&self.path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, value).map_err(|source| StoreError::Encode {
            path: self.path.clone(),
            source,
        })?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: JsonStore<Vec<String>> =
            JsonStore::open(dir.path().join("data.json")).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: JsonStore<BTreeMap<String, u32>> =
            JsonStore::open(dir.path().join("data.json")).unwrap();

        let mut value = BTreeMap::new();
        value.insert("a".to_owned(), 1);
        store.save(&value).unwrap();
        assert_eq!(store.load().unwrap(), value);
    }
}

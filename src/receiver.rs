// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! Watcher for the incoming upload directory.
//!
//! Files dropped into the watched directory (or a component subdirectory)
//! are moved into a staging area and published on a ready channel. A second
//! file with the same `(basename, component)` id is parked in a queue and
//! re-published once the active one is released, preserving arrival order.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use log::{info, warn};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use thiserror::Error;

use basic_debian_utils::archive::Component;

/// Errors of the upload-queue receiver.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// The filesystem watcher failed
    #[error(transparent)]
    Notify(#[from] notify::Error),
    /// A component directory with an unknown name
    #[error("Unknown component directory {0}")]
    UnknownComponent(String),
    /// Release of a file that is not staged
    #[error("Could not release unstored file {0}")]
    NotStaged(String),
    /// The receiver loop is gone
    #[error("The receiver is no longer running")]
    Disconnected,
    /// Underlying I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reference to a staged upload file: its basename plus the component
/// attribute derived from the subdirectory it was dropped into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueFileRef {
    /// Basename of the file
    pub name: String,
    /// Component attribute, if dropped into a component subdirectory
    pub component: Option<Component>,
    staging_dir: PathBuf,
}

impl QueueFileRef {
    /// Identifier used to serialize files of the same name and component.
    pub fn id(&self) -> String {
        match self.component {
            Some(component) => format!("{component}/{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Location of the active staged copy.
    pub fn path(&self) -> PathBuf {
        match self.component {
            Some(component) => self.staging_dir.join(component.name()).join(&self.name),
            None => self.staging_dir.join(&self.name),
        }
    }

    /// Reference to a companion file staged next to this one.
    pub fn companion(&self, name: &str) -> QueueFileRef {
        QueueFileRef {
            name: name.to_owned(),
            component: self.component,
            staging_dir: self.staging_dir.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn staged_at(
        name: &str,
        component: Option<Component>,
        staging_dir: PathBuf,
    ) -> QueueFileRef {
        QueueFileRef {
            name: name.to_owned(),
            component,
            staging_dir,
        }
    }
}

fn interesting(name: &str) -> bool {
    if name.ends_with(".changes")
        || name.ends_with(".deb")
        || name.ends_with(".udeb")
        || name.ends_with(".dsc")
    {
        return true;
    }
    if name.ends_with(".gz") {
        return name.ends_with(".orig.tar.gz")
            || name.ends_with(".diff.gz")
            || name.ends_with(".tar.gz");
    }
    if name.ends_with(".xz") {
        return name.ends_with(".orig.tar.xz") || name.ends_with(".tar.xz");
    }
    false
}

struct ReceiverLoop {
    watched_dir: PathBuf,
    staging_dir: PathBuf,
    watcher: notify::RecommendedWatcher,
    staged: HashMap<String, VecDeque<PathBuf>>,
    ready_tx: Sender<QueueFileRef>,
    error_tx: Sender<ReceiveError>,
}

impl ReceiverLoop {
    fn reference(&self, name: &str, component: Option<Component>) -> QueueFileRef {
        QueueFileRef {
            name: name.to_owned(),
            component,
            staging_dir: self.staging_dir.clone(),
        }
    }

    // Figure out the component attribute of a created file, or None when
    // the file is too deep below the watched directory.
    fn classify(&self, path: &Path) -> Result<Option<Option<Component>>, ReceiveError> {
        let Some(parent) = path.parent() else {
            return Ok(None);
        };
        if parent == self.watched_dir {
            return Ok(Some(None));
        }
        if parent.parent() == Some(self.watched_dir.as_path()) {
            let name = parent
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let component = Component::try_from(name.as_str())
                .map_err(|_| ReceiveError::UnknownComponent(name))?;
            return Ok(Some(Some(component)));
        }
        warn!(
            "file {} is not in {}(/<component>)?/",
            path.display(),
            self.watched_dir.display()
        );
        Ok(None)
    }

    fn handle_created(&mut self, path: &Path) -> Result<(), ReceiveError> {
        let metadata = match path.metadata() {
            Ok(metadata) => metadata,
            // already picked up or gone again
            Err(_) => return Ok(()),
        };
        if metadata.is_dir() {
            self.watcher.watch(path, RecursiveMode::NonRecursive)?;
            return Ok(());
        }

        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        if !interesting(name) {
            return Ok(());
        }

        let Some(component) = self.classify(path)? else {
            return Ok(());
        };
        if let Some(component) = component {
            fs::create_dir_all(self.staging_dir.join(component.name()))?;
        }

        let reference = self.reference(name, component);
        let id = reference.id();
        if let Some(queue) = self.staged.get_mut(&id) {
            // a file with this id is in flight: park the new arrival
            let staging_subdir = reference
                .path()
                .parent()
                .map(Path::to_owned)
                .unwrap_or_else(|| self.staging_dir.clone());
            let parked = tempfile::Builder::new()
                .prefix(&format!("{name}."))
                .tempfile_in(staging_subdir)?
                .into_temp_path()
                .keep()
                .map_err(|err| ReceiveError::Io(err.error))?;
            fs::rename(path, &parked)?;
            queue.push_back(parked);
            return Ok(());
        }

        fs::rename(path, reference.path())?;
        self.staged.insert(id, VecDeque::new());
        let _ = self.ready_tx.send(reference);
        Ok(())
    }

    fn handle_release(&mut self, reference: &QueueFileRef) -> Result<(), ReceiveError> {
        let id = reference.id();
        let Some(queue) = self.staged.get_mut(&id) else {
            return Err(ReceiveError::NotStaged(id));
        };

        info!("releasing {id}");
        fs::remove_file(reference.path())?;

        match queue.pop_front() {
            None => {
                self.staged.remove(&id);
            }
            Some(parked) => {
                // the next queued arrival becomes the active staged copy
                fs::rename(parked, reference.path())?;
                let _ = self.ready_tx.send(reference.clone());
            }
        }
        Ok(())
    }

    fn run(mut self, events: Receiver<notify::Result<Event>>, release: Receiver<QueueFileRef>) {
        loop {
            select! {
                recv(events) -> event => {
                    let event = match event {
                        Ok(Ok(event)) => event,
                        Ok(Err(err)) => {
                            let _ = self.error_tx.send(err.into());
                            continue;
                        }
                        Err(_) => return,
                    };
                    if !matches!(event.kind, EventKind::Create(_)) {
                        continue;
                    }
                    for path in &event.paths {
                        if let Err(err) = self.handle_created(path) {
                            let _ = self.error_tx.send(err);
                        }
                    }
                }
                recv(release) -> reference => {
                    let Ok(reference) = reference else { return };
                    if let Err(err) = self.handle_release(&reference) {
                        let _ = self.error_tx.send(err);
                    }
                }
            }
        }
    }
}

/// Receiver staging uploads dropped into a watched directory.
#[derive(Debug)]
pub struct NotifyFileReceiver {
    ready_rx: Receiver<QueueFileRef>,
    error_rx: Receiver<ReceiveError>,
    release_tx: Sender<QueueFileRef>,
}

impl NotifyFileReceiver {
    /// Watch `dir`, wiping it and the sibling staging directory first.
    pub fn new(dir: &Path) -> Result<Self, ReceiveError> {
        let watched_dir = if dir.is_absolute() {
            dir.to_owned()
        } else {
            std::env::current_dir()?.join(dir)
        };
        let staging_dir = watched_dir
            .parent()
            .unwrap_or(&watched_dir)
            .join("incoming-staging");

        for dir in [&watched_dir, &staging_dir] {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
            fs::create_dir_all(dir)?;
        }

        let (event_tx, event_rx) = unbounded();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })?;
        watcher.watch(&watched_dir, RecursiveMode::NonRecursive)?;

        let (ready_tx, ready_rx) = unbounded();
        let (error_tx, error_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();

        let receiver_loop = ReceiverLoop {
            watched_dir,
            staging_dir,
            watcher,
            staged: HashMap::new(),
            ready_tx,
            error_tx,
        };
        std::thread::spawn(move || receiver_loop.run(event_rx, release_rx));

        Ok(Self {
            ready_rx,
            error_rx,
            release_tx,
        })
    }

    /// Block until the next staged file or receiver error.
    pub fn next(&self) -> Result<QueueFileRef, ReceiveError> {
        select! {
            recv(self.ready_rx) -> reference => {
                let reference = reference.map_err(|_| ReceiveError::Disconnected)?;
                info!("received {}", reference.id());
                Ok(reference)
            }
            recv(self.error_rx) -> error => {
                Err(error.map_err(|_| ReceiveError::Disconnected)?)
            }
        }
    }

    /// Release the active staged copy; a parked duplicate, if any, becomes
    /// active and is published again.
    pub fn release(&self, reference: QueueFileRef) {
        let _ = self.release_tx.send(reference);
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);
    const SETTLE: Duration = Duration::from_millis(300);

    fn next_with_timeout(receiver: &NotifyFileReceiver) -> QueueFileRef {
        select! {
            recv(receiver.ready_rx) -> reference => reference.unwrap(),
            recv(receiver.error_rx) -> error => panic!("receiver error: {:?}", error),
            default(TIMEOUT) => panic!("timed out waiting for a staged file"),
        }
    }

    #[test]
    fn interesting_extensions() {
        assert!(interesting("foo_1_amd64.deb"));
        assert!(interesting("foo_1.dsc"));
        assert!(interesting("foo_1_amd64.changes"));
        assert!(interesting("foo_1.orig.tar.gz"));
        assert!(interesting("foo_1.diff.gz"));
        assert!(interesting("foo_1.orig.tar.xz"));
        assert!(!interesting("foo_1.log.gz"));
        assert!(!interesting("foo.txt"));
        assert!(!interesting("foo.buildinfo"));
    }

    #[test]
    fn stages_and_releases_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("incoming");
        let receiver = NotifyFileReceiver::new(&watched).unwrap();

        fs::write(watched.join("foo_1_amd64.deb"), b"first").unwrap();
        let first = next_with_timeout(&receiver);
        assert_eq!(first.name, "foo_1_amd64.deb");
        assert_eq!(first.component, None);
        assert_eq!(fs::read(first.path()).unwrap(), b"first");

        // the duplicate is parked, not published
        fs::write(watched.join("foo_1_amd64.deb"), b"second").unwrap();
        std::thread::sleep(SETTLE);
        assert!(receiver.ready_rx.is_empty());

        receiver.release(first.clone());
        let second = next_with_timeout(&receiver);
        assert_eq!(second.id(), first.id());
        assert_eq!(fs::read(second.path()).unwrap(), b"second");

        receiver.release(second);
        std::thread::sleep(SETTLE);
        assert!(receiver.ready_rx.is_empty());
    }

    #[test]
    fn component_subdirectories_tag_files() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("incoming");
        let receiver = NotifyFileReceiver::new(&watched).unwrap();

        fs::create_dir(watched.join("main")).unwrap();
        std::thread::sleep(SETTLE);
        fs::write(watched.join("main/foo_1.dsc"), b"dsc").unwrap();

        let reference = next_with_timeout(&receiver);
        assert_eq!(reference.name, "foo_1.dsc");
        assert_eq!(reference.component, Some(Component::Main));
        assert_eq!(reference.id(), "main/foo_1.dsc");
        assert!(reference.path().ends_with("incoming-staging/main/foo_1.dsc"));
    }

    #[test]
    fn double_release_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("incoming");
        let receiver = NotifyFileReceiver::new(&watched).unwrap();

        fs::write(watched.join("foo_1.dsc"), b"dsc").unwrap();
        let reference = next_with_timeout(&receiver);
        receiver.release(reference.clone());
        std::thread::sleep(SETTLE);

        receiver.release(reference);
        assert!(matches!(
            receiver.next(),
            Err(ReceiveError::NotStaged(_))
        ));
    }

    #[test]
    fn uninteresting_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("incoming");
        let receiver = NotifyFileReceiver::new(&watched).unwrap();

        fs::write(watched.join("notes.txt"), b"nope").unwrap();
        std::thread::sleep(SETTLE);
        assert!(receiver.ready_rx.is_empty());
    }
}

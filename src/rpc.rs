// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! The builder daemon and its client.
//!
//! Requests are newline-delimited JSON over a unix socket, one request per
//! connection. Build output does not travel in the response: `InitSync`
//! opens a per-session output socket the client drains while the build
//! runs. A dedicated manager thread owns the session map and is reached
//! only through channels; a ticker sweeps sessions whose deadline passed.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, select, tick, unbounded};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use basic_debian_utils::{architectures::Architecture, archive::Codename};

use crate::builder::{BuildArguments, BuildError, BuildResult, DebianBuilder};

const SYNC_TIMEOUT: Duration = Duration::from_secs(100);
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
const ACCEPT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize, Deserialize)]
enum Request {
    InitSync,
    Build { id: u64, args: Box<BuildArguments> },
    Create { id: u64, dist: Codename, arch: Architecture },
    Update { id: u64, dist: Codename, arch: Architecture },
    Remove { dist: Codename, arch: Architecture },
    AvailableDistributions,
    AvailableArchitectures { dist: Codename },
}

#[derive(Debug, Serialize, Deserialize)]
enum Response {
    Sync {
        id: u64,
        network: String,
        address: PathBuf,
    },
    Build(Box<BuildResult>),
    Unit,
    Distributions(Vec<Codename>),
    Architectures(Vec<Architecture>),
}

type WireResult = Result<Response, String>;

// One output-synchronization session. The writer is attached by the accept
// thread once the client dials the socket.
#[derive(Debug)]
struct SyncSession {
    socket_path: PathBuf,
    cancel: Arc<AtomicBool>,
    conn: Option<UnixStream>,
    deadline: Option<Instant>,
}

impl SyncSession {
    fn close(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(conn) = &self.conn {
            let _ = conn.shutdown(std::net::Shutdown::Both);
        }
        let _ = fs::remove_file(&self.socket_path);
    }
}

// Control events reaching the sync manager. A single FIFO channel keeps
// registration, writer attachment and removal of one session in order.
#[derive(Debug)]
enum SyncControl {
    Register(u64, SyncSession),
    // arm the inactivity deadline
    Arm(u64),
    // disarm the inactivity deadline
    Disarm(u64),
    // close and drop a session
    Remove(u64),
    Attach(u64, UnixStream),
    Take(u64, Sender<Option<Option<UnixStream>>>),
}

#[derive(Clone, Debug)]
struct SyncChannels {
    fresh_id: Receiver<u64>,
    control: Sender<SyncControl>,
}

fn spawn_sync_manager() -> SyncChannels {
    let (id_tx, id_rx) = bounded::<u64>(0);
    let (control_tx, control_rx) = unbounded::<SyncControl>();

    thread::spawn(move || {
        let mut sessions: HashMap<u64, SyncSession> = HashMap::new();
        let mut next_id = 0u64;
        let ticker = tick(SWEEP_INTERVAL);

        loop {
            select! {
                send(id_tx, next_id) -> res => {
                    if res.is_err() {
                        break;
                    }
                    next_id += 1;
                }
                recv(control_rx) -> msg => {
                    let Ok(msg) = msg else { break };
                    match msg {
                        SyncControl::Register(id, session) => {
                            sessions.insert(id, session);
                        }
                        SyncControl::Arm(id) => {
                            if let Some(session) = sessions.get_mut(&id) {
                                session.deadline = Some(Instant::now() + SYNC_TIMEOUT);
                            }
                        }
                        SyncControl::Disarm(id) => {
                            if let Some(session) = sessions.get_mut(&id) {
                                session.deadline = None;
                            }
                        }
                        SyncControl::Remove(id) => {
                            if let Some(mut session) = sessions.remove(&id) {
                                session.close();
                            }
                        }
                        SyncControl::Attach(id, conn) => {
                            match sessions.get_mut(&id) {
                                Some(session) => session.conn = Some(conn),
                                None => warn!("connection for unknown synchronization {id}"),
                            }
                        }
                        SyncControl::Take(id, reply) => {
                            let handle = sessions.get(&id).map(|session| {
                                session
                                    .conn
                                    .as_ref()
                                    .and_then(|conn| conn.try_clone().ok())
                            });
                            let _ = reply.send(handle);
                        }
                    }
                }
                recv(ticker) -> _ => {
                    let now = Instant::now();
                    let expired: Vec<_> = sessions
                        .iter()
                        .filter(|(_, session)| {
                            session.deadline.is_some_and(|deadline| now > deadline)
                        })
                        .map(|(id, _)| *id)
                        .collect();
                    for id in expired {
                        info!("output synchronization {id} timed out");
                        if let Some(mut session) = sessions.remove(&id) {
                            session.close();
                        }
                    }
                }
            }
        }
    });

    SyncChannels {
        fresh_id: id_rx,
        control: control_tx,
    }
}

fn bind_unix(path: &Path) -> io::Result<UnixListener> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o777))?;
    Ok(listener)
}

// Wait for the single client connection on a session socket. The listener
// polls so the manager can cancel it when the deadline passes.
fn accept_sync_connection(
    listener: UnixListener,
    id: u64,
    cancel: Arc<AtomicBool>,
    channels: SyncChannels,
) {
    if listener.set_nonblocking(true).is_err() {
        return;
    }
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                let _ = stream.set_nonblocking(false);
                let _ = channels.control.send(SyncControl::Disarm(id));
                let _ = channels.control.send(SyncControl::Attach(id, stream));
                let _ = channels.control.send(SyncControl::Arm(id));
                return;
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                thread::sleep(ACCEPT_POLL);
            }
            Err(_) => return,
        }
    }
}

/// The daemon fronting one chroot builder.
pub struct RpcServer {
    socket_path: PathBuf,
    builder: Arc<dyn DebianBuilder>,
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("socket_path", &self.socket_path)
            .finish()
    }
}

struct RequestContext {
    builder: Arc<dyn DebianBuilder>,
    channels: SyncChannels,
}

impl RequestContext {
    fn init_sync(&self) -> WireResult {
        let id = self
            .channels
            .fresh_id
            .recv()
            .map_err(|_| "synchronization manager is gone".to_owned())?;
        let socket_path = std::env::temp_dir().join(format!(
            "deb-foundry-{}-{id}.sock",
            std::process::id()
        ));
        let listener = bind_unix(&socket_path).map_err(|err| err.to_string())?;

        let cancel = Arc::new(AtomicBool::new(false));
        let session = SyncSession {
            socket_path: socket_path.clone(),
            cancel: cancel.clone(),
            conn: None,
            deadline: Some(Instant::now() + SYNC_TIMEOUT),
        };
        let _ = self
            .channels
            .control
            .send(SyncControl::Register(id, session));

        let channels = self.channels.clone();
        thread::spawn(move || accept_sync_connection(listener, id, cancel, channels));

        Ok(Response::Sync {
            id,
            network: "unix".to_owned(),
            address: socket_path,
        })
    }

    // Fetch the attached writer of a session; errors match the session
    // states a client can observe.
    fn session_writer(&self, id: u64) -> Result<UnixStream, String> {
        let _ = self.channels.control.send(SyncControl::Disarm(id));
        let (reply_tx, reply_rx) = bounded(1);
        let _ = self.channels.control.send(SyncControl::Take(id, reply_tx));
        match reply_rx.recv() {
            Ok(Some(Some(conn))) => Ok(conn),
            Ok(Some(None)) => Err(format!(
                "Client is not connected to synchronization output {id}"
            )),
            Ok(None) | Err(_) => Err(format!("no output synchronization {id} available")),
        }
    }

    fn with_session_writer<T>(
        &self,
        id: u64,
        operation: impl FnOnce(&mut (dyn Write + Send)) -> Result<T, BuildError>,
    ) -> Result<T, String> {
        let mut writer = self.session_writer(id)?;
        let result = operation(&mut writer);
        let _ = self.channels.control.send(SyncControl::Remove(id));
        result.map_err(|err| err.to_string())
    }

    fn handle(&self, request: Request) -> WireResult {
        match request {
            Request::InitSync => self.init_sync(),
            Request::Build { id, args } => {
                info!(
                    "[{id}]: building package {} for distribution {} and architectures {:?}",
                    args.source_package.identifier, args.dist, args.archs
                );
                let result = self.with_session_writer(id, |writer| {
                    self.builder.build_package(*args, writer)
                });
                info!("[{id}]: build finished, success: {}", result.is_ok());
                result.map(|mut build| {
                    // the client assembles the log from the sync socket
                    build.build_log = String::new();
                    Response::Build(Box::new(build))
                })
            }
            Request::Create { id, dist, arch } => {
                info!("[{id}]: creating distribution {dist}-{arch}");
                let result = self.with_session_writer(id, |writer| {
                    self.builder.init_distribution(dist, arch, writer)
                });
                info!("[{id}]: created distribution {dist}-{arch}, success: {}", result.is_ok());
                result.map(|()| Response::Unit)
            }
            Request::Update { id, dist, arch } => {
                info!("[{id}]: updating distribution {dist}-{arch}");
                let result = self.with_session_writer(id, |writer| {
                    self.builder.update_distribution(dist, arch, writer)
                });
                info!("[{id}]: updated distribution {dist}-{arch}, success: {}", result.is_ok());
                result.map(|()| Response::Unit)
            }
            Request::Remove { .. } => Err(BuildError::RemoteRemoveRefused.to_string()),
            Request::AvailableDistributions => {
                Ok(Response::Distributions(self.builder.available_distributions()))
            }
            Request::AvailableArchitectures { dist } => {
                Ok(Response::Architectures(self.builder.available_architectures(dist)))
            }
        }
    }
}

fn serve_connection(context: &RequestContext, stream: UnixStream) {
    let mut reader = BufReader::new(&stream);
    let mut line = String::new();
    if reader.read_line(&mut line).is_err() {
        return;
    }

    let result = match serde_json::from_str::<Request>(&line) {
        Ok(request) => context.handle(request),
        Err(err) => Err(format!("invalid request: {err}")),
    };

    let mut writer = &stream;
    if let Ok(encoded) = serde_json::to_string(&result) {
        let _ = writer.write_all(encoded.as_bytes());
        let _ = writer.write_all(b"\n");
    }
}

impl RpcServer {
    /// Create a server for `builder` listening on `socket_path`.
    pub fn new(builder: Arc<dyn DebianBuilder>, socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            builder,
        }
    }

    /// Serve forever.
    pub fn serve(&self) -> Result<(), BuildError> {
        let listener = bind_unix(&self.socket_path)?;
        let channels = spawn_sync_manager();
        info!("started RPC builder on unix:/{}", self.socket_path.display());

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    error!("accept failed: {err}");
                    continue;
                }
            };
            let context = RequestContext {
                builder: self.builder.clone(),
                channels: channels.clone(),
            };
            thread::spawn(move || serve_connection(&context, stream));
        }
        Ok(())
    }
}

/// A [DebianBuilder] that defers every operation to the daemon through its
/// unix socket.
#[derive(Debug)]
pub struct ClientBuilder {
    socket_path: PathBuf,
}

impl ClientBuilder {
    /// Client for the daemon at `socket_path`.
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    fn call(&self, request: &Request) -> Result<Response, BuildError> {
        let stream = UnixStream::connect(&self.socket_path)?;
        let mut writer = &stream;
        let encoded = serde_json::to_string(request)
            .map_err(|err| BuildError::Rpc(err.to_string()))?;
        writer.write_all(encoded.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        let mut reader = BufReader::new(&stream);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let result: WireResult = serde_json::from_str(&line)
            .map_err(|err| BuildError::Rpc(format!("invalid response: {err}")))?;
        result.map_err(BuildError::Rpc)
    }

    fn init_sync(&self) -> Result<(u64, PathBuf), BuildError> {
        match self.call(&Request::InitSync)? {
            Response::Sync { id, address, .. } => Ok((id, address)),
            other => Err(BuildError::Rpc(format!("unexpected response {other:?}"))),
        }
    }

    // Run `request` while draining the session socket into `output` and an
    // in-memory log; returns the response and the drained log.
    fn call_synced(
        &self,
        id: u64,
        address: &Path,
        request: &Request,
        output: &mut (dyn Write + Send),
    ) -> Result<(Response, String), BuildError> {
        let mut conn = UnixStream::connect(address)?;
        let mut log = Vec::new();

        let (response, copied) = thread::scope(|scope| {
            let copier = scope.spawn(|| {
                let mut chunk = [0u8; 8192];
                loop {
                    match conn.read(&mut chunk) {
                        Ok(0) => return Ok(()),
                        Ok(n) => {
                            log.extend_from_slice(&chunk[..n]);
                            let _ = output.write_all(&chunk[..n]);
                        }
                        Err(err) => return Err(err),
                    }
                }
            });
            let response = self.call(request);
            let copied = copier.join().unwrap_or(Ok(()));
            (response, copied)
        });

        let response = response?;
        // a session closed by timeout surfaces as the copy error
        copied?;
        Ok((response, String::from_utf8_lossy(&log).into_owned()))
    }
}

impl DebianBuilder for ClientBuilder {
    fn build_package(
        &self,
        args: BuildArguments,
        output: &mut (dyn Write + Send),
    ) -> Result<BuildResult, BuildError> {
        let (id, address) = self.init_sync()?;
        let request = Request::Build {
            id,
            args: Box::new(args),
        };
        let (response, log) = self.call_synced(id, &address, &request, output)?;
        match response {
            Response::Build(mut result) => {
                result.build_log = log;
                Ok(*result)
            }
            other => Err(BuildError::Rpc(format!("unexpected response {other:?}"))),
        }
    }

    fn init_distribution(
        &self,
        dist: Codename,
        arch: Architecture,
        output: &mut (dyn Write + Send),
    ) -> Result<(), BuildError> {
        let (id, address) = self.init_sync()?;
        let request = Request::Create { id, dist, arch };
        self.call_synced(id, &address, &request, output)?;
        Ok(())
    }

    fn remove_distribution(&self, _dist: Codename, _arch: Architecture) -> Result<(), BuildError> {
        Err(BuildError::RemoteRemoveRefused)
    }

    fn update_distribution(
        &self,
        dist: Codename,
        arch: Architecture,
        output: &mut (dyn Write + Send),
    ) -> Result<(), BuildError> {
        let (id, address) = self.init_sync()?;
        let request = Request::Update { id, dist, arch };
        self.call_synced(id, &address, &request, output)?;
        Ok(())
    }

    fn available_distributions(&self) -> Vec<Codename> {
        match self.call(&Request::AvailableDistributions) {
            Ok(Response::Distributions(dists)) => dists,
            Ok(_) | Err(_) => {
                error!("could not list available distributions");
                Vec::new()
            }
        }
    }

    fn available_architectures(&self, dist: Codename) -> Vec<Architecture> {
        match self.call(&Request::AvailableArchitectures { dist }) {
            Ok(Response::Architectures(archs)) => archs,
            Ok(_) | Err(_) => {
                error!("could not list available architectures for {dist}");
                Vec::new()
            }
        }
    }
}

//! Local Command Server.
//!
//! Listens on `<runtime dir>/tabctl-<port>.sock` (mode 0600) and serves one
//! command per connection:
//!
//! 1. Read exactly one JSON object
//! 2. Decode it into a [`Command`] and dispatch it to the backend
//! 3. Write exactly one `{"result": ...}` or `{"error": ...}` object
//! 4. Close
//!
//! # Stale Sockets
//!
//! An existing socket file at startup is probed. If a connection succeeds,
//! another mediator owns it and startup fails with [`Error::SocketInUse`];
//! otherwise the file is a leftover and is removed before binding.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::client::TabClient;
use crate::error::{Error, Result};
use crate::protocol::{Command, Response};

use super::MAX_FRAME_SIZE;

// ============================================================================
// Constants
// ============================================================================

/// Timeout for probing an existing socket file.
const STALE_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Timeout for a client to deliver its command.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Read chunk size.
const READ_CHUNK: usize = 8 * 1024;

// ============================================================================
// Paths
// ============================================================================

/// Directory for mediator sockets: `$XDG_RUNTIME_DIR`, else `/tmp`.
#[must_use]
pub fn default_runtime_dir() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Socket path for a mediator port: `<dir>/tabctl-<port>.sock`.
#[inline]
#[must_use]
pub fn socket_path(dir: &Path, port: u16) -> PathBuf {
    dir.join(format!("tabctl-{port}.sock"))
}

// ============================================================================
// UnixServer
// ============================================================================

/// Unix-socket front end for a [`TabClient`] backend.
///
/// # Example
///
/// ```ignore
/// let server = UnixServer::bind(&path, backend, shutdown.clone()).await?;
/// let accept = server.spawn();
/// shutdown.cancelled().await;
/// server.shutdown();
/// ```
pub struct UnixServer {
    path: PathBuf,
    listener: parking_lot::Mutex<Option<UnixListener>>,
    backend: Arc<dyn TabClient>,
    shutdown: CancellationToken,
    removed: AtomicBool,
    read_timeout: Duration,
}

// ============================================================================
// UnixServer - Constructor
// ============================================================================

impl UnixServer {
    /// Binds the socket, replacing a stale file if needed.
    ///
    /// `shutdown` is cancelled when a client sends the `shutdown` command,
    /// and stops the accept loop when cancelled by anyone else.
    ///
    /// # Errors
    ///
    /// - [`Error::SocketInUse`] if another mediator answers on `path`
    /// - [`Error::Io`] if the file cannot be removed or bound
    pub async fn bind(
        path: impl Into<PathBuf>,
        backend: Arc<dyn TabClient>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>> {
        let path = path.into();
        prepare_socket_path(&path).await?;

        let listener = bind_private(&path)?;

        info!(path = %path.display(), "Local command server listening");

        Ok(Arc::new(Self {
            path,
            listener: parking_lot::Mutex::new(Some(listener)),
            backend,
            shutdown,
            removed: AtomicBool::new(false),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }))
    }
}

async fn prepare_socket_path(path: &Path) -> Result<()> {
    if tokio::fs::symlink_metadata(path).await.is_ok() {
        match tokio::time::timeout(STALE_PROBE_TIMEOUT, UnixStream::connect(path)).await {
            Ok(Ok(_)) => return Err(Error::socket_in_use(path)),
            _ => {
                warn!(path = %path.display(), "Removing stale socket");
                tokio::fs::remove_file(path).await?;
            }
        }
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Binds in a 0700 staging directory, narrows the socket to 0600, then links
/// it into place, so `path` never exists with wider permissions. Linking
/// fails if `path` appeared meanwhile.
fn bind_private(path: &Path) -> Result<UnixListener> {
    use std::os::unix::fs::PermissionsExt;

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let staging = tempfile::Builder::new()
        .prefix(".tabctl-")
        .tempdir_in(parent)?;
    let staged = staging.path().join("sock");

    let listener = UnixListener::bind(&staged)?;
    std::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o600))?;

    match std::fs::hard_link(&staged, path) {
        Ok(()) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(Error::socket_in_use(path)),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// UnixServer - Public API
// ============================================================================

impl UnixServer {
    /// Socket path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Token cancelled on shutdown.
    #[inline]
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Starts the accept loop on its own task.
    ///
    /// Calling this more than once returns a task that exits immediately.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let listener = self.listener.lock().take();
        let server = Arc::clone(self);
        tokio::spawn(async move {
            match listener {
                Some(listener) => server.accept_loop(listener).await,
                None => debug!("Accept loop already started"),
            }
        })
    }

    /// Stops accepting and removes the socket file. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.listener.lock().take();
        self.remove_socket_file();
    }

    fn remove_socket_file(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Socket removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove socket"),
        }
    }
}

// ============================================================================
// UnixServer - Accept Loop
// ============================================================================

impl UnixServer {
    async fn accept_loop(self: Arc<Self>, listener: UnixListener) {
        debug!("Accept loop started");

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, _addr)) => {
                    let id = Uuid::new_v4();
                    let server = Arc::clone(&self);
                    tokio::spawn(
                        async move {
                            if let Err(e) = server.handle_connection(stream).await {
                                debug!(error = %e, "Connection handling failed");
                            }
                        }
                        .instrument(info_span!("conn", %id)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }

        drop(listener);
        self.remove_socket_file();
        debug!("Accept loop terminated");
    }

    /// Serves one command.
    async fn handle_connection(&self, mut stream: UnixStream) -> Result<()> {
        let request = match tokio::time::timeout(self.read_timeout, read_request(&mut stream)).await
        {
            Ok(Ok(Some(value))) => value,
            Ok(Ok(None)) => {
                debug!("Connection closed without a command");
                return Ok(());
            }
            Ok(Err(e)) => {
                write_response(&mut stream, &Response::failure(e.to_string())).await?;
                return Err(e);
            }
            Err(_) => {
                let e = Error::timeout("read command", self.read_timeout.as_millis() as u64);
                write_response(&mut stream, &Response::failure(e.to_string())).await?;
                return Err(e);
            }
        };

        let command = match Command::from_local_value(request) {
            Ok(command) => command,
            Err(e) => {
                debug!(error = %e, "Rejected command");
                return write_response(&mut stream, &Response::failure(e.to_string())).await;
            }
        };

        let name = command.name();
        debug!(command = name, "Dispatching");

        if matches!(command, Command::Shutdown) {
            info!("Shutdown requested by client");
            write_response(&mut stream, &Response::success(json!("ok"))).await?;
            self.shutdown.cancel();
            return Ok(());
        }

        let response = Response::from_result(self.backend.execute(command).await);
        if let Some(message) = &response.error {
            debug!(command = name, error = %message, "Command failed");
        }
        write_response(&mut stream, &response).await
    }
}

impl Drop for UnixServer {
    fn drop(&mut self) {
        self.remove_socket_file();
    }
}

// ============================================================================
// Wire Helpers
// ============================================================================

/// Reads exactly one JSON value; `None` if the peer closed without sending.
async fn read_request(stream: &mut UnixStream) -> Result<Option<Value>> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buffer.iter().all(u8::is_ascii_whitespace) {
                return Ok(None);
            }
            return serde_json::from_slice(&buffer)
                .map(Some)
                .map_err(|e| Error::invalid_argument(format!("malformed command: {e}")));
        }

        buffer.extend_from_slice(&chunk[..n]);
        if buffer.len() > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge {
                length: buffer.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let mut values = serde_json::Deserializer::from_slice(&buffer).into_iter::<Value>();
        match values.next() {
            Some(Ok(value)) => return Ok(Some(value)),
            Some(Err(e)) if e.is_eof() => continue,
            Some(Err(e)) => {
                return Err(Error::invalid_argument(format!("malformed command: {e}")));
            }
            None => continue,
        }
    }
}

async fn write_response(stream: &mut UnixStream, response: &Response) -> Result<()> {
    let payload = serde_json::to_vec(response)?;
    stream.write_all(&payload).await?;
    stream.shutdown().await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

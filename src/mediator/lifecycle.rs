//! Mediator lifecycle.
//!
//! # Stdio Mode
//!
//! ```text
//! stdin/stdout ──► FramedTransport ──► RemoteApi ◄── UnixServer ◄── CLI
//!                                          ▲
//!                                          └──────── HttpServer (optional)
//! ```
//!
//! Runs until the browser closes the stream or a `shutdown` command arrives.
//!
//! # Server Mode
//!
//! ```text
//! HTTP client ──► HttpServer ──► SocketClient ──► tabctl-<port>.sock
//! ```
//!
//! Owns no browser. Runs until `shutdown` is requested.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::RemoteApi;
use crate::client::{SocketClient, TabClient};
use crate::error::Result;
use crate::transport::{FramedTransport, HttpServer, UnixServer};

use super::{MediatorConfig, Mode};

// ============================================================================
// Constants
// ============================================================================

/// Time allowed for the HTTP front end to drain after shutdown.
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// ExitReason
// ============================================================================

/// Why a mediator stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The browser closed the stdio stream.
    BrowserDisconnected,
    /// A `shutdown` command or signal was received.
    ShutdownRequested,
}

impl ExitReason {
    /// Process exit status; both reasons are a clean exit.
    #[inline]
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        0
    }
}

// ============================================================================
// Mediator
// ============================================================================

/// One mediator process.
pub struct Mediator {
    config: MediatorConfig,
    shutdown: CancellationToken,
    stopping: AtomicBool,
    http_addr: Mutex<Option<SocketAddr>>,
}

impl Mediator {
    /// Creates a mediator.
    #[must_use]
    pub fn new(config: MediatorConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            stopping: AtomicBool::new(false),
            http_addr: Mutex::new(None),
        }
    }

    /// Configuration in use.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &MediatorConfig {
        &self.config
    }

    /// Token cancelled when the mediator stops.
    #[inline]
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bound HTTP address, once the front end is up.
    #[inline]
    #[must_use]
    pub fn http_addr(&self) -> Option<SocketAddr> {
        *self.http_addr.lock()
    }

    /// Requests a stop. Idempotent; safe while the accept loops are running.
    pub fn shutdown(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            info!("Mediator shutting down");
        }
        self.shutdown.cancel();
    }

    /// Runs in `mode` until stopped.
    ///
    /// # Errors
    ///
    /// Returns startup failures: socket in use, unbindable address.
    pub async fn run(&self, mode: Mode) -> Result<ExitReason> {
        match mode {
            Mode::Stdio => self.run_stdio(Arc::new(FramedTransport::stdio())).await,
            Mode::Server => self.run_server().await,
        }
    }

    /// Serves a browser connected through `transport`.
    ///
    /// # Errors
    ///
    /// - [`Error::SocketInUse`](crate::Error::SocketInUse) if another mediator owns the socket
    /// - [`Error::Io`](crate::Error::Io) if the socket or HTTP address cannot be bound
    pub async fn run_stdio(&self, transport: Arc<FramedTransport>) -> Result<ExitReason> {
        let api = Arc::new(
            RemoteApi::new(Arc::clone(&transport)).with_timeout(self.config.command_timeout),
        );

        let server =
            UnixServer::bind(self.config.socket_path(), api.clone(), self.shutdown.clone()).await?;
        server.spawn();
        info!(
            path = %server.path().display(),
            pid = std::process::id(),
            "Mediator serving browser"
        );

        let http = if self.config.http_in_stdio {
            match self.start_http(api.clone()).await {
                Ok(http) => Some(http),
                Err(e) => {
                    server.shutdown();
                    return Err(e);
                }
            }
        } else {
            None
        };

        let reason = tokio::select! {
            () = api.disconnected().cancelled() => ExitReason::BrowserDisconnected,
            () = self.shutdown.cancelled() => ExitReason::ShutdownRequested,
        };
        info!(?reason, "Mediator stopping");

        self.shutdown();
        server.shutdown();
        if let Some(http) = http {
            drain(http).await;
        }
        if let Err(e) = transport.close().await {
            debug!(error = %e, "Closing browser transport failed");
        }

        Ok(reason)
    }

    /// Serves the HTTP gateway to this port's stdio mediator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the HTTP address cannot be bound.
    pub async fn run_server(&self) -> Result<ExitReason> {
        let backend: Arc<dyn TabClient> = Arc::new(
            SocketClient::new(self.config.socket_path()).with_timeout(self.config.gateway_timeout),
        );
        info!(socket = %self.config.socket_path().display(), "Mediator gateway forwarding");

        let http = self.start_http(backend).await?;
        self.shutdown.cancelled().await;

        self.shutdown();
        drain(http).await;
        Ok(ExitReason::ShutdownRequested)
    }

    async fn start_http(&self, backend: Arc<dyn TabClient>) -> Result<HttpServer> {
        let http = HttpServer::bind(
            &self.config.http_host,
            self.config.http_port(),
            backend,
            self.shutdown.clone(),
        )
        .await?;
        *self.http_addr.lock() = Some(http.local_addr());
        Ok(http)
    }
}

async fn drain(http: HttpServer) {
    if tokio::time::timeout(HTTP_DRAIN_TIMEOUT, http.join()).await.is_err() {
        warn!("HTTP front end did not stop in time");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use serde_json::json;

    use crate::client::HttpClient;
    use crate::error::Error;
    use crate::protocol::Command;
    use crate::test_support::{browser_pair, fake_browser};

    fn config(dir: &Path) -> MediatorConfig {
        MediatorConfig::new()
            .with_runtime_dir(dir)
            .with_port(4625)
            .with_http_port(0)
    }

    async fn wait_for(path: &Path) {
        for _ in 0..200 {
            if path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("socket {} never appeared", path.display());
    }

    fn answer_list(_: &serde_json::Value) -> serde_json::Value {
        json!({ "result": ["1.2\tExample\thttps://example.com"] })
    }

    #[tokio::test]
    async fn test_stdio_serves_socket_until_shutdown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (transport, _browser) = fake_browser(answer_list);
        let mediator = Arc::new(Mediator::new(config(dir.path())));

        let run = tokio::spawn({
            let mediator = Arc::clone(&mediator);
            async move { mediator.run_stdio(transport).await }
        });
        let path = mediator.config().socket_path();
        wait_for(&path).await;

        let client = SocketClient::new(&path);
        assert_eq!(
            client.list_tabs().await.expect("list"),
            vec!["1.2\tExample\thttps://example.com".to_string()]
        );
        client.execute(Command::Shutdown).await.expect("shutdown");

        let reason = run.await.expect("join").expect("run");
        assert_eq!(reason, ExitReason::ShutdownRequested);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_browser_eof_exits_cleanly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (transport, browser) = browser_pair();
        let mediator = Arc::new(Mediator::new(config(dir.path())));

        let run = tokio::spawn({
            let mediator = Arc::clone(&mediator);
            async move { mediator.run_stdio(transport).await }
        });
        let path = mediator.config().socket_path();
        wait_for(&path).await;

        browser.close().await.expect("close");
        let reason = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("exits promptly")
            .expect("join")
            .expect("run");
        assert_eq!(reason, ExitReason::BrowserDisconnected);
        assert_eq!(reason.exit_code(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_second_mediator_on_same_port_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (transport, _browser) = fake_browser(answer_list);
        let first = Arc::new(Mediator::new(config(dir.path())));

        let run = tokio::spawn({
            let first = Arc::clone(&first);
            async move { first.run_stdio(transport).await }
        });
        wait_for(&first.config().socket_path()).await;

        let (transport, _browser2) = fake_browser(answer_list);
        let err = Mediator::new(config(dir.path()))
            .run_stdio(transport)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SocketInUse { .. }));

        first.shutdown();
        first.shutdown();
        assert_eq!(run.await.expect("join").expect("run"), ExitReason::ShutdownRequested);
    }

    #[tokio::test]
    async fn test_gateway_forwards_to_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (transport, _browser) = fake_browser(answer_list);
        let stdio = Arc::new(Mediator::new(config(dir.path())));
        let stdio_run = tokio::spawn({
            let stdio = Arc::clone(&stdio);
            async move { stdio.run_stdio(transport).await }
        });
        wait_for(&stdio.config().socket_path()).await;

        let gateway = Arc::new(Mediator::new(config(dir.path())));
        let gateway_run = tokio::spawn({
            let gateway = Arc::clone(&gateway);
            async move { gateway.run_server().await }
        });
        let mut addr = None;
        for _ in 0..200 {
            addr = gateway.http_addr();
            if addr.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let addr = addr.expect("gateway bound");

        let client = HttpClient::new("127.0.0.1", addr.port(), Duration::from_secs(2)).expect("client");
        assert_eq!(client.list_tabs().await.expect("list").len(), 1);

        client.execute(Command::Shutdown).await.expect("shutdown");
        assert_eq!(
            gateway_run.await.expect("join").expect("run"),
            ExitReason::ShutdownRequested
        );
        assert!(!stdio.shutdown_token().is_cancelled(), "gateway stop leaves stdio running");

        stdio.shutdown();
        stdio_run.await.expect("join").expect("run");
    }
}

//! Command Router.
//!
//! [`RemoteApi`] turns typed operations into browser commands over a
//! [`FramedTransport`] and decodes the single reply to each.
//!
//! # Reader Task
//!
//! A background task owns the read side. It delivers each reply to the one
//! waiting request and watches for end-of-stream, so a browser that goes away
//! is noticed even while no request is in flight:
//!
//! ```text
//! request() ──send──► transport ──► browser
//!     ▲                                │
//!     └──── waiter ◄── reader task ◄───┘
//!                          │
//!                          └── EOF ──► disconnected.cancel()
//! ```
//!
//! The browser protocol carries no request IDs, so exchanges are serialized:
//! at most one request is outstanding at a time.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::TabClient;
use crate::error::{Error, Result};
use crate::protocol::{Command, Response};
use crate::transport::FramedTransport;

// ============================================================================
// Constants
// ============================================================================

/// Default time to wait for the browser's reply.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

/// Slot for the request currently waiting on a reply.
type Waiter = Arc<Mutex<Option<oneshot::Sender<Result<Value>>>>>;

// ============================================================================
// RemoteApi
// ============================================================================

/// Typed command surface of one connected browser.
pub struct RemoteApi {
    /// Framed stream to the browser.
    transport: Arc<FramedTransport>,
    /// Reply slot shared with the reader task.
    waiter: Waiter,
    /// Serializes exchanges.
    exchange: tokio::sync::Mutex<()>,
    /// Cancelled once the browser is gone.
    disconnected: CancellationToken,
    /// Reply timeout.
    timeout: Duration,
}

impl RemoteApi {
    /// Creates the router and spawns its reader task.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(transport: Arc<FramedTransport>) -> Self {
        let waiter: Waiter = Arc::new(Mutex::new(None));
        let disconnected = CancellationToken::new();

        tokio::spawn(read_loop(
            Arc::clone(&transport),
            Arc::clone(&waiter),
            disconnected.clone(),
        ));

        Self {
            transport,
            waiter,
            exchange: tokio::sync::Mutex::new(()),
            disconnected,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Sets the reply timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Token cancelled when the browser closes the stream.
    #[inline]
    #[must_use]
    pub fn disconnected(&self) -> &CancellationToken {
        &self.disconnected
    }

    /// Returns `true` while the browser stream is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.disconnected.is_cancelled()
    }

    /// Sends one command to the browser and decodes its reply.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the browser is gone
    /// - [`Error::Timeout`] if no reply arrives in time
    /// - [`Error::Browser`] if the browser reports a failure
    /// - [`Error::Protocol`] if the reply is not a response object
    pub async fn request(&self, command: &Command) -> Result<Value> {
        let _exchange = self.exchange.lock().await;
        if self.disconnected.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        *self.waiter.lock() = Some(tx);

        let message = command.to_browser_message();
        trace!(command = command.name(), "Sending command to browser");
        if let Err(e) = self.transport.send(&message).await {
            self.waiter.lock().take();
            return Err(e);
        }

        let reply = match timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply?,
            Ok(Err(_)) => return Err(Error::ConnectionClosed),
            Err(_) => {
                self.waiter.lock().take();
                warn!(command = command.name(), "Browser did not reply in time");
                return Err(Error::timeout(
                    command.name(),
                    self.timeout.as_millis() as u64,
                ));
            }
        };

        Response::from_value(reply)?.into_result_with(Error::browser)
    }
}

impl Drop for RemoteApi {
    fn drop(&mut self) {
        self.disconnected.cancel();
    }
}

#[async_trait]
impl TabClient for RemoteApi {
    fn describe(&self) -> String {
        "browser (stdio)".to_string()
    }

    async fn execute(&self, command: Command) -> Result<Value> {
        match command {
            Command::GetPid => Ok(json!(std::process::id())),
            Command::Shutdown => Err(Error::invalid_argument(
                "shutdown is handled by the command server",
            )),
            command => self.request(&command).await,
        }
    }
}

// ============================================================================
// Reader Task
// ============================================================================

async fn read_loop(transport: Arc<FramedTransport>, waiter: Waiter, disconnected: CancellationToken) {
    loop {
        let message = tokio::select! {
            () = disconnected.cancelled() => break,
            message = transport.recv() => message,
        };

        match message {
            Ok(message) => match waiter.lock().take() {
                Some(tx) => {
                    let _ = tx.send(Ok(message));
                }
                None => debug!(%message, "Dropping unsolicited browser message"),
            },

            // The frame was consumed, so the stream is still in sync.
            Err(Error::Json(e)) => {
                warn!(error = %e, "Browser sent a malformed frame");
                if let Some(tx) = waiter.lock().take() {
                    let _ = tx.send(Err(Error::protocol(format!("malformed reply: {e}"))));
                }
            }

            Err(e) if e.is_connection_closed() => {
                info!("Browser closed the connection");
                break;
            }

            Err(e) => {
                warn!(error = %e, "Browser stream failed");
                break;
            }
        }
    }

    disconnected.cancel();
    if let Some(tx) = waiter.lock().take() {
        let _ = tx.send(Err(Error::ConnectionClosed));
    }
    debug!("Browser reader terminated");
}

// ============================================================================
// Tests
// ============================================================================

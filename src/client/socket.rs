//! Unix-socket backend.
//!
//! One connection per command: write the command object, half-close, read
//! the response object until EOF.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::{Command, Response};
use crate::transport::MAX_FRAME_SIZE;

use super::TabClient;

// ============================================================================
// Constants
// ============================================================================

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// SocketClient
// ============================================================================

/// Talks to a mediator's Local Command Server.
#[derive(Debug, Clone)]
pub struct SocketClient {
    path: PathBuf,
    timeout: Duration,
}

impl SocketClient {
    /// Creates a client for the socket at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the per-request timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Socket path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sends one raw message and returns the raw reply.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if nothing listens on the socket
    /// - [`Error::Timeout`] if the exchange exceeds the timeout
    /// - [`Error::Protocol`] if the reply is not JSON
    pub async fn request(&self, message: &Value) -> Result<Value> {
        let operation = message
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("request")
            .to_string();

        match tokio::time::timeout(self.timeout, self.exchange(message)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(operation, self.timeout.as_millis() as u64)),
        }
    }

    async fn exchange(&self, message: &Value) -> Result<Value> {
        let mut stream = UnixStream::connect(&self.path)
            .await
            .map_err(|e| Error::connection(format!("{}: {e}", self.path.display())))?;

        let payload = serde_json::to_vec(message)?;
        stream.write_all(&payload).await?;
        stream.shutdown().await?;

        let mut reply = Vec::new();
        (&mut stream)
            .take(MAX_FRAME_SIZE as u64 + 1)
            .read_to_end(&mut reply)
            .await?;

        if reply.len() > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge {
                length: reply.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        if reply.is_empty() {
            return Err(Error::protocol("mediator closed the connection without a reply"));
        }

        trace!(path = %self.path.display(), bytes = reply.len(), "Socket reply");
        serde_json::from_slice(&reply).map_err(|e| Error::protocol(format!("bad reply: {e}")))
    }
}

#[async_trait]
impl TabClient for SocketClient {
    fn describe(&self) -> String {
        format!("unix:{}", self.path.display())
    }

    async fn execute(&self, command: Command) -> Result<Value> {
        let reply = self.request(&command.to_local_message()).await?;
        Response::from_value(reply)?.into_result_with(Error::remote)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_missing_socket_is_connection_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = SocketClient::new(dir.path().join("absent.sock"));
        let err = client.execute(Command::ListTabs).await.unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_round_trip_against_listener() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tabctl-4625.sock");
        let listener = UnixListener::bind(&path).expect("bind");

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            stream.read_to_end(&mut request).await.expect("read");
            let request: Value = serde_json::from_slice(&request).expect("json");
            assert_eq!(request, json!({ "name": "list_tabs", "args": {} }));
            stream
                .write_all(br#"{"result":["1.2\tTitle\thttp://x"]}"#)
                .await
                .expect("write");
        });

        let client = SocketClient::new(&path);
        let lines = client.list_tabs().await.expect("list");
        assert_eq!(lines, vec!["1.2\tTitle\thttp://x".to_string()]);
        server.await.expect("server");
    }

    #[tokio::test]
    async fn test_error_reply_is_remote_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tabctl-4626.sock");
        let listener = UnixListener::bind(&path).expect("bind");

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            stream.read_to_end(&mut request).await.expect("read");
            stream
                .write_all(br#"{"error":"Unknown command: nope"}"#)
                .await
                .expect("write");
        });

        let err = SocketClient::new(&path)
            .execute(Command::GetBrowser)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tabctl-4627.sock");
        let listener = UnixListener::bind(&path).expect("bind");

        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.expect("accept");
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let err = SocketClient::new(&path)
            .with_timeout(Duration::from_millis(50))
            .execute(Command::ListTabs)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}

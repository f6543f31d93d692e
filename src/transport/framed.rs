//! Length-prefixed JSON framing (native messaging).
//!
//! Every frame is a 4-byte little-endian length followed by that many bytes
//! of UTF-8 JSON:
//!
//! ```text
//! ┌──────────────┬────────────────────────────┐
//! │ len: u32 LE  │ JSON payload (len bytes)   │
//! └──────────────┴────────────────────────────┘
//! ```
//!
//! Keep-alive frames (`ping`, `health_check`) are answered inside
//! [`FramedTransport::recv`] and never reach the caller.

// ============================================================================
// Imports
// ============================================================================

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::keep_alive_reply;

// ============================================================================
// Constants
// ============================================================================

/// Largest accepted payload (10 MiB).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Size of the length prefix.
const LENGTH_PREFIX_SIZE: usize = 4;

// ============================================================================
// Types
// ============================================================================

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ============================================================================
// FramedTransport
// ============================================================================

/// Framed message transport over a duplex byte stream.
///
/// Reads and writes are independently locked, so a task blocked in
/// [`recv`](Self::recv) does not stop another task from sending.
pub struct FramedTransport {
    /// Read half.
    reader: Mutex<BoxReader>,
    /// Write half.
    writer: Mutex<BoxWriter>,
    /// Whether `close` may shut the stream down.
    owns_stream: bool,
    /// Set once an owned stream was closed.
    closed: AtomicBool,
}

impl FramedTransport {
    /// Creates a transport that owns both halves.
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self::with_ownership(Box::new(reader), Box::new(writer), true)
    }

    /// Creates a transport over a single duplex stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }

    /// Creates a transport over the process's standard input/output.
    ///
    /// The process does not own these streams; [`close`](Self::close) is a no-op.
    pub fn stdio() -> Self {
        Self::borrowed(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Creates a transport whose streams are not closed by [`close`](Self::close).
    pub fn borrowed(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self::with_ownership(Box::new(reader), Box::new(writer), false)
    }

    fn with_ownership(reader: BoxReader, writer: BoxWriter, owns_stream: bool) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            owns_stream,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns `true` if [`close`](Self::close) shuts the stream down.
    #[inline]
    #[must_use]
    pub fn owns_stream(&self) -> bool {
        self.owns_stream
    }

    /// Serializes and writes one frame, then flushes.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] after [`close`](Self::close)
    /// - [`Error::FrameTooLarge`] if the payload exceeds [`MAX_FRAME_SIZE`]
    /// - [`Error::Io`] if the write fails
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        self.ensure_open()?;
        let frame = encode_frame(message)?;

        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await.map_err(map_write_error)?;
        writer.flush().await.map_err(map_write_error)?;

        trace!(bytes = frame.len(), "Frame sent");
        Ok(())
    }

    /// Waits for the next application frame.
    ///
    /// Keep-alive frames are answered inline and skipped.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] on end-of-stream before a length prefix
    /// - [`Error::FrameTooLarge`] if the declared length exceeds [`MAX_FRAME_SIZE`]
    /// - [`Error::Protocol`] if the stream ends inside a frame
    /// - [`Error::Json`] if the payload is not JSON
    pub async fn recv(&self) -> Result<Value> {
        loop {
            self.ensure_open()?;

            let message = {
                let mut reader = self.reader.lock().await;
                read_frame(&mut *reader).await?
            };

            if let Some(reply) = keep_alive_reply(&message) {
                trace!(?message, "Answering keep-alive");
                self.send(&reply).await?;
                continue;
            }

            return Ok(message);
        }
    }

    /// Waits for the next application frame and deserializes it.
    ///
    /// # Errors
    ///
    /// As [`recv`](Self::recv), plus [`Error::Json`] on shape mismatch.
    pub async fn recv_as<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.recv().await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Releases the stream if this transport owns it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if shutting down the write half fails.
    pub async fn close(&self) -> Result<()> {
        if !self.owns_stream {
            return Ok(());
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!("Closing framed transport");
        let mut writer = self.writer.lock().await;
        match writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }
}

// ============================================================================
// Frame Codec
// ============================================================================

/// Encodes one message as prefix + compact JSON in a single buffer.
///
/// # Errors
///
/// - [`Error::Json`] if serialization fails
/// - [`Error::FrameTooLarge`] if the payload exceeds [`MAX_FRAME_SIZE`]
pub fn encode_frame<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            length: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    // Bounded by MAX_FRAME_SIZE above, so the cast cannot truncate.
    let length = payload.len() as u32;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Reads one frame and parses its payload.
///
/// # Errors
///
/// As [`FramedTransport::recv`], without keep-alive handling.
pub async fn read_frame<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> Result<Value> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(Error::ConnectionClosed),
        Err(e) => return Err(e.into()),
    }

    let length = u32::from_le_bytes(prefix) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            length,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; length];
    match reader.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            return Err(Error::protocol(format!(
                "stream ended inside a {length}-byte frame"
            )));
        }
        Err(e) => return Err(e.into()),
    }

    trace!(bytes = length, "Frame received");
    Ok(serde_json::from_slice(&payload)?)
}

fn map_write_error(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => Error::ConnectionClosed,
        _ => e.into(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;
    use tokio::io::duplex;

    fn pair() -> (FramedTransport, FramedTransport) {
        let (a, b) = duplex(64 * 1024);
        (FramedTransport::from_stream(a), FramedTransport::from_stream(b))
    }

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame(&json!({ "name": "list_tabs" })).expect("encode");
        let payload = br#"{"name":"list_tabs"}"#;
        assert_eq!(&frame[..4], &(payload.len() as u32).to_le_bytes());
        assert_eq!(&frame[4..], payload);
    }

    #[tokio::test]
    async fn test_send_recv_roundtrip() {
        let (left, right) = pair();
        let message = json!({ "name": "close_tabs", "args": { "tab_ids": [1, 2] } });

        left.send(&message).await.expect("send");
        let received = right.recv().await.expect("recv");
        assert_eq!(received, message);
    }

    #[tokio::test]
    async fn test_ping_is_answered_and_not_delivered() {
        let (browser, mediator) = pair();

        browser.send(&json!({ "type": "ping" })).await.expect("send ping");
        browser
            .send(&json!({ "result": ["a.1.2\tTitle\thttps://example.com"] }))
            .await
            .expect("send result");

        let delivered = mediator.recv().await.expect("recv");
        assert_eq!(delivered, json!({ "result": ["a.1.2\tTitle\thttps://example.com"] }));

        let pong = browser.recv().await.expect("pong");
        assert_eq!(pong, json!({ "type": "pong" }));
    }

    #[tokio::test]
    async fn test_health_check_is_answered() {
        let (browser, mediator) = pair();

        browser.send(&json!({ "type": "health_check" })).await.expect("send");
        browser.send(&json!({ "result": null })).await.expect("send");

        assert_eq!(mediator.recv().await.expect("recv"), json!({ "result": null }));
        assert_eq!(
            browser.recv().await.expect("reply"),
            json!({ "type": "health_check_response", "status": "alive" })
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_without_reading_body() {
        let declared = (MAX_FRAME_SIZE as u32) + 1;
        let reader = tokio_test::io::Builder::new()
            .read(&declared.to_le_bytes())
            .build();
        let transport = FramedTransport::new(reader, tokio::io::sink());

        let err = transport.recv().await.unwrap_err();
        assert!(
            matches!(err, Error::FrameTooLarge { length, .. } if length == declared as usize),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn test_eof_before_prefix_is_connection_closed() {
        let transport = FramedTransport::new(tokio::io::empty(), tokio::io::sink());
        let err = transport.recv().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_protocol_error() {
        let reader = tokio_test::io::Builder::new()
            .read(&10u32.to_le_bytes())
            .read(b"{\"a\"")
            .build();
        let transport = FramedTransport::new(reader, tokio::io::sink());

        let err = transport.recv().await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_close_owned_transport() {
        let (left, right) = pair();
        left.close().await.expect("close");
        assert!(matches!(left.send(&json!({})).await, Err(Error::ConnectionClosed)));
        assert!(matches!(right.recv().await, Err(Error::ConnectionClosed)));
        left.close().await.expect("second close is a no-op");
    }

    #[tokio::test]
    async fn test_close_borrowed_transport_is_noop() {
        let (a, b) = duplex(1024);
        let (a_read, a_write) = tokio::io::split(a);
        let borrowed = FramedTransport::borrowed(a_read, a_write);
        let peer = FramedTransport::from_stream(b);

        assert!(!borrowed.owns_stream());
        borrowed.close().await.expect("close");

        borrowed.send(&json!({ "still": "open" })).await.expect("send after close");
        assert_eq!(peer.recv().await.expect("recv"), json!({ "still": "open" }));
    }

    #[tokio::test]
    async fn test_recv_as_typed() {
        let (left, right) = pair();
        left.send(&json!({ "error": "No tab with id: 9" })).await.expect("send");
        let response: crate::protocol::Response = right.recv_as().await.expect("typed");
        assert_eq!(response.error.as_deref(), Some("No tab with id: 9"));
    }

    proptest! {
        #[test]
        fn prop_frames_roundtrip(entries in proptest::collection::btree_map("[a-z]{1,8}", ".{0,64}", 0..8)) {
            prop_assume!(!entries.contains_key("type"));

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            let message = serde_json::to_value(&entries).expect("to_value");

            let received = runtime.block_on(async {
                let (left, right) = pair();
                left.send(&message).await.expect("send");
                right.recv().await.expect("recv")
            });

            prop_assert_eq!(received, message);
        }
    }
}

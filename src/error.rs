//! Error types for the tab-control mediator.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use tabctl_mediator::{MultiClient, Result};
//!
//! async fn example(clients: &MultiClient) -> Result<()> {
//!     let lines = clients.list_tabs().await?;
//!     println!("{}", lines.join("\n"));
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Transport | [`Error::ConnectionClosed`], [`Error::FrameTooLarge`], [`Error::Protocol`], [`Error::Io`] |
//! | Validation | [`Error::InvalidArgument`], [`Error::UnknownCommand`], [`Error::UnknownPrefix`] |
//! | Timeout | [`Error::Timeout`], [`Error::ConnectionTimeout`] |
//! | Connection | [`Error::Connection`], [`Error::Status`], [`Error::Http`], [`Error::SocketInUse`] |
//! | Circuit-open | [`Error::CircuitOpen`] |
//! | Not-implemented | [`Error::NotImplemented`] |
//! | Remote | [`Error::Browser`], [`Error::Remote`] |
//! | Wrapping | [`Error::Operation`], [`Error::RetriesExhausted`], [`Error::Shared`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::path::PathBuf;
use std::result::Result as StdResult;
use std::sync::Arc;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when mediator, discovery or client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The peer closed the stream between frames.
    ///
    /// For the browser-facing transport this is the normal shutdown signal.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Declared frame length exceeds the protocol cap.
    #[error("Frame of {length} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Length announced by the prefix.
        length: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// Protocol violation or unexpected response shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Validation Errors
    // ========================================================================
    /// Invalid argument in a command.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Unknown command name.
    #[error("Unknown command: {command}")]
    UnknownCommand {
        /// The unrecognized command name.
        command: String,
    },

    /// A tab ID prefix that matches no known mediator.
    #[error("No mediator with prefix {prefix}")]
    UnknownPrefix {
        /// The unmatched prefix, including its trailing dot.
        prefix: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Failed to reach an endpoint.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connecting to an endpoint took too long.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// An HTTP endpoint answered with a non-success status.
    #[error("HTTP status {code}: {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body or reason.
        message: String,
    },

    /// Another mediator already serves the socket path.
    #[error("Socket {} is already served by another mediator", path.display())]
    SocketInUse {
        /// The contested socket path.
        path: PathBuf,
    },

    /// No mediators are known to the orchestrator.
    #[error("No mediators available")]
    NoMediators,

    // ========================================================================
    // Resilience Errors
    // ========================================================================
    /// Circuit breaker is open for an endpoint; no attempt was made.
    #[error("Circuit open for {endpoint}, retry in {retry_in_ms}ms")]
    CircuitOpen {
        /// Endpoint whose breaker tripped.
        endpoint: String,
        /// Milliseconds until the next trial is allowed.
        retry_in_ms: u64,
    },

    /// All retry attempts failed.
    #[error("Max retries exceeded after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last observed error.
        #[source]
        source: Box<Error>,
    },

    /// The wait was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Remote Errors
    // ========================================================================
    /// The browser extension reported a failure.
    #[error("Browser error: {message}")]
    Browser {
        /// Message reported by the browser.
        message: String,
    },

    /// A mediator answered with an error response.
    #[error("Mediator error: {message}")]
    Remote {
        /// Message reported by the mediator.
        message: String,
    },

    /// Operation unsupported by the active transport.
    #[error("{operation} is not implemented over {transport}")]
    NotImplemented {
        /// Operation name.
        operation: String,
        /// Transport name.
        transport: String,
    },

    // ========================================================================
    // Wrapping
    // ========================================================================
    /// An error annotated with the operation and endpoint it came from.
    #[error("{operation} on {endpoint}: {source}")]
    Operation {
        /// Operation name.
        operation: String,
        /// Endpoint description.
        endpoint: String,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },

    /// An error shared between deduplicated callers.
    #[error(transparent)]
    Shared(Arc<Error>),

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an unknown command error.
    #[inline]
    pub fn unknown_command(command: impl Into<String>) -> Self {
        Self::UnknownCommand {
            command: command.into(),
        }
    }

    /// Creates an unknown prefix error.
    #[inline]
    pub fn unknown_prefix(prefix: impl Into<String>) -> Self {
        Self::UnknownPrefix {
            prefix: prefix.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates an HTTP status error.
    #[inline]
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    /// Creates a socket-in-use error.
    #[inline]
    pub fn socket_in_use(path: impl Into<PathBuf>) -> Self {
        Self::SocketInUse { path: path.into() }
    }

    /// Creates a circuit-open error.
    #[inline]
    pub fn circuit_open(endpoint: impl Into<String>, retry_in_ms: u64) -> Self {
        Self::CircuitOpen {
            endpoint: endpoint.into(),
            retry_in_ms,
        }
    }

    /// Wraps the last error of a failed retry loop.
    #[inline]
    pub fn retries_exhausted(attempts: u32, source: Error) -> Self {
        Self::RetriesExhausted {
            attempts,
            source: Box::new(source),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a browser-reported error.
    #[inline]
    pub fn browser(message: impl Into<String>) -> Self {
        Self::Browser {
            message: message.into(),
        }
    }

    /// Creates a mediator-reported error.
    #[inline]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Creates a not-implemented error.
    #[inline]
    pub fn not_implemented(operation: impl Into<String>, transport: impl Into<String>) -> Self {
        Self::NotImplemented {
            operation: operation.into(),
            transport: transport.into(),
        }
    }

    /// Annotates this error with the operation and endpoint it came from.
    #[inline]
    #[must_use]
    pub fn during(self, operation: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            endpoint: endpoint.into(),
            source: Box::new(self),
        }
    }

    /// Recovers an owned error from a shared one when possible.
    pub fn shared(error: Arc<Error>) -> Self {
        Arc::try_unwrap(error).unwrap_or_else(Self::Shared)
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Strips wrapping variants and returns the root error.
    #[must_use]
    pub fn innermost(&self) -> &Error {
        match self {
            Self::Operation { source, .. } | Self::RetriesExhausted { source, .. } => {
                source.innermost()
            }
            Self::Shared(inner) => inner.innermost(),
            other => other,
        }
    }

    /// Returns `true` if this is a framing or stream-level failure.
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self.innermost(),
            Self::ConnectionClosed
                | Self::FrameTooLarge { .. }
                | Self::Protocol { .. }
                | Self::Io(_)
                | Self::Json(_)
        )
    }

    /// Returns `true` if the browser hung up.
    #[inline]
    #[must_use]
    pub fn is_connection_closed(&self) -> bool {
        matches!(self.innermost(), Self::ConnectionClosed)
    }

    /// Returns `true` if this is a malformed command or argument.
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self.innermost(),
            Self::InvalidArgument { .. } | Self::UnknownCommand { .. } | Self::UnknownPrefix { .. }
        )
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.innermost(),
            Self::ConnectionTimeout { .. } | Self::Timeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self.innermost() {
            Self::Connection { .. } | Self::ConnectionTimeout { .. } | Self::ConnectionClosed => {
                true
            }
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` if the request provably never reached the mediator:
    /// the connection could not be established.
    #[inline]
    #[must_use]
    pub fn is_unsent(&self) -> bool {
        match self.innermost() {
            Self::Connection { .. } | Self::ConnectionTimeout { .. } => true,
            Self::Http(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Returns `true` if a circuit breaker rejected the call.
    #[inline]
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self.innermost(), Self::CircuitOpen { .. })
    }

    /// Returns `true` if this error may succeed on retry.
    ///
    /// Transport failures always qualify; HTTP statuses only when listed in
    /// `retryable_statuses`.
    #[must_use]
    pub fn is_retryable(&self, retryable_statuses: &[u16]) -> bool {
        match self.innermost() {
            Self::Connection { .. }
            | Self::ConnectionTimeout { .. }
            | Self::ConnectionClosed
            | Self::Timeout { .. }
            | Self::Io(_) => true,
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Status { code, .. } => retryable_statuses.contains(code),
            _ => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

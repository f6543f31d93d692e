//! tabctl mediator - native-messaging bridge and multi-browser tab client.
//!
//! A browser can only reach a local process through native messaging: a
//! length-prefixed JSON stream on the process's stdin/stdout, with the
//! process started and killed by the browser. This crate bridges that stream
//! to endpoints a command-line tool can call at any time.
//!
//! # Architecture
//!
//! ```text
//!  Browser ──framed stdio──► Mediator ◄──unix socket / HTTP── CLI
//!                                                              │
//!                     Discovery ──► MultiClient ──► ResilientClient (per mediator)
//! ```
//!
//! - **Mediator side**: [`FramedTransport`] carries frames, [`RemoteApi`]
//!   routes typed commands to the browser, [`UnixServer`] and [`HttpServer`]
//!   accept one command per connection.
//! - **Client side**: [`Discovery`] finds mediators and assigns prefixes,
//!   [`ResilientClient`] adds pooling, circuit breaking, retry,
//!   deduplication and caching, [`MultiClient`] fans out across mediators.
//!
//! # Quick Start
//!
//! ```no_run
//! use tabctl_mediator::{ClientConfig, Discovery, DiscoveryConfig, MultiClient, Result, TabClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let discovery = Discovery::new(DiscoveryConfig::new());
//!     let clients = MultiClient::discover(&discovery, &ClientConfig::new()).await?;
//!
//!     for line in clients.list_tabs().await? {
//!         println!("{line}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`browser`] | Command Router and tab data |
//! | [`client`] | Client backends and the resilience layer |
//! | [`discovery`] | Port probing and session-bus enumeration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Prefixes and tab IDs |
//! | [`mediator`] | Mode selection and lifecycle |
//! | [`orchestrator`] | Multi-mediator fan-out |
//! | [`protocol`] | Commands and envelopes |
//! | [`transport`] | Framing, socket and HTTP servers |

// ============================================================================
// Modules
// ============================================================================

/// Browser side: Command Router, tabs and windows.
pub mod browser;

/// Client side: backends, pooling, retry, deduplication, caching.
pub mod client;

/// Mediator discovery.
pub mod discovery;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Mediator prefixes and fully-qualified tab IDs.
pub mod identifiers;

/// Mode selection and mediator lifecycle.
pub mod mediator;

/// Fan-out across mediators.
pub mod orchestrator;

/// Command and envelope types.
pub mod protocol;

/// Framing and local command servers.
pub mod transport;

#[cfg(test)]
mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

// Browser side
pub use browser::{RemoteApi, Tab, Window, group_by_window};

// Client side
pub use client::{
    BusClient, ClientConfig, ConnectionPool, HttpClient, ResilientClient, RetryPolicy,
    SocketClient, TabClient,
};

// Discovery
pub use discovery::{Discovery, DiscoveryConfig, EndpointAddress, MediatorEndpoint};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{Prefix, TabId};

// Mediator
pub use mediator::{ExitReason, Mediator, MediatorConfig, Mode, select_mode};

// Orchestrator
pub use orchestrator::MultiClient;

// Protocol
pub use protocol::{Command, Response, TabQuery};

// Transport
pub use transport::{FramedTransport, HttpServer, UnixServer};

//! Transport layer.
//!
//! This module carries messages on both sides of the mediator: framed JSON
//! on stdio towards the browser, and the local command surfaces towards
//! CLI clients.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  framed stdio  ┌──────────────┐  unix socket   ┌─────────┐
//! │  Extension  │◄──────────────►│   Mediator   │◄──────────────►│   CLI   │
//! │ (Background)│   u32 LE+JSON  │ (RemoteApi)  │  one JSON obj  │ clients │
//! └─────────────┘                └──────────────┘◄──────────────►└─────────┘
//!                                                     HTTP
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `framed` | Length-prefixed JSON frames (native messaging) |
//! | `http` | HTTP front end (axum) |
//! | `server` | Unix-socket Local Command Server |

// ============================================================================
// Submodules
// ============================================================================

/// Length-prefixed JSON framing.
pub mod framed;

/// HTTP front end.
pub mod http;

/// Unix-socket command server.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use framed::{FramedTransport, MAX_FRAME_SIZE, encode_frame, read_frame};
pub use http::{HttpServer, router};
pub use server::{UnixServer, default_runtime_dir, socket_path};

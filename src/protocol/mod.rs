//! Protocol message types.
//!
//! This module defines the messages exchanged between CLI clients, the
//! mediator, and the browser extension.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `RawCommand` | Client → Mediator → Browser | `{name, args}` command |
//! | `Response` | Browser → Mediator → Client | `{result}` or `{error}` |
//! | keep-alive | Browser ↔ Mediator | `ping`/`health_check`, answered inline |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Typed commands and their two encodings |
//! | `request` | Envelopes, keep-alive replies, result decoding |

// ============================================================================
// Submodules
// ============================================================================

/// Typed command definitions.
pub mod command;

/// Request and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{
    Command, TabMove, TabQuery, TabUpdate, TextOptions, UpdateProperties, WordsOptions,
    decode_query_info, encode_query_info,
};
pub use request::{RawCommand, Response, decode_lines, decode_string, keep_alive_reply};

//! Browser side of the mediator.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RemoteApi`] | Command Router over the browser's framed stdio |
//! | [`Tab`] | Tab parsed from a listing line or browser JSON |
//! | [`Window`] | Tabs grouped by window |
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tabctl_mediator::{FramedTransport, RemoteApi, Result, TabClient};
//!
//! # async fn example() -> Result<()> {
//! let api = RemoteApi::new(Arc::new(FramedTransport::stdio()));
//! for line in api.list_tabs().await? {
//!     eprintln!("{line}");
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Command Router.
pub mod remote;

/// Tab and window data.
pub mod tab;

// ============================================================================
// Re-exports
// ============================================================================

pub use remote::{DEFAULT_COMMAND_TIMEOUT, RemoteApi};
pub use tab::{Tab, Window, group_by_window};

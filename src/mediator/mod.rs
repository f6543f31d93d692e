//! Mode selection and mediator lifecycle.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `config` | [`MediatorConfig`] |
//! | `lifecycle` | [`Mediator`] wiring and orderly shutdown |
//! | `mode` | stdio vs server selection |

// ============================================================================
// Submodules
// ============================================================================

/// Mediator configuration.
pub mod config;

/// Startup, run loop and shutdown.
pub mod lifecycle;

/// Operating mode selection.
pub mod mode;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::MediatorConfig;
pub use lifecycle::{ExitReason, Mediator};
pub use mode::{Mode, is_launch_marker, select_mode};

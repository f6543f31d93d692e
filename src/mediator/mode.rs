//! Operating mode selection.
//!
//! | Priority | Source | Example |
//! |----------|--------|---------|
//! | 1 | Explicit flag | `--stdio`, `--http` |
//! | 2 | Environment marker | `TABCTL_MODE=stdio`, browser launch arguments |
//! | 3 | Standard input | terminal → server, pipe → stdio |
//!
//! Browsers start native hosts with the extension origin
//! (`chrome-extension://<id>/`) or the manifest path and extension ID as
//! arguments; either counts as the marker for stdio mode.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// Mode
// ============================================================================

/// How the mediator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Launched by a browser: framed stdio plus the Local Command Server.
    Stdio,
    /// Standalone HTTP gateway to a stdio-mode mediator's socket.
    Server,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::Server => f.write_str("http"),
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" | "native" => Ok(Self::Stdio),
            "http" | "server" => Ok(Self::Server),
            other => Err(Error::config(format!(
                "unknown mode {other:?} (expected stdio or http)"
            ))),
        }
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Returns `true` if `arg` looks like something a browser passes to a native host.
#[must_use]
pub fn is_launch_marker(arg: &str) -> bool {
    arg.starts_with("chrome-extension://")
        || arg.starts_with("moz-extension://")
        || (arg.ends_with(".json") && arg.contains('/'))
}

/// Picks the operating mode.
///
/// # Errors
///
/// Returns [`Error::Config`] if `env_mode` is set to an unknown value.
pub fn select_mode(
    explicit: Option<Mode>,
    env_mode: Option<&str>,
    args: &[String],
    stdin_is_terminal: bool,
) -> Result<Mode> {
    if let Some(mode) = explicit {
        debug!(%mode, "Mode chosen by flag");
        return Ok(mode);
    }

    if let Some(raw) = env_mode.filter(|v| !v.trim().is_empty()) {
        let mode = raw.parse()?;
        debug!(%mode, "Mode chosen by environment");
        return Ok(mode);
    }

    if args.iter().any(|a| is_launch_marker(a)) {
        debug!("Mode chosen by browser launch arguments");
        return Ok(Mode::Stdio);
    }

    let mode = if stdin_is_terminal {
        Mode::Server
    } else {
        Mode::Stdio
    };
    debug!(%mode, stdin_is_terminal, "Mode chosen by standard input");
    Ok(mode)
}

// ============================================================================
// Tests
// ============================================================================

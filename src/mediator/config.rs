//! Mediator configuration.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::browser::DEFAULT_COMMAND_TIMEOUT;
use crate::discovery::{DEFAULT_HOST, DEFAULT_PORTS};
use crate::transport::{default_runtime_dir, socket_path};

// ============================================================================
// Constants
// ============================================================================

/// Default gateway-to-socket request timeout.
const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// MediatorConfig
// ============================================================================

/// Settings for one mediator process.
#[derive(Debug, Clone)]
pub struct MediatorConfig {
    /// Port identifying this mediator; names its socket and is the default HTTP port.
    pub port: u16,
    /// Directory holding the socket.
    pub runtime_dir: PathBuf,
    /// HTTP bind address.
    pub http_host: String,
    /// HTTP port when different from `port` (0 picks a free one).
    pub http_port: Option<u16>,
    /// Also serve HTTP in stdio mode.
    pub http_in_stdio: bool,
    /// Time to wait for the browser's reply.
    pub command_timeout: Duration,
    /// Time the gateway waits on the stdio mediator's socket.
    pub gateway_timeout: Duration,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MediatorConfig {
    /// Creates the default configuration: port 4625 in the user's runtime directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            port: DEFAULT_PORTS[0],
            runtime_dir: default_runtime_dir(),
            http_host: DEFAULT_HOST.to_string(),
            http_port: None,
            http_in_stdio: false,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }

    /// Sets the mediator port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the socket directory.
    #[inline]
    #[must_use]
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = dir.into();
        self
    }

    /// Sets the HTTP bind address.
    #[inline]
    #[must_use]
    pub fn with_http_host(mut self, host: impl Into<String>) -> Self {
        self.http_host = host.into();
        self
    }

    /// Sets a separate HTTP port.
    #[inline]
    #[must_use]
    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = Some(port);
        self
    }

    /// Enables the HTTP front end in stdio mode.
    #[inline]
    #[must_use]
    pub fn with_http_in_stdio(mut self, enabled: bool) -> Self {
        self.http_in_stdio = enabled;
        self
    }

    /// Sets the browser reply timeout.
    #[inline]
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the gateway timeout.
    #[inline]
    #[must_use]
    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    /// Socket path for this mediator.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        socket_path(&self.runtime_dir, self.port)
    }

    /// Effective HTTP port.
    #[inline]
    #[must_use]
    pub fn http_port(&self) -> u16 {
        self.http_port.unwrap_or(self.port)
    }

    /// Socket directory.
    #[inline]
    #[must_use]
    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }
}

// ============================================================================
// Tests
// ============================================================================

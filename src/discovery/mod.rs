//! Mediator discovery.
//!
//! Finds running mediators and gives each a single-letter [`Prefix`]:
//!
//! | Source | Prefixes |
//! |--------|----------|
//! | Port probing ([`probe`]) | `a.`, `b.`, ... in candidate-port order |
//! | Session-bus enumeration ([`bus`]) | by browser family: `f.` Firefox, `c.` Chromium, `u.` unknown |
//!
//! Prefixes are not persisted. A later discovery run may assign different
//! letters if mediators come and go.
//!
//! # Example
//!
//! ```ignore
//! use tabctl_mediator::discovery::{Discovery, DiscoveryConfig};
//!
//! let endpoints = Discovery::new(DiscoveryConfig::new()).discover().await;
//! for endpoint in &endpoints {
//!     println!("{endpoint}");
//! }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Session-bus enumeration.
pub mod bus;

/// Port and socket probing.
pub mod probe;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::Prefix;
use crate::transport::default_runtime_dir;

// ============================================================================
// Re-exports
// ============================================================================

pub use bus::{BrowserFamily, BusNameSource, GdbusNameSource, assign_bus_prefixes};
pub use probe::{probe_port, probe_ports};

// ============================================================================
// Constants
// ============================================================================

/// Well-known mediator ports, in prefix order.
pub const DEFAULT_PORTS: [u16; 3] = [4625, 4626, 4627];

/// Default loopback host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Bus names mediators register under: `org.tabctl.<browser>[.p<pid>]`.
pub const DEFAULT_BUS_NAME_PATTERN: &str =
    r"^org\.tabctl\.(?P<browser>[A-Za-z][A-Za-z0-9_]*)(?:\.p(?P<pid>\d+))?$";

// ============================================================================
// EndpointAddress
// ============================================================================

/// How to reach a mediator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EndpointAddress {
    /// Local Command Server socket.
    Unix {
        /// Socket path.
        path: PathBuf,
    },
    /// HTTP front end.
    Tcp {
        /// Listening port.
        port: u16,
    },
    /// Session-bus service.
    Bus {
        /// Well-known bus name.
        service: String,
    },
}

// ============================================================================
// MediatorEndpoint
// ============================================================================

/// A discovered mediator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediatorEndpoint {
    /// Host for TCP endpoints.
    pub host: String,
    /// Address.
    pub address: EndpointAddress,
    /// Browser name, when known.
    pub browser: Option<String>,
    /// Assigned prefix.
    pub prefix: Prefix,
}

impl MediatorEndpoint {
    /// Creates a Unix-socket endpoint.
    #[must_use]
    pub fn unix(prefix: Prefix, path: impl Into<PathBuf>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            address: EndpointAddress::Unix { path: path.into() },
            browser: None,
            prefix,
        }
    }

    /// Creates an HTTP endpoint.
    #[must_use]
    pub fn tcp(prefix: Prefix, host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            address: EndpointAddress::Tcp { port },
            browser: None,
            prefix,
        }
    }

    /// Creates a session-bus endpoint.
    #[must_use]
    pub fn bus(prefix: Prefix, service: impl Into<String>, browser: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            address: EndpointAddress::Bus {
                service: service.into(),
            },
            browser: Some(browser.into()),
            prefix,
        }
    }

    /// Sets the browser name.
    #[inline]
    #[must_use]
    pub fn with_browser(mut self, browser: impl Into<String>) -> Self {
        self.browser = Some(browser.into());
        self
    }

    /// Replaces the prefix.
    #[inline]
    #[must_use]
    pub fn with_prefix(mut self, prefix: Prefix) -> Self {
        self.prefix = prefix;
        self
    }

    /// Address without the prefix, e.g. `tcp:127.0.0.1:4625`.
    #[must_use]
    pub fn location(&self) -> String {
        match &self.address {
            EndpointAddress::Unix { path } => format!("unix:{}", path.display()),
            EndpointAddress::Tcp { port } => format!("tcp:{}:{port}", self.host),
            EndpointAddress::Bus { service } => format!("bus:{service}"),
        }
    }

    /// Key identifying the connection regardless of prefix.
    #[inline]
    #[must_use]
    pub fn pool_key(&self) -> String {
        self.location()
    }

    /// Prefix and location, e.g. `a. (tcp:127.0.0.1:4625)`.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} ({})", self.prefix, self.location())
    }
}

impl fmt::Display for MediatorEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())?;
        if let Some(browser) = &self.browser {
            write!(f, " {browser}")?;
        }
        Ok(())
    }
}

// ============================================================================
// DiscoveryConfig
// ============================================================================

/// Discovery settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Host probed for TCP endpoints.
    pub host: String,
    /// Candidate ports, in prefix order.
    pub ports: Vec<u16>,
    /// Timeout for one probe.
    pub probe_timeout: Duration,
    /// Directory holding `tabctl-<port>.sock`.
    pub runtime_dir: PathBuf,
    /// Pattern selecting mediator bus names; must capture `browser`, may capture `pid`.
    pub bus_name_pattern: Regex,
    /// Timeout for listing bus names.
    pub bus_timeout: Duration,
}

impl DiscoveryConfig {
    /// Creates the default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            ports: DEFAULT_PORTS.to_vec(),
            probe_timeout: Duration::from_millis(100),
            runtime_dir: default_runtime_dir(),
            bus_name_pattern: BUS_NAME_RE.clone(),
            bus_timeout: Duration::from_secs(2),
        }
    }

    /// Sets the candidate ports.
    #[inline]
    #[must_use]
    pub fn with_ports(mut self, ports: impl Into<Vec<u16>>) -> Self {
        self.ports = ports.into();
        self
    }

    /// Sets the probed host.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the socket directory.
    #[inline]
    #[must_use]
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = dir.into();
        self
    }

    /// Sets the per-probe timeout.
    #[inline]
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sets the bus-name pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the pattern does not compile or lacks a
    /// `browser` group.
    pub fn with_bus_name_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::config(format!("invalid bus name pattern: {e}")))?;
        if !regex.capture_names().flatten().any(|n| n == "browser") {
            return Err(Error::config("bus name pattern must capture `browser`"));
        }
        self.bus_name_pattern = regex;
        Ok(self)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self::new()
    }
}

static BUS_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(DEFAULT_BUS_NAME_PATTERN).expect("bus name regex must compile")
});

// ============================================================================
// Discovery
// ============================================================================

/// Runs discovery over ports and, optionally, the session bus.
pub struct Discovery {
    config: DiscoveryConfig,
    bus: Option<Arc<dyn BusNameSource>>,
}

impl Discovery {
    /// Creates a discovery that only probes ports.
    #[must_use]
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config, bus: None }
    }

    /// Also enumerates mediators on the session bus.
    #[must_use]
    pub fn with_bus(mut self, source: Arc<dyn BusNameSource>) -> Self {
        self.bus = Some(source);
        self
    }

    /// Settings.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Probes the candidate ports.
    pub async fn probe(&self) -> Vec<MediatorEndpoint> {
        probe_ports(&self.config).await
    }

    /// Lists mediators on the session bus.
    ///
    /// # Errors
    ///
    /// Returns the name source's error, or [`Error::Config`] if no bus source
    /// was configured.
    pub async fn enumerate_bus(&self) -> Result<Vec<MediatorEndpoint>> {
        let source = self
            .bus
            .as_ref()
            .ok_or_else(|| Error::config("no session-bus source configured"))?;
        let names = source.list_names().await?;
        let mut taken = FxHashSet::default();
        Ok(assign_bus_prefixes(
            &names,
            &self.config.bus_name_pattern,
            &mut taken,
        ))
    }

    /// Runs every configured source; port endpoints keep their letters and
    /// bus endpoints take the next free ones.
    pub async fn discover(&self) -> Vec<MediatorEndpoint> {
        let mut endpoints = self.probe().await;

        if let Some(source) = &self.bus {
            match source.list_names().await {
                Ok(names) => {
                    let mut taken: FxHashSet<char> =
                        endpoints.iter().map(|e| e.prefix.letter()).collect();
                    endpoints.extend(assign_bus_prefixes(
                        &names,
                        &self.config.bus_name_pattern,
                        &mut taken,
                    ));
                }
                Err(e) => warn!(error = %e, "Session-bus enumeration failed"),
            }
        }

        debug!(count = endpoints.len(), "Discovery complete");
        endpoints
    }
}

// ============================================================================
// Tests
// ============================================================================

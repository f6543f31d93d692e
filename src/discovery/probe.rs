//! Port and socket probing.
//!
//! Each candidate port is probed concurrently. A port answers if its Unix
//! socket accepts a connection, or failing that, if its TCP port does. The
//! socket is preferred because it works without the HTTP front end.

// ============================================================================
// Imports
// ============================================================================

use futures_util::future::join_all;
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, trace, warn};

use crate::identifiers::Prefix;
use crate::transport::socket_path;

use super::{DiscoveryConfig, EndpointAddress, MediatorEndpoint};

// ============================================================================
// Probing
// ============================================================================

/// Probes one port, returning how it can be reached.
pub async fn probe_port(config: &DiscoveryConfig, port: u16) -> Option<EndpointAddress> {
    let path = socket_path(&config.runtime_dir, port);
    if path.exists() {
        match tokio::time::timeout(config.probe_timeout, UnixStream::connect(&path)).await {
            Ok(Ok(_stream)) => {
                trace!(port, path = %path.display(), "Socket answered");
                return Some(EndpointAddress::Unix { path });
            }
            Ok(Err(e)) => trace!(port, error = %e, "Socket refused"),
            Err(_) => trace!(port, "Socket probe timed out"),
        }
    }

    let address = (config.host.as_str(), port);
    match tokio::time::timeout(config.probe_timeout, TcpStream::connect(address)).await {
        Ok(Ok(_stream)) => {
            trace!(port, host = %config.host, "TCP answered");
            Some(EndpointAddress::Tcp { port })
        }
        _ => None,
    }
}

/// Probes every candidate port and assigns `a.`, `b.`, ... to responders in
/// candidate order.
pub async fn probe_ports(config: &DiscoveryConfig) -> Vec<MediatorEndpoint> {
    let results = join_all(config.ports.iter().map(|&port| probe_port(config, port))).await;

    let mut endpoints = Vec::new();
    for (port, address) in config.ports.iter().zip(results) {
        let Some(address) = address else {
            continue;
        };
        let Some(prefix) = Prefix::nth(endpoints.len()) else {
            warn!(port, "Out of prefixes, skipping mediator");
            continue;
        };
        endpoints.push(MediatorEndpoint {
            host: config.host.clone(),
            address,
            browser: None,
            prefix,
        });
    }

    debug!(
        candidates = config.ports.len(),
        found = endpoints.len(),
        "Port probe complete"
    );
    endpoints
}

// ============================================================================
// Tests
// ============================================================================

//! Client side: talking to mediators.
//!
//! Every backend implements [`TabClient`]. The orchestrator and the HTTP
//! front end depend only on that trait.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              ResilientClient                 │
//! │  cache → dedup → retry → pool.get_client()   │
//! │                              │               │
//! │            ┌─────────────────┼────────────┐  │
//! │            ▼                 ▼            ▼  │
//! │      SocketClient       HttpClient   BusClient│
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `bus` | Session-bus backend via `gdbus` |
//! | `cache` | Short-TTL response cache |
//! | `clock` | Clock and ticker seams for background tasks |
//! | `config` | Retry, pool and cache configuration |
//! | `dedup` | In-flight request deduplication |
//! | `http` | HTTP backend (reqwest) |
//! | `pool` | Connection pool with health checks and circuit breaker |
//! | `resilient` | Composition of the policies above |
//! | `retry` | Retry with exponential backoff and jitter |
//! | `socket` | Unix-socket backend |

// ============================================================================
// Submodules
// ============================================================================

/// Session-bus backend.
pub mod bus;

/// Short-TTL response cache.
pub mod cache;

/// Clock and ticker abstractions.
pub mod clock;

/// Client-side configuration.
pub mod config;

/// In-flight request deduplication.
pub mod dedup;

/// HTTP backend.
pub mod http;

/// Connection pool and circuit breaker.
pub mod pool;

/// Policy composition.
pub mod resilient;

/// Retry with backoff.
pub mod retry;

/// Unix-socket backend.
pub mod socket;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::discovery::{EndpointAddress, MediatorEndpoint};
use crate::error::Result;
use crate::identifiers::TabId;
use crate::protocol::{
    Command, TabMove, TabUpdate, TextOptions, WordsOptions, decode_lines, decode_string,
};

// ============================================================================
// Re-exports
// ============================================================================

pub use bus::BusClient;
pub use cache::ResponseCache;
pub use clock::{
    Clock, IntervalTicker, ManualClock, ManualTicker, ManualTickerHandle, SharedClock,
    SystemClock, Ticker,
};
pub use config::{CacheConfig, ClientConfig, PoolConfig, RetryPolicy};
pub use dedup::Deduplicator;
pub use http::HttpClient;
pub use pool::{Admission, ConnectionPool, HealthState, PooledConnection};
pub use resilient::ResilientClient;
pub use retry::Retrier;
pub use socket::SocketClient;

// ============================================================================
// TabClient
// ============================================================================

/// The tab-operation surface shared by every backend.
///
/// Implementors provide [`execute`](Self::execute); the typed helpers decode
/// its result.
#[async_trait]
pub trait TabClient: Send + Sync {
    /// Human-readable target, used in logs and error context.
    fn describe(&self) -> String;

    /// Sends one command and returns its raw result.
    async fn execute(&self, command: Command) -> Result<Value>;

    /// Cheap liveness check that does not reach the browser.
    async fn probe(&self) -> Result<()> {
        self.execute(Command::GetPid).await.map(|_| ())
    }

    /// Lists all tabs as TSV lines.
    async fn list_tabs(&self) -> Result<Vec<String>> {
        decode_lines("list_tabs", self.execute(Command::ListTabs).await?)
    }

    /// Lists tabs matching a query object.
    async fn query_tabs(&self, query: serde_json::Map<String, Value>) -> Result<Vec<String>> {
        decode_lines("query_tabs", self.execute(Command::QueryTabs { query }).await?)
    }

    /// Closes tabs.
    async fn close_tabs(&self, tab_ids: Vec<TabId>) -> Result<Value> {
        self.execute(Command::CloseTabs { tab_ids }).await
    }

    /// Activates a tab.
    async fn activate_tab(&self, tab_id: TabId, focused: bool) -> Result<Value> {
        self.execute(Command::ActivateTab { tab_id, focused }).await
    }

    /// Moves tabs.
    async fn move_tabs(&self, moves: Vec<TabMove>) -> Result<Value> {
        self.execute(Command::MoveTabs { moves }).await
    }

    /// Opens URLs, returning the new tabs' lines.
    async fn open_urls(&self, urls: Vec<String>, window_id: Option<u64>) -> Result<Vec<String>> {
        decode_lines(
            "open_urls",
            self.execute(Command::OpenUrls { urls, window_id }).await?,
        )
    }

    /// Updates tabs, returning the updated tabs' lines.
    async fn update_tabs(&self, updates: Vec<TabUpdate>) -> Result<Vec<String>> {
        decode_lines(
            "update_tabs",
            self.execute(Command::UpdateTabs { updates }).await?,
        )
    }

    /// Opens one new tab.
    async fn new_tab(&self, url: String) -> Result<Value> {
        self.execute(Command::NewTab { url }).await
    }

    /// Captures the visible area of the active tab; the shape is browser-defined.
    async fn get_screenshot(&self) -> Result<Value> {
        self.execute(Command::GetScreenshot).await
    }

    /// Lists the active tab of every window.
    async fn get_active_tabs(&self) -> Result<Vec<String>> {
        decode_lines("get_active_tabs", self.execute(Command::GetActiveTabs).await?)
    }

    /// Extracts words.
    async fn get_words(&self, options: WordsOptions) -> Result<Vec<String>> {
        decode_lines("get_words", self.execute(Command::GetWords(options)).await?)
    }

    /// Extracts text.
    async fn get_text(&self, options: TextOptions) -> Result<Vec<String>> {
        decode_lines("get_text", self.execute(Command::GetText(options)).await?)
    }

    /// Extracts HTML.
    async fn get_html(&self, options: TextOptions) -> Result<Vec<String>> {
        decode_lines("get_html", self.execute(Command::GetHtml(options)).await?)
    }

    /// Browser name.
    async fn get_browser(&self) -> Result<String> {
        decode_string("get_browser", self.execute(Command::GetBrowser).await?)
    }
}

// ============================================================================
// Construction
// ============================================================================

/// Creates the bare backend matching an endpoint's address kind.
///
/// # Errors
///
/// Returns [`Error::Config`](crate::Error::Config) if the HTTP client cannot be built.
pub fn connect(endpoint: &MediatorEndpoint, config: &ClientConfig) -> Result<Arc<dyn TabClient>> {
    let client: Arc<dyn TabClient> = match &endpoint.address {
        EndpointAddress::Unix { path } => {
            Arc::new(SocketClient::new(path.clone()).with_timeout(config.request_timeout))
        }
        EndpointAddress::Tcp { port } => Arc::new(HttpClient::new(
            &endpoint.host,
            *port,
            config.request_timeout,
        )?),
        EndpointAddress::Bus { service } => {
            Arc::new(BusClient::new(service.clone()).with_timeout(config.request_timeout))
        }
    };
    Ok(client)
}

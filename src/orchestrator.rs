//! Multi-Client Orchestrator.
//!
//! [`MultiClient`] presents every discovered mediator as one [`TabClient`]:
//!
//! | Command | Strategy |
//! |---------|----------|
//! | `list_tabs`, `query_tabs`, `get_active_tabs`, `get_text`, `get_html`, `get_words` without a tab | Broadcast, concatenate |
//! | `close_tabs`, `activate_tab`, `move_tabs`, `update_tabs`, `get_words` with a tab | Group by prefix, route |
//! | `open_urls`, `new_tab` | First mediator, or an explicit prefix |
//! | `get_browser`, `get_pid`, `get_screenshot` | First mediator |
//! | `shutdown` | Broadcast |
//!
//! Broadcasts tolerate partial failure: failed mediators are logged and
//! skipped, and an error is returned only if every mediator failed.
//! Listing lines that carry a browser-local `window.tab` ID get the
//! mediator's prefix prepended.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::browser::{Tab, Window, group_by_window};
use crate::client::{
    ClientConfig, ConnectionPool, IntervalTicker, ResilientClient, ResponseCache, TabClient,
};
use crate::discovery::{Discovery, MediatorEndpoint};
use crate::error::{Error, Result};
use crate::identifiers::{Prefix, TabId};
use crate::protocol::{Command, WordsOptions, decode_lines};

// ============================================================================
// Member
// ============================================================================

struct Member {
    endpoint: MediatorEndpoint,
    client: Arc<dyn TabClient>,
    cache: Option<ResponseCache>,
}

// ============================================================================
// MultiClient
// ============================================================================

/// Fan-out client over several mediators.
pub struct MultiClient {
    members: Vec<Member>,
    by_prefix: FxHashMap<Prefix, usize>,
    pool: Option<Arc<ConnectionPool>>,
    config: ClientConfig,
}

impl Default for MultiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiClient {
    /// Creates an orchestrator with no mediators.
    #[must_use]
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
            by_prefix: FxHashMap::default(),
            pool: None,
            config: ClientConfig::new(),
        }
    }

    /// Adds a mediator served by `client`. A later client with the same
    /// prefix replaces the earlier one.
    #[must_use]
    pub fn with_client(mut self, endpoint: MediatorEndpoint, client: Arc<dyn TabClient>) -> Self {
        self.insert(Member {
            endpoint,
            client,
            cache: None,
        });
        self
    }

    /// Builds resilient clients for `endpoints` over one shared pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a backend cannot be constructed.
    pub fn connect(endpoints: Vec<MediatorEndpoint>, config: &ClientConfig) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::new(config));
        let mut multi = Self {
            config: config.clone(),
            ..Self::new()
        };

        for endpoint in endpoints {
            pool.connection(&endpoint)?;
            let client = ResilientClient::new(endpoint.clone(), Arc::clone(&pool), config);
            let cache = client.cache().clone();
            multi.insert(Member {
                endpoint,
                client: Arc::new(client),
                cache: Some(cache),
            });
        }

        multi.pool = Some(pool);
        Ok(multi)
    }

    /// Discovers mediators and connects to all of them.
    ///
    /// # Errors
    ///
    /// - [`Error::NoMediators`] if nothing answered
    /// - [`Error::Config`] if a backend cannot be constructed
    pub async fn discover(discovery: &Discovery, config: &ClientConfig) -> Result<Self> {
        let endpoints = discovery.discover().await;
        if endpoints.is_empty() {
            return Err(Error::NoMediators);
        }
        Self::connect(endpoints, config)
    }

    fn insert(&mut self, member: Member) {
        let prefix = member.endpoint.prefix;
        match self.by_prefix.get(&prefix) {
            Some(&slot) => self.members[slot] = member,
            None => {
                self.by_prefix.insert(prefix, self.members.len());
                self.members.push(member);
            }
        }
    }

    /// Number of mediators.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if no mediators are known.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Known endpoints in prefix assignment order.
    pub fn endpoints(&self) -> impl Iterator<Item = &MediatorEndpoint> {
        self.members.iter().map(|m| &m.endpoint)
    }

    /// Client for one prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPrefix`] if no mediator has `prefix`.
    pub fn for_prefix(&self, prefix: Prefix) -> Result<Arc<dyn TabClient>> {
        Ok(Arc::clone(&self.member(prefix)?.client))
    }

    fn member(&self, prefix: Prefix) -> Result<&Member> {
        self.by_prefix
            .get(&prefix)
            .map(|&slot| &self.members[slot])
            .ok_or_else(|| Error::unknown_prefix(prefix.to_string()))
    }

    fn first(&self) -> Result<&Member> {
        self.members.first().ok_or(Error::NoMediators)
    }
}

// ============================================================================
// MultiClient - Operations
// ============================================================================

impl MultiClient {
    /// Opens URLs through one mediator: `prefix`, or the first one.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownPrefix`] for an unmatched prefix
    /// - [`Error::NoMediators`] if none are known
    /// - the mediator's own error otherwise
    pub async fn open_urls_on(
        &self,
        prefix: Option<Prefix>,
        urls: Vec<String>,
        window_id: Option<u64>,
    ) -> Result<Vec<String>> {
        let member = match prefix {
            Some(prefix) => self.member(prefix)?,
            None => self.first()?,
        };
        let value = member
            .client
            .execute(Command::OpenUrls { urls, window_id })
            .await?;
        let lines = decode_lines("open_urls", value)?;
        Ok(annotate_lines(member.endpoint.prefix, lines))
    }

    /// All windows of all mediators.
    ///
    /// # Errors
    ///
    /// As [`TabClient::list_tabs`].
    pub async fn windows(&self) -> Result<Vec<Window>> {
        let lines = self.list_tabs().await?;
        let tabs = lines.iter().filter_map(|line| match Tab::from_line(line) {
            Ok(tab) => Some(tab),
            Err(e) => {
                debug!(error = %e, "Skipping unparsable listing line");
                None
            }
        });
        Ok(group_by_window(tabs))
    }

    /// Spawns health checks and cache sweeps on the default intervals.
    ///
    /// Only clients built by [`connect`](Self::connect) take part.
    pub fn spawn_maintenance(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        if let Some(pool) = &self.pool {
            let ticker = IntervalTicker::new(pool.config().health_interval);
            tasks.push(pool.spawn_health_checks(ticker, cancel.clone()));
        }
        for cache in self.members.iter().filter_map(|m| m.cache.as_ref()) {
            let ticker = IntervalTicker::new(self.config.cache.sweep_interval);
            tasks.push(cache.spawn_sweeper(ticker, cancel.clone()));
        }
        tasks
    }

    async fn broadcast(&self, command: Command) -> Result<Value> {
        if self.members.is_empty() {
            return Err(Error::NoMediators);
        }

        let name = command.name();
        let results = join_all(
            self.members
                .iter()
                .map(|m| m.client.execute(command.clone())),
        )
        .await;

        let mut merged: Vec<Value> = Vec::new();
        let mut answered = 0usize;
        let mut last_error = None;
        for (member, result) in self.members.iter().zip(results) {
            match result {
                Ok(value) => {
                    answered += 1;
                    merged.extend(annotate_value(member.endpoint.prefix, value));
                }
                Err(e) => {
                    warn!(command = name, endpoint = %member.endpoint, error = %e, "Mediator failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if answered == 0 => Err(e),
            _ => Ok(Value::Array(merged)),
        }
    }

    async fn route(&self, command: Command) -> Result<Value> {
        let groups = split_by_prefix(&command)?;
        if groups.is_empty() {
            return Err(Error::invalid_argument(format!(
                "{} requires tab IDs",
                command.name()
            )));
        }

        let members = groups
            .iter()
            .map(|(prefix, _)| self.member(*prefix))
            .collect::<Result<Vec<&Member>>>()?;

        let results = join_all(
            members
                .iter()
                .zip(groups)
                .map(|(member, (_, sub))| member.client.execute(sub)),
        )
        .await;

        let mut values = Vec::with_capacity(results.len());
        for (member, result) in members.iter().zip(results) {
            values.push((member.endpoint.prefix, result?));
        }
        Ok(merge_routed(values))
    }

    async fn first_only(&self, command: Command) -> Result<Value> {
        let member = self.first()?;
        let value = member.client.execute(command).await?;
        Ok(match value {
            Value::Array(_) => Value::Array(annotate_value(member.endpoint.prefix, value)),
            other => other,
        })
    }
}

#[async_trait]
impl TabClient for MultiClient {
    fn describe(&self) -> String {
        let prefixes: Vec<String> = self.endpoints().map(|e| e.prefix.to_string()).collect();
        format!("mediators [{}]", prefixes.join(" "))
    }

    async fn execute(&self, command: Command) -> Result<Value> {
        match command {
            Command::ListTabs
            | Command::QueryTabs { .. }
            | Command::GetActiveTabs
            | Command::GetText(_)
            | Command::GetHtml(_)
            | Command::Shutdown
            | Command::GetWords(WordsOptions { tab_id: None, .. }) => self.broadcast(command).await,

            Command::CloseTabs { .. }
            | Command::ActivateTab { .. }
            | Command::MoveTabs { .. }
            | Command::UpdateTabs { .. }
            | Command::GetWords(_) => self.route(command).await,

            Command::OpenUrls { urls, window_id } => {
                self.open_urls_on(None, urls, window_id)
                    .await
                    .map(|lines| Value::Array(lines.into_iter().map(Value::String).collect()))
            }

            Command::NewTab { .. }
            | Command::GetBrowser
            | Command::GetPid
            | Command::GetScreenshot => self.first_only(command).await,
        }
    }

    async fn probe(&self) -> Result<()> {
        let results = join_all(self.members.iter().map(|m| m.client.probe())).await;
        let mut last_error = Error::NoMediators;
        for result in results {
            match result {
                Ok(()) => return Ok(()),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }
}

// ============================================================================
// Routing Helpers
// ============================================================================

/// Splits a tab-addressed command into one sub-command per prefix, in
/// first-appearance order.
fn split_by_prefix(command: &Command) -> Result<Vec<(Prefix, Command)>> {
    let split = match command {
        Command::CloseTabs { tab_ids } => group(tab_ids, |t| t.prefix)
            .into_iter()
            .map(|(p, tab_ids)| (p, Command::CloseTabs { tab_ids }))
            .collect(),
        Command::ActivateTab { tab_id, .. } => vec![(tab_id.prefix, command.clone())],
        Command::MoveTabs { moves } => group(moves, |m| m.tab_id.prefix)
            .into_iter()
            .map(|(p, moves)| (p, Command::MoveTabs { moves }))
            .collect(),
        Command::UpdateTabs { updates } => group(updates, |u| u.tab_id.prefix)
            .into_iter()
            .map(|(p, updates)| (p, Command::UpdateTabs { updates }))
            .collect(),
        Command::GetWords(WordsOptions {
            tab_id: Some(tab_id),
            ..
        }) => vec![(tab_id.prefix, command.clone())],
        other => {
            return Err(Error::invalid_argument(format!(
                "{} is not addressed by tab ID",
                other.name()
            )));
        }
    };
    Ok(split)
}

fn group<T: Clone>(items: &[T], prefix_of: impl Fn(&T) -> Prefix) -> Vec<(Prefix, Vec<T>)> {
    let mut groups: Vec<(Prefix, Vec<T>)> = Vec::new();
    for item in items {
        let prefix = prefix_of(item);
        match groups.iter_mut().find(|(p, _)| *p == prefix) {
            Some((_, members)) => members.push(item.clone()),
            None => groups.push((prefix, vec![item.clone()])),
        }
    }
    groups
}

fn merge_routed(values: Vec<(Prefix, Value)>) -> Value {
    if values.iter().all(|(_, v)| v.is_null()) {
        return Value::Null;
    }
    if values.iter().all(|(_, v)| v.is_array()) {
        return Value::Array(
            values
                .into_iter()
                .flat_map(|(prefix, v)| annotate_value(prefix, v))
                .collect(),
        );
    }
    match <[(Prefix, Value); 1]>::try_from(values) {
        Ok([(_, value)]) => value,
        Err(values) => Value::Array(values.into_iter().map(|(_, v)| v).collect()),
    }
}

// ============================================================================
// Prefix Annotation
// ============================================================================

/// Stamps `prefix` on a listing line whose first field is a tab ID.
///
/// A browser-local `window.tab` ID gets the prefix prepended; a qualified ID
/// has its prefix replaced, since only the discovery-assigned prefix routes
/// back to this mediator. Anything else is returned unchanged.
#[must_use]
pub fn annotate_line(prefix: Prefix, line: &str) -> String {
    let (first, rest) = match line.find('\t') {
        Some(at) => line.split_at(at),
        None => (line, ""),
    };
    if let Ok(id) = first.parse::<TabId>() {
        return format!("{}{rest}", TabId::new(prefix, id.window_id, id.tab_id));
    }
    let is_local_id = first
        .split_once('.')
        .is_some_and(|(w, t)| is_digits(w) && is_digits(t));
    if is_local_id {
        format!("{prefix}{line}")
    } else {
        line.to_string()
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn annotate_lines(prefix: Prefix, lines: Vec<String>) -> Vec<String> {
    lines.iter().map(|l| annotate_line(prefix, l)).collect()
}

/// Flattens one mediator's result for merging.
fn annotate_value(prefix: Prefix, value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(line) => Value::String(annotate_line(prefix, &line)),
                other => other,
            })
            .collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::protocol::{TabMove, TabUpdate};
    use crate::test_support::StubClient;

    fn prefix(letter: char) -> Prefix {
        Prefix::new(letter).expect("letter")
    }

    fn endpoint(letter: char, port: u16) -> MediatorEndpoint {
        MediatorEndpoint::tcp(prefix(letter), "127.0.0.1", port)
    }

    fn two_stubs() -> (MultiClient, Arc<StubClient>, Arc<StubClient>) {
        let a = Arc::new(StubClient::new("a"));
        let b = Arc::new(StubClient::new("b"));
        let multi = MultiClient::new()
            .with_client(endpoint('a', 4625), a.clone())
            .with_client(endpoint('b', 4626), b.clone());
        (multi, a, b)
    }

    fn id(raw: &str) -> TabId {
        raw.parse().expect("tab id")
    }

    #[test]
    fn test_annotate_line() {
        let a = prefix('a');
        assert_eq!(annotate_line(a, "1.2\tT\tu"), "a.1.2\tT\tu");
        assert_eq!(annotate_line(a, "b.1.2\tT\tu"), "a.1.2\tT\tu");
        assert_eq!(annotate_line(a, "b.1.2"), "a.1.2");
        assert_eq!(annotate_line(a, "hello"), "hello");
        assert_eq!(annotate_line(a, "3.14 is pi"), "3.14 is pi");
    }

    #[tokio::test]
    async fn test_list_concatenates_with_prefixes() {
        let (multi, _a, _b) = two_stubs();
        let lines = multi.list_tabs().await.expect("list");
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("a.1.2\t"));
        assert!(lines[2].starts_with("b.1.2\t"));
    }

    #[tokio::test]
    async fn test_partial_failure_is_tolerated() {
        let (multi, a, _b) = two_stubs();
        a.set_failing(true);
        let lines = multi.list_tabs().await.expect("list");
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.starts_with("b.")));
    }

    #[tokio::test]
    async fn test_total_failure_surfaces_error() {
        let (multi, a, b) = two_stubs();
        a.set_failing(true);
        b.set_failing(true);
        let err = multi.list_tabs().await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(err.to_string().contains("stub b"));
    }

    #[tokio::test]
    async fn test_prefix_routing_hits_only_owner() {
        let (multi, a, b) = two_stubs();
        multi.activate_tab(id("b.5.10"), true).await.expect("activate");
        assert_eq!(a.calls(), 0);
        assert_eq!(
            b.commands(),
            vec![Command::ActivateTab {
                tab_id: id("b.5.10"),
                focused: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_close_tabs_split_by_prefix() {
        let (multi, a, b) = two_stubs();
        multi
            .close_tabs(vec![id("a.1.2"), id("b.3.4"), id("a.1.5")])
            .await
            .expect("close");
        assert_eq!(
            a.commands(),
            vec![Command::CloseTabs {
                tab_ids: vec![id("a.1.2"), id("a.1.5")],
            }]
        );
        assert_eq!(
            b.commands(),
            vec![Command::CloseTabs {
                tab_ids: vec![id("b.3.4")],
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_prefix_sends_nothing() {
        let (multi, a, b) = two_stubs();
        let err = multi
            .close_tabs(vec![id("a.1.2"), id("z.1.2")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownPrefix { ref prefix } if prefix == "z."));
        assert_eq!(a.calls() + b.calls(), 0);
    }

    #[tokio::test]
    async fn test_update_and_move_route() {
        let (multi, a, b) = two_stubs();
        let lines = multi
            .update_tabs(vec![TabUpdate::navigate(id("a.1.2"), "https://x.example")])
            .await
            .expect("update");
        assert!(lines.iter().all(|l| l.starts_with("a.")));

        multi
            .move_tabs(vec![TabMove {
                tab_id: id("b.1.2"),
                window_id: 3,
                index: -1,
            }])
            .await
            .expect("move");
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_open_urls_targets_one() {
        let (multi, a, b) = two_stubs();
        multi
            .open_urls(vec!["https://x.example".into()], None)
            .await
            .expect("open");
        assert_eq!((a.calls(), b.calls()), (1, 0));

        let lines = multi
            .open_urls_on(Some(prefix('b')), vec!["https://y.example".into()], Some(2))
            .await
            .expect("open on b");
        assert!(lines[0].starts_with("b."));
        assert_eq!(b.calls(), 1);

        assert!(
            multi
                .open_urls_on(Some(prefix('q')), vec!["https://z.example".into()], None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_foreign_prefix_rewritten_and_routed_home() {
        let a = Arc::new(StubClient::new("a").with_responder(|_| Ok(json!([]))));
        let b = Arc::new(StubClient::new("b").with_responder(|command| match command {
            Command::ListTabs => Ok(json!(["a.7.9\tStale\thttps://b.example"])),
            _ => Ok(Value::Null),
        }));
        let multi = MultiClient::new()
            .with_client(endpoint('a', 4625), a.clone())
            .with_client(endpoint('b', 4626), b.clone());

        let lines = multi.list_tabs().await.expect("list");
        assert_eq!(lines, vec!["b.7.9\tStale\thttps://b.example"]);

        let tab = Tab::from_line(&lines[0]).expect("tab");
        multi.close_tabs(vec![tab.tab_id().expect("id")]).await.expect("close");
        assert_eq!(a.commands(), vec![Command::ListTabs]);
        assert_eq!(
            b.commands().last(),
            Some(&Command::CloseTabs {
                tab_ids: vec![id("b.7.9")],
            })
        );
    }

    #[tokio::test]
    async fn test_no_mediators() {
        let multi = MultiClient::new();
        assert!(matches!(multi.list_tabs().await.unwrap_err(), Error::NoMediators));
        assert!(matches!(
            multi.execute(Command::GetBrowser).await.unwrap_err(),
            Error::NoMediators
        ));
    }

    #[tokio::test]
    async fn test_windows_group_across_mediators() {
        let (multi, _a, _b) = two_stubs();
        let windows = multi.windows().await.expect("windows");
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].prefix, Some(prefix('a')));
        assert_eq!(windows[0].tab_count(), 2);
        assert_eq!(windows[1].prefix, Some(prefix('b')));
    }

    #[tokio::test]
    async fn test_words_broadcast_without_tab() {
        let a = Arc::new(StubClient::new("a").with_responder(|_| Ok(json!(["alpha", "beta"]))));
        let b = Arc::new(StubClient::new("b").with_responder(|_| Ok(json!(["gamma"]))));
        let multi = MultiClient::new()
            .with_client(endpoint('a', 4625), a)
            .with_client(endpoint('b', 4626), b);
        let words = multi.get_words(WordsOptions::default()).await.expect("words");
        assert_eq!(words, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_connect_builds_resilient_members() {
        let multi = MultiClient::connect(
            vec![endpoint('a', 4625), endpoint('b', 4626)],
            &ClientConfig::new(),
        )
        .expect("connect");
        assert_eq!(multi.len(), 2);
        assert_eq!(multi.describe(), "mediators [a. b.]");

        let cancel = CancellationToken::new();
        let tasks = multi.spawn_maintenance(&cancel);
        assert_eq!(tasks.len(), 3);
        cancel.cancel();
        for task in tasks {
            task.await.expect("maintenance task exits");
        }
    }
}

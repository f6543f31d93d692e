//! Command definitions.
//!
//! A [`Command`] is decoded once at the boundary (local socket, HTTP route)
//! and carried as a typed value from then on. It has two encodings:
//!
//! | Encoding | Producer | Tab IDs | Query |
//! |----------|----------|---------|-------|
//! | Local (`to_local_message`) | CLI clients | `a.1.2` strings | base64 JSON |
//! | Browser (`to_browser_message`) | Command Router | numeric | JSON object |
//!
//! Both are `{"name": ..., "args": {...}}`.

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::identifiers::TabId;

use super::RawCommand;

// ============================================================================
// Argument Types
// ============================================================================

/// Filter for `query_tabs`, using the browser's tab query keys.
///
/// Unset fields are omitted from the encoded object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabQuery {
    /// Only the active tab of each window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// Pinned tabs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    /// Tabs currently producing sound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audible: Option<bool>,
    /// Muted tabs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    /// Highlighted tabs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlighted: Option<bool>,
    /// Discarded (unloaded) tabs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discarded: Option<bool>,
    /// Tabs in the current window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_window: Option<bool>,
    /// Tabs in the last focused window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_focused_window: Option<bool>,
    /// Loading status (`loading` or `complete`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Title pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// URL match pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Window ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<u64>,
    /// Window type (`normal`, `popup`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_type: Option<String>,
    /// Position within the window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
}

impl TabQuery {
    /// Creates an empty query (matches every tab).
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to active tabs.
    #[inline]
    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    /// Restricts to the current window.
    #[inline]
    #[must_use]
    pub fn with_current_window(mut self, current: bool) -> Self {
        self.current_window = Some(current);
        self
    }

    /// Restricts by URL pattern.
    #[inline]
    #[must_use]
    pub fn with_url(mut self, pattern: impl Into<String>) -> Self {
        self.url = Some(pattern.into());
        self
    }

    /// Restricts by title pattern.
    #[inline]
    #[must_use]
    pub fn with_title(mut self, pattern: impl Into<String>) -> Self {
        self.title = Some(pattern.into());
        self
    }

    /// Converts into the JSON object sent to the browser.
    pub fn into_map(self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Encodes a query object as base64 JSON, the local wire form of `query_info`.
#[must_use]
pub fn encode_query_info(query: &Map<String, Value>) -> String {
    STANDARD.encode(Value::Object(query.clone()).to_string())
}

/// Decodes base64 JSON `query_info`; standard and URL-safe alphabets are accepted.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if the text is not base64 of a JSON object.
pub fn decode_query_info(encoded: &str) -> Result<Map<String, Value>> {
    let encoded = encoded.trim();
    let bytes = STANDARD
        .decode(encoded)
        .or_else(|_| URL_SAFE.decode(encoded))
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
        .map_err(|e| Error::invalid_argument(format!("query_info is not base64: {e}")))?;

    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::invalid_argument("query_info must encode a JSON object")),
        Err(e) => Err(Error::invalid_argument(format!(
            "query_info is not valid JSON: {e}"
        ))),
    }
}

/// Tab properties that `update_tabs` may change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProperties {
    /// Navigate to this URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Make the tab active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// Highlight the tab.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlighted: Option<bool>,
    /// Pin or unpin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    /// Mute or unmute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
}

/// One tab update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabUpdate {
    /// Tab to update.
    pub tab_id: TabId,
    /// Properties to change.
    #[serde(default)]
    pub properties: UpdateProperties,
}

impl TabUpdate {
    /// Creates an update that navigates a tab to `url`.
    #[inline]
    #[must_use]
    pub fn navigate(tab_id: TabId, url: impl Into<String>) -> Self {
        Self {
            tab_id,
            properties: UpdateProperties {
                url: Some(url.into()),
                ..UpdateProperties::default()
            },
        }
    }
}

/// One tab move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabMove {
    /// Tab to move.
    pub tab_id: TabId,
    /// Destination window.
    pub window_id: u64,
    /// Destination index; `-1` appends.
    pub index: i64,
}

/// Optional text-extraction knobs for `get_text` and `get_html`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextOptions {
    /// Regex splitting text into lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter_regex: Option<String>,
    /// Replacement for delimiter matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_with: Option<String>,
}

/// Optional knobs for `get_words`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordsOptions {
    /// Limit to one tab; all tabs when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
    /// Regex selecting words.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_regex: Option<String>,
    /// Separator for the joined result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_with: Option<String>,
}

// ============================================================================
// Command
// ============================================================================

/// Every operation a client can ask of a mediator.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// List all tabs as TSV lines.
    ListTabs,
    /// List tabs matching a query object.
    QueryTabs {
        /// Browser query object.
        query: Map<String, Value>,
    },
    /// Close tabs.
    CloseTabs {
        /// Tabs to close.
        tab_ids: Vec<TabId>,
    },
    /// Activate a tab.
    ActivateTab {
        /// Tab to activate.
        tab_id: TabId,
        /// Also focus its window.
        focused: bool,
    },
    /// Move tabs between windows/positions.
    MoveTabs {
        /// Moves to apply.
        moves: Vec<TabMove>,
    },
    /// Open URLs in new tabs.
    OpenUrls {
        /// URLs to open.
        urls: Vec<String>,
        /// Target window; the browser picks when unset.
        window_id: Option<u64>,
    },
    /// Update tab properties.
    UpdateTabs {
        /// Updates to apply.
        updates: Vec<TabUpdate>,
    },
    /// Open a single new tab.
    NewTab {
        /// URL or search text.
        url: String,
    },
    /// List the active tab of every window.
    GetActiveTabs,
    /// Capture the visible area of the active tab.
    GetScreenshot,
    /// Extract words from tab contents.
    GetWords(WordsOptions),
    /// Extract text from tab contents.
    GetText(TextOptions),
    /// Extract HTML from tab contents.
    GetHtml(TextOptions),
    /// Name of the browser behind the mediator.
    GetBrowser,
    /// Process ID of the mediator.
    GetPid,
    /// Stop the mediator.
    Shutdown,
}

// ============================================================================
// Command - Properties
// ============================================================================

impl Command {
    /// Wire name of the command.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListTabs => "list_tabs",
            Self::QueryTabs { .. } => "query_tabs",
            Self::CloseTabs { .. } => "close_tabs",
            Self::ActivateTab { .. } => "activate_tab",
            Self::MoveTabs { .. } => "move_tabs",
            Self::OpenUrls { .. } => "open_urls",
            Self::UpdateTabs { .. } => "update_tabs",
            Self::NewTab { .. } => "new_tab",
            Self::GetActiveTabs => "get_active_tabs",
            Self::GetScreenshot => "get_screenshot",
            Self::GetWords(_) => "get_words",
            Self::GetText(_) => "get_text",
            Self::GetHtml(_) => "get_html",
            Self::GetBrowser => "get_browser",
            Self::GetPid => "get_pid",
            Self::Shutdown => "shutdown",
        }
    }

    /// Returns `true` if the command changes browser state.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::CloseTabs { .. }
                | Self::ActivateTab { .. }
                | Self::MoveTabs { .. }
                | Self::OpenUrls { .. }
                | Self::UpdateTabs { .. }
                | Self::NewTab { .. }
        )
    }

    /// Returns `false` for commands that create tabs, where repeating a
    /// delivered request opens duplicates.
    #[must_use]
    pub const fn is_idempotent(&self) -> bool {
        !matches!(self, Self::OpenUrls { .. } | Self::NewTab { .. })
    }

    /// Returns `true` if the mediator answers without asking the browser.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::GetPid | Self::Shutdown)
    }

    /// Signature used for caching and deduplication of reads.
    ///
    /// Returns `None` for commands whose results must never be shared.
    #[must_use]
    pub fn cache_key(&self) -> Option<String> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        match self {
            Self::ListTabs | Self::GetActiveTabs | Self::GetBrowser => Some(self.name().into()),
            Self::QueryTabs { query } => Some(format!(
                "query_tabs:{}",
                Value::Object(query.clone())
            )),
            Self::GetWords(o) => Some(format!(
                "get_words:{}:{}:{}",
                o.tab_id.map(|t| t.to_string()).unwrap_or_default(),
                opt(&o.match_regex),
                opt(&o.join_with)
            )),
            Self::GetText(o) | Self::GetHtml(o) => Some(format!(
                "{}:{}:{}",
                self.name(),
                opt(&o.delimiter_regex),
                opt(&o.replace_with)
            )),
            _ => None,
        }
    }

    /// Tab IDs this command addresses, for prefix routing.
    #[must_use]
    pub fn tab_ids(&self) -> Vec<TabId> {
        match self {
            Self::CloseTabs { tab_ids } => tab_ids.clone(),
            Self::ActivateTab { tab_id, .. } => vec![*tab_id],
            Self::MoveTabs { moves } => moves.iter().map(|m| m.tab_id).collect(),
            Self::UpdateTabs { updates } => updates.iter().map(|u| u.tab_id).collect(),
            Self::GetWords(o) => o.tab_id.into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// Command - Local Encoding
// ============================================================================

impl Command {
    /// Decodes a local-protocol command, validating its arguments.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for a missing name or malformed args
    /// - [`Error::UnknownCommand`] for an unrecognized name
    pub fn from_local(raw: RawCommand) -> Result<Self> {
        let RawCommand { name, args } = raw;
        if name.trim().is_empty() {
            return Err(Error::invalid_argument("command name is required"));
        }

        let command = match name.as_str() {
            "list_tabs" => Self::ListTabs,
            "query_tabs" => {
                #[derive(Deserialize)]
                struct Args {
                    query_info: String,
                }
                let a: Args = parse_args(&name, args)?;
                Self::QueryTabs {
                    query: decode_query_info(&a.query_info)?,
                }
            }
            "close_tabs" => {
                #[derive(Deserialize)]
                struct Args {
                    tab_ids: Vec<TabId>,
                }
                let a: Args = parse_args(&name, args)?;
                if a.tab_ids.is_empty() {
                    return Err(Error::invalid_argument("close_tabs requires tab_ids"));
                }
                Self::CloseTabs { tab_ids: a.tab_ids }
            }
            "activate_tab" => {
                #[derive(Deserialize)]
                struct Args {
                    tab_id: TabId,
                    #[serde(default)]
                    focused: bool,
                }
                let a: Args = parse_args(&name, args)?;
                Self::ActivateTab {
                    tab_id: a.tab_id,
                    focused: a.focused,
                }
            }
            "move_tabs" => {
                #[derive(Deserialize)]
                struct Args {
                    moves: Vec<TabMove>,
                }
                let a: Args = parse_args(&name, args)?;
                Self::MoveTabs { moves: a.moves }
            }
            "open_urls" => {
                #[derive(Deserialize)]
                struct Args {
                    urls: Vec<String>,
                    #[serde(default)]
                    window_id: Option<u64>,
                }
                let a: Args = parse_args(&name, args)?;
                let urls: Vec<String> = a
                    .urls
                    .into_iter()
                    .map(|u| u.trim().to_string())
                    .filter(|u| !u.is_empty())
                    .collect();
                if urls.is_empty() {
                    return Err(Error::invalid_argument("open_urls requires urls"));
                }
                Self::OpenUrls {
                    urls,
                    window_id: a.window_id,
                }
            }
            "update_tabs" => {
                #[derive(Deserialize)]
                struct Args {
                    updates: Vec<TabUpdate>,
                }
                let a: Args = parse_args(&name, args)?;
                Self::UpdateTabs { updates: a.updates }
            }
            "new_tab" => {
                #[derive(Deserialize)]
                struct Args {
                    url: String,
                }
                let a: Args = parse_args(&name, args)?;
                Self::NewTab { url: a.url }
            }
            "get_active_tabs" => Self::GetActiveTabs,
            "get_screenshot" => Self::GetScreenshot,
            "get_words" => Self::GetWords(parse_args(&name, args)?),
            "get_text" => Self::GetText(parse_args(&name, args)?),
            "get_html" => Self::GetHtml(parse_args(&name, args)?),
            "get_browser" => Self::GetBrowser,
            "get_pid" => Self::GetPid,
            "shutdown" => Self::Shutdown,
            _ => return Err(Error::unknown_command(name)),
        };

        Ok(command)
    }

    /// Decodes a local-protocol command from arbitrary JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `value` is not a command object.
    pub fn from_local_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::invalid_argument("command must be a JSON object"));
        }
        let raw: RawCommand = serde_json::from_value(value)
            .map_err(|e| Error::invalid_argument(format!("malformed command: {e}")))?;
        Self::from_local(raw)
    }

    /// Encodes for the local command protocol.
    #[must_use]
    pub fn to_local_message(&self) -> Value {
        let args = match self {
            Self::QueryTabs { query } => json!({ "query_info": encode_query_info(query) }),
            Self::CloseTabs { tab_ids } => json!({ "tab_ids": tab_ids }),
            Self::ActivateTab { tab_id, focused } => {
                json!({ "tab_id": tab_id, "focused": focused })
            }
            Self::MoveTabs { moves } => json!({ "moves": moves }),
            Self::OpenUrls { urls, window_id } => match window_id {
                Some(window_id) => json!({ "urls": urls, "window_id": window_id }),
                None => json!({ "urls": urls }),
            },
            Self::UpdateTabs { updates } => json!({ "updates": updates }),
            Self::NewTab { url } => json!({ "url": url }),
            Self::GetWords(o) => to_object(o),
            Self::GetText(o) | Self::GetHtml(o) => to_object(o),
            _ => json!({}),
        };
        json!({ "name": self.name(), "args": args })
    }
}

// ============================================================================
// Command - Browser Encoding
// ============================================================================

impl Command {
    /// Encodes for the browser extension, with browser-local numeric tab IDs.
    #[must_use]
    pub fn to_browser_message(&self) -> Value {
        let args = match self {
            Self::QueryTabs { query } => json!({ "query_info": query }),
            Self::CloseTabs { tab_ids } => {
                let ids: Vec<u64> = tab_ids.iter().map(|t| t.tab_id).collect();
                json!({ "tab_ids": ids })
            }
            Self::ActivateTab { tab_id, focused } => {
                json!({ "tab_id": tab_id.tab_id, "focused": focused })
            }
            Self::MoveTabs { moves } => {
                let moves: Vec<Value> = moves
                    .iter()
                    .map(|m| {
                        json!({
                            "tab_id": m.tab_id.tab_id,
                            "window_id": m.window_id,
                            "index": m.index,
                        })
                    })
                    .collect();
                json!({ "moves": moves })
            }
            Self::UpdateTabs { updates } => {
                let updates: Vec<Value> = updates
                    .iter()
                    .map(|u| json!({ "tab_id": u.tab_id.tab_id, "properties": u.properties }))
                    .collect();
                json!({ "updates": updates })
            }
            Self::GetWords(o) => {
                let mut args = Map::new();
                if let Some(tab_id) = o.tab_id {
                    args.insert("tab_id".into(), json!(tab_id.tab_id));
                }
                if let Some(regex) = &o.match_regex {
                    args.insert("match_regex".into(), json!(regex));
                }
                if let Some(join) = &o.join_with {
                    args.insert("join_with".into(), json!(join));
                }
                Value::Object(args)
            }
            other => other
                .to_local_message()
                .get("args")
                .cloned()
                .unwrap_or_else(|| json!({})),
        };
        json!({ "name": self.name(), "args": args })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Deserializes a command's argument object into its typed shape.
fn parse_args<T: DeserializeOwned>(name: &str, args: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(args))
        .map_err(|e| Error::invalid_argument(format!("malformed arguments for {name}: {e}")))
}

fn to_object<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| json!({}))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(value: Value) -> Result<Command> {
        Command::from_local_value(value)
    }

    #[test]
    fn test_list_tabs_without_args() {
        let cmd = raw(json!({ "name": "list_tabs" })).expect("valid");
        assert_eq!(cmd, Command::ListTabs);
        assert!(!cmd.is_mutating());
        assert_eq!(cmd.cache_key().as_deref(), Some("list_tabs"));
    }

    #[test]
    fn test_missing_name_is_validation_error() {
        let err = raw(json!({ "args": {} })).unwrap_err();
        assert!(err.is_validation());
        let err = raw(json!({ "name": "" })).unwrap_err();
        assert!(err.is_validation());
        let err = raw(json!(["list_tabs"])).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_unknown_command() {
        let err = raw(json!({ "name": "frobnicate" })).unwrap_err();
        assert!(matches!(err, Error::UnknownCommand { ref command } if command == "frobnicate"));
    }

    #[test]
    fn test_query_tabs_decodes_base64() {
        let encoded = STANDARD.encode(r#"{"active":true}"#);
        let cmd = raw(json!({ "name": "query_tabs", "args": { "query_info": encoded } }))
            .expect("valid");
        let Command::QueryTabs { query } = cmd else {
            panic!("expected QueryTabs");
        };
        assert_eq!(query.get("active"), Some(&json!(true)));
    }

    #[test]
    fn test_query_tabs_rejects_garbage() {
        let err = raw(json!({ "name": "query_tabs", "args": { "query_info": "%%%" } }))
            .unwrap_err();
        assert!(err.is_validation());

        let not_object = STANDARD.encode("[1,2]");
        let err = raw(json!({ "name": "query_tabs", "args": { "query_info": not_object } }))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_close_tabs_requires_full_ids() {
        let cmd = raw(json!({ "name": "close_tabs", "args": { "tab_ids": ["a.1.2", "b.3.4"] } }))
            .expect("valid");
        assert_eq!(cmd.tab_ids().len(), 2);
        assert!(cmd.is_mutating());
        assert!(cmd.is_idempotent());
        assert!(cmd.cache_key().is_none());

        let err = raw(json!({ "name": "close_tabs", "args": { "tab_ids": ["12"] } })).unwrap_err();
        assert!(err.to_string().contains("malformed arguments for close_tabs"));

        let err = raw(json!({ "name": "close_tabs", "args": { "tab_ids": "a.1.2" } })).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_activate_tab_focused_defaults_false() {
        let cmd = raw(json!({ "name": "activate_tab", "args": { "tab_id": "a.1.2" } }))
            .expect("valid");
        assert!(matches!(cmd, Command::ActivateTab { focused: false, .. }));
    }

    #[test]
    fn test_open_urls_drops_blank_lines() {
        let cmd = raw(json!({
            "name": "open_urls",
            "args": { "urls": ["https://a.example", "  ", "https://b.example"], "window_id": 7 }
        }))
        .expect("valid");
        assert!(!cmd.is_idempotent());
        assert_eq!(
            cmd,
            Command::OpenUrls {
                urls: vec!["https://a.example".into(), "https://b.example".into()],
                window_id: Some(7),
            }
        );

        let err = raw(json!({ "name": "open_urls", "args": { "urls": [] } })).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_local_message_decodes_back() {
        let commands = vec![
            Command::QueryTabs {
                query: TabQuery::new().with_active(true).into_map(),
            },
            Command::ActivateTab {
                tab_id: "c.9.1".parse().expect("id"),
                focused: true,
            },
            Command::UpdateTabs {
                updates: vec![TabUpdate::navigate(
                    "a.1.2".parse().expect("id"),
                    "https://example.com",
                )],
            },
            Command::GetWords(WordsOptions {
                tab_id: Some("a.1.2".parse().expect("id")),
                match_regex: Some(r"\w+".into()),
                join_with: None,
            }),
        ];

        for command in commands {
            let decoded = Command::from_local_value(command.to_local_message()).expect("decode");
            assert_eq!(decoded, command);
        }
    }

    #[test]
    fn test_browser_message_uses_numeric_ids() {
        let cmd = Command::CloseTabs {
            tab_ids: vec!["a.1.2".parse().expect("id"), "a.1.3".parse().expect("id")],
        };
        assert_eq!(
            cmd.to_browser_message(),
            json!({ "name": "close_tabs", "args": { "tab_ids": [2, 3] } })
        );

        let query = TabQuery::new().with_current_window(true).into_map();
        let cmd = Command::QueryTabs { query };
        assert_eq!(
            cmd.to_browser_message(),
            json!({ "name": "query_tabs", "args": { "query_info": { "currentWindow": true } } })
        );
    }

    #[test]
    fn test_cache_keys_distinguish_queries() {
        let a = Command::QueryTabs {
            query: TabQuery::new().with_active(true).into_map(),
        };
        let b = Command::QueryTabs {
            query: TabQuery::new().with_active(false).into_map(),
        };
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_query_info_url_safe_alphabet() {
        let map = TabQuery::new().with_url("*://*/?q=~").into_map();
        let url_safe = URL_SAFE_NO_PAD.encode(Value::Object(map.clone()).to_string());
        assert_eq!(decode_query_info(&url_safe).expect("decode"), map);
        assert_eq!(decode_query_info(&encode_query_info(&map)).expect("decode"), map);
    }
}

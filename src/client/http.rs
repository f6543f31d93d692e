//! HTTP backend.
//!
//! Maps each [`Command`] onto the mediator's HTTP routes:
//!
//! | Command | Route |
//! |---------|-------|
//! | `list_tabs` | `GET /list_tabs` |
//! | `query_tabs` | `GET /query_tabs/{base64 query}` |
//! | `close_tabs` | `GET /close_tabs/{id,id,...}` |
//! | `activate_tab` | `GET /activate_tab/{id}?focused=bool` |
//! | `move_tabs` | `POST /move_tabs` (JSON) |
//! | `open_urls` | `POST /open_urls?window_id=N` (newline-separated) |
//! | `update_tabs` | `POST /update_tabs` (JSON) |
//! | `new_tab` | `GET /new_tab/{url}` |
//! | everything else | `GET /{name}` with options as query parameters |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use tracing::trace;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{Command, Response, TextOptions, encode_query_info};

use super::TabClient;

// ============================================================================
// HttpClient
// ============================================================================

/// Talks to a mediator's HTTP front end.
#[derive(Debug, Clone)]
pub struct HttpClient {
    base: Url,
    http: reqwest::Client,
}

impl HttpClient {
    /// Creates a client for `http://{host}:{port}/`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the address or the HTTP client is invalid.
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let base = Url::parse(&format!("http://{host}:{port}/"))
            .map_err(|e| Error::config(format!("invalid mediator address {host}:{port}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { base, http })
    }

    /// Base URL.
    #[inline]
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::invalid_argument(format!("cannot build URL for {path}: {e}")))
    }

    fn build(&self, command: &Command) -> Result<RequestBuilder> {
        let get = |path: &str| -> Result<RequestBuilder> {
            Ok(self.http.request(Method::GET, self.url(path)?))
        };

        let request = match command {
            Command::QueryTabs { query } => {
                let encoded = encode_query_info(query);
                get(&format!("query_tabs/{}", urlencoding::encode(&encoded)))?
            }
            Command::CloseTabs { tab_ids } => {
                let ids: Vec<String> = tab_ids.iter().map(ToString::to_string).collect();
                get(&format!("close_tabs/{}", ids.join(",")))?
            }
            Command::ActivateTab { tab_id, focused } => {
                get(&format!("activate_tab/{tab_id}"))?.query(&[("focused", focused)])
            }
            Command::NewTab { url } => get(&format!("new_tab/{}", urlencoding::encode(url)))?,
            Command::MoveTabs { moves } => self
                .http
                .post(self.url("move_tabs")?)
                .json(&serde_json::json!({ "moves": moves })),
            Command::UpdateTabs { updates } => self
                .http
                .post(self.url("update_tabs")?)
                .json(&serde_json::json!({ "updates": updates })),
            Command::OpenUrls { urls, window_id } => {
                let mut request = self
                    .http
                    .post(self.url("open_urls")?)
                    .header(reqwest::header::CONTENT_TYPE, "text/plain")
                    .body(urls.join("\n"));
                if let Some(window_id) = window_id {
                    request = request.query(&[("window_id", window_id)]);
                }
                request
            }
            Command::GetWords(options) => {
                let mut params: Vec<(&str, String)> = Vec::new();
                if let Some(tab_id) = options.tab_id {
                    params.push(("tab_id", tab_id.to_string()));
                }
                if let Some(regex) = &options.match_regex {
                    params.push(("match_regex", regex.clone()));
                }
                if let Some(join) = &options.join_with {
                    params.push(("join_with", join.clone()));
                }
                get("get_words")?.query(&params)
            }
            Command::GetText(options) | Command::GetHtml(options) => {
                get(command.name())?.query(&text_params(options))
            }
            other => get(other.name())?,
        };

        Ok(request)
    }
}

fn text_params(options: &TextOptions) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(regex) = &options.delimiter_regex {
        params.push(("delimiter_regex", regex.clone()));
    }
    if let Some(replace) = &options.replace_with {
        params.push(("replace_with", replace.clone()));
    }
    params
}

#[async_trait]
impl TabClient for HttpClient {
    fn describe(&self) -> String {
        format!("http:{}", self.base.as_str().trim_end_matches('/'))
    }

    async fn execute(&self, command: Command) -> Result<Value> {
        let response = self.build(&command)?.send().await?;
        let status = response.status();
        let body = response.text().await?;
        trace!(command = command.name(), status = status.as_u16(), "HTTP reply");

        if !status.is_success() {
            let message = serde_json::from_str::<Response>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(body);
            return Err(Error::status(status.as_u16(), message));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| Error::protocol(format!("bad reply to {}: {e}", command.name())))?;
        Response::from_value(value)?.into_result_with(Error::remote)
    }
}

// ============================================================================
// Tests
// ============================================================================

//! HTTP front end.
//!
//! Exposes a [`TabClient`] backend over HTTP with permissive CORS on every
//! response. Every route answers with the same envelope as the socket
//! protocol: `{"result": ...}` or `{"error": ...}`.
//!
//! # Routes
//!
//! | Method | Path | Command |
//! |--------|------|---------|
//! | GET | `/list_tabs` | `list_tabs` |
//! | GET | `/query_tabs/{query}` | `query_tabs` (base64 JSON) |
//! | GET | `/close_tabs/{ids}` | `close_tabs` (comma-separated) |
//! | GET | `/activate_tab/{id}?focused=bool` | `activate_tab` |
//! | GET | `/new_tab/{url}` | `new_tab` |
//! | POST | `/open_urls?window_id=N` | `open_urls` (newline-separated or multipart `urls`) |
//! | POST | `/update_tabs` | `update_tabs` (JSON) |
//! | POST | `/move_tabs` | `move_tabs` (JSON) |
//! | GET | `/get_active_tabs`, `/get_screenshot`, `/get_browser`, `/get_pid` | same name |
//! | GET | `/get_words`, `/get_text`, `/get_html` | options as query parameters |
//! | GET | `/shutdown` | stops the server |
//!
//! # Status Codes
//!
//! | Error kind | Status |
//! |------------|--------|
//! | Validation | 400 |
//! | Not implemented | 501 |
//! | Mediator unreachable | 503 |
//! | Timeout | 504 |
//! | Anything else | 500 |

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::response::Json;
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::client::TabClient;
use crate::error::{Error, Result};
use crate::identifiers::TabId;
use crate::protocol::{Command, RawCommand, Response, TextOptions, WordsOptions, decode_query_info};

use super::MAX_FRAME_SIZE;

// ============================================================================
// Types
// ============================================================================

type HttpReply = (StatusCode, Json<Response>);

#[derive(Clone)]
struct HttpState {
    backend: Arc<dyn TabClient>,
    shutdown: CancellationToken,
}

#[derive(Debug, Default, Deserialize)]
struct ActivateParams {
    #[serde(default)]
    focused: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenParams {
    #[serde(default)]
    window_id: Option<u64>,
}

// ============================================================================
// Router
// ============================================================================

/// Builds the HTTP router for `backend`.
///
/// `GET /shutdown` cancels `shutdown_token`.
pub fn router(backend: Arc<dyn TabClient>, shutdown_token: CancellationToken) -> Router {
    let state = HttpState {
        backend,
        shutdown: shutdown_token,
    };

    Router::new()
        .route("/list_tabs", get(list_tabs))
        .route("/query_tabs/{query}", get(query_tabs))
        .route("/close_tabs/{ids}", get(close_tabs))
        .route("/activate_tab/{id}", get(activate_tab))
        .route("/new_tab/{url}", get(new_tab))
        .route("/open_urls", post(open_urls))
        .route("/update_tabs", post(update_tabs))
        .route("/move_tabs", post(move_tabs))
        .route("/get_active_tabs", get(get_active_tabs))
        .route("/get_screenshot", get(get_screenshot))
        .route("/get_words", get(get_words))
        .route("/get_text", get(get_text))
        .route("/get_html", get(get_html))
        .route("/get_browser", get(get_browser))
        .route("/get_pid", get(get_pid))
        .route("/shutdown", get(shutdown))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// HttpServer
// ============================================================================

/// A running HTTP front end.
pub struct HttpServer {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl HttpServer {
    /// Binds `host:port` and serves `backend` until `shutdown` is cancelled.
    ///
    /// Use port 0 for an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the address cannot be bound.
    pub async fn bind(
        host: &str,
        port: u16,
        backend: Arc<dyn TabClient>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "HTTP front end listening");

        let app = router(backend, shutdown.clone());
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "HTTP front end stopped with error");
            }
            debug!("HTTP front end stopped");
        });

        Ok(Self { local_addr, task })
    }

    /// Bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the server task to finish.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

// ============================================================================
// Dispatch
// ============================================================================

async fn dispatch(state: &HttpState, command: Result<Command>) -> HttpReply {
    let command = match command {
        Ok(command) => command,
        Err(e) => return failure(&e),
    };
    let name = command.name();
    match state.backend.execute(command).await {
        Ok(value) => (StatusCode::OK, Json(Response::success(value))),
        Err(e) => {
            debug!(command = name, error = %e, "HTTP command failed");
            failure(&e)
        }
    }
}

fn failure(error: &Error) -> HttpReply {
    (status_for(error), Json(Response::failure(error.to_string())))
}

fn status_for(error: &Error) -> StatusCode {
    match error.innermost() {
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        Error::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
        Error::FrameTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        e if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
        e if e.is_connection_error() || e.is_circuit_open() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn parse_tab_ids(raw: &str) -> Result<Vec<TabId>> {
    let ids = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<Result<Vec<TabId>>>()?;
    if ids.is_empty() {
        return Err(Error::invalid_argument("no tab IDs given"));
    }
    Ok(ids)
}

/// Decodes a JSON body as the args of `name`; a bare array is taken as the
/// value of `list_key`.
fn json_command(name: &str, list_key: &str, body: &[u8]) -> Result<Command> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::invalid_argument(format!("malformed JSON body: {e}")))?;
    let args = match value {
        Value::Object(map) => map,
        Value::Array(items) => {
            let mut map = Map::new();
            map.insert(list_key.to_string(), Value::Array(items));
            map
        }
        _ => return Err(Error::invalid_argument("body must be a JSON object or array")),
    };
    Command::from_local(RawCommand {
        name: name.to_string(),
        args,
    })
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_tabs(State(state): State<HttpState>) -> HttpReply {
    dispatch(&state, Ok(Command::ListTabs)).await
}

async fn query_tabs(State(state): State<HttpState>, Path(query): Path<String>) -> HttpReply {
    let command = decode_query_info(&query).map(|query| Command::QueryTabs { query });
    dispatch(&state, command).await
}

async fn close_tabs(State(state): State<HttpState>, Path(ids): Path<String>) -> HttpReply {
    let command = parse_tab_ids(&ids).map(|tab_ids| Command::CloseTabs { tab_ids });
    dispatch(&state, command).await
}

async fn activate_tab(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    Query(params): Query<ActivateParams>,
) -> HttpReply {
    let command = id.parse::<TabId>().map(|tab_id| Command::ActivateTab {
        tab_id,
        focused: params.focused.unwrap_or(false),
    });
    dispatch(&state, command).await
}

async fn new_tab(State(state): State<HttpState>, Path(url): Path<String>) -> HttpReply {
    let command = if url.trim().is_empty() {
        Err(Error::invalid_argument("new_tab requires a URL"))
    } else {
        Ok(Command::NewTab { url })
    };
    dispatch(&state, command).await
}

async fn open_urls(
    State(state): State<HttpState>,
    Query(params): Query<OpenParams>,
    request: Request,
) -> HttpReply {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let text = if is_multipart {
        read_multipart_urls(request, &state).await
    } else {
        match axum::body::to_bytes(request.into_body(), MAX_FRAME_SIZE).await {
            Ok(bytes) => String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::invalid_argument("body is not UTF-8")),
            Err(e) => Err(Error::invalid_argument(format!("cannot read body: {e}"))),
        }
    };

    let command = text.and_then(|text| {
        let urls: Vec<Value> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| json!(l))
            .collect();
        let mut args = Map::new();
        args.insert("urls".into(), Value::Array(urls));
        if let Some(window_id) = params.window_id {
            args.insert("window_id".into(), json!(window_id));
        }
        Command::from_local(RawCommand {
            name: "open_urls".into(),
            args,
        })
    });

    dispatch(&state, command).await
}

async fn read_multipart_urls(request: Request, state: &HttpState) -> Result<String> {
    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| Error::invalid_argument(format!("bad multipart body: {e}")))?;

    let mut text = String::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::invalid_argument(format!("bad multipart body: {e}")))?
    {
        if field.name() != Some("urls") {
            continue;
        }
        let chunk = field
            .text()
            .await
            .map_err(|e| Error::invalid_argument(format!("bad multipart field: {e}")))?;
        text.push_str(&chunk);
        text.push('\n');
    }
    Ok(text)
}

async fn update_tabs(State(state): State<HttpState>, body: Bytes) -> HttpReply {
    dispatch(&state, json_command("update_tabs", "updates", &body)).await
}

async fn move_tabs(State(state): State<HttpState>, body: Bytes) -> HttpReply {
    dispatch(&state, json_command("move_tabs", "moves", &body)).await
}

async fn get_active_tabs(State(state): State<HttpState>) -> HttpReply {
    dispatch(&state, Ok(Command::GetActiveTabs)).await
}

async fn get_screenshot(State(state): State<HttpState>) -> HttpReply {
    dispatch(&state, Ok(Command::GetScreenshot)).await
}

async fn get_words(State(state): State<HttpState>, Query(options): Query<WordsOptions>) -> HttpReply {
    dispatch(&state, Ok(Command::GetWords(options))).await
}

async fn get_text(State(state): State<HttpState>, Query(options): Query<TextOptions>) -> HttpReply {
    dispatch(&state, Ok(Command::GetText(options))).await
}

async fn get_html(State(state): State<HttpState>, Query(options): Query<TextOptions>) -> HttpReply {
    dispatch(&state, Ok(Command::GetHtml(options))).await
}

async fn get_browser(State(state): State<HttpState>) -> HttpReply {
    dispatch(&state, Ok(Command::GetBrowser)).await
}

async fn get_pid(State(state): State<HttpState>) -> HttpReply {
    dispatch(&state, Ok(Command::GetPid)).await
}

async fn shutdown(State(state): State<HttpState>) -> HttpReply {
    info!("Shutdown requested over HTTP");
    state.shutdown.cancel();
    (StatusCode::OK, Json(Response::success(json!("ok"))))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::client::HttpClient;
    use crate::test_support::StubClient;

    async fn serve() -> (HttpServer, Arc<StubClient>, CancellationToken, HttpClient) {
        let stub = Arc::new(StubClient::new("a"));
        let token = CancellationToken::new();
        let server = HttpServer::bind("127.0.0.1", 0, stub.clone(), token.clone())
            .await
            .expect("bind");
        let client = HttpClient::new("127.0.0.1", server.local_addr().port(), Duration::from_secs(2))
            .expect("client");
        (server, stub, token, client)
    }

    #[tokio::test]
    async fn test_list_tabs_over_http() {
        let (_server, stub, token, client) = serve().await;
        assert_eq!(client.list_tabs().await.expect("list"), stub.lines());
        token.cancel();
    }

    #[tokio::test]
    async fn test_query_tabs_base64_survives_path() {
        let (_server, stub, token, client) = serve().await;
        let mut query = serde_json::Map::new();
        query.insert("title".into(), "?ß€".into());
        assert_eq!(
            crate::protocol::encode_query_info(&query),
            "eyJ0aXRsZSI6Ij/Dn+KCrCJ9",
            "encoding carries both '/' and '+'"
        );

        let lines = client.query_tabs(query.clone()).await.expect("query");
        assert_eq!(lines, stub.lines());
        assert_eq!(stub.commands(), vec![crate::protocol::Command::QueryTabs { query }]);
        token.cancel();
    }

    #[tokio::test]
    async fn test_close_tabs_decodes_ids() {
        let (_server, stub, token, client) = serve().await;
        client
            .close_tabs(vec!["a.1.2".parse().expect("id"), "a.1.3".parse().expect("id")])
            .await
            .expect("close");

        let seen = stub.commands();
        assert_eq!(
            seen.last(),
            Some(&Command::CloseTabs {
                tab_ids: vec!["a.1.2".parse().expect("id"), "a.1.3".parse().expect("id")],
            })
        );
        token.cancel();
    }

    #[tokio::test]
    async fn test_open_urls_with_window() {
        let (_server, stub, token, client) = serve().await;
        client
            .open_urls(vec!["https://a.example".into()], Some(4))
            .await
            .expect("open");
        assert_eq!(
            stub.commands().last(),
            Some(&Command::OpenUrls {
                urls: vec!["https://a.example".into()],
                window_id: Some(4),
            })
        );
        token.cancel();
    }

    #[tokio::test]
    async fn test_open_urls_multipart() {
        let (server, stub, token, _client) = serve().await;
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"urls\"\r\n\r\n\
             https://a.example\nhttps://b.example\r\n--{boundary}--\r\n"
        );

        let response = reqwest::Client::new()
            .post(format!("http://{}/open_urls", server.local_addr()))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await
            .expect("send");
        assert!(response.status().is_success());
        assert_eq!(
            stub.commands().last(),
            Some(&Command::OpenUrls {
                urls: vec!["https://a.example".into(), "https://b.example".into()],
                window_id: None,
            })
        );
        token.cancel();
    }

    #[tokio::test]
    async fn test_validation_error_is_400_with_cors() {
        let (server, _stub, token, _client) = serve().await;
        let response = reqwest::Client::new()
            .get(format!("http://{}/activate_tab/12", server.local_addr()))
            .header(header::ORIGIN, "http://example.com")
            .send()
            .await
            .expect("send");

        assert_eq!(response.status().as_u16(), 400);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
        let body: Value = response.json().await.expect("json");
        assert!(body["error"].as_str().expect("error").contains("12"));
        token.cancel();
    }

    #[tokio::test]
    async fn test_update_tabs_json_body() {
        let (_server, stub, token, client) = serve().await;
        let update = crate::protocol::TabUpdate::navigate(
            "a.1.2".parse().expect("id"),
            "https://example.com",
        );
        client.update_tabs(vec![update.clone()]).await.expect("update");
        assert_eq!(
            stub.commands().last(),
            Some(&Command::UpdateTabs {
                updates: vec![update],
            })
        );
        token.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_route_stops_server() {
        let (server, _stub, token, client) = serve().await;
        client.execute(Command::Shutdown).await.expect("shutdown");
        assert!(token.is_cancelled());
        tokio::time::timeout(Duration::from_secs(2), server.join())
            .await
            .expect("server stops");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::invalid_argument("x")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&Error::not_implemented("get_screenshot", "bus")),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            status_for(&Error::connection("down").during("list_tabs", "unix:/x")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for(&Error::timeout("x", 1)), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(&Error::browser("x")), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

//! Session-bus backend.
//!
//! Calls a bus-exported mediator through the `gdbus` command-line tool. This
//! crate's own mediator serves a Unix socket and HTTP only; the bus interface
//! is provided by external mediator builds that register
//! `org.tabctl.<browser>` and export the interface below:
//!
//! ```text
//! gdbus call --session --dest org.tabctl.firefox \
//!     --object-path /org/tabctl/Mediator \
//!     --method org.tabctl.Mediator.Execute '{"name":"list_tabs","args":{}}'
//! ```
//!
//! The reply is a GVariant tuple holding one JSON string, `('{"result":[...]}',)`.
//! Screenshots are not available on this transport.

// ============================================================================
// Imports
// ============================================================================

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command as TokioCommand;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::{Command, Response};

use super::TabClient;

// ============================================================================
// Constants
// ============================================================================

/// Object path exported by bus-registered mediators.
pub const OBJECT_PATH: &str = "/org/tabctl/Mediator";

/// Method taking one local-protocol command as a JSON string.
pub const EXECUTE_METHOD: &str = "org.tabctl.Mediator.Execute";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// BusClient
// ============================================================================

/// Talks to one mediator service on the session bus.
#[derive(Debug, Clone)]
pub struct BusClient {
    service: String,
    timeout: Duration,
}

impl BusClient {
    /// Creates a client for a well-known bus name.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the per-call timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bus name.
    #[inline]
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

#[async_trait]
impl TabClient for BusClient {
    fn describe(&self) -> String {
        format!("bus:{}", self.service)
    }

    async fn execute(&self, command: Command) -> Result<Value> {
        if matches!(command, Command::GetScreenshot) {
            return Err(Error::not_implemented(command.name(), "session bus"));
        }

        let payload = command.to_local_message().to_string();
        let output = gdbus_call(
            &self.service,
            OBJECT_PATH,
            EXECUTE_METHOD,
            &[quote_gvariant_string(&payload)],
            self.timeout,
        )
        .await?;

        let json = parse_single_string_reply(&output)?;
        let value: Value = serde_json::from_str(&json)
            .map_err(|e| Error::protocol(format!("bad bus reply: {e}")))?;
        Response::from_value(value)?.into_result_with(Error::remote)
    }
}

// ============================================================================
// gdbus
// ============================================================================

/// Runs `gdbus call` on the session bus and returns its stdout.
///
/// # Errors
///
/// - [`Error::Connection`] if `gdbus` is missing or the call fails
/// - [`Error::Timeout`] if the call exceeds `timeout`
pub(crate) async fn gdbus_call(
    destination: &str,
    object_path: &str,
    method: &str,
    method_args: &[String],
    timeout: Duration,
) -> Result<String> {
    let mut cmd = TokioCommand::new("gdbus");
    cmd.arg("call")
        .arg("--session")
        .arg("--dest")
        .arg(destination)
        .arg("--object-path")
        .arg(object_path)
        .arg("--method")
        .arg(method)
        .args(method_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(Error::connection(format!("cannot run gdbus: {e}"))),
        Err(_) => return Err(Error::timeout(method, timeout.as_millis() as u64)),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::connection(format!(
            "gdbus call failed (exit={}): method={method} dest={destination} stderr={}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    trace!(method, destination, bytes = stdout.len(), "gdbus reply");
    Ok(stdout)
}

// ============================================================================
// GVariant Text Format
// ============================================================================

/// Quotes a string as a GVariant text literal.
#[must_use]
pub(crate) fn quote_gvariant_string(raw: &str) -> String {
    let mut quoted = String::with_capacity(raw.len() + 2);
    quoted.push('\'');
    for ch in raw.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            other => quoted.push(other),
        }
    }
    quoted.push('\'');
    quoted
}

/// Extracts the string from a `('...',)` reply.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the reply is not a one-string tuple.
pub(crate) fn parse_single_string_reply(output: &str) -> Result<String> {
    let inner = output
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| Error::protocol(format!("unexpected gdbus reply: {output}")))?
        .trim();

    let (value, rest) = parse_gvariant_string(inner)?;
    if rest.trim() != "," {
        return Err(Error::protocol(format!("unexpected gdbus reply: {output}")));
    }
    Ok(value)
}

/// Parses one quoted GVariant string from the front of `input`, returning
/// the unescaped value and the remainder.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if `input` does not start with a complete
/// string literal.
pub(crate) fn parse_gvariant_string(input: &str) -> Result<(String, &str)> {
    let bad = || Error::protocol(format!("malformed GVariant string: {input}"));

    let mut chars = input.char_indices();
    let quote = match chars.next() {
        Some((_, q @ ('\'' | '"'))) => q,
        _ => return Err(bad()),
    };

    let mut value = String::new();
    while let Some((index, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((value, &input[index + c.len_utf8()..])),
            '\\' => {
                let (_, escaped) = chars.next().ok_or_else(bad)?;
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    'b' => value.push('\u{8}'),
                    'f' => value.push('\u{c}'),
                    'v' => value.push('\u{b}'),
                    'a' => value.push('\u{7}'),
                    'u' | 'U' => {
                        let width = if escaped == 'u' { 4 } else { 8 };
                        let mut hex = String::with_capacity(width);
                        for _ in 0..width {
                            let (_, digit) = chars.next().ok_or_else(bad)?;
                            hex.push(digit);
                        }
                        let code = u32::from_str_radix(&hex, 16).map_err(|_| bad())?;
                        value.push(char::from_u32(code).ok_or_else(bad)?);
                    }
                    other => value.push(other),
                }
            }
            other => value.push(other),
        }
    }

    Err(bad())
}

/// Extracts every quoted string from `gdbus` output such as `(['a', 'b'],)`.
#[must_use]
pub(crate) fn parse_string_list(output: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = output;
    while let Some(start) = rest.find(['\'', '"']) {
        match parse_gvariant_string(&rest[start..]) {
            Ok((name, remainder)) => {
                names.push(name);
                rest = remainder;
            }
            Err(_) => break,
        }
    }
    names
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote_gvariant_string(r#"{"a":"it's"}"#), r#"'{"a":"it\'s"}'"#);
        assert_eq!(quote_gvariant_string("a\\b"), r"'a\\b'");
    }

    #[test]
    fn test_parse_single_string_reply() {
        let reply = "('{\"result\": [\"1.2\\\\tTitle\"]}',)\n";
        let parsed = parse_single_string_reply(reply).expect("parse");
        assert_eq!(parsed, r#"{"result": ["1.2\tTitle"]}"#);
    }

    #[test]
    fn test_parse_double_quoted_and_escapes() {
        let (value, rest) = parse_gvariant_string(r#""it's é",)"#).expect("parse");
        assert_eq!(value, "it's é");
        assert_eq!(rest, ",)");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_single_string_reply("(uint32 5,)").is_err());
        assert!(parse_single_string_reply("nope").is_err());
        assert!(parse_gvariant_string("'unterminated").is_err());
    }

    #[test]
    fn test_parse_string_list() {
        let output = "(['org.freedesktop.DBus', ':1.7', 'org.tabctl.firefox'],)\n";
        assert_eq!(
            parse_string_list(output),
            vec!["org.freedesktop.DBus", ":1.7", "org.tabctl.firefox"]
        );
    }

    #[tokio::test]
    async fn test_screenshot_not_implemented() {
        let err = BusClient::new("org.tabctl.firefox")
            .execute(Command::GetScreenshot)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotImplemented { .. }));
        assert_eq!(err.to_string(), "get_screenshot is not implemented over session bus");
    }
}

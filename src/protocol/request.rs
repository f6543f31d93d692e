//! Request and Response message types.
//!
//! Defines the envelope shared by every transport:
//!
//! ```json
//! { "name": "list_tabs", "args": {} }
//! ```
//!
//! answered by exactly one of
//!
//! ```json
//! { "result": ["a.1.2\tExample\thttp://example.com"] }
//! { "error": "No tab with id: 2" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

// ============================================================================
// RawCommand
// ============================================================================

/// An undecoded command as it arrives on the wire.
///
/// See [`Command::from_local`](super::Command::from_local) for validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCommand {
    /// Command name.
    #[serde(default)]
    pub name: String,

    /// Command arguments.
    #[serde(default)]
    pub args: Map<String, Value>,
}

// ============================================================================
// Response
// ============================================================================

/// A response to one command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Result data (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error message (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(message.into()),
        }
    }

    /// Builds the response for an operation outcome.
    #[must_use]
    pub fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(e) => Self::failure(e.to_string()),
        }
    }

    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the result value, converting an error message with `on_error`.
    ///
    /// A success response with a `null` or missing result yields [`Value::Null`].
    ///
    /// # Errors
    ///
    /// Returns `on_error(message)` if the response carries an error.
    pub fn into_result_with(self, on_error: impl FnOnce(String) -> Error) -> Result<Value> {
        match self.error {
            Some(message) => Err(on_error(message)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }

    /// Parses a response from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `value` is not a response object.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::protocol(format!("response is not an object: {value}")));
        }
        serde_json::from_value(value).map_err(|e| Error::protocol(format!("bad response: {e}")))
    }
}

// ============================================================================
// Keep-alive
// ============================================================================

/// Returns the inline reply for a reserved keep-alive frame, if `message` is one.
///
/// | Incoming | Reply |
/// |----------|-------|
/// | `{"type":"ping"}` | `{"type":"pong"}` |
/// | `{"type":"health_check"}` | `{"type":"health_check_response","status":"alive"}` |
#[must_use]
pub fn keep_alive_reply(message: &Value) -> Option<Value> {
    match message.get("type").and_then(Value::as_str)? {
        "ping" => Some(json!({ "type": "pong" })),
        "health_check" => Some(json!({ "type": "health_check_response", "status": "alive" })),
        _ => None,
    }
}

// ============================================================================
// Result Decoding
// ============================================================================

/// Decodes a string-array result.
///
/// # Errors
///
/// Returns [`Error::Protocol`] naming `operation` if the shape does not match.
pub fn decode_lines(operation: &str, value: Value) -> Result<Vec<String>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(Error::protocol(format!(
                    "{operation}: expected string item, got {other}"
                ))),
            })
            .collect(),
        other => Err(Error::protocol(format!(
            "{operation}: expected string array, got {other}"
        ))),
    }
}

/// Decodes a single-string result.
///
/// # Errors
///
/// Returns [`Error::Protocol`] naming `operation` if the shape does not match.
pub fn decode_string(operation: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(Error::protocol(format!(
            "{operation}: expected string, got {other}"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

//! The envelope exchanged over the bus.
//!
//! A single strongly-typed shape is used for requests, replies, interceptor
//! hand-offs and websocket pushes. Fields the gateway does not know about are
//! preserved in `extra` so services and interceptors can attach their own
//! data without it being dropped on the way through.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Whether an interceptor wants the chain to continue or to answer directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterceptAction {
    /// Continue with the next interceptor (or the backend).
    #[default]
    Next,
    /// Stop here; the current message is the response.
    Respond,
}

impl InterceptAction {
    fn is_next(&self) -> bool {
        matches!(self, Self::Next)
    }
}

/// A bus request or reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    /// Correlation id, assigned by the gateway and authoritative end-to-end.
    #[serde(default)]
    pub req_id: String,

    /// Status code of a reply. Requests usually leave this unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub query: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,

    /// Request headers on the way in, response headers on the way out.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,

    /// Decoded identity of the caller (`{}` when anonymous).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,

    /// Explicit recipient list for websocket pushes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "InterceptAction::is_next")]
    pub intercept_action: InterceptAction,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BusMessage {
    /// Create an empty message carrying the given request id.
    pub fn new(req_id: impl Into<String>) -> Self {
        Self {
            req_id: req_id.into(),
            ..Self::default()
        }
    }

    /// Set the payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Build an error-shaped reply (`{status, reqId, error: {code, title}}`).
    pub fn error_reply(req_id: impl Into<String>, status: u16, code: &str, title: &str) -> Self {
        let mut error = Map::new();
        error.insert("code".into(), Value::String(code.to_string()));
        error.insert("title".into(), Value::String(title.to_string()));

        Self {
            req_id: req_id.into(),
            status: Some(status),
            error: Some(Value::Object(error)),
            ..Self::default()
        }
    }

    /// Status of the message, 200 when none was set.
    pub fn status_or_ok(&self) -> u16 {
        self.status.unwrap_or(200)
    }

    /// True when the status denotes a failure (>= 400).
    pub fn is_error(&self) -> bool {
        self.status_or_ok() >= 400
    }

    /// True when an interceptor asked to short-circuit.
    pub fn is_respond(&self) -> bool {
        self.intercept_action == InterceptAction::Respond
    }

    /// Error code from `error.code`, if present.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref()?.get("code")?.as_str()
    }

    /// A string field from `data`, used by bus endpoints with object payloads.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key)?.as_str().filter(|s| !s.is_empty())
    }

    /// Serialize into a JSON object. Serializing a `BusMessage` cannot fail,
    /// so a non-object result only happens for a pathological `extra` map.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// Force the gateway's request id onto a reply.
///
/// Replies that carry a different id are corrected and a warning is logged;
/// replies without one are silently filled in.
pub fn ensure_req_id(message: &mut BusMessage, expected: &str) {
    if message.req_id == expected {
        return;
    }
    if !message.req_id.is_empty() {
        tracing::warn!(
            expected = %expected,
            received = %message.req_id,
            "Reply carried a mismatching reqId, correcting"
        );
    }
    message.req_id = expected.to_string();
}

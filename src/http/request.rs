//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate a unique request ID per request
//! - Detect multipart and websocket upgrade requests
//! - Parse buffered bodies into message payloads
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Multipart bodies are left untouched for streaming
//! - Unparseable JSON is a client error, not a gateway error

use std::fmt;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{CONNECTION, CONTENT_TYPE, UPGRADE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::routing::subject::parse_query;

/// Response header carrying the gateway-assigned request id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Gateway-assigned request id, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access to the request id of a request.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&RequestId>;
}

impl<B> RequestIdExt for axum::http::Request<B> {
    fn request_id(&self) -> Option<&RequestId> {
        self.extensions().get::<RequestId>()
    }
}

/// Middleware: assign a fresh request id and echo it in the response.
pub async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = RequestId::generate();
    request.extensions_mut().insert(id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

/// Lower-cased media type without parameters.
pub fn media_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let media = value.split(';').next()?.trim().to_ascii_lowercase();
    (!media.is_empty()).then_some(media)
}

pub fn is_multipart(headers: &HeaderMap) -> bool {
    media_type(headers).is_some_and(|m| m.starts_with("multipart/"))
}

/// `Connection: upgrade` plus `Upgrade: websocket`.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let header_contains = |name: HeaderName, token: &str| {
        headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|v| v.trim().eq_ignore_ascii_case(token))
    };
    header_contains(CONNECTION, "upgrade") && header_contains(UPGRADE, "websocket")
}

/// Buffer and parse a non-multipart body.
///
/// JSON and form bodies become structured values, anything else a string.
/// An empty body is `null`.
pub async fn read_body(body: Body, headers: &HeaderMap, limit: usize) -> Result<Value, GatewayError> {
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| GatewayError::BadRequest(format!("failed to read body: {e}")))?;

    if bytes.is_empty() {
        return Ok(Value::Null);
    }

    match media_type(headers).as_deref() {
        Some(m) if m == "application/json" || m.ends_with("+json") => serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::BadRequest(format!("invalid JSON body: {e}"))),
        Some("application/x-www-form-urlencoded") => Ok(Value::Object(parse_query(
            &String::from_utf8_lossy(&bytes),
        ))),
        _ => Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers(content_type: &'static str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        h
    }

    #[tokio::test]
    async fn parses_json_bodies() {
        let value = read_body(
            Body::from(r#"{"a":1}"#),
            &headers("application/json; charset=utf-8"),
            1024,
        )
        .await
        .unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn parses_form_bodies() {
        let value = read_body(
            Body::from("a=1&b=two"),
            &headers("application/x-www-form-urlencoded"),
            1024,
        )
        .await
        .unwrap();
        assert_eq!(value, json!({"a": "1", "b": "two"}));
    }

    #[tokio::test]
    async fn text_and_empty_bodies() {
        let value = read_body(Body::from("hello"), &headers("text/plain"), 1024)
            .await
            .unwrap();
        assert_eq!(value, json!("hello"));

        let value = read_body(Body::empty(), &HeaderMap::new(), 1024).await.unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn invalid_json_is_bad_request() {
        let err = read_body(Body::from("{nope"), &headers("application/json"), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let err = read_body(Body::from("x".repeat(100)), &headers("text/plain"), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[test]
    fn detects_multipart_and_upgrades() {
        assert!(is_multipart(&headers("multipart/form-data; boundary=abc")));
        assert!(!is_multipart(&headers("application/json")));

        let mut h = HeaderMap::new();
        h.insert(CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        h.insert(UPGRADE, HeaderValue::from_static("websocket"));
        assert!(is_websocket_upgrade(&h));
        assert!(!is_websocket_upgrade(&HeaderMap::new()));
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::generate(), RequestId::generate());
    }
}

//! Response handling and transformation.
//!
//! # Responsibilities
//! - Turn a bus reply into an HTTP response (status, headers, body)
//! - Pass text and binary payloads through verbatim
//! - Strip request context from JSON bodies
//! - Add cache-busting headers when configured
//!
//! # Design Decisions
//! - Status comes from the message, 200 when unset
//! - Hop-by-hop and length headers from services are ignored; the server
//!   computes its own framing

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, PRAGMA};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use serde_json::Value;

use crate::bus::BusMessage;
use crate::routing::subject::sanitize_for_client;

/// Content types whose `data` is written as-is instead of as JSON.
pub const TEXT_CONTENT_TYPES: [&str; 7] = [
    "text/plain",
    "text/xml",
    "text/html",
    "text/css",
    "text/csv",
    "text/calendar",
    "application/xml",
];

pub const BINARY_CONTENT_TYPES: [&str; 3] = [
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-excel",
    "application/zip",
];

const SKIPPED_HEADERS: [&str; 5] = [
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "upgrade",
];

/// How replies are rendered.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseOptions {
    /// Successful JSON responses carry only `data`.
    pub unwrap_data: bool,
    pub no_cache: bool,
}

/// Render a reply.
pub fn write_response(message: &BusMessage, options: ResponseOptions) -> Response {
    let status = StatusCode::from_u16(message.status_or_ok()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let content_type = message
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .and_then(|(_, value)| value.as_str())
        .map(str::to_string);
    let media = content_type
        .as_deref()
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase());

    let verbatim = media.as_deref().is_some_and(|m| {
        TEXT_CONTENT_TYPES.contains(&m) || BINARY_CONTENT_TYPES.contains(&m)
    });

    let body = if verbatim {
        match &message.data {
            Value::String(s) => Body::from(s.clone()),
            Value::Null => Body::empty(),
            other => Body::from(other.to_string()),
        }
    } else {
        let value = if options.unwrap_data && !message.is_error() {
            message.data.clone()
        } else {
            sanitize_for_client(message)
        };
        Body::from(value.to_string())
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();

    for (name, value) in &message.headers {
        if SKIPPED_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::debug!(header = %name, "Skipping invalid response header name");
            continue;
        };
        for value in header_values(value) {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.append(name.clone(), value);
                }
                Err(_) => tracing::debug!(header = %name, "Skipping invalid response header value"),
            }
        }
    }

    if !verbatim {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
    }

    if options.no_cache {
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(EXPIRES, HeaderValue::from_static("0"));
    }

    response
}

fn header_values(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(values) => values.iter().flat_map(header_values).collect(),
        Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}

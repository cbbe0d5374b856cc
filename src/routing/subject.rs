//! Mapping between HTTP requests and bus subjects.
//!
//! # Responsibilities
//! - Derive the bus subject of a request from its method and path
//! - Build the request envelope sent over the bus
//! - Strip routing context from responses before they reach a client
//! - Recognise verb-shaped subjects coming from websocket clients

use axum::http::{HeaderMap, Method, Uri};
use serde_json::{Map, Value};

use crate::bus::BusMessage;

/// First token of every subject derived from an HTTP request.
pub const SUBJECT_PREFIX: &str = "http";

/// Placeholder for literal dots inside path segments.
pub const DOT_PLACEHOLDER: &str = "{dot}";

/// Verbs a websocket client may address (`http.<verb>.…`).
pub const VERBS: [&str; 5] = ["get", "post", "put", "delete", "patch"];

/// Fields that carry request context and never belong in a client response.
const ROUTING_FIELDS: [&str; 7] = [
    "headers",
    "user",
    "query",
    "params",
    "path",
    "method",
    "interceptAction",
];

/// `GET /foo/bar.json` → `http.get.foo.bar{dot}json`.
pub fn derive_subject(method: &Method, path: &str, lowercase: bool) -> String {
    let mut tokens = vec![SUBJECT_PREFIX.to_string(), method.as_str().to_lowercase()];
    tokens.extend(
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.replace('.', DOT_PLACEHOLDER)),
    );

    let subject = tokens.join(".");
    if lowercase {
        subject.to_lowercase()
    } else {
        subject
    }
}

/// Build the bus envelope of an HTTP request.
pub fn build_envelope(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    data: Value,
    req_id: &str,
    user: Option<Value>,
) -> BusMessage {
    BusMessage {
        req_id: req_id.to_string(),
        method: Some(method.as_str().to_string()),
        path: Some(uri.path().to_string()),
        query: uri.query().map(parse_query).unwrap_or_default(),
        headers: headers_to_map(headers),
        data,
        user,
        ..BusMessage::default()
    }
}

/// Parse `a=1&b=2&b=3` into `{a: "1", b: ["2", "3"]}`.
pub fn parse_query(query: &str) -> Map<String, Value> {
    let mut map = Map::new();

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let value = Value::String(value.into_owned());
        match map.get_mut(key.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }

    map
}

/// Lower-cased header names to string values. Repeated headers are joined
/// with `, `; values that are not valid text are dropped.
pub fn headers_to_map(headers: &HeaderMap) -> Map<String, Value> {
    let mut map = Map::new();

    for name in headers.keys() {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if !values.is_empty() {
            map.insert(name.as_str().to_string(), Value::String(values.join(", ")));
        }
    }

    map
}

/// Copy of a message without request context. Applying it twice yields the
/// same value.
pub fn sanitize_for_client(message: &BusMessage) -> Value {
    strip_routing_fields(message.to_value())
}

/// Remove request context fields from a serialized message.
pub fn strip_routing_fields(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        for field in ROUTING_FIELDS {
            map.remove(field);
        }
    }
    value
}

/// `http.post.foo.bar` → `("POST", "/foo/bar")`. `None` for anything that is
/// not `http.<verb>[.<segment>...]`.
pub fn parse_verb_subject(subject: &str) -> Option<(String, String)> {
    let mut tokens = subject.split('.');
    if tokens.next()? != SUBJECT_PREFIX {
        return None;
    }
    let verb = tokens.next()?;

    if !VERBS.contains(&verb.to_lowercase().as_str()) {
        return None;
    }

    let path = format!(
        "/{}",
        tokens
            .map(|t| t.replace(DOT_PLACEHOLDER, "."))
            .collect::<Vec<_>>()
            .join("/")
    );
    Some((verb.to_uppercase(), path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derives_subjects() {
        assert_eq!(derive_subject(&Method::GET, "/foo", true), "http.get.foo");
        assert_eq!(derive_subject(&Method::POST, "/", true), "http.post");
        assert_eq!(
            derive_subject(&Method::GET, "/foo/bar.json", true),
            "http.get.foo.bar{dot}json"
        );
        assert_eq!(derive_subject(&Method::GET, "//a//b/", true), "http.get.a.b");
    }

    #[test]
    fn case_normalization_is_configurable() {
        assert_eq!(derive_subject(&Method::GET, "/Foo/BAR", true), "http.get.foo.bar");
        assert_eq!(derive_subject(&Method::GET, "/Foo/BAR", false), "http.get.Foo.BAR");
    }

    #[test]
    fn query_collects_repeated_keys() {
        let query = parse_query("a=1&b=2&b=3&c=hello%20world");
        assert_eq!(query["a"], json!("1"));
        assert_eq!(query["b"], json!(["2", "3"]));
        assert_eq!(query["c"], json!("hello world"));
    }

    #[test]
    fn envelope_carries_request_context() {
        let uri: Uri = "/foo?bar=baz".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-custom", "value".parse().unwrap());

        let envelope = build_envelope(
            &Method::GET,
            &uri,
            &headers,
            json!({"a": 1}),
            "req-1",
            Some(json!({})),
        );

        assert_eq!(envelope.req_id, "req-1");
        assert_eq!(envelope.method.as_deref(), Some("GET"));
        assert_eq!(envelope.path.as_deref(), Some("/foo"));
        assert_eq!(envelope.query["bar"], json!("baz"));
        assert_eq!(envelope.headers["x-custom"], json!("value"));
        assert_eq!(envelope.user, Some(json!({})));
    }

    #[test]
    fn sanitize_strips_context_and_is_idempotent() {
        let message: BusMessage = serde_json::from_value(json!({
            "reqId": "r",
            "status": 200,
            "data": {"foo": "bar"},
            "headers": {"a": "b"},
            "user": {"id": "u"},
            "query": {"q": "1"},
            "params": {"p": "1"},
            "path": "/foo",
            "method": "GET",
            "interceptAction": "respond"
        }))
        .unwrap();

        let once = sanitize_for_client(&message);
        assert_eq!(once, json!({"reqId": "r", "status": 200, "data": {"foo": "bar"}}));
        assert_eq!(strip_routing_fields(once.clone()), once);
        // the input is left untouched
        assert!(message.user.is_some());
    }

    #[test]
    fn verb_subjects() {
        assert_eq!(
            parse_verb_subject("http.post.foo.bar"),
            Some(("POST".to_string(), "/foo/bar".to_string()))
        );
        assert_eq!(
            parse_verb_subject("http.get"),
            Some(("GET".to_string(), "/".to_string()))
        );
        assert_eq!(parse_verb_subject("http"), None);
        assert_eq!(parse_verb_subject("hello.joe"), None);
    }

    #[test]
    fn verb_subjects_outside_http_are_refused() {
        assert_eq!(parse_verb_subject("user-service.get.secret"), None);
        assert_eq!(parse_verb_subject("HTTP.get.secret"), None);
        assert_eq!(parse_verb_subject("options.http.get.foo"), None);
    }
}

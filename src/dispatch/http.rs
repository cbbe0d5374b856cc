//! HTTP-proxied backends.
//!
//! # Responsibilities
//! - POST translated messages as JSON to backends that negotiated HTTP
//! - Stream multipart bodies through untouched, message travelling in a header
//! - Map transport failures to synthesized 500 errors
//!
//! # Design Decisions
//! - Multipart bodies are never buffered; hyper pulls from the client
//!   connection as the backend reads, which gives backpressure for free
//! - The message header is restricted to visible ASCII
//! - Backend 5xx responses are not passed through; they become 500s

use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::bus::BusMessage;
use crate::error::GatewayError;

/// Header carrying the translated message alongside a streamed body.
pub const MESSAGE_HEADER: &str = "data";

/// Limit on backend response bodies read back into a message.
const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

/// A request body to be streamed to the backend as-is.
#[derive(Debug)]
pub struct StreamedBody {
    pub body: Body,
    pub method: Method,
    pub content_type: HeaderValue,
    pub content_length: Option<HeaderValue>,
}

/// Client for HTTP backends.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            timeout,
        }
    }

    /// POST the message as JSON.
    pub async fn send_json(
        &self,
        url: &str,
        message: &BusMessage,
        content_type: Option<&HeaderValue>,
    ) -> Result<BusMessage, GatewayError> {
        let body = serde_json::to_vec(message)
            .map_err(|e| GatewayError::Unexpected(format!("serializing message: {e}")))?;

        let content_type = content_type
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));

        let request = Request::builder()
            .method(Method::POST)
            .uri(parse_url(url)?)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        self.execute(url, request).await
    }

    /// Stream a raw body, message without its body in the `data` header.
    pub async fn stream(
        &self,
        url: &str,
        message: &BusMessage,
        streamed: StreamedBody,
    ) -> Result<BusMessage, GatewayError> {
        let mut builder = Request::builder()
            .method(streamed.method)
            .uri(parse_url(url)?)
            .header(CONTENT_TYPE, streamed.content_type)
            .header(MESSAGE_HEADER, message_header(message)?);

        if let Some(length) = streamed.content_length {
            builder = builder.header(CONTENT_LENGTH, length);
        }

        let request = builder
            .body(streamed.body)
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        self.execute(url, request).await
    }

    async fn execute(&self, url: &str, request: Request<Body>) -> Result<BusMessage, GatewayError> {
        let response = match tokio::time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!(url = %url, error = %e, "HTTP backend request failed");
                return Err(GatewayError::Upstream(format!("request to {url} failed: {e}")));
            }
            Err(_) => {
                tracing::error!(url = %url, timeout = ?self.timeout, "HTTP backend timed out");
                return Err(GatewayError::Upstream(format!(
                    "request to {url} timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let status = response.status();
        let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| GatewayError::Upstream(format!("reading response from {url}: {e}")))?;

        if !status.is_success() && !status.is_client_error() {
            tracing::error!(url = %url, status = %status, "HTTP backend failed");
            return Err(GatewayError::Upstream(format!("{url} responded with {status}")));
        }

        let mut message: BusMessage = serde_json::from_slice(&bytes).map_err(|e| {
            tracing::error!(url = %url, status = %status, error = %e, "HTTP backend returned invalid JSON");
            GatewayError::Upstream(format!("invalid response from {url}: {e}"))
        })?;

        if message.status.is_none() {
            message.status = Some(status.as_u16());
        }

        if message.is_error() {
            return Err(GatewayError::Reply(Box::new(message)));
        }
        Ok(message)
    }
}

fn parse_url(url: &str) -> Result<Uri, GatewayError> {
    url.parse::<Uri>()
        .map_err(|e| GatewayError::Upstream(format!("invalid backend url {url:?}: {e}")))
}

/// JSON of the message minus its body, restricted to ASCII.
pub fn message_header(message: &BusMessage) -> Result<HeaderValue, GatewayError> {
    let mut header = message.clone();
    header.data = serde_json::Value::Null;

    let json = serde_json::to_string(&header)
        .map_err(|e| GatewayError::Unexpected(format!("serializing message: {e}")))?;
    let ascii: String = json.chars().filter(|c| c.is_ascii() && !c.is_ascii_control()).collect();

    HeaderValue::from_str(&ascii).map_err(|e| GatewayError::Unexpected(e.to_string()))
}

//! Backend dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! (subject, message, optional streamed body)
//!     → negotiator.rs (options.<subject> → BUS | HTTP{url})
//!     → BUS:  bus request with timeout (unanswered → 404)
//!     → HTTP: http.rs (JSON POST, or multipart stream)
//!     → reply with the caller's reqId
//! ```
//!
//! # Design Decisions
//! - Negotiation happens per request; nothing is cached
//! - Internal callers (websocket clients opting out) may skip negotiation
//! - A streamed body aimed at a bus-native backend is dropped

pub mod http;
pub mod negotiator;

pub use self::http::{HttpBackend, StreamedBody, MESSAGE_HEADER};
pub use negotiator::{BackendDescriptor, Negotiator};

use std::time::Duration;

use axum::http::HeaderValue;

use crate::bus::{ensure_req_id, BusClient, BusError, BusMessage};
use crate::error::GatewayError;
use crate::observability::metrics;

/// One request to deliver to a backend.
#[derive(Debug)]
pub struct DispatchRequest {
    pub subject: String,
    pub message: BusMessage,
    /// Raw body for multipart requests.
    pub stream: Option<StreamedBody>,
    /// Content type of the original request, forwarded to HTTP backends.
    pub content_type: Option<HeaderValue>,
    pub skip_negotiation: bool,
    /// Overrides the default bus timeout.
    pub timeout: Option<Duration>,
}

impl DispatchRequest {
    pub fn new(subject: impl Into<String>, message: BusMessage) -> Self {
        Self {
            subject: subject.into(),
            message,
            stream: None,
            content_type: None,
            skip_negotiation: false,
            timeout: None,
        }
    }
}

/// Delivers requests to bus-native or HTTP backends.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: BusClient,
    negotiator: Negotiator,
    http: HttpBackend,
}

impl Dispatcher {
    pub fn new(client: BusClient, http: HttpBackend) -> Self {
        Self {
            negotiator: Negotiator::new(client.clone()),
            client,
            http,
        }
    }

    /// Negotiate (unless skipped) and deliver. The result always carries the
    /// request's reqId.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<BusMessage, GatewayError> {
        let DispatchRequest {
            subject,
            mut message,
            stream,
            content_type,
            skip_negotiation,
            timeout,
        } = request;
        let req_id = message.req_id.clone();

        let backend = if skip_negotiation {
            BackendDescriptor::Bus
        } else {
            self.negotiator.negotiate(&subject, &message).await?
        };

        tracing::debug!(req_id = %req_id, subject = %subject, backend = ?backend, "Dispatching");

        let result = match backend {
            BackendDescriptor::Bus => {
                if stream.is_some() {
                    tracing::debug!(
                        req_id = %req_id,
                        subject = %subject,
                        "Dropping streamed body for bus backend"
                    );
                    message.data = serde_json::Value::Null;
                }
                self.dispatch_bus(&subject, message, timeout).await
            }
            BackendDescriptor::Http { url } => match stream {
                Some(streamed) => self.http.stream(&url, &message, streamed).await,
                None => self.http.send_json(&url, &message, content_type.as_ref()).await,
            },
        };

        match result {
            Ok(mut reply) => {
                ensure_req_id(&mut reply, &req_id);
                Ok(reply)
            }
            Err(GatewayError::Reply(mut reply)) => {
                ensure_req_id(&mut reply, &req_id);
                Err(GatewayError::Reply(reply))
            }
            Err(e) => Err(e),
        }
    }

    async fn dispatch_bus(
        &self,
        subject: &str,
        message: BusMessage,
        timeout: Option<Duration>,
    ) -> Result<BusMessage, GatewayError> {
        let timeout = timeout.unwrap_or_else(|| self.client.timeout());

        match self.client.request_with_timeout(subject, message, timeout).await {
            Ok(reply) => Ok(reply),
            Err(e @ (BusError::NoResponders(_) | BusError::Timeout { .. })) => {
                tracing::debug!(subject = %subject, error = %e, "No response from bus backend");
                if matches!(e, BusError::Timeout { .. }) {
                    metrics::record_bus_timeout();
                }
                Err(GatewayError::NotFound {
                    subject: subject.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

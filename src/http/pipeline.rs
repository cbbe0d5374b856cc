//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! HTTP request
//!     1. derive subject, build envelope (multipart bodies left streaming)
//!     2. public route? anonymous : decode token
//!     3. rewrite subject for the identity
//!     4. request interceptors ── respond ──────────────┐
//!     5. negotiate + dispatch                          │
//!     6. response interceptors                         │
//!     7. sanitize + write response ◀───────────────────┘
//! ```
//!
//! # Design Decisions
//! - Every failure becomes a bus-shaped error envelope with the request id
//! - Internal failures are always logged, exposed to clients only on request
//! - Rejected tokens expire the auth cookie and evict websocket sessions

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::Request;
use axum::response::Response;
use serde_json::Value;

use crate::auth::{evict_sessions, expired_cookie, extract_token, is_rejection, Identity, TokenDecoder};
use crate::bus::{BusClient, BusError, BusMessage};
use crate::dispatch::{DispatchRequest, Dispatcher, StreamedBody};
use crate::error::GatewayError;
use crate::http::request::{is_multipart, read_body, RequestId};
use crate::http::response::{write_response, ResponseOptions};
use crate::interceptor::InterceptorChain;
use crate::routing::{build_envelope, derive_subject, SubjectRewriter};

/// Settings the pipeline reads per request.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub lowercase_subjects: bool,
    pub public_routes: HashSet<String>,
    pub cookie_name: String,
    pub unregister_subject: String,
    pub max_body_size: usize,
    pub expose_trace: bool,
    pub response: ResponseOptions,
}

/// The HTTP request lifecycle.
pub struct Pipeline {
    settings: PipelineSettings,
    client: BusClient,
    decoder: Arc<dyn TokenDecoder>,
    rewriter: SubjectRewriter,
    interceptors: InterceptorChain,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        client: BusClient,
        decoder: Arc<dyn TokenDecoder>,
        rewriter: SubjectRewriter,
        interceptors: InterceptorChain,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            settings,
            client,
            decoder,
            rewriter,
            interceptors,
            dispatcher,
        }
    }

    /// Run one request to completion.
    pub async fn handle(&self, req_id: &RequestId, request: Request<Body>) -> Response {
        let result = self.process(req_id.as_str(), request).await;

        let message = match result {
            Ok(message) => message,
            Err(err) => self.render_error(req_id.as_str(), err),
        };
        write_response(&message, self.settings.response)
    }

    async fn process(&self, req_id: &str, request: Request<Body>) -> Result<BusMessage, GatewayError> {
        let (parts, body) = request.into_parts();

        let derived = derive_subject(&parts.method, parts.uri.path(), self.settings.lowercase_subjects);

        let (data, stream) = if is_multipart(&parts.headers) {
            (Value::Null, Some(streamed_body(&parts, body)?))
        } else {
            (read_body(body, &parts.headers, self.settings.max_body_size).await?, None)
        };

        let identity = self.resolve_identity(req_id, &parts).await?;
        let identity_id = identity.id();
        let envelope = build_envelope(
            &parts.method,
            &parts.uri,
            &parts.headers,
            data,
            req_id,
            Some(identity.into_value()),
        );

        let subject = self.rewriter.rewrite(identity_id.as_deref(), &derived);

        tracing::debug!(
            req_id = %req_id,
            method = %parts.method,
            path = %parts.uri.path(),
            subject = %subject,
            "Handling request"
        );

        let message = self
            .interceptors
            .run_request_phase(&subject, envelope.clone())
            .await?;

        if message.is_respond() {
            tracing::debug!(req_id = %req_id, subject = %subject, "Interceptor responded");
            return Ok(message);
        }

        let outcome = self
            .dispatcher
            .dispatch(DispatchRequest {
                subject: subject.clone(),
                message,
                stream,
                content_type: parts.headers.get(CONTENT_TYPE).cloned(),
                skip_negotiation: false,
                timeout: None,
            })
            .await;

        self.interceptors
            .run_response_phase(&subject, &envelope, outcome)
            .await
    }

    /// Public routes and token-less requests are anonymous. A rejected token
    /// expires the cookie and evicts the token's websocket sessions.
    async fn resolve_identity(&self, req_id: &str, parts: &Parts) -> Result<Identity, GatewayError> {
        if self.settings.public_routes.contains(parts.uri.path()) {
            return Ok(Identity::anonymous());
        }

        let Some(token) = extract_token(&parts.headers, &self.settings.cookie_name) else {
            return Ok(Identity::anonymous());
        };

        match self.decoder.decode(req_id, &token).await {
            Ok(identity) => Ok(identity),
            Err(err) if is_rejection(&err) => {
                tracing::debug!(req_id = %req_id, error = %err, "Token rejected");
                evict_sessions(&self.client, &self.settings.unregister_subject, req_id, &token);

                match err {
                    BusError::ErrorReply { mut reply, .. } => {
                        reply.headers.insert(
                            "set-cookie".to_string(),
                            Value::String(expired_cookie(&self.settings.cookie_name)),
                        );
                        Err(GatewayError::AuthFailure(reply))
                    }
                    other => Err(other.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn render_error(&self, req_id: &str, err: GatewayError) -> BusMessage {
        if err.is_internal() {
            tracing::error!(req_id = %req_id, error = %err, "Request failed");
        } else {
            tracing::debug!(req_id = %req_id, error = %err, status = %err.status_code(), "Request rejected");
        }
        err.to_message(req_id, self.settings.expose_trace)
    }
}

fn streamed_body(parts: &Parts, body: Body) -> Result<StreamedBody, GatewayError> {
    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .cloned()
        .ok_or_else(|| GatewayError::BadRequest("multipart request without content-type".into()))?;

    Ok(StreamedBody {
        body,
        method: parts.method.clone(),
        content_type,
        content_length: parts.headers.get(CONTENT_LENGTH).cloned(),
    })
}

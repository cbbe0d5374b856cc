//! Gateway error taxonomy.
//!
//! Every failure of the request pipeline ends up as one of these variants and
//! is rendered to the client as a bus-shaped error envelope
//! `{status, reqId, error: {code, title, stacktrace?}}`.

use axum::http::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::bus::{ensure_req_id, BusError, BusMessage};

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Nobody answered on the subject within the timeout.
    #[error("no response from {subject}")]
    NotFound { subject: String },

    /// The identity service rejected the caller's token. The reply is passed
    /// through verbatim (plus an expired auth cookie).
    #[error("authentication failed with status {}", .0.status_or_ok())]
    AuthFailure(Box<BusMessage>),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// An HTTP backend could not be reached or answered garbage.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A service or interceptor answered with an error status.
    #[error("downstream replied with status {}", .0.status_or_ok())]
    Reply(Box<BusMessage>),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl GatewayError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) | Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AuthFailure(reply) | Self::Reply(reply) => {
                StatusCode::from_u16(reply.status_or_ok()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Machine readable error code.
    pub fn code(&self) -> &str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Unexpected(_) => "INTERNAL_SERVER_ERROR",
            Self::AuthFailure(reply) | Self::Reply(reply) => {
                reply.error_code().unwrap_or("INTERNAL_SERVER_ERROR")
            }
        }
    }

    /// Whether this is a failure of the gateway itself rather than an answer
    /// from a downstream service.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Unexpected(_))
    }

    /// Render as a bus error envelope carrying `req_id`.
    pub fn to_message(&self, req_id: &str, expose_trace: bool) -> BusMessage {
        match self {
            Self::AuthFailure(reply) | Self::Reply(reply) => {
                let mut message = (**reply).clone();
                ensure_req_id(&mut message, req_id);
                message
            }
            other => {
                let mut message = BusMessage::error_reply(
                    req_id,
                    other.status_code().as_u16(),
                    other.code(),
                    &other.to_string(),
                );
                if expose_trace && other.is_internal() {
                    if let Some(Value::Object(error)) = message.error.as_mut() {
                        error.insert("stacktrace".into(), Value::String(format!("{other:?}")));
                    }
                }
                message
            }
        }
    }
}

impl From<BusError> for GatewayError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::ErrorReply { reply, .. } => Self::Reply(reply),
            BusError::InvalidSubject(subject) => Self::BadRequest(format!("invalid subject {subject:?}")),
            other => Self::Unexpected(other.to_string()),
        }
    }
}

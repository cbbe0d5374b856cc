//! Websocket connection task.
//!
//! # Responsibilities
//! - Authenticate a freshly upgraded socket and register it
//! - Forward inbound frames to the bus and push the replies back
//! - Deregister the connection when either side closes
//!
//! # Data Flow
//! ```text
//! upgrade ─▶ decode token ─▶ identity | public-<uuid> | close(PERMISSION_DENIED)
//!                                   │
//!                        register + split socket
//!                        ┌──────────┴───────────┐
//!                   reader loop             writer task
//!            frame ─▶ handle_inbound     Outbound ─▶ socket
//!                   └─▶ dispatch ─▶ reply ─▶ Outbound
//! ```
//!
//! # Design Decisions
//! - Every inbound frame is handled in its own task; replies may arrive out
//!   of order and are correlated by `transactionId`
//! - The stored token is decoded again per frame so services always see the
//!   current identity
//! - A token rejected mid-session gets its error reply, then the socket is
//!   closed with `INVALID_TOKEN`

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::http::HeaderMap;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::auth::{extract_token, is_rejection, Identity, TokenDecoder};
use crate::bus::{BusError, BusMessage};
use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::error::GatewayError;
use crate::observability::metrics::{self, Direction};
use crate::routing::parse_verb_subject;
use crate::routing::subject::strip_routing_fields;
use crate::websocket::registry::{CloseReason, ConnectionHandle, ConnectionRegistry, Outbound};

/// User agent reported to services for websocket-originated requests.
pub const WEBSOCKET_USER_AGENT: &str = "websocket";

/// Settings the websocket bus reads per connection.
#[derive(Debug, Clone)]
pub struct WebBusSettings {
    pub allow_public_connections: bool,
    pub permission_scopes: Vec<String>,
    pub cookie_name: String,
    pub expose_trace: bool,
}

/// A request sent by a websocket client.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    pub subject: String,
    #[serde(default)]
    pub message: BusMessage,
    #[serde(default)]
    pub skip_options_request: bool,
    /// Bus timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl InboundFrame {
    /// `res.<transactionId>.<subject>`.
    pub fn response_subject(&self) -> String {
        let transaction_id = match self.message.extra.get("transactionId") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        format!("res.{transaction_id}.{}", self.subject)
    }
}

/// Websocket side of the gateway: accepts sockets and serves their requests.
pub struct WebBus {
    settings: WebBusSettings,
    registry: Arc<ConnectionRegistry>,
    decoder: Arc<dyn TokenDecoder>,
    dispatcher: Dispatcher,
}

impl WebBus {
    pub fn new(
        settings: WebBusSettings,
        registry: Arc<ConnectionRegistry>,
        decoder: Arc<dyn TokenDecoder>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            settings,
            registry,
            decoder,
            dispatcher,
        }
    }

    /// Token presented on the upgrade request.
    pub fn handshake_token(&self, headers: &HeaderMap) -> Option<String> {
        extract_token(headers, &self.settings.cookie_name)
    }

    /// Drive an upgraded socket until it closes.
    pub async fn accept(self: Arc<Self>, mut socket: WebSocket, token: Option<String>) {
        let (identity, token) = match self.authenticate(token).await {
            Ok(authenticated) => authenticated,
            Err(reason) => {
                tracing::debug!(reason = reason.as_str(), "Refusing websocket connection");
                if let Err(e) = socket.send(Message::Close(Some(close_frame(reason)))).await {
                    tracing::debug!(error = %e, "Websocket close frame could not be sent");
                }
                return;
            }
        };

        let (handle, mut outbound) = ConnectionHandle::new(identity.clone(), token);
        let connection_id = handle.id();
        self.registry.register(handle.clone());
        metrics::websocket_connected();
        tracing::debug!(identity = %identity, connection_id = %connection_id, "Websocket connected");

        let (mut sink, mut stream) = socket.split();

        let mut writer = tokio::spawn(async move {
            while let Some(item) = outbound.recv().await {
                let (frame, closing) = match item {
                    Outbound::Text(text) => (Message::Text(text.into()), false),
                    Outbound::Close(reason) => (Message::Close(Some(close_frame(reason))), true),
                };
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Websocket write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader = async {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text.as_str().to_string(),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::debug!(connection_id = %connection_id, "Ignoring non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::debug!(connection_id = %connection_id, error = %e, "Websocket read failed");
                        break;
                    }
                };

                let bus = self.clone();
                let handle = handle.clone();
                tokio::spawn(async move { bus.handle_inbound(&handle, &text).await });
            }
        };

        tokio::select! {
            _ = reader => {}
            _ = &mut writer => {}
        }
        writer.abort();

        self.registry.deregister(&identity, connection_id);
        metrics::websocket_disconnected();
        tracing::debug!(identity = %identity, connection_id = %connection_id, "Websocket disconnected");
    }

    /// Resolve the identity a connection registers under, and the token kept
    /// for later requests.
    async fn authenticate(&self, token: Option<String>) -> Result<(String, Option<String>), CloseReason> {
        if let Some(token) = token {
            let req_id = Uuid::new_v4().to_string();
            match self.decoder.decode(&req_id, &token).await {
                Ok(identity) => {
                    if let Some(id) = identity.id() {
                        if !identity.has_scopes(&self.settings.permission_scopes) {
                            tracing::debug!(identity = %id, "Identity lacks websocket scopes");
                            return Err(CloseReason::PermissionDenied);
                        }
                        return Ok((id, Some(token)));
                    }
                }
                Err(e) if is_rejection(&e) => {
                    tracing::debug!(req_id = %req_id, error = %e, "Websocket token rejected");
                }
                Err(e) => {
                    tracing::warn!(req_id = %req_id, error = %e, "Websocket token could not be decoded");
                    return Err(CloseReason::InvalidToken);
                }
            }
        }

        if self.settings.allow_public_connections {
            Ok((Identity::public_id(), None))
        } else {
            Err(CloseReason::PermissionDenied)
        }
    }

    /// Serve one inbound frame and push the reply to the connection.
    pub async fn handle_inbound(&self, connection: &ConnectionHandle, text: &str) {
        metrics::record_websocket_message(Direction::Inbound);

        let mut frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(connection_id = %connection.id(), error = %e, "Ignoring malformed websocket frame");
                return;
            }
        };
        if frame.message.req_id.is_empty() {
            frame.message.req_id = Uuid::new_v4().to_string();
        }
        let req_id = frame.message.req_id.clone();
        let response_subject = frame.response_subject();

        let user = match self.current_user(connection, &req_id).await {
            Ok(user) => user,
            Err(e) => {
                let rejected = is_rejection(&e);
                self.reply(connection, &response_subject, &req_id, Err(e.into()));
                if rejected {
                    connection.close(CloseReason::InvalidToken);
                }
                return;
            }
        };

        let outcome = self.forward(connection, frame, user).await;
        self.reply(connection, &response_subject, &req_id, outcome);
    }

    async fn current_user(&self, connection: &ConnectionHandle, req_id: &str) -> Result<Value, BusError> {
        match connection.token() {
            Some(token) => Ok(self.decoder.decode(req_id, token).await?.into_value()),
            None => Ok(Identity::anonymous().into_value()),
        }
    }

    async fn forward(
        &self,
        connection: &ConnectionHandle,
        frame: InboundFrame,
        user: Value,
    ) -> Result<BusMessage, GatewayError> {
        let InboundFrame {
            subject,
            mut message,
            skip_options_request,
            timeout,
        } = frame;

        let Some((method, path)) = parse_verb_subject(&subject) else {
            return Err(GatewayError::NotFound { subject });
        };

        let mut headers = Map::new();
        if let Some(token) = connection.token() {
            headers.insert(
                "cookie".to_string(),
                Value::String(format!("{}={token}", self.settings.cookie_name)),
            );
        }
        headers.insert("user-agent".to_string(), Value::String(WEBSOCKET_USER_AGENT.to_string()));

        message.method = Some(method);
        message.path = Some(path);
        message.headers = headers;
        message.user = Some(user);

        tracing::debug!(
            req_id = %message.req_id,
            identity = %connection.identity(),
            subject = %subject,
            "Handling websocket request"
        );

        let mut request = DispatchRequest::new(subject, message);
        request.skip_negotiation = skip_options_request;
        request.timeout = timeout.filter(|ms| *ms > 0).map(Duration::from_millis);
        self.dispatcher.dispatch(request).await
    }

    fn reply(
        &self,
        connection: &ConnectionHandle,
        response_subject: &str,
        req_id: &str,
        outcome: Result<BusMessage, GatewayError>,
    ) {
        let message = match outcome {
            Ok(message) => message,
            Err(err) => {
                if err.is_internal() {
                    tracing::error!(req_id = %req_id, error = %err, "Websocket request failed");
                } else {
                    tracing::debug!(req_id = %req_id, error = %err, "Websocket request rejected");
                }
                err.to_message(req_id, self.settings.expose_trace)
            }
        };

        let mut body = strip_routing_fields(message.to_value());
        if let Value::Object(map) = &mut body {
            map.insert("subject".to_string(), Value::String(response_subject.to_string()));
        }

        if connection.send_text(body.to_string()) {
            metrics::record_websocket_message(Direction::Outbound);
        } else {
            tracing::debug!(req_id = %req_id, connection_id = %connection.id(), "Connection gone, dropping reply");
        }
    }
}

fn close_frame(reason: CloseReason) -> CloseFrame {
    CloseFrame {
        code: reason.code(),
        reason: reason.as_str().into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_inbound_frames() {
        let frame: InboundFrame = serde_json::from_value(json!({
            "subject": "http.get.foo",
            "message": {"reqId": "r", "transactionId": "t-1", "data": {"a": 1}},
            "skipOptionsRequest": true,
            "timeout": 500
        }))
        .unwrap();

        assert_eq!(frame.message.req_id, "r");
        assert!(frame.skip_options_request);
        assert_eq!(frame.timeout, Some(500));
        assert_eq!(frame.response_subject(), "res.t-1.http.get.foo");
    }

    #[test]
    fn numeric_and_missing_transaction_ids() {
        let frame: InboundFrame = serde_json::from_value(json!({
            "subject": "http.get.foo",
            "message": {"transactionId": 7}
        }))
        .unwrap();
        assert_eq!(frame.response_subject(), "res.7.http.get.foo");
        assert!(!frame.skip_options_request);

        let frame: InboundFrame = serde_json::from_value(json!({"subject": "http.get.foo"})).unwrap();
        assert_eq!(frame.response_subject(), "res..http.get.foo");
    }

    #[test]
    fn close_frames_carry_code_and_reason() {
        let frame = close_frame(CloseReason::PermissionDenied);
        assert_eq!(frame.code, 4003);
        assert_eq!(frame.reason.as_str(), "PERMISSION_DENIED");
    }
}

//! Token decoding.
//!
//! # Responsibilities
//! - Find the caller's token (bearer header or auth cookie)
//! - Resolve it to an [`Identity`] through the identity service on the bus
//! - Expire the auth cookie and evict websocket sessions of rejected tokens
//!
//! # Design Decisions
//! - Decoding is delegated; the gateway never inspects token contents
//! - The decode call skips protocol negotiation and goes straight to the bus
//! - Rejection side effects are the caller's job; decoding itself is pure

pub mod identity;
pub mod token;

pub use identity::Identity;
pub use token::{cookie_token, expired_cookie, extract_token, DELETED_COOKIE_VALUE};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bus::{BusClient, BusError, BusMessage};

/// Resolves tokens to identities.
#[async_trait]
pub trait TokenDecoder: Send + Sync {
    async fn decode(&self, req_id: &str, token: &str) -> Result<Identity, BusError>;
}

/// Decoder backed by an identity service on the bus.
///
/// Request `{reqId, data: <token>}`, reply `{status, data: <identity>}` or an
/// error reply with status 401/403.
#[derive(Debug, Clone)]
pub struct BusTokenDecoder {
    client: BusClient,
    subject: String,
}

impl BusTokenDecoder {
    pub fn new(client: BusClient, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl TokenDecoder for BusTokenDecoder {
    async fn decode(&self, req_id: &str, token: &str) -> Result<Identity, BusError> {
        let request = BusMessage::new(req_id).with_data(Value::String(token.to_string()));
        let reply = self.client.request(&self.subject, request).await?;

        if reply.data.is_null() {
            return Ok(Identity::anonymous());
        }
        Ok(Identity::new(reply.data))
    }
}

/// Whether a decode failure means the token was rejected.
pub fn is_rejection(err: &BusError) -> bool {
    matches!(err.reply_status(), Some(401) | Some(403))
}

/// Ask the websocket bus to drop every connection holding `token`. Runs in the
/// background; failures are only logged.
pub fn evict_sessions(client: &BusClient, unregister_subject: &str, req_id: &str, token: &str) {
    let client = client.clone();
    let subject = unregister_subject.to_string();
    let request = BusMessage::new(req_id).with_data(json!({ "jwt": token }));
    let req_id = req_id.to_string();

    tokio::spawn(async move {
        if let Err(e) = client.request(&subject, request).await {
            tracing::debug!(req_id = %req_id, error = %e, "Websocket eviction failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Delivery, LocalBus};
    use std::sync::Arc;
    use std::time::Duration;

    fn client() -> BusClient {
        BusClient::new(Arc::new(LocalBus::new()), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn decodes_through_the_bus() {
        let client = client();
        client
            .serve("auth-service.decode-token", |d: Delivery| async move {
                assert_eq!(d.message.data, json!("a-token"));
                BusMessage::new(d.message.req_id)
                    .with_status(200)
                    .with_data(json!({"id": "user-1"}))
            })
            .await
            .unwrap();

        let decoder = BusTokenDecoder::new(client, "auth-service.decode-token");
        let identity = decoder.decode("r", "a-token").await.unwrap();
        assert_eq!(identity.id().as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn rejections_are_recognised() {
        let client = client();
        client
            .serve("auth-service.decode-token", |d: Delivery| async move {
                BusMessage::error_reply(d.message.req_id, 403, "auth-service.403.1", "Invalid token")
            })
            .await
            .unwrap();

        let decoder = BusTokenDecoder::new(client, "auth-service.decode-token");
        let err = decoder.decode("r", "bad").await.unwrap_err();
        assert!(is_rejection(&err));
    }

    #[tokio::test]
    async fn eviction_sends_the_token() {
        let client = client();
        let mut subscription = client.subscribe("web-bus.unregister-client").await.unwrap();

        evict_sessions(&client, "web-bus.unregister-client", "r", "tok");

        let delivery = tokio::time::timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.message.data, json!({"jwt": "tok"}));
    }
}

//! Message bus abstraction.
//!
//! # Responsibilities
//! - Define the request/reply/publish/subscribe primitive the gateway talks to
//! - Provide [`BusClient`], the handle every other subsystem uses
//! - Turn error-status replies into typed errors
//! - Run long-lived handler tasks for bus endpoints the gateway itself serves
//!
//! # Design Decisions
//! - The transport is a trait object so the wire protocol stays opaque
//! - Subscriptions are plain channels; each delivery is handled in its own task
//! - A request nobody listens to fails immediately with `NoResponders`
//!
//! # Data Flow
//! ```text
//! caller ──request──▶ BusClient ──▶ dyn Bus ──▶ Subscription(s)
//!                                                  │
//! caller ◀──reply / ErrorReply ◀── BusClient ◀─────┘ Replier
//! ```

pub mod local;
pub mod message;
pub mod subject;

pub use local::LocalBus;
pub use message::{ensure_req_id, BusMessage, InterceptAction};
pub use subject::SubjectPattern;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Errors raised by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("no responders for subject {0}")]
    NoResponders(String),

    #[error("request to {subject} timed out after {timeout:?}")]
    Timeout { subject: String, timeout: Duration },

    #[error("{subject} replied with status {}", .reply.status_or_ok())]
    ErrorReply {
        subject: String,
        reply: Box<BusMessage>,
    },

    #[error("invalid subject: {0:?}")]
    InvalidSubject(String),

    #[error("bus is closed")]
    Closed,
}

impl BusError {
    /// True when nobody answered, either because nobody listens or because
    /// the answer did not arrive in time.
    pub fn is_unanswered(&self) -> bool {
        matches!(self, Self::NoResponders(_) | Self::Timeout { .. })
    }

    /// Status of an error reply, if this is one.
    pub fn reply_status(&self) -> Option<u16> {
        match self {
            Self::ErrorReply { reply, .. } => Some(reply.status_or_ok()),
            _ => None,
        }
    }
}

/// One message delivered to a subscription.
#[derive(Debug)]
pub struct Delivery {
    pub subject: String,
    /// `:param` captures of the subscription pattern.
    pub params: Map<String, Value>,
    pub message: BusMessage,
    reply: Option<Replier>,
}

impl Delivery {
    pub fn new(
        subject: String,
        params: Map<String, Value>,
        message: BusMessage,
        reply: Option<Replier>,
    ) -> Self {
        Self {
            subject,
            params,
            message,
            reply,
        }
    }

    /// Take the reply handle, leaving `None` behind.
    pub fn take_reply(&mut self) -> Option<Replier> {
        self.reply.take()
    }

    /// A string capture by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)?.as_str()
    }
}

/// Reply handle of a request. Only the first reply to a request is kept.
#[derive(Debug, Clone)]
pub struct Replier {
    tx: mpsc::Sender<BusMessage>,
}

impl Replier {
    pub fn new(tx: mpsc::Sender<BusMessage>) -> Self {
        Self { tx }
    }

    /// Send the reply. Returns false when the requester already has one or
    /// stopped waiting.
    pub fn send(self, reply: BusMessage) -> bool {
        self.tx.try_send(reply).is_ok()
    }
}

/// Stream of deliveries for one subscription.
#[derive(Debug)]
pub struct Subscription {
    pattern: SubjectPattern,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub fn new(pattern: SubjectPattern, rx: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self { pattern, rx }
    }

    pub fn pattern(&self) -> &SubjectPattern {
        &self.pattern
    }

    /// Next delivery, `None` once the bus drops the subscription.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

/// The transport primitive.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Send a request and wait for the first reply.
    async fn request(
        &self,
        subject: &str,
        message: BusMessage,
        timeout: Duration,
    ) -> Result<BusMessage, BusError>;

    /// Fire-and-forget publish.
    async fn publish(&self, subject: &str, message: BusMessage) -> Result<(), BusError>;

    /// Subscribe to a pattern (see [`SubjectPattern`]).
    async fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError>;
}

/// Shared handle to the bus with a default request timeout.
#[derive(Clone)]
pub struct BusClient {
    bus: Arc<dyn Bus>,
    timeout: Duration,
}

impl std::fmt::Debug for BusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl BusClient {
    pub fn new(bus: Arc<dyn Bus>, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Request with the default timeout.
    pub async fn request(&self, subject: &str, message: BusMessage) -> Result<BusMessage, BusError> {
        self.request_with_timeout(subject, message, self.timeout).await
    }

    /// Request with an explicit timeout. Replies with status >= 400 come back
    /// as [`BusError::ErrorReply`].
    pub async fn request_with_timeout(
        &self,
        subject: &str,
        message: BusMessage,
        timeout: Duration,
    ) -> Result<BusMessage, BusError> {
        tracing::trace!(subject = %subject, req_id = %message.req_id, "Bus request");

        let reply = self.bus.request(subject, message, timeout).await?;

        if reply.is_error() {
            return Err(BusError::ErrorReply {
                subject: subject.to_string(),
                reply: Box::new(reply),
            });
        }

        Ok(reply)
    }

    pub async fn publish(&self, subject: &str, message: BusMessage) -> Result<(), BusError> {
        self.bus.publish(subject, message).await
    }

    pub async fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        self.bus.subscribe(pattern).await
    }

    /// Serve a bus endpoint: every delivery is handed to `handler` in its own
    /// task and the returned message is sent as the reply.
    ///
    /// The subscription is active once this returns. Abort the handle to stop.
    pub async fn serve<F, Fut>(&self, pattern: &str, handler: F) -> Result<JoinHandle<()>, BusError>
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BusMessage> + Send + 'static,
    {
        let mut subscription = self.subscribe(pattern).await?;
        let handler = Arc::new(handler);
        let pattern = pattern.to_string();

        Ok(tokio::spawn(async move {
            while let Some(mut delivery) = subscription.next().await {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let reply = delivery.take_reply();
                    let response = handler(delivery).await;
                    if let Some(reply) = reply {
                        reply.send(response);
                    }
                });
            }
            tracing::debug!(pattern = %pattern, "Bus endpoint stopped");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> BusClient {
        BusClient::new(Arc::new(LocalBus::new()), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn serve_replies_to_requests() {
        let client = client();
        let _endpoint = client
            .serve("echo.:name", |delivery: Delivery| async move {
                let name = delivery.param("name").unwrap_or_default().to_string();
                BusMessage::new(delivery.message.req_id)
                    .with_status(200)
                    .with_data(json!({ "name": name }))
            })
            .await
            .unwrap();

        let reply = client.request("echo.bob", BusMessage::new("1")).await.unwrap();
        assert_eq!(reply.data["name"], "bob");
        assert_eq!(reply.req_id, "1");
    }

    #[tokio::test]
    async fn error_status_becomes_error_reply() {
        let client = client();
        let _endpoint = client
            .serve("fail", |d: Delivery| async move {
                BusMessage::error_reply(d.message.req_id, 403, "FORBIDDEN", "Nope")
            })
            .await
            .unwrap();

        let err = client.request("fail", BusMessage::new("1")).await.unwrap_err();
        assert_eq!(err.reply_status(), Some(403));
    }

    #[tokio::test]
    async fn unanswered_requests() {
        let client = client();
        let err = client.request("nobody.home", BusMessage::new("1")).await.unwrap_err();
        assert!(matches!(err, BusError::NoResponders(_)));
        assert!(err.is_unanswered());
    }
}

//! Connection registry.
//!
//! # Responsibilities
//! - Track open websocket connections per identity
//! - Deliver payloads to every connection of an identity
//! - Close connections by identity or by token
//!
//! # Design Decisions
//! - A connection is a handle around an outbound channel; the socket itself
//!   is owned by its connection task
//! - Lookups return snapshots so no lock is held while sending
//! - Empty identity buckets are removed as soon as they empty
//! - Outbound queues are bounded; a client that stops reading loses frames
//!   instead of growing the gateway's memory

use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Frames queued per connection before further pushes are dropped.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Why the gateway closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    UserDisconnected,
    InvalidToken,
    PermissionDenied,
}

impl CloseReason {
    /// Application close code sent in the close frame.
    pub fn code(self) -> u16 {
        match self {
            Self::UserDisconnected => 4001,
            Self::InvalidToken => 4002,
            Self::PermissionDenied => 4003,
        }
    }

    /// Close frame reason text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserDisconnected => "USER_DISCONNECTED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::PermissionDenied => "PERMISSION_DENIED",
        }
    }
}

/// Work for a connection's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close(CloseReason),
}

/// Handle to one open connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    identity: String,
    token: Option<String>,
    tx: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end its writer drains.
    pub fn new(
        identity: impl Into<String>,
        token: Option<String>,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        Self::with_capacity(identity, token, OUTBOUND_CAPACITY)
    }

    pub fn with_capacity(
        identity: impl Into<String>,
        token: Option<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                id: Uuid::new_v4(),
                identity: identity.into(),
                token,
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether the writer is still running.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a text frame. Returns false when the connection is gone or its
    /// queue is full.
    pub fn send_text(&self, text: String) -> bool {
        match self.tx.try_send(Outbound::Text(text)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    identity = %self.identity,
                    connection_id = %self.id,
                    "Outbound queue full, dropping frame"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the writer to close the socket once the frames queued so far are
    /// written.
    pub fn close(&self, reason: CloseReason) -> bool {
        match self.tx.try_send(Outbound::Close(reason)) {
            Ok(()) => true,
            Err(TrySendError::Full(close)) => {
                // Must be called from within the runtime
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(close).await;
                });
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Open connections indexed `identity → connection id → handle`.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    clients: DashMap<String, HashMap<Uuid, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: ConnectionHandle) {
        tracing::debug!(identity = %handle.identity, connection_id = %handle.id, "Registering connection");
        self.clients
            .entry(handle.identity.clone())
            .or_default()
            .insert(handle.id, handle);
    }

    /// Remove a connection, dropping the identity bucket once empty.
    pub fn deregister(&self, identity: &str, connection_id: Uuid) -> bool {
        match self.clients.entry(identity.to_string()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(&connection_id).is_some();
                if entry.get().is_empty() {
                    entry.remove();
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Snapshot of an identity's open connections.
    pub fn connections(&self, identity: &str) -> Vec<ConnectionHandle> {
        self.clients
            .get(identity)
            .map(|bucket| bucket.values().filter(|c| c.is_open()).cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every identity with at least one connection.
    pub fn identities(&self) -> Vec<String> {
        self.clients.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.clients.contains_key(identity)
    }

    /// Total number of connections.
    pub fn len(&self) -> usize {
        self.clients.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Send `text` to every open connection of `identity`. Returns how many
    /// connections accepted it.
    pub fn send_to(&self, identity: &str, text: &str) -> usize {
        self.connections(identity)
            .iter()
            .filter(|c| c.send_text(text.to_string()))
            .count()
    }

    /// Close and deregister every connection of `identity`.
    pub fn close_identity(&self, identity: &str, reason: CloseReason) -> usize {
        let Some((_, bucket)) = self.clients.remove(identity) else {
            return 0;
        };
        for handle in bucket.values() {
            handle.close(reason);
        }
        bucket.len()
    }

    /// Close and deregister every connection holding `token`.
    pub fn close_token(&self, token: &str, reason: CloseReason) -> usize {
        let matching: Vec<ConnectionHandle> = self
            .clients
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .values()
                    .filter(|c| c.token() == Some(token))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        for handle in &matching {
            self.deregister(&handle.identity, handle.id);
            handle.close(reason);
        }
        matching.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_deregister() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = ConnectionHandle::new("user-1", Some("tok".into()));
        let (b, _rx_b) = ConnectionHandle::new("user-1", Some("tok".into()));

        registry.register(a.clone());
        registry.register(b.clone());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.connections("user-1").len(), 2);

        assert!(registry.deregister("user-1", a.id()));
        assert!(registry.contains("user-1"));
        assert!(registry.deregister("user-1", b.id()));
        assert!(!registry.contains("user-1"));
        assert!(registry.is_empty());
        assert!(!registry.deregister("user-1", b.id()));
    }

    #[test]
    fn delivers_to_every_connection_of_an_identity() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = ConnectionHandle::new("user-1", None);
        let (b, mut rx_b) = ConnectionHandle::new("user-1", None);
        let (c, mut rx_c) = ConnectionHandle::new("user-2", None);
        registry.register(a);
        registry.register(b);
        registry.register(c);

        assert_eq!(registry.send_to("user-1", "hello"), 2);
        assert_eq!(rx_a.try_recv().unwrap(), Outbound::Text("hello".into()));
        assert_eq!(rx_b.try_recv().unwrap(), Outbound::Text("hello".into()));
        assert!(rx_c.try_recv().is_err());
        assert_eq!(registry.send_to("nobody", "hello"), 0);
    }

    #[test]
    fn closed_connections_are_skipped() {
        let registry = ConnectionRegistry::new();
        let (a, rx_a) = ConnectionHandle::new("user-1", None);
        registry.register(a);
        drop(rx_a);

        assert_eq!(registry.send_to("user-1", "hello"), 0);
        assert!(registry.connections("user-1").is_empty());
    }

    #[test]
    fn close_by_token_and_identity() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = ConnectionHandle::new("user-1", Some("tok-a".into()));
        let (b, mut rx_b) = ConnectionHandle::new("user-1", Some("tok-b".into()));
        let (c, mut rx_c) = ConnectionHandle::new("user-2", Some("tok-c".into()));
        registry.register(a);
        registry.register(b);
        registry.register(c);

        assert_eq!(registry.close_token("tok-a", CloseReason::UserDisconnected), 1);
        assert_eq!(rx_a.try_recv().unwrap(), Outbound::Close(CloseReason::UserDisconnected));
        assert!(rx_b.try_recv().is_err());
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.close_identity("user-2", CloseReason::UserDisconnected), 1);
        assert_eq!(rx_c.try_recv().unwrap(), Outbound::Close(CloseReason::UserDisconnected));
        assert!(!registry.contains("user-2"));

        assert_eq!(registry.close_token("unknown", CloseReason::UserDisconnected), 0);
        assert_eq!(registry.close_identity("unknown", CloseReason::UserDisconnected), 0);
    }

    #[test]
    fn full_queues_drop_frames_without_affecting_others() {
        let registry = ConnectionRegistry::new();
        let (slow, mut rx_slow) = ConnectionHandle::with_capacity("user-1", None, 2);
        let (fast, mut rx_fast) = ConnectionHandle::new("user-2", None);
        registry.register(slow);
        registry.register(fast);

        assert_eq!(registry.send_to("user-1", "one"), 1);
        assert_eq!(registry.send_to("user-1", "two"), 1);
        assert_eq!(registry.send_to("user-1", "three"), 0);
        assert_eq!(registry.send_to("user-2", "hello"), 1);

        assert_eq!(rx_slow.try_recv().unwrap(), Outbound::Text("one".into()));
        assert_eq!(rx_slow.try_recv().unwrap(), Outbound::Text("two".into()));
        assert!(rx_slow.try_recv().is_err());
        assert_eq!(rx_fast.try_recv().unwrap(), Outbound::Text("hello".into()));
        assert!(registry.contains("user-1"));
    }

    #[tokio::test]
    async fn close_waits_behind_a_full_queue() {
        let (handle, mut rx) = ConnectionHandle::with_capacity("user-1", None, 1);
        assert!(handle.send_text("queued".into()));
        assert!(handle.close(CloseReason::InvalidToken));

        assert_eq!(rx.recv().await.unwrap(), Outbound::Text("queued".into()));
        assert_eq!(rx.recv().await.unwrap(), Outbound::Close(CloseReason::InvalidToken));
    }

    #[test]
    fn close_codes() {
        assert_eq!(CloseReason::UserDisconnected.code(), 4001);
        assert_eq!(CloseReason::InvalidToken.code(), 4002);
        assert_eq!(CloseReason::PermissionDenied.code(), 4003);
        assert_eq!(CloseReason::PermissionDenied.as_str(), "PERMISSION_DENIED");
    }
}

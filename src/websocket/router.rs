//! Bus endpoints of the websocket bus.
//!
//! # Responsibilities
//! - Push messages published on the outbound subject to connected clients
//! - Force-disconnect clients by token or identity
//!
//! # Design Decisions
//! - The outbound pattern's single `:param` segment addresses the identity;
//!   `*` there means "the `to` list" or, without one, every identity
//! - Pushed payloads never carry the `to` list
//! - Disconnecting an unknown client is not an error

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::bus::subject::replace_token;
use crate::bus::{BusClient, BusError, BusMessage, Delivery, SubjectPattern};
use crate::observability::metrics::{self, Direction};
use crate::websocket::registry::{CloseReason, ConnectionRegistry};

/// Identity segment that fans a push out.
pub const BROADCAST_TOKEN: &str = "*";

/// Subscribe the push and unregister endpoints. Abort the returned handles to
/// stop them.
pub async fn start_endpoints(
    client: &BusClient,
    registry: Arc<ConnectionRegistry>,
    outbound_subject: &str,
    unregister_subject: &str,
) -> Result<Vec<JoinHandle<()>>, BusError> {
    let pattern = SubjectPattern::parse(outbound_subject)?;
    let param = pattern
        .param_names()
        .first()
        .map(|name| name.to_string())
        .ok_or_else(|| BusError::InvalidSubject(outbound_subject.to_string()))?;
    let index = pattern
        .param_index(&param)
        .ok_or_else(|| BusError::InvalidSubject(outbound_subject.to_string()))?;

    let push_registry = registry.clone();
    let push = client
        .serve(pattern.as_str(), move |delivery: Delivery| {
            let registry = push_registry.clone();
            let param = param.clone();
            async move { push_to_clients(&registry, &param, index, delivery) }
        })
        .await?;

    let unregister = client
        .serve(unregister_subject, move |delivery: Delivery| {
            let registry = registry.clone();
            async move { unregister_client(&registry, delivery.message) }
        })
        .await?;

    tracing::info!(
        outbound = %outbound_subject,
        unregister = %unregister_subject,
        "Websocket bus endpoints subscribed"
    );

    Ok(vec![push, unregister])
}

/// Deliver a pushed message. Replies `{status: 200, reqId}`.
pub fn push_to_clients(registry: &ConnectionRegistry, param: &str, index: usize, delivery: Delivery) -> BusMessage {
    let target = delivery.param(param).unwrap_or_default().to_string();
    let Delivery { subject, message, .. } = delivery;
    let req_id = message.req_id.clone();

    let recipients = match (&message.to, target.as_str()) {
        (Some(to), BROADCAST_TOKEN) if !to.is_empty() => to.clone(),
        (_, BROADCAST_TOKEN) => registry.identities(),
        (_, identity) => vec![identity.to_string()],
    };

    let mut payload = message.to_value();
    if let Value::Object(map) = &mut payload {
        map.remove("to");
    }

    let mut delivered = 0;
    for identity in &recipients {
        let actual_subject = if target == BROADCAST_TOKEN {
            replace_token(&subject, index, identity)
        } else {
            subject.clone()
        };
        if let Value::Object(map) = &mut payload {
            map.insert("subject".to_string(), Value::String(actual_subject));
        }

        let sent = registry.send_to(identity, &payload.to_string());
        for _ in 0..sent {
            metrics::record_websocket_message(Direction::Outbound);
        }
        delivered += sent;
    }

    tracing::debug!(
        req_id = %req_id,
        subject = %subject,
        recipients = recipients.len(),
        delivered,
        "Pushed message to websocket clients"
    );

    BusMessage::new(req_id).with_status(200)
}

/// Close every connection of `data.jwt`, else of `data.userId`.
pub fn unregister_client(registry: &ConnectionRegistry, message: BusMessage) -> BusMessage {
    let closed = if let Some(token) = message.data_str("jwt") {
        registry.close_token(token, CloseReason::UserDisconnected)
    } else if let Some(identity) = message.data_str("userId") {
        registry.close_identity(identity, CloseReason::UserDisconnected)
    } else {
        return BusMessage::error_reply(
            message.req_id,
            400,
            "BAD_REQUEST",
            "Either jwt or userId is required",
        );
    };

    tracing::debug!(req_id = %message.req_id, closed, "Unregistered websocket clients");
    BusMessage::new(message.req_id).with_status(200)
}

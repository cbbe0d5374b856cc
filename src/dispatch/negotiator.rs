//! Backend protocol negotiation.
//!
//! Before a request is dispatched the gateway asks `options.<subject>` how the
//! backend wants to be reached. Services that do not answer the options
//! request are bus-native.

use serde::Deserialize;

use crate::bus::{BusClient, BusError, BusMessage};
use crate::error::GatewayError;

/// Subject prefix of the negotiation request.
pub const OPTIONS_PREFIX: &str = "options";

/// How a backend is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendDescriptor {
    /// Plain bus request/reply.
    Bus,
    /// Proxied over HTTP to the given URL.
    Http { url: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsReply {
    protocol: String,
    #[serde(default)]
    http: Option<HttpOptions>,
}

#[derive(Debug, Deserialize)]
struct HttpOptions {
    url: String,
}

#[derive(Debug, Clone)]
pub struct Negotiator {
    client: BusClient,
}

impl Negotiator {
    pub fn new(client: BusClient) -> Self {
        Self { client }
    }

    /// Ask the backend of `subject` for its protocol.
    ///
    /// No responders means bus-native; a responder that never answers means
    /// nothing is reachable and yields `NotFound`.
    pub async fn negotiate(
        &self,
        subject: &str,
        envelope: &BusMessage,
    ) -> Result<BackendDescriptor, GatewayError> {
        let options_subject = format!("{OPTIONS_PREFIX}.{subject}");

        match self.client.request(&options_subject, envelope.clone()).await {
            Ok(reply) => Ok(descriptor_from_reply(subject, reply)),
            Err(BusError::NoResponders(_)) => Ok(BackendDescriptor::Bus),
            Err(BusError::Timeout { .. }) => {
                crate::observability::metrics::record_bus_timeout();
                Err(GatewayError::NotFound {
                    subject: subject.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn descriptor_from_reply(subject: &str, reply: BusMessage) -> BackendDescriptor {
    let options = match serde_json::from_value::<OptionsReply>(reply.data) {
        Ok(options) => options,
        Err(e) => {
            tracing::warn!(subject = %subject, error = %e, "Malformed options reply, assuming bus");
            return BackendDescriptor::Bus;
        }
    };

    match (options.protocol.to_uppercase().as_str(), options.http) {
        ("HTTP", Some(HttpOptions { url })) if !url.is_empty() => BackendDescriptor::Http { url },
        ("HTTP", _) => {
            tracing::warn!(subject = %subject, "HTTP backend without url, assuming bus");
            BackendDescriptor::Bus
        }
        _ => BackendDescriptor::Bus,
    }
}

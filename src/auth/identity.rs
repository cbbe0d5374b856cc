//! Decoded caller identity.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Prefix of identities handed to anonymous websocket connections.
pub const PUBLIC_ID_PREFIX: &str = "public-";

/// Whatever the identity service returned for a token. Usually an object with
/// `id` and `scopes`, passed to services verbatim as `user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Value);

impl Default for Identity {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl Identity {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The empty identity (`{}`).
    pub fn anonymous() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// A fresh `public-<uuid>` id for an anonymous websocket connection.
    pub fn public_id() -> String {
        format!("{PUBLIC_ID_PREFIX}{}", Uuid::new_v4())
    }

    pub fn is_anonymous(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// The identity's `id`, strings and numbers accepted.
    pub fn id(&self) -> Option<String> {
        match self.0.get("id")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn scopes(&self) -> Vec<&str> {
        self.0
            .get("scopes")
            .and_then(Value::as_array)
            .map(|scopes| scopes.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether every required scope is granted.
    pub fn has_scopes(&self, required: &[String]) -> bool {
        let granted = self.scopes();
        required.iter().all(|scope| granted.contains(&scope.as_str()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

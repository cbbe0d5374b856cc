//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// HTTP surface behaviour.
    pub http: HttpConfig,

    /// Bus request settings.
    pub bus: BusConfig,

    /// Token decoding.
    pub auth: AuthConfig,

    /// WebSocket bus settings.
    pub websocket: WebSocketConfig,

    /// Interceptor rules, `<order>;<globs>;<target>;<request|response>;<options>`.
    pub interceptors: Vec<String>,

    /// Subject rewrite rules, `<id>|<id>:<regex>><replacement>`.
    pub rewrite_rules: Vec<String>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            max_body_size: 100 * 1024 * 1024,
        }
    }
}

/// HTTP surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Total time a request may take, end to end.
    pub request_timeout_secs: u64,

    /// CORS allowed origins, `*` for any.
    pub allow_origin: Vec<String>,

    /// Extra CORS allowed headers.
    pub allowed_headers: Vec<String>,

    /// Send cache-busting headers on every response.
    pub no_cache: bool,

    /// Successful responses serialize only `data`.
    pub unwrap_message_data: bool,

    /// Expose error details of internal failures to clients.
    pub print_stacktrace: bool,

    /// Lower-case derived subjects.
    pub lowercase_subjects: bool,

    /// Paths served without decoding the caller's token.
    pub public_routes: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            allow_origin: vec!["*".to_string()],
            allowed_headers: Vec::new(),
            no_cache: false,
            unwrap_message_data: false,
            print_stacktrace: false,
            lowercase_subjects: true,
            public_routes: Vec::new(),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Bus request configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    /// Timeout of bus requests, including negotiation and interceptors.
    pub request_timeout_ms: u64,

    /// Timeout of calls to HTTP-proxied backends.
    pub http_backend_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 1000,
            http_backend_timeout_ms: 30_000,
        }
    }
}

impl BusConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn http_backend_timeout(&self) -> Duration {
        Duration::from_millis(self.http_backend_timeout_ms)
    }
}

/// Token decoding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Name of the auth cookie.
    pub cookie_name: String,

    /// Subject of the identity service's decode endpoint.
    pub decode_subject: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "jwt".to_string(),
            decode_subject: "auth-service.decode-token".to_string(),
        }
    }
}

/// WebSocket bus configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Accept websocket upgrades.
    pub enabled: bool,

    /// Let clients without a valid token connect under a `public-<uuid>` identity.
    pub allow_public_connections: bool,

    /// Pattern of subjects pushed to connected clients. The single `:param`
    /// segment names the addressed identity.
    pub outbound_subject: String,

    /// Subject of the forced-disconnect endpoint.
    pub unregister_subject: String,

    /// Scopes an identity needs to connect. Empty means none required.
    pub permission_scopes: Vec<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_public_connections: true,
            outbound_subject: "ws.out.:userId.>".to_string(),
            unregister_subject: "web-bus.unregister-client".to_string(),
            permission_scopes: Vec::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Emit JSON log lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "bus_gateway=debug,tower_http=debug".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

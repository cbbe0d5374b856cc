//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Compile the configuration into a request pipeline and websocket bus
//! - Create the Axum router with a single catch-all handler
//! - Wire up middleware (timeout, body limit, request ID, tracing, CORS)
//! - Hand websocket upgrades to the websocket bus
//! - Run the websocket bus endpoints for the server's lifetime
//!
//! # Design Decisions
//! - There are no static routes; every path becomes a bus subject
//! - Websocket upgrades bypass the pipeline when the websocket bus is enabled
//! - Shutdown stops accepting, drains in-flight requests, then stops the
//!   bus endpoints

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, FromRequestParts, State},
    http::{HeaderName, HeaderValue, Request},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::auth::{BusTokenDecoder, TokenDecoder};
use crate::bus::{Bus, BusClient};
use crate::config::{validate_config, ConfigError, GatewayConfig, HttpConfig, ValidationError};
use crate::dispatch::{Dispatcher, HttpBackend};
use crate::http::pipeline::{Pipeline, PipelineSettings};
use crate::http::request::{assign_request_id, is_websocket_upgrade, RequestId, RequestIdExt, X_REQUEST_ID};
use crate::http::response::ResponseOptions;
use crate::interceptor::{InterceptorChain, InterceptorRule};
use crate::lifecycle::shutdown::wait as shutdown_signal;
use crate::observability::metrics;
use crate::routing::{RewriteRule, SubjectRewriter};
use crate::websocket::{self, ConnectionRegistry, WebBus, WebBusSettings};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub web_bus: Option<Arc<WebBus>>,
}

/// HTTP server of the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    client: BusClient,
    registry: Arc<ConnectionRegistry>,
}

impl HttpServer {
    /// Compile `config` into a server talking to services over `bus`.
    pub fn new(config: GatewayConfig, bus: Arc<dyn Bus>) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let client = BusClient::new(bus, config.bus.request_timeout());
        let decoder: Arc<dyn TokenDecoder> = Arc::new(BusTokenDecoder::new(
            client.clone(),
            config.auth.decode_subject.clone(),
        ));
        let dispatcher = Dispatcher::new(
            client.clone(),
            HttpBackend::new(config.bus.http_backend_timeout()),
        );
        let registry = Arc::new(ConnectionRegistry::new());

        let rewriter = SubjectRewriter::new(compile_rewrite_rules(&config)?);
        let interceptors = InterceptorChain::new(compile_interceptors(&config)?, client.clone());

        let pipeline = Pipeline::new(
            PipelineSettings {
                lowercase_subjects: config.http.lowercase_subjects,
                public_routes: config.http.public_routes.iter().cloned().collect::<HashSet<_>>(),
                cookie_name: config.auth.cookie_name.clone(),
                unregister_subject: config.websocket.unregister_subject.clone(),
                max_body_size: config.listener.max_body_size,
                expose_trace: config.http.print_stacktrace,
                response: ResponseOptions {
                    unwrap_data: config.http.unwrap_message_data,
                    no_cache: config.http.no_cache,
                },
            },
            client.clone(),
            decoder.clone(),
            rewriter,
            interceptors,
            dispatcher.clone(),
        );

        let web_bus = config.websocket.enabled.then(|| {
            Arc::new(WebBus::new(
                WebBusSettings {
                    allow_public_connections: config.websocket.allow_public_connections,
                    permission_scopes: config.websocket.permission_scopes.clone(),
                    cookie_name: config.auth.cookie_name.clone(),
                    expose_trace: config.http.print_stacktrace,
                },
                registry.clone(),
                decoder,
                dispatcher,
            ))
        });

        let state = AppState {
            pipeline: Arc::new(pipeline),
            web_bus,
        };

        let router = Self::build_router(&config, state);
        Ok(Self {
            router,
            config,
            client,
            registry,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(config.http.request_timeout()))
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_size))
            .layer(middleware::from_fn(assign_request_id))
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&config.http))
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;

        let endpoints = if self.config.websocket.enabled {
            websocket::start_endpoints(
                &self.client,
                self.registry.clone(),
                &self.config.websocket.outbound_subject,
                &self.config.websocket.unregister_subject,
            )
            .await
            .map_err(|e| io::Error::other(e.to_string()))?
        } else {
            Vec::new()
        };

        tracing::info!(
            address = %addr,
            websocket = self.config.websocket.enabled,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal(shutdown))
            .await?;

        for endpoint in endpoints {
            endpoint.abort();
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The websocket connection registry.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }
}

fn compile_rewrite_rules(config: &GatewayConfig) -> Result<Vec<RewriteRule>, ConfigError> {
    config
        .rewrite_rules
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            raw.parse::<RewriteRule>().map_err(|e| {
                ConfigError::Validation(vec![ValidationError::InvalidRewriteRule {
                    index,
                    reason: e.to_string(),
                }])
            })
        })
        .collect()
}

fn compile_interceptors(config: &GatewayConfig) -> Result<Vec<InterceptorRule>, ConfigError> {
    config
        .interceptors
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            raw.parse::<InterceptorRule>().map_err(|e| {
                ConfigError::Validation(vec![ValidationError::InvalidInterceptor {
                    index,
                    reason: e.to_string(),
                }])
            })
        })
        .collect()
}

fn cors_layer(config: &HttpConfig) -> CorsLayer {
    let origin = if config.allow_origin.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .allow_origin
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    let headers = if config.allowed_headers.is_empty() {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(
            config
                .allowed_headers
                .iter()
                .filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(AllowMethods::any())
        .allow_headers(headers)
        .expose_headers([HeaderName::from_static(X_REQUEST_ID)])
}

/// Catch-all handler: websocket upgrades go to the websocket bus, everything
/// else through the pipeline.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let started = Instant::now();

    if is_websocket_upgrade(request.headers()) {
        if let Some(web_bus) = state.web_bus.clone() {
            return upgrade(web_bus, request).await;
        }
    }

    let method = request.method().to_string();
    let req_id = request.request_id().cloned().unwrap_or_else(RequestId::generate);

    let response = state.pipeline.handle(&req_id, request).await;
    metrics::record_request(&method, response.status().as_u16(), started);
    response
}

async fn upgrade(web_bus: Arc<WebBus>, request: Request<Body>) -> Response {
    let (mut parts, _body) = request.into_parts();
    let token = web_bus.handshake_token(&parts.headers);

    match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws.on_upgrade(move |socket| web_bus.accept(socket, token)),
        Err(rejection) => rejection.into_response(),
    }
}

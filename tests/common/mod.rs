//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use bus_gateway::bus::Delivery;
use bus_gateway::websocket::ConnectionRegistry;
use bus_gateway::{BusClient, BusMessage, GatewayConfig, HttpServer, LocalBus, Shutdown};

pub const DECODE_SUBJECT: &str = "auth-service.decode-token";

/// A running gateway plus a bus client attached to the same bus.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub bus: BusClient,
    pub registry: Arc<ConnectionRegistry>,
    shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Defaults tuned for tests: ephemeral port and short bus timeouts.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.bus.request_timeout_ms = 300;
    config.bus.http_backend_timeout_ms = 5_000;
    config
}

/// Start a gateway on an ephemeral port and wait until it answers.
pub async fn spawn_gateway(config: GatewayConfig) -> TestGateway {
    let local = Arc::new(LocalBus::new());
    let bus = BusClient::new(local.clone(), Duration::from_secs(2));

    let server = HttpServer::new(config, local).unwrap();
    let registry = server.registry();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    let gateway = TestGateway {
        addr,
        bus,
        registry,
        shutdown,
    };
    wait_until_ready(&gateway).await;
    gateway
}

async fn wait_until_ready(gateway: &TestGateway) {
    let client = http_client();
    for _ in 0..50 {
        if client.get(gateway.url("/ready-check")).send().await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("gateway did not start");
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Serve the token decode endpoint. Known tokens resolve to their identity,
/// anything else is rejected with 401.
pub async fn serve_auth(bus: &BusClient, tokens: HashMap<String, Value>) {
    let tokens = Arc::new(tokens);
    bus.serve(DECODE_SUBJECT, move |d: Delivery| {
        let tokens = tokens.clone();
        async move {
            let token = d.message.data.as_str().unwrap_or_default();
            match tokens.get(token) {
                Some(identity) => BusMessage::new(d.message.req_id.clone())
                    .with_status(200)
                    .with_data(identity.clone()),
                None => BusMessage::error_reply(d.message.req_id, 401, "auth-service.401.1", "Invalid token"),
            }
        }
    })
    .await
    .unwrap();
}

/// Serve `subject` with a fixed `{status: 200, data}` reply.
pub async fn serve_data(bus: &BusClient, subject: &str, data: Value) {
    bus.serve(subject, move |d: Delivery| {
        let data = data.clone();
        async move { BusMessage::new(d.message.req_id).with_status(200).with_data(data) }
    })
    .await
    .unwrap();
}

/// Serve `subject` by echoing the request back as `data`, forwarding every
/// request to the returned channel.
pub async fn serve_echo(bus: &BusClient, subject: &str) -> mpsc::UnboundedReceiver<BusMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.serve(subject, move |d: Delivery| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(d.message.clone());
            BusMessage::new(d.message.req_id.clone())
                .with_status(200)
                .with_data(d.message.to_value())
        }
    })
    .await
    .unwrap();
    rx
}

/// Body and headers one HTTP backend request arrived with.
#[derive(Debug)]
pub struct ReceivedRequest {
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Start an HTTP backend replying `{status: 200, data: {received: <len>}}`.
pub async fn start_http_backend() -> (SocketAddr, mpsc::UnboundedReceiver<ReceivedRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let app = Router::new().route(
        "/{*path}",
        any(move |headers: HeaderMap, body: Bytes| {
            let tx = tx.clone();
            async move {
                let len = body.len();
                let _ = tx.send(ReceivedRequest { headers, body });
                (
                    StatusCode::OK,
                    [("content-type", "application/json")],
                    json!({"status": 200, "data": {"received": len}}).to_string(),
                )
                    .into_response()
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, rx)
}

/// Announce an HTTP backend for `subject` through its options endpoint.
pub async fn serve_http_options(bus: &BusClient, subject: &str, url: String) {
    serve_data(
        bus,
        &format!("options.{subject}"),
        json!({"protocol": "HTTP", "http": {"url": url}}),
    )
    .await;
}

/// Poll until `identity` has a registered connection.
pub async fn wait_for_identity(registry: &ConnectionRegistry, identity: &str) {
    for _ in 0..100 {
        if registry.contains(identity) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{identity} never connected");
}

/// Poll until the registry holds `count` connections.
pub async fn wait_for_connections(registry: &ConnectionRegistry, count: usize) {
    for _ in 0..100 {
        if registry.len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} connections, found {}", registry.len());
}

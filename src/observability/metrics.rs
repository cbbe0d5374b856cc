//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, bus timeouts, websocket traffic)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): HTTP requests by method, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_bus_timeouts_total` (counter): bus requests nobody answered in time
//! - `gateway_websocket_connections` (gauge): open websocket connections
//! - `gateway_websocket_messages_total` (counter): websocket frames by direction
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels stay low-cardinality; subjects are never used as labels

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Direction label of websocket message counts.
#[derive(Debug, Clone, Copy)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(address: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()?;
    tracing::info!(address = %address, "Metrics endpoint listening");
    Ok(())
}

/// Record a completed HTTP request.
pub fn record_request(method: &str, status: u16, started: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds").record(started.elapsed().as_secs_f64());
}

/// Record a bus request that timed out.
pub fn record_bus_timeout() {
    counter!("gateway_bus_timeouts_total").increment(1);
}

pub fn websocket_connected() {
    gauge!("gateway_websocket_connections").increment(1.0);
}

pub fn websocket_disconnected() {
    gauge!("gateway_websocket_connections").decrement(1.0);
}

pub fn record_websocket_message(direction: Direction) {
    counter!("gateway_websocket_messages_total", "direction" => direction.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_exporter_is_harmless() {
        record_request("GET", 200, Instant::now());
        record_bus_timeout();
        websocket_connected();
        websocket_disconnected();
        record_websocket_message(Direction::Inbound);
    }
}

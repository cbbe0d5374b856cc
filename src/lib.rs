//! Bus gateway library.
//!
//! Exposes services living on a message bus as HTTP routes and multiplexes
//! websocket clients onto the same bus.

pub mod auth;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod interceptor;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod websocket;

pub use bus::{Bus, BusClient, BusMessage, LocalBus};
pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;

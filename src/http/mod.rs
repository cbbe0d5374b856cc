//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, upgrade detection)
//!     → request.rs (request ID, body parsing)
//!     → pipeline.rs (auth, rewrite, interceptors, dispatch)
//!     → response.rs (status, headers, sanitized body)
//!     → Send to client
//! ```

pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;

pub use pipeline::{Pipeline, PipelineSettings};
pub use request::{RequestId, RequestIdExt, X_REQUEST_ID};
pub use response::{write_response, ResponseOptions};
pub use server::HttpServer;

//! Websocket multiplexing bus.
//!
//! # Data Flow
//! ```text
//! Client ──upgrade──▶ connection.rs (authenticate, register)
//!    │  {subject, message}                    ▲ {subject: res.<txn>.<subject>, ...}
//!    └──────────────▶ dispatch ───────────────┘
//!
//! Bus ──ws.out.<id>.>──▶ router.rs ──▶ registry.rs ──▶ every socket of <id>
//! Bus ──unregister─────▶ router.rs ──▶ registry.rs ──▶ close(USER_DISCONNECTED)
//! ```
//!
//! # Design Decisions
//! - The registry is the only state shared between sockets
//! - Sockets are owned by their connection task; everything else talks to
//!   them through channels

pub mod connection;
pub mod registry;
pub mod router;

pub use connection::{InboundFrame, WebBus, WebBusSettings};
pub use registry::{CloseReason, ConnectionHandle, ConnectionRegistry, Outbound};
pub use router::start_endpoints;

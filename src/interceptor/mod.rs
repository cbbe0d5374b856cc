//! Interceptor subsystem.
//!
//! # Data Flow
//! ```text
//! rule strings (config + INTERCEPTOR_* env)
//!     → rule.rs (parse, compile glob matchers)
//!     → chain.rs (split by phase, sort by order)
//!
//! per request:
//!     envelope → request phase fold → (respond? → client)
//!              → dispatch → response phase fold → client
//! ```
//!
//! # Design Decisions
//! - Every interceptor is a bus request whose reply replaces the message
//! - `interceptAction: respond` ends the current phase; in the request phase
//!   it also skips the backend
//! - Failed outcomes reach response interceptors only when they opt in

pub mod chain;
pub mod rule;

pub use chain::InterceptorChain;
pub use rule::{InterceptorRule, Phase, RuleParseError};

//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)           INTERCEPTOR_* env vars
//!     → loader.rs (parse & deserialize, append env rules)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → compiled into rules, matchers and settings at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_config_or_default, ConfigError};
pub use schema::{
    AuthConfig, BusConfig, GatewayConfig, HttpConfig, ListenerConfig, ObservabilityConfig,
    WebSocketConfig,
};
pub use validation::{validate_config, ValidationError};

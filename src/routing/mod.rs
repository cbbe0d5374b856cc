//! Subject routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path, query, headers, body)
//!     → subject.rs (derive subject + build envelope)
//!     → rewrite.rs (per-identity subject rewrite)
//!     → matcher.rs (interceptor pattern evaluation)
//!
//! Outgoing Response
//!     → subject.rs (strip routing context before it reaches the client)
//! ```
//!
//! # Design Decisions
//! - Subject derivation is a pure function of method and path
//! - Glob patterns and rewrite rules compiled at startup, immutable at runtime
//! - Deterministic: same subject always matches the same rules
//! - First rewrite rule wins

pub mod matcher;
pub mod rewrite;
pub mod subject;

pub use matcher::{AndMatcher, GlobMatcher, Matcher};
pub use rewrite::{RewriteParseError, RewriteRule, SubjectRewriter};
pub use subject::{build_envelope, derive_subject, parse_verb_subject, sanitize_for_client};

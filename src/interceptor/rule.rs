//! Interceptor rule parsing.
//!
//! Syntax: `<order>;<glob[,glob...]>;<target subject>;<request|response>;<options>`.
//! The phase defaults to `request`; options are a comma separated list of
//! flags, currently only `allowExceptions` has a meaning.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::routing::{AndMatcher, Matcher};

/// Option flag that lets a response interceptor see failed outcomes.
pub const ALLOW_EXCEPTIONS: &str = "allowexceptions";

#[derive(Debug, Error)]
pub enum RuleParseError {
    #[error("interceptor rule {0:?} needs at least <order>;<patterns>;<target>")]
    MissingFields(String),

    #[error("interceptor rule {rule:?} has a non-numeric order {order:?}")]
    InvalidOrder { rule: String, order: String },

    #[error("interceptor rule {rule:?} has an unknown type {phase:?}")]
    InvalidPhase { rule: String, phase: String },

    #[error("interceptor rule {rule:?} has an empty {field}")]
    Empty { rule: String, field: &'static str },

    #[error("interceptor rule {rule:?} has an invalid pattern: {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },
}

/// When in the request lifecycle a rule runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Request,
    Response,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::Response => f.write_str("response"),
        }
    }
}

/// A compiled interceptor rule. Immutable once loaded.
#[derive(Debug)]
pub struct InterceptorRule {
    pub order: i64,
    pub phase: Phase,
    pub target_subject: String,
    patterns: String,
    matcher: AndMatcher,
    options: BTreeSet<String>,
}

impl InterceptorRule {
    /// Whether `subject` satisfies every pattern of the rule.
    pub fn matches(&self, subject: &str) -> bool {
        self.matcher.matches(subject)
    }

    pub fn patterns(&self) -> &str {
        &self.patterns
    }

    /// Whether the rule opted into seeing failed outcomes.
    pub fn allow_exceptions(&self) -> bool {
        self.has_option(ALLOW_EXCEPTIONS)
    }

    /// Option flags are compared case-insensitively, ignoring `_` and `-`.
    pub fn has_option(&self, flag: &str) -> bool {
        self.options.contains(&normalize_flag(flag))
    }
}

fn normalize_flag(flag: &str) -> String {
    flag.trim()
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

impl FromStr for InterceptorRule {
    type Err = RuleParseError;

    fn from_str(rule: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = rule.split(';').map(str::trim).collect();
        if fields.len() < 3 {
            return Err(RuleParseError::MissingFields(rule.to_string()));
        }

        let order = fields[0]
            .parse::<i64>()
            .map_err(|_| RuleParseError::InvalidOrder {
                rule: rule.to_string(),
                order: fields[0].to_string(),
            })?;

        let patterns = fields[1];
        if patterns.is_empty() {
            return Err(RuleParseError::Empty {
                rule: rule.to_string(),
                field: "pattern list",
            });
        }

        let target_subject = fields[2];
        if target_subject.is_empty() {
            return Err(RuleParseError::Empty {
                rule: rule.to_string(),
                field: "target subject",
            });
        }

        let phase = match fields.get(3).map(|p| p.to_lowercase()).as_deref() {
            None | Some("") | Some("request") => Phase::Request,
            Some("response") => Phase::Response,
            Some(other) => {
                return Err(RuleParseError::InvalidPhase {
                    rule: rule.to_string(),
                    phase: other.to_string(),
                })
            }
        };

        let options = fields
            .get(4)
            .map(|o| {
                o.split(',')
                    .map(normalize_flag)
                    .filter(|flag| !flag.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let matcher =
            AndMatcher::from_globs(patterns).map_err(|source| RuleParseError::InvalidPattern {
                rule: rule.to_string(),
                source,
            })?;

        Ok(Self {
            order,
            phase,
            target_subject: target_subject.to_string(),
            patterns: patterns.to_string(),
            matcher,
            options,
        })
    }
}

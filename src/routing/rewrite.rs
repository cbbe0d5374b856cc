//! Per-identity subject rewriting.
//!
//! Rules are written `<id1>|<id2>...:<regex>><replacement>`, e.g.
//! `user-1|user-2:http.get.foo.(.*)>http.get.foo-beta.$1`. The first rule
//! whose identity set contains the caller and whose regex matches rewrites the
//! subject; back-references use `$N`.

use std::collections::HashSet;
use std::str::FromStr;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RewriteParseError {
    #[error("rewrite rule {0:?} is missing the ':' between identities and pattern")]
    MissingIdentities(String),

    #[error("rewrite rule {0:?} is missing the '>' before the replacement")]
    MissingReplacement(String),

    #[error("rewrite rule {rule:?} has an invalid pattern: {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },
}

/// One compiled rewrite rule.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    identities: HashSet<String>,
    pattern: Regex,
    replacement: String,
}

impl RewriteRule {
    pub fn applies_to(&self, identity_id: &str) -> bool {
        self.identities.contains(identity_id)
    }

    /// Rewrite the first match, `None` when the pattern does not match.
    pub fn apply(&self, subject: &str) -> Option<String> {
        if !self.pattern.is_match(subject) {
            return None;
        }
        Some(
            self.pattern
                .replace(subject, self.replacement.as_str())
                .into_owned(),
        )
    }
}

impl FromStr for RewriteRule {
    type Err = RewriteParseError;

    fn from_str(rule: &str) -> Result<Self, Self::Err> {
        let (identities, rest) = rule
            .split_once(':')
            .ok_or_else(|| RewriteParseError::MissingIdentities(rule.to_string()))?;
        let (pattern, replacement) = rest
            .rsplit_once('>')
            .ok_or_else(|| RewriteParseError::MissingReplacement(rule.to_string()))?;

        let pattern = Regex::new(pattern).map_err(|source| RewriteParseError::InvalidPattern {
            rule: rule.to_string(),
            source,
        })?;

        Ok(Self {
            identities: identities
                .split('|')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
            pattern,
            replacement: braced_references(replacement),
        })
    }
}

/// `$1x` would read as a group named `1x`; braces keep the number separate.
fn braced_references(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len() + 4);
    let mut chars = replacement.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek().is_some_and(char::is_ascii_digit) {
            out.push_str("${");
            while let Some(d) = chars.next_if(char::is_ascii_digit) {
                out.push(d);
            }
            out.push('}');
        } else {
            out.push(c);
        }
    }

    out
}

/// Ordered set of rewrite rules.
#[derive(Debug, Clone, Default)]
pub struct SubjectRewriter {
    rules: Vec<RewriteRule>,
}

impl SubjectRewriter {
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }

    /// Compile rule strings.
    pub fn from_rules<S: AsRef<str>>(rules: &[S]) -> Result<Self, RewriteParseError> {
        rules
            .iter()
            .map(|r| r.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    /// Rewrite `subject` for the given identity. Anonymous callers and
    /// subjects no rule matches pass through unchanged.
    pub fn rewrite(&self, identity_id: Option<&str>, subject: &str) -> String {
        let Some(id) = identity_id else {
            return subject.to_string();
        };

        for rule in self.rules.iter().filter(|r| r.applies_to(id)) {
            if let Some(rewritten) = rule.apply(subject) {
                tracing::debug!(
                    identity = %id,
                    from = %subject,
                    to = %rewritten,
                    "Rewrote subject"
                );
                return rewritten;
            }
        }

        subject.to_string()
    }
}

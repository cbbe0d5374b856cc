//! NATS-style subject patterns.
//!
//! Subjects are dot-delimited token lists. Patterns understand three kinds of
//! wildcard tokens:
//!
//! - `*` matches exactly one token
//! - `:name` matches exactly one token and captures it under `name`
//! - `>` matches one or more trailing tokens and must come last

use serde_json::{Map, Value};

use super::BusError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Single(Option<String>),
    Tail,
}

/// A compiled subject pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPattern {
    raw: String,
    tokens: Vec<Token>,
}

impl SubjectPattern {
    /// Parse a pattern such as `ws.out.:userId.>`.
    pub fn parse(raw: &str) -> Result<Self, BusError> {
        if raw.is_empty() {
            return Err(BusError::InvalidSubject(raw.to_string()));
        }

        let parts: Vec<&str> = raw.split('.').collect();
        let mut tokens = Vec::with_capacity(parts.len());

        for (index, part) in parts.iter().enumerate() {
            let token = match *part {
                "" => return Err(BusError::InvalidSubject(raw.to_string())),
                "*" => Token::Single(None),
                ">" if index + 1 == parts.len() => Token::Tail,
                ">" => return Err(BusError::InvalidSubject(raw.to_string())),
                p if p.starts_with(':') && p.len() > 1 => Token::Single(Some(p[1..].to_string())),
                p => Token::Literal(p.to_string()),
            };
            tokens.push(token);
        }

        Ok(Self {
            raw: raw.to_string(),
            tokens,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The pattern with `:name` captures replaced by `*`.
    pub fn wildcard(&self) -> String {
        self.tokens
            .iter()
            .map(|t| match t {
                Token::Literal(l) => l.as_str(),
                Token::Single(_) => "*",
                Token::Tail => ">",
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Names of the `:param` captures, in order.
    pub fn param_names(&self) -> Vec<&str> {
        self.tokens
            .iter()
            .filter_map(|t| match t {
                Token::Single(Some(name)) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Token position of a named capture.
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.tokens
            .iter()
            .position(|t| matches!(t, Token::Single(Some(n)) if n == name))
    }

    /// Whether a concrete subject matches this pattern.
    pub fn matches(&self, subject: &str) -> bool {
        let parts: Vec<&str> = subject.split('.').collect();

        for (index, token) in self.tokens.iter().enumerate() {
            match token {
                Token::Tail => return parts.len() > index,
                Token::Single(_) => match parts.get(index) {
                    Some(p) if !p.is_empty() => {}
                    _ => return false,
                },
                Token::Literal(l) => match parts.get(index) {
                    Some(p) if p == l => {}
                    _ => return false,
                },
            }
        }

        parts.len() == self.tokens.len()
    }

    /// Extract the `:param` captures of a matching subject.
    pub fn params(&self, subject: &str) -> Map<String, Value> {
        let parts: Vec<&str> = subject.split('.').collect();
        let mut params = Map::new();

        for (index, token) in self.tokens.iter().enumerate() {
            if let (Token::Single(Some(name)), Some(value)) = (token, parts.get(index)) {
                params.insert(name.clone(), Value::String((*value).to_string()));
            }
        }

        params
    }
}

/// Replace the token at `index` of a subject.
pub fn replace_token(subject: &str, index: usize, value: &str) -> String {
    subject
        .split('.')
        .enumerate()
        .map(|(i, part)| if i == index { value } else { part })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_patterns_match_exactly() {
        let pattern = SubjectPattern::parse("http.get.foo").unwrap();
        assert!(pattern.matches("http.get.foo"));
        assert!(!pattern.matches("http.get.foo.bar"));
        assert!(!pattern.matches("http.get"));
    }

    #[test]
    fn single_token_wildcards() {
        let pattern = SubjectPattern::parse("options.*.foo").unwrap();
        assert!(pattern.matches("options.get.foo"));
        assert!(!pattern.matches("options.get.bar.foo"));
    }

    #[test]
    fn tail_requires_at_least_one_token() {
        let pattern = SubjectPattern::parse("ws.out.:userId.>").unwrap();
        assert!(pattern.matches("ws.out.abc.hello"));
        assert!(pattern.matches("ws.out.abc.hello.world"));
        assert!(!pattern.matches("ws.out.abc"));
    }

    #[test]
    fn captures_named_params() {
        let pattern = SubjectPattern::parse("ws.out.:userId.>").unwrap();
        let params = pattern.params("ws.out.user-1.new-message");
        assert_eq!(params.get("userId").and_then(|v| v.as_str()), Some("user-1"));
        assert_eq!(pattern.param_index("userId"), Some(2));
        assert_eq!(pattern.wildcard(), "ws.out.*.>");
        assert_eq!(pattern.param_names(), vec!["userId"]);
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(SubjectPattern::parse("").is_err());
        assert!(SubjectPattern::parse("a..b").is_err());
        assert!(SubjectPattern::parse("a.>.b").is_err());
    }

    #[test]
    fn replaces_a_single_token() {
        assert_eq!(replace_token("ws.out.*.hello", 2, "abc"), "ws.out.abc.hello");
    }
}

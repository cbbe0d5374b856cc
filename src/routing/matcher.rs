//! Subject matching logic.
//!
//! # Responsibilities
//! - Compile glob patterns (`*`, `**`, `?`, `[...]`, `{a,b}`) to anchored regexes
//! - Support negation with a leading `!`
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - `*` and `?` never cross a `/`, so against dot-joined subjects they span
//!   any number of tokens, like `**`
//! - Matching is case-sensitive
//! - An empty condition list always matches

use regex::Regex;

/// Trait for matching subjects against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the subject matches this condition.
    fn matches(&self, subject: &str) -> bool;
}

/// A single compiled glob, optionally negated.
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    pattern: String,
    regex: Regex,
    negated: bool,
}

impl GlobMatcher {
    /// Compile a glob. Each leading `!` toggles negation.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let trimmed = pattern.trim();
        let bangs = trimmed.chars().take_while(|c| *c == '!').count();
        let body = &trimmed[bangs..];

        Ok(Self {
            pattern: trimmed.to_string(),
            regex: Regex::new(&glob_to_regex(body))?,
            negated: bangs % 2 == 1,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl Matcher for GlobMatcher {
    fn matches(&self, subject: &str) -> bool {
        self.regex.is_match(subject) != self.negated
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }

    /// Compile a comma-separated list of globs. Commas inside `{...}` belong
    /// to the glob.
    pub fn from_globs(patterns: &str) -> Result<Self, regex::Error> {
        let matchers = split_top_level(patterns)
            .into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| GlobMatcher::new(p).map(|m| Box::new(m) as Box<dyn Matcher>))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(matchers))
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, subject: &str) -> bool {
        self.matchers.iter().all(|m| m.matches(subject))
    }
}

fn split_top_level(patterns: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (index, c) in patterns.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&patterns[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&patterns[start..]);
    parts
}

/// Translate a glob body into an anchored regex.
pub fn glob_to_regex(glob: &str) -> String {
    format!("^{}$", translate(glob))
}

fn translate(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    out.push_str(".*");
                    while chars.get(i + 1) == Some(&'*') {
                        i += 1;
                    }
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '[' => match chars[i + 1..].iter().position(|c| *c == ']') {
                Some(len) if len > 0 => {
                    let class: String = chars[i + 1..i + 1 + len].iter().collect();
                    out.push('[');
                    let class = match class.strip_prefix('!').or_else(|| class.strip_prefix('^')) {
                        Some(rest) => {
                            out.push('^');
                            rest.to_string()
                        }
                        None => class,
                    };
                    out.push_str(&class.replace('\\', "\\\\").replace('[', "\\["));
                    out.push(']');
                    i += len + 1;
                }
                _ => out.push_str("\\["),
            },
            '{' => match chars[i + 1..].iter().position(|c| *c == '}') {
                Some(len) => {
                    let inner: String = chars[i + 1..i + 1 + len].iter().collect();
                    if inner.contains(',') {
                        let alternatives: Vec<String> = inner.split(',').map(translate).collect();
                        out.push_str("(?:");
                        out.push_str(&alternatives.join("|"));
                        out.push(')');
                    } else {
                        // `{dot}` and friends are literal
                        out.push_str(&regex::escape(&format!("{{{inner}}}")));
                    }
                    i += len + 1;
                }
                None => out.push_str("\\{"),
            },
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
        i += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(pattern: &str) -> GlobMatcher {
        GlobMatcher::new(pattern).unwrap()
    }

    #[test]
    fn test_star_spans_tokens() {
        let matcher = glob("http.post.*");
        assert!(matcher.matches("http.post.foo"));
        assert!(matcher.matches("http.post.foo.bar"));
        assert!(!matcher.matches("http.get.foo"));
    }

    #[test]
    fn test_negation() {
        let matcher = glob("!http.post.auth.*");
        assert!(matcher.matches("http.post.user"));
        assert!(!matcher.matches("http.post.auth.login"));
    }

    #[test]
    fn test_braces_and_classes() {
        let matcher = glob("http.{get,post}.foo");
        assert!(matcher.matches("http.get.foo"));
        assert!(matcher.matches("http.post.foo"));
        assert!(!matcher.matches("http.put.foo"));

        let matcher = glob("http.get.v[0-9]");
        assert!(matcher.matches("http.get.v2"));
        assert!(!matcher.matches("http.get.vx"));

        let matcher = glob("http.get.v[!0-9]");
        assert!(matcher.matches("http.get.vx"));
    }

    #[test]
    fn test_dot_placeholder_is_literal() {
        let matcher = glob("http.get.file{dot}txt");
        assert!(matcher.matches("http.get.file{dot}txt"));
        assert!(!matcher.matches("http.get.filextxt"));
    }

    #[test]
    fn test_question_mark() {
        let matcher = glob("http.get.a?c");
        assert!(matcher.matches("http.get.abc"));
        assert!(!matcher.matches("http.get.ac"));
    }

    #[test]
    fn test_and_matcher() {
        let matcher = AndMatcher::from_globs("http.post.*,!http.post.auth").unwrap();
        assert_eq!(matcher.len(), 2);
        assert!(matcher.matches("http.post.user"));
        assert!(!matcher.matches("http.post.auth"));
        assert!(!matcher.matches("http.get.user"));

        assert!(AndMatcher::default().matches("anything"));

        let matcher = AndMatcher::from_globs("http.{get,put}.*,!*.secret").unwrap();
        assert_eq!(matcher.len(), 2);
        assert!(matcher.matches("http.put.foo"));
        assert!(!matcher.matches("http.get.secret"));
    }
}

//! Wildcard key patterns for bulk invalidation.
//!
//! Patterns are validated against length and wildcard-count limits before anything is matched.
//! The common shapes (`abc*`, `*abc`, `*abc*`) are answered with plain string operations; only
//! patterns with interior wildcards go through a compiled, case-insensitive regex whose
//! evaluation is budgeted per candidate key.

use std::time::{Duration, Instant};

use regex::{Regex, RegexBuilder};
use tracing::warn;

use super::error::CacheError;

const WILDCARD: char = '*';
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// DoS guards applied to every pattern.
#[derive(Debug, Clone, Copy)]
pub struct PatternLimits {
    pub max_length: usize,
    pub max_wildcards: usize,
    pub match_timeout: Duration,
}

#[derive(Debug, Clone)]
pub(crate) enum KeyPattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    General { source: String, regex: Regex },
}

impl KeyPattern {
    /// Validate and classify `pattern`. Nothing is truncated: over-limit patterns are rejected.
    pub(crate) fn parse(pattern: &str, limits: &PatternLimits) -> Result<Self, CacheError> {
        if pattern.is_empty() {
            return Err(CacheError::invalid_pattern("pattern must not be empty"));
        }
        let length = pattern.chars().count();
        if length > limits.max_length {
            return Err(CacheError::invalid_pattern(format!(
                "pattern length {length} exceeds the maximum of {}",
                limits.max_length
            )));
        }
        let wildcards = pattern.matches(WILDCARD).count();
        if wildcards > limits.max_wildcards {
            return Err(CacheError::invalid_pattern(format!(
                "pattern has {wildcards} wildcards, the maximum is {}",
                limits.max_wildcards
            )));
        }

        let folded = pattern.to_lowercase();
        let starts = folded.starts_with(WILDCARD);
        let ends = folded.ends_with(WILDCARD);

        let shape = match wildcards {
            0 => Self::Exact(folded),
            1 if ends => Self::Prefix(folded.trim_end_matches(WILDCARD).to_string()),
            1 if starts => Self::Suffix(folded.trim_start_matches(WILDCARD).to_string()),
            2 if starts && ends && folded.len() >= 2 => {
                let inner = &folded[1..folded.len() - 1];
                if inner.contains(WILDCARD) {
                    Self::general(pattern)?
                } else {
                    Self::Contains(inner.to_string())
                }
            }
            _ => Self::general(pattern)?,
        };
        Ok(shape)
    }

    fn general(pattern: &str) -> Result<Self, CacheError> {
        let body = pattern
            .split(WILDCARD)
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = RegexBuilder::new(&format!("^{body}$"))
            .case_insensitive(true)
            .size_limit(REGEX_SIZE_LIMIT)
            .dfa_size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|err| CacheError::invalid_pattern(format!("pattern did not compile: {err}")))?;
        Ok(Self::General {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Case-insensitive match of `key`. A general pattern that uses up `budget` on a key counts
    /// as not matching that key.
    pub(crate) fn matches(&self, key: &str, budget: Duration) -> bool {
        match self {
            Self::Exact(expected) => key.to_lowercase() == *expected,
            Self::Prefix(prefix) => key.to_lowercase().starts_with(prefix.as_str()),
            Self::Suffix(suffix) => key.to_lowercase().ends_with(suffix.as_str()),
            Self::Contains(needle) => key.to_lowercase().contains(needle.as_str()),
            Self::General { source, regex } => {
                let started = Instant::now();
                let matched = regex.is_match(key);
                let elapsed = started.elapsed();
                if elapsed >= budget {
                    warn!(
                        pattern = %source,
                        key,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "pattern evaluation exceeded its budget; treating key as non-matching"
                    );
                    return false;
                }
                matched
            }
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Exact(_) => "exact",
            Self::Prefix(_) => "prefix",
            Self::Suffix(_) => "suffix",
            Self::Contains(_) => "contains",
            Self::General { .. } => "general",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> PatternLimits {
        PatternLimits {
            max_length: 32,
            max_wildcards: 3,
            match_timeout: Duration::from_millis(100),
        }
    }

    fn parse(pattern: &str) -> KeyPattern {
        KeyPattern::parse(pattern, &limits()).expect("valid pattern")
    }

    #[test]
    fn classifies_shapes() {
        assert_eq!(parse("page:1").kind(), "exact");
        assert_eq!(parse("page:*").kind(), "prefix");
        assert_eq!(parse("*:html").kind(), "suffix");
        assert_eq!(parse("*posts*").kind(), "contains");
        assert_eq!(parse("page:*:html").kind(), "general");
        assert_eq!(parse("*a*b*").kind(), "general");
    }

    #[test]
    fn matching_ignores_case() {
        let budget = limits().match_timeout;
        assert!(parse("PAGE:*").matches("page:1", budget));
        assert!(parse("*:HTML").matches("page:1:html", budget));
        assert!(parse("*Posts*").matches("/blog/POSTS/1", budget));
        assert!(parse("Page:1").matches("pAgE:1", budget));
        assert!(parse("page:*:html").matches("PAGE:42:HTML", budget));
        assert!(!parse("page:*:html").matches("page:42:json", budget));
        assert!(!parse("page:*").matches("user:1", budget));
    }

    #[test]
    fn general_pattern_escapes_regex_metacharacters() {
        let budget = limits().match_timeout;
        let pattern = parse("/a.b*(c)");
        assert!(pattern.matches("/a.b/x(c)", budget));
        assert!(!pattern.matches("/aXb/x(c)", budget));
    }

    #[test]
    fn rejects_too_many_wildcards() {
        let err = KeyPattern::parse("*a*b*c*", &limits()).expect_err("four wildcards");
        assert!(matches!(err, CacheError::InvalidPattern { .. }));
    }

    #[test]
    fn rejects_too_long_and_empty_patterns() {
        let long = "x".repeat(33);
        assert!(matches!(
            KeyPattern::parse(&long, &limits()),
            Err(CacheError::InvalidPattern { .. })
        ));
        assert!(matches!(
            KeyPattern::parse("", &limits()),
            Err(CacheError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn bare_wildcards_match_everything() {
        let budget = limits().match_timeout;
        assert!(parse("*").matches("anything", budget));
        assert!(parse("**").matches("", budget));
    }
}

//! Pattern matching between a configured matcher string and a tool name.
//!
//! `*` matches every tool; an exact string match wins before a pattern is
//! ever compiled; anything else is compiled as a full-match regular
//! expression. A pattern that fails to compile falls back permanently to
//! exact-string equality rather than recompiling (and re-failing) on every
//! lookup.

use dashmap::DashMap;
use regex::Regex;

#[derive(Clone)]
enum Compiled {
    Regex(Regex),
    /// The pattern is not a valid regex; fall back to literal equality.
    Literal(String),
}

/// Caches compiled patterns so repeated triggers for the same matcher don't
/// pay regex compilation cost on every call.
#[derive(Default)]
pub struct PatternMatcher {
    cache: DashMap<String, Compiled>,
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `pattern` matches `tool_name`.
    pub fn matches(&self, pattern: &str, tool_name: &str) -> bool {
        if pattern.is_empty() || tool_name.is_empty() {
            return false;
        }
        if pattern == "*" {
            return true;
        }
        if pattern == tool_name {
            return true;
        }

        if let Some(compiled) = self.cache.get(pattern) {
            return Self::matches_compiled(&compiled, tool_name);
        }

        let compiled = match Regex::new(&format!("^(?:{pattern})$")) {
            Ok(re) => Compiled::Regex(re),
            Err(_) => Compiled::Literal(pattern.to_string()),
        };
        let matched = Self::matches_compiled(&compiled, tool_name);
        self.cache.insert(pattern.to_string(), compiled);
        matched
    }

    fn matches_compiled(compiled: &Compiled, tool_name: &str) -> bool {
        match compiled {
            Compiled::Regex(re) => re.is_match(tool_name),
            Compiled::Literal(literal) => literal == tool_name,
        }
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_anything() {
        let m = PatternMatcher::new();
        assert!(m.matches("*", "anything"));
        assert!(m.matches("*", "local_shell"));
    }

    #[test]
    fn exact_match() {
        let m = PatternMatcher::new();
        assert!(m.matches("local_shell", "local_shell"));
        assert!(!m.matches("local_shell", "other_tool"));
    }

    #[test]
    fn regex_match_is_full_match_anchored() {
        let m = PatternMatcher::new();
        assert!(m.matches(".*shell.*", "local_shell"));
        assert!(m.matches("File.*", "FileWrite"));
        assert!(!m.matches("File.*", "RunFile")); // not anchored to start
    }

    #[test]
    fn invalid_regex_falls_back_to_literal_equality() {
        let m = PatternMatcher::new();
        let pattern = "a(b";
        assert!(!m.matches(pattern, "a(b_other"));
        assert!(m.matches(pattern, pattern));
        assert_eq!(m.cache_size(), 1);
    }

    #[test]
    fn cache_is_reused_across_calls() {
        let m = PatternMatcher::new();
        assert!(m.matches("File.*", "FileWrite"));
        assert!(m.matches("File.*", "FileRead"));
        assert_eq!(m.cache_size(), 1);
        m.clear_cache();
        assert_eq!(m.cache_size(), 0);
    }
}

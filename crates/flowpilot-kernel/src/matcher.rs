//! Query-keyword matcher.
//!
//! Query phrasing ("show current flow", "查看当前流程") must never be read as
//! creation intent.  The matcher aggregates the query keywords of every loaded
//! locale and answers two questions:
//!
//! | Check | Technique |
//! |-------|-----------|
//! | [`QueryMatcher::is_query`] | equality, then substring via [`aho_corasick`], then word-boundary regex |
//! | [`QueryMatcher::matches_pattern`] | compiled word-boundary alternations only |
//!
//! The word-boundary alternations are chunked into groups of at most
//! [`MAX_KEYWORDS_PER_PATTERN`] keywords, longest keywords first, so a short
//! keyword never shadows a longer one inside the same alternation.

use aho_corasick::{AhoCorasick, MatchKind};
use regex::Regex;

use crate::error::{KernelError, Result};

/// Upper bound on the number of keywords compiled into one alternation.
pub const MAX_KEYWORDS_PER_PATTERN: usize = 50;

// ---------------------------------------------------------------------------
// QueryMatcher
// ---------------------------------------------------------------------------

/// Case-folded, locale-wide query keyword matcher.
///
/// Built once per locale snapshot and never mutated afterwards; a reload
/// builds a fresh matcher.
#[derive(Debug, Clone)]
pub struct QueryMatcher {
    /// Normalised keywords, longest first.
    keywords: Vec<String>,
    /// Leftmost-longest automaton over `keywords`.
    automaton: Option<AhoCorasick>,
    /// Word-boundary alternations, each holding at most
    /// [`MAX_KEYWORDS_PER_PATTERN`] keywords.
    patterns: Vec<Regex>,
}

impl QueryMatcher {
    /// Build a matcher from raw keywords.
    ///
    /// Keywords are normalised (trimmed, lowercased, whitespace collapsed),
    /// deduplicated, and sorted longest first.  Empty keywords are dropped.
    pub fn new<I, S>(keywords: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = keywords
            .into_iter()
            .map(|k| normalize(k.as_ref()))
            .filter(|k| !k.is_empty())
            .collect();

        normalized.sort_by(|a, b| {
            b.chars()
                .count()
                .cmp(&a.chars().count())
                .then_with(|| a.cmp(b))
        });
        normalized.dedup();

        if normalized.is_empty() {
            return Ok(Self::empty());
        }

        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&normalized)
            .map_err(|e| KernelError::MatcherBuildError {
                reason: e.to_string(),
            })?;

        let mut patterns = Vec::with_capacity(normalized.len().div_ceil(MAX_KEYWORDS_PER_PATTERN));
        for chunk in normalized.chunks(MAX_KEYWORDS_PER_PATTERN) {
            let alternation = chunk
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            let pattern = format!(r"(?i)\b(?:{alternation})\b");
            let compiled = Regex::new(&pattern).map_err(|e| KernelError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            patterns.push(compiled);
        }

        tracing::trace!(
            keywords = normalized.len(),
            chunks = patterns.len(),
            "query matcher built"
        );

        Ok(Self {
            keywords: normalized,
            automaton: Some(automaton),
            patterns,
        })
    }

    /// A matcher that never matches.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            keywords: Vec::new(),
            automaton: None,
            patterns: Vec::new(),
        }
    }

    /// Returns `true` when the message equals, contains, or word-boundary
    /// matches any query keyword.
    pub fn is_query(&self, message: &str) -> bool {
        self.matched_keyword(message).is_some() || self.matches_pattern(message)
    }

    /// Return the longest keyword that the message equals or contains.
    pub fn matched_keyword(&self, message: &str) -> Option<&str> {
        let lowered = normalize(message);
        if lowered.is_empty() {
            return None;
        }

        if let Some(exact) = self.keywords.iter().find(|k| **k == lowered) {
            return Some(exact.as_str());
        }

        let ac = self.automaton.as_ref()?;
        ac.find_iter(&lowered)
            .max_by_key(|m| m.end() - m.start())
            .map(|m| self.keywords[m.pattern().as_usize()].as_str())
    }

    /// Returns `true` when the compiled word-boundary alternations match.
    pub fn matches_pattern(&self, message: &str) -> bool {
        let lowered = normalize(message);
        self.patterns.iter().any(|p| p.is_match(&lowered))
    }

    /// The normalised keywords, longest first.
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Number of compiled alternations.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Number of distinct keywords.
    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    /// Whether the matcher holds no keywords.
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

impl Default for QueryMatcher {
    fn default() -> Self {
        Self::empty()
    }
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

/// Trim, lowercase, and collapse internal whitespace runs to a single space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Returns `true` if `needle` occurs in `haystack` delimited by non-word
/// characters (or the string edges) on both sides.
///
/// Both arguments are expected to be lowercased already.  Word characters
/// follow the Unicode definition used by `regex`'s `\b`, so a CJK keyword
/// embedded in a CJK sentence is not a word-boundary match.
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    haystack.match_indices(needle).any(|(start, matched)| {
        let end = start + matched.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !is_word_char(c));
        let after_ok = haystack[end..]
            .chars()
            .next()
            .is_none_or(|c| !is_word_char(c));
        before_ok && after_ok
    })
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_contained_keywords_match() {
        let matcher = QueryMatcher::new(["Show current flow", "查看当前流程"]).unwrap();
        assert!(matcher.is_query("show current flow"));
        assert!(matcher.is_query("  SHOW   current flow please"));
        assert!(matcher.is_query("请帮我查看当前流程"));
        assert!(!matcher.is_query("create a new flow"));
    }

    #[test]
    fn longest_keyword_wins() {
        let matcher = QueryMatcher::new(["flow", "current flow"]).unwrap();
        assert_eq!(matcher.matched_keyword("show current flow"), Some("current flow"));
        assert_eq!(matcher.keywords()[0], "current flow");
    }

    #[test]
    fn keywords_are_chunked() {
        let keywords: Vec<String> = (0..120).map(|i| format!("keyword{i}")).collect();
        let matcher = QueryMatcher::new(&keywords).unwrap();
        assert_eq!(matcher.len(), 120);
        assert_eq!(matcher.pattern_count(), 3);
        assert!(matcher.matches_pattern("this has keyword119 inside"));
    }

    #[test]
    fn word_boundary_pattern_ignores_partial_words() {
        let matcher = QueryMatcher::new(["list flows"]).unwrap();
        assert!(matcher.matches_pattern("please list flows now"));
        assert!(!matcher.matches_pattern("checklist flowsheet"));
    }

    #[test]
    fn empty_matcher_never_matches() {
        let matcher = QueryMatcher::new(Vec::<String>::new()).unwrap();
        assert!(matcher.is_empty());
        assert!(!matcher.is_query("anything"));
    }

    #[test]
    fn contains_word_respects_boundaries() {
        assert!(contains_word("create a flow", "flow"));
        assert!(!contains_word("create a workflow", "flow"));
        assert!(contains_word("flow", "flow"));
        assert!(!contains_word("创建流程", "流程"));
        assert!(!contains_word("anything", ""));
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("  Hello\t  World \n"), "hello world");
    }
}

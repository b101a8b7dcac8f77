//! Compiled regex memoization on top of [`BoundedCache`].

use super::bounded::{BoundedCache, CacheStats};
use crate::{Error, ErrorContext, Result};
use regex::{Regex, RegexBuilder};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PatternKey {
    pattern: String,
    flags: String,
}

/// Memoizes compiled patterns keyed by `pattern + flags`.
///
/// Supported flags: `i` (case-insensitive), `m` (multi-line), `s` (dot
/// matches newline), `x` (verbose). Flag order and repetition do not matter.
pub struct PatternCache {
    cache: BoundedCache<PatternKey, Regex>,
}

impl PatternCache {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            cache: BoundedCache::new(capacity)?,
        })
    }

    fn normalize_flags(flags: &str) -> Result<String> {
        let mut out: Vec<char> = Vec::new();
        for c in flags.chars() {
            if !matches!(c, 'i' | 'm' | 's' | 'x') {
                return Err(Error::validation_with_context(
                    format!("unsupported regex flag '{}'", c),
                    ErrorContext::new()
                        .with_field_path("flags")
                        .with_source("pattern_cache"),
                ));
            }
            if !out.contains(&c) {
                out.push(c);
            }
        }
        out.sort_unstable();
        Ok(out.into_iter().collect())
    }

    /// Compiled regex for `pattern` with `flags`, compiling on first use.
    /// Invalid patterns are reported and never cached.
    pub fn get_or_compile(&self, pattern: &str, flags: &str) -> Result<Regex> {
        let flags = Self::normalize_flags(flags)?;
        let key = PatternKey {
            pattern: pattern.to_string(),
            flags: flags.clone(),
        };
        self.cache.try_get_or_insert_with(key, || {
            RegexBuilder::new(pattern)
                .case_insensitive(flags.contains('i'))
                .multi_line(flags.contains('m'))
                .dot_matches_new_line(flags.contains('s'))
                .ignore_whitespace(flags.contains('x'))
                .build()
                .map_err(|e| {
                    Error::validation_with_context(
                        format!("invalid pattern: {}", e),
                        ErrorContext::new()
                            .with_field_path("pattern")
                            .with_details(pattern.to_string())
                            .with_source("pattern_cache"),
                    )
                })
        })
    }

    pub fn is_match(&self, pattern: &str, flags: &str, haystack: &str) -> Result<bool> {
        Ok(self.get_or_compile(pattern, flags)?.is_match(haystack))
    }

    /// Every non-overlapping match as `(start, matched text)`.
    pub fn search(&self, pattern: &str, flags: &str, haystack: &str) -> Result<Vec<(usize, String)>> {
        let re = self.get_or_compile(pattern, flags)?;
        Ok(re
            .find_iter(haystack)
            .map(|m| (m.start(), m.as_str().to_string()))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiles_once_per_pattern_and_flags() {
        let cache = PatternCache::new(8).unwrap();
        cache.get_or_compile("err(or)?", "i").unwrap();
        cache.get_or_compile("err(or)?", "ii").unwrap();
        cache.get_or_compile("err(or)?", "").unwrap();
        assert_eq!(cache.len(), 2);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 2));
    }

    #[test]
    fn test_flags_apply() {
        let cache = PatternCache::new(8).unwrap();
        assert!(cache.is_match("^warn", "im", "info\nWARN here").unwrap());
        assert!(!cache.is_match("^warn", "", "info\nWARN here").unwrap());
        assert!(cache.is_match("a.b", "s", "a\nb").unwrap());
        assert!(cache.is_match("a b c", "x", "abc").unwrap());
    }

    #[test]
    fn test_search_positions() {
        let cache = PatternCache::new(2).unwrap();
        let hits = cache.search(r"\d+", "", "a1 b22 c333").unwrap();
        assert_eq!(
            hits,
            vec![(1, "1".into()), (4, "22".into()), (8, "333".into())]
        );
    }

    #[test]
    fn test_invalid_pattern_is_not_cached() {
        let cache = PatternCache::new(2).unwrap();
        assert!(matches!(
            cache.get_or_compile("(unclosed", ""),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            cache.get_or_compile("ok", "q"),
            Err(Error::Validation { .. })
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_bounds_compiled_patterns() {
        let cache = PatternCache::new(2).unwrap();
        for p in ["a", "b", "c"] {
            cache.get_or_compile(p, "").unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }
}

//! Path patterns matched against the live nesting path of a document.
//!
//! Paths and patterns are `.`-separated. The document root is `!`, array
//! positions appear as `*`, and a `*` in a pattern matches exactly one
//! segment. Matching is anchored at the tail of the path: `a.*` matches
//! `!.x.a.b` but not `!.a.b.c`.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Any,
    Literal(String),
}

/// A pre-split path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let segments = pattern
            .split('.')
            .map(|segment| match segment {
                "*" => Segment::Any,
                other => Segment::Literal(other.to_string()),
            })
            .collect();
        Self {
            source: pattern.to_string(),
            segments,
        }
    }

    /// Whether the tail of `path` matches this pattern segment by segment.
    pub fn matches<S: AsRef<str>>(&self, path: &[S]) -> bool {
        if self.segments.len() > path.len() {
            return false;
        }
        let tail = &path[path.len() - self.segments.len()..];
        self.segments
            .iter()
            .zip(tail)
            .all(|(segment, actual)| match segment {
                Segment::Any => true,
                Segment::Literal(expected) => expected == actual.as_ref(),
            })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Number of patterns in `patterns` matching `path`.
pub(crate) fn count_matches<S: AsRef<str>>(patterns: &[PathPattern], path: &[S]) -> usize {
    patterns.iter().filter(|p| p.matches(path)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> Vec<&str> {
        s.split('.').collect()
    }

    #[test]
    fn test_wildcard_matches_one_segment() {
        let pattern = PathPattern::parse("!.var1.*");
        assert!(pattern.matches(&path("!.var1.a")));
        assert!(pattern.matches(&path("!.var1.*")));
        assert!(!pattern.matches(&path("!.var1")));
        assert!(!pattern.matches(&path("!.var1.a.b")));
    }

    #[test]
    fn test_suffix_anchoring() {
        let pattern = PathPattern::parse("a.*");
        assert!(pattern.matches(&path("!.x.a.b")));
        assert!(!pattern.matches(&path("!.a.b.c")));
    }

    #[test]
    fn test_literal_segments_compare_whole() {
        let pattern = PathPattern::parse("!.*.el");
        assert!(pattern.matches(&path("!.var2.el")));
        assert!(!pattern.matches(&path("!.var2.xel")));
    }

    #[test]
    fn test_count_matches() {
        let patterns = vec![PathPattern::parse("!.*.a"), PathPattern::parse("*.a")];
        assert_eq!(count_matches(&patterns, &path("!.x.a")), 2);
        assert_eq!(count_matches(&patterns, &path("!.x.y.a")), 1);
        assert_eq!(count_matches(&patterns, &path("!.x")), 0);
    }
}

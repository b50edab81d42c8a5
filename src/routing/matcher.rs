//! Listen-path pattern matching.
//!
//! # Responsibilities
//! - Parse listen paths (`/users`, `/users/:id`, `/users/*`)
//! - Match request paths on segment boundaries
//! - Rank patterns so the most specific one wins
//!
//! # Design Decisions
//! - Every pattern is a prefix pattern; a trailing `/*` is accepted and normalized away
//! - Path matching is case-sensitive
//! - `:name` segments match exactly one non-empty segment; the name is
//!   cosmetic, so `/u/:id` and `/u/:name` are the same pattern
//! - No regex to guarantee O(n) matching

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

/// Why a listen path could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("listen path is empty")]
    Empty,

    #[error("listen path must start with '/'")]
    MissingLeadingSlash,

    #[error("empty segment in {0:?}")]
    EmptySegment(String),

    #[error("wildcard is only allowed as the last segment")]
    MisplacedWildcard,

    #[error("parameter segment has no name")]
    UnnamedParam,

    #[error("invalid character {0:?}")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
}

impl Segment {
    fn rank(&self) -> u8 {
        match self {
            Segment::Static(_) => 2,
            Segment::Param(_) => 1,
        }
    }
}

/// How specific a pattern is. Deeper patterns win; at equal depth static
/// segments beat parameter segments, compared left to right.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    depth: usize,
    ranks: Vec<u8>,
}

/// A parsed, normalized listen path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenPath {
    /// Normalized form with parameter names erased.
    key: String,
    /// Normalized form as written.
    canonical: String,
    segments: Vec<Segment>,
}

impl ListenPath {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }
        if !raw.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash);
        }
        if let Some(c) = raw.chars().find(|c| matches!(c, '?' | '#') || c.is_whitespace()) {
            return Err(PatternError::InvalidChar(c));
        }

        let mut pieces: Vec<&str> = raw[1..].split('/').collect();

        // Trailing "/*" (or "/*rest") and a trailing slash are both no-ops.
        if pieces.last().is_some_and(|p| p.starts_with('*')) {
            pieces.pop();
        }
        if pieces.last().is_some_and(|p| p.is_empty()) {
            pieces.pop();
        }

        let mut segments = Vec::with_capacity(pieces.len());
        for piece in pieces {
            if piece.is_empty() {
                return Err(PatternError::EmptySegment(raw.to_string()));
            }
            if piece.contains('*') {
                return Err(PatternError::MisplacedWildcard);
            }
            match piece.strip_prefix(':') {
                Some("") => return Err(PatternError::UnnamedParam),
                Some(name) => segments.push(Segment::Param(name.to_string())),
                None => segments.push(Segment::Static(piece.to_string())),
            }
        }

        let render = |named: bool| -> String {
            if segments.is_empty() {
                return "/".to_string();
            }
            segments
                .iter()
                .map(|s| match s {
                    Segment::Static(v) => format!("/{}", v),
                    Segment::Param(n) if named => format!("/:{}", n),
                    Segment::Param(_) => "/:".to_string(),
                })
                .collect()
        };
        let key = render(false);
        let canonical = render(true);

        Ok(Self {
            key,
            canonical,
            segments,
        })
    }

    /// Registry key. Patterns matching the same requests share a key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Normalized form with parameter names kept.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn specificity(&self) -> Specificity {
        Specificity {
            depth: self.segments.len(),
            ranks: self.segments.iter().map(Segment::rank).collect(),
        }
    }

    /// Match `path` against this pattern.
    ///
    /// Returns the byte length of the matched prefix. The remainder of the
    /// path is either empty or starts with `/`.
    pub fn match_prefix(&self, path: &str) -> Option<usize> {
        if !path.starts_with('/') {
            return None;
        }

        let mut offset = 0;
        for segment in &self.segments {
            let rest = &path[offset..];
            let after = rest.strip_prefix('/')?;
            let end = after.find('/').unwrap_or(after.len());
            let piece = &after[..end];

            let ok = match segment {
                Segment::Static(expected) => piece == expected,
                Segment::Param(_) => !piece.is_empty(),
            };
            if !ok {
                return None;
            }
            offset += 1 + end;
        }
        Some(offset)
    }

    pub fn matches(&self, path: &str) -> bool {
        self.match_prefix(path).is_some()
    }

    /// The part of `path` after the matched prefix, always starting with `/`.
    pub fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        self.match_prefix(path).map(|len| match &path[len..] {
            "" => "/",
            rest => rest,
        })
    }

    /// Order two patterns most-specific first, falling back to the key so
    /// the order is total.
    pub fn cmp_specificity(&self, other: &Self) -> Ordering {
        other
            .specificity()
            .cmp(&self.specificity())
            .then_with(|| self.key.cmp(&other.key))
    }
}

/// Registry key for a raw pattern, or the input itself when it does not parse.
pub fn pattern_key(raw: &str) -> String {
    ListenPath::parse(raw)
        .map(|p| p.key)
        .unwrap_or_else(|_| raw.to_string())
}

impl fmt::Display for ListenPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_wildcard_and_trailing_slash() {
        assert_eq!(ListenPath::parse("/foo/*").unwrap().as_str(), "/foo");
        assert_eq!(ListenPath::parse("/foo/").unwrap().as_str(), "/foo");
        assert_eq!(ListenPath::parse("/foo/*rest").unwrap().as_str(), "/foo");
        assert_eq!(ListenPath::parse("/").unwrap().as_str(), "/");
        assert_eq!(ListenPath::parse("/*").unwrap().as_str(), "/");
        assert_eq!(ListenPath::parse("/users/:id").unwrap().as_str(), "/users/:id");
    }

    #[test]
    fn param_names_do_not_change_the_key() {
        let id = ListenPath::parse("/u/:id/posts").unwrap();
        let name = ListenPath::parse("/u/:name/posts/*").unwrap();
        assert_eq!(id.key(), "/u/:/posts");
        assert_eq!(id.key(), name.key());
        assert_ne!(id.as_str(), name.as_str());
        assert_eq!(pattern_key("/u/:name/posts"), "/u/:/posts");
        assert_eq!(pattern_key("/static"), "/static");
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert_eq!(ListenPath::parse(""), Err(PatternError::Empty));
        assert_eq!(ListenPath::parse("foo"), Err(PatternError::MissingLeadingSlash));
        assert!(matches!(ListenPath::parse("/a//b"), Err(PatternError::EmptySegment(_))));
        assert_eq!(ListenPath::parse("/a/*/b"), Err(PatternError::MisplacedWildcard));
        assert_eq!(ListenPath::parse("/a/:"), Err(PatternError::UnnamedParam));
        assert_eq!(ListenPath::parse("/a?b"), Err(PatternError::InvalidChar('?')));
    }

    #[test]
    fn matches_on_segment_boundaries() {
        let p = ListenPath::parse("/foo").unwrap();
        assert!(p.matches("/foo"));
        assert!(p.matches("/foo/"));
        assert!(p.matches("/foo/bar"));
        assert!(!p.matches("/foobar"));
        assert!(!p.matches("/fo"));
        assert!(!p.matches("foo"));

        let root = ListenPath::parse("/").unwrap();
        assert!(root.matches("/anything/at/all"));
    }

    #[test]
    fn params_match_one_segment() {
        let p = ListenPath::parse("/users/:id/posts").unwrap();
        assert!(p.matches("/users/42/posts"));
        assert!(p.matches("/users/42/posts/7"));
        assert!(!p.matches("/users//posts"));
        assert!(!p.matches("/users/42"));
    }

    #[test]
    fn strip_removes_matched_prefix() {
        let p = ListenPath::parse("/foo/*").unwrap();
        assert_eq!(p.strip("/foo/bar"), Some("/bar"));
        assert_eq!(p.strip("/foo"), Some("/"));
        assert_eq!(p.strip("/foo/"), Some("/"));

        let p = ListenPath::parse("/users/:id").unwrap();
        assert_eq!(p.strip("/users/42/profile"), Some("/profile"));
        assert_eq!(p.strip("/other"), None);
    }

    #[test]
    fn static_beats_param_at_equal_depth() {
        let me = ListenPath::parse("/users/me").unwrap();
        let id = ListenPath::parse("/users/:id").unwrap();
        let users = ListenPath::parse("/users").unwrap();

        assert!(me.specificity() > id.specificity());
        assert!(id.specificity() > users.specificity());

        let mut all = vec![users.clone(), id.clone(), me.clone()];
        all.sort_by(|a, b| a.cmp_specificity(b));
        assert_eq!(all, vec![me, id, users]);
    }
}

//! Wildcard path matching
//!
//! Rule paths are made of literal segments and single-level `*` wildcards.
//! A leading `/` is optional on both sides and ignored for alignment, so
//! `/a/*` and `a/*` describe the same pattern.
//!
//! ```
//! use routegate_authz::matcher::{count_segments, matches};
//!
//! assert_eq!(count_segments("/a/b/c"), 3);
//! assert!(matches("/a/*/c", "/a/x/c"));
//! assert!(!matches("/a/*", "/a/x/y"));
//! ```

/// Segment wildcard matching exactly one non-empty path segment
pub const WILDCARD: &str = "*";

fn trim_root(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Number of `/`-separated segments in a path.
///
/// The root path (`"/"`) and the empty path both have zero segments.
pub fn count_segments(path: &str) -> usize {
    let trimmed = trim_root(path);
    if trimmed.is_empty() {
        0
    } else {
        trimmed.matches('/').count() + 1
    }
}

/// Whether a rule path contains at least one wildcard segment
pub fn has_wildcard(pattern: &str) -> bool {
    trim_root(pattern).split('/').any(|segment| segment == WILDCARD)
}

/// Check a concrete request path against a rule pattern.
///
/// Segment counts must be equal; wildcards never span levels.
pub fn matches(pattern: &str, path: &str) -> bool {
    if pattern == path {
        return true;
    }

    if count_segments(pattern) != count_segments(path) {
        return false;
    }

    trim_root(pattern)
        .split('/')
        .zip(trim_root(path).split('/'))
        .all(|(expected, actual)| {
            if expected == WILDCARD {
                !actual.is_empty()
            } else {
                expected == actual
            }
        })
}

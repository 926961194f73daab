//! Path patterns used by middleware allow-lists and per-endpoint settings.
//!
//! A pattern is either an exact path (`/health`) or a prefix ending in `*`
//! (`/admin/*`, `/docs*`).

use std::collections::HashMap;

pub fn matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => pattern == path,
    }
}

pub fn matches_any<S: AsRef<str>>(patterns: &[S], path: &str) -> bool {
    patterns.iter().any(|p| matches(p.as_ref(), path))
}

/// Value of the best matching pattern: an exact match first, otherwise the
/// wildcard pattern with the longest prefix.
pub fn best_match<'a, V>(patterns: &'a HashMap<String, V>, path: &str) -> Option<&'a V> {
    if let Some(value) = patterns.get(path) {
        return Some(value);
    }

    patterns
        .iter()
        .filter_map(|(pattern, value)| {
            let prefix = pattern.strip_suffix('*')?;
            path.starts_with(prefix).then_some((prefix.len(), value))
        })
        .max_by_key(|(len, _)| *len)
        .map(|(_, value)| value)
}

//! Path algebra for the tree mirror.
//!
//! Paths are `/`-separated and relative to the repository root. The root itself is
//! the empty string internally; the server spells it `.` on the wire.

/// Internal spelling of the root directory.
pub const ROOT: &str = "";

/// Wire spelling of the root directory.
pub const WIRE_ROOT: &str = ".";

/// Normalize a path: trims slashes, maps `.` and `./` prefixes onto the root.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    if trimmed == WIRE_ROOT {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Whether `path` names the root directory.
pub fn is_root(path: &str) -> bool {
    normalize(path).is_empty()
}

/// Convert an internal path to the form the server expects.
pub fn to_wire(path: &str) -> String {
    let normalized = normalize(path);
    if normalized.is_empty() {
        WIRE_ROOT.to_string()
    } else {
        normalized
    }
}

/// Parent directory of `path`. `None` for the root; `Some("")` for top-level entries.
pub fn parent(path: &str) -> Option<&str> {
    let path = path.trim_matches('/');
    if path.is_empty() || path == WIRE_ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(pos) => Some(&path[..pos]),
        None => Some(ROOT),
    }
}

/// Number of segments in `path`; the root has depth 0.
pub fn depth(path: &str) -> usize {
    let normalized = normalize(path);
    if normalized.is_empty() {
        0
    } else {
        normalized.split('/').count()
    }
}

/// Whether a segment looks like a file name (has an extension separator).
///
/// A leading dot alone (`.github`) does not count.
pub fn looks_like_file(segment: &str) -> bool {
    segment
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < segment.len())
}

/// Directory chain leading to `path`, shallowest first, excluding the root.
///
/// A trailing file-like segment is stripped first, so `a/b/c.md` yields `["a", "a/b"]`
/// while the directory `a/b` yields `["a", "a/b"]` as well.
pub fn directory_chain(path: &str) -> Vec<String> {
    let normalized = normalize(path);
    if normalized.is_empty() {
        return Vec::new();
    }

    let mut segments: Vec<&str> = normalized.split('/').collect();
    if segments.last().is_some_and(|last| looks_like_file(last)) {
        segments.pop();
    }

    (1..=segments.len())
        .map(|end| segments[..end].join("/"))
        .collect()
}

/// Whether `ancestor` is `path` itself or one of its ancestors.
pub fn is_ancestor_or_self(ancestor: &str, path: &str) -> bool {
    let ancestor = normalize(ancestor);
    let path = normalize(path);
    ancestor.is_empty()
        || ancestor == path
        || path
            .strip_prefix(&ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

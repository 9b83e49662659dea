//! Tracks which directories are open in the tree view.

use crate::path;
use std::collections::BTreeSet;

/// Set of directory paths currently expanded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandedSet {
    paths: BTreeSet<String>,
}

impl ExpandedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership of `path`. Returns whether it is expanded afterwards.
    pub fn toggle(&mut self, path: &str) -> bool {
        let path = path::normalize(path);
        if self.paths.remove(&path) {
            false
        } else {
            self.paths.insert(path);
            true
        }
    }

    pub fn expand(&mut self, path: &str) {
        let path = path::normalize(path);
        if !path.is_empty() {
            self.paths.insert(path);
        }
    }

    pub fn collapse(&mut self, path: &str) {
        self.paths.remove(&path::normalize(path));
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(&path::normalize(path))
    }

    /// Mark every directory leading to `path` as expanded.
    ///
    /// A trailing file-like segment is ignored. No-op for an empty or root path.
    pub fn expand_ancestors(&mut self, path: &str) {
        for dir in path::directory_chain(path) {
            self.paths.insert(dir);
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// Expanded paths in ascending depth, ties broken by path.
    pub fn by_depth(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.paths.iter().cloned().collect();
        paths.sort_by(|a, b| path::depth(a).cmp(&path::depth(b)).then_with(|| a.cmp(b)));
        paths
    }
}

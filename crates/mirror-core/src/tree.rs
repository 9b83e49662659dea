//! Client-side mirror of the server's directory hierarchy.
//!
//! The mirror is populated lazily, one directory listing at a time. Nodes are addressed
//! only by path: there are no parent pointers, and every listing is checked so that an
//! entry can only ever land directly beneath the directory it was listed from.
//!
//! All mutation goes through [`TreeMirror::with_listing`] and [`TreeMirror::with_batch`],
//! which take the current mirror and a patch and return a new mirror. Readers holding an
//! older mirror never observe a half-applied batch.

use crate::models::{CommitInfo, GitStatus};
use crate::path::{self, ROOT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("Directory not in mirror: {0}")]
    UnknownDirectory(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Entry {entry} does not belong to directory {dir:?}")]
    ForeignEntry { dir: String, entry: String },
}

pub type Result<T> = std::result::Result<T, MergeError>;

/// One entry of the mirror.
///
/// `children == None` means the directory has not been listed yet; `Some(vec![])` means it
/// was listed and is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    /// Whether the subtree contains any markdown (always true for files)
    #[serde(default = "default_true")]
    pub has_markdown: bool,
    #[serde(default, rename = "git_status")]
    pub status: Option<GitStatus>,
    #[serde(default)]
    pub last_commit: Option<CommitInfo>,
    #[serde(default)]
    pub children: Option<Vec<TreeNode>>,
}

fn default_true() -> bool {
    true
}

impl TreeNode {
    /// An unlisted directory entry.
    pub fn dir(path: &str) -> Self {
        Self::entry(path, true)
    }

    /// A file entry.
    pub fn file(path: &str) -> Self {
        Self::entry(path, false)
    }

    fn entry(path: &str, is_dir: bool) -> Self {
        let path = path::normalize(path);
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            name,
            path,
            is_dir,
            has_markdown: true,
            status: None,
            last_commit: None,
            children: None,
        }
    }

    pub fn with_status(mut self, status: GitStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_children(mut self, children: Vec<TreeNode>) -> Self {
        self.children = Some(children);
        self
    }

    /// Whether this directory's children have been fetched.
    pub fn is_loaded(&self) -> bool {
        self.children.is_some()
    }
}

/// A directory listing to merge into the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub dir: String,
    pub entries: Vec<TreeNode>,
}

impl Listing {
    pub fn new(dir: &str, entries: Vec<TreeNode>) -> Self {
        Self {
            dir: path::normalize(dir),
            entries,
        }
    }
}

/// Results of one parallel refresh, applied as a single mutation.
#[derive(Debug, Clone, Default)]
pub struct RefreshBatch {
    /// Fresh root listing, if the root fetch succeeded
    pub root: Option<Vec<TreeNode>>,
    /// Fresh nested listings, in any order
    pub nested: Vec<Listing>,
}

/// The client-held partial copy of the server's directory hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeMirror {
    root: Option<Vec<TreeNode>>,
}

impl TreeMirror {
    /// An empty mirror whose root has not been listed yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the root listing has been merged.
    pub fn is_populated(&self) -> bool {
        self.root.is_some()
    }

    /// Top-level entries, if the root has been listed.
    pub fn root(&self) -> Option<&[TreeNode]> {
        self.root.as_deref()
    }

    /// Look up a node by path. The root itself is not a node.
    pub fn find(&self, path: &str) -> Option<&TreeNode> {
        let prefixes = segment_prefixes(path);
        let (last, init) = prefixes.split_last()?;
        let mut level = self.root.as_deref()?;
        for prefix in init {
            let node = level.iter().find(|n| &n.path == prefix)?;
            level = node.children.as_deref()?;
        }
        level.iter().find(|n| &n.path == last)
    }

    /// Loaded children of a directory (the root included).
    pub fn children(&self, dir: &str) -> Option<&[TreeNode]> {
        if path::is_root(dir) {
            self.root()
        } else {
            self.find(dir)?.children.as_deref()
        }
    }

    /// Whether a directory (the root included) has had its children fetched.
    pub fn is_loaded(&self, dir: &str) -> bool {
        self.children(dir).is_some()
    }

    /// Total number of nodes currently mirrored.
    pub fn node_count(&self) -> usize {
        fn count(nodes: &[TreeNode]) -> usize {
            nodes
                .iter()
                .map(|n| 1 + n.children.as_deref().map(count).unwrap_or(0))
                .sum()
        }
        self.root.as_deref().map(count).unwrap_or(0)
    }

    /// Return a new mirror with `entries` merged as the children of `dir`.
    ///
    /// The sibling set is replaced wholesale. A fresh directory entry without children
    /// keeps the subtree already loaded under the same path, so re-listing a parent never
    /// collapses its loaded descendants and applying a listing twice equals applying it once.
    pub fn with_listing(&self, dir: &str, entries: Vec<TreeNode>) -> Result<TreeMirror> {
        let mut next = self.clone();
        next.apply(&path::normalize(dir), entries)?;
        Ok(next)
    }

    /// Return a new mirror with a whole refresh batch applied.
    ///
    /// The root listing goes first, then nested listings in ascending depth, so a
    /// directory's update only runs once its parent's update has landed. Listings whose
    /// directory cannot be located are dropped and reported back.
    pub fn with_batch(&self, batch: RefreshBatch) -> (TreeMirror, Vec<MergeError>) {
        let mut next = self.clone();
        let mut dropped = Vec::new();

        if let Some(root) = batch.root {
            if let Err(e) = next.apply(ROOT, root) {
                dropped.push(e);
            }
        }

        let mut nested = batch.nested;
        nested.sort_by(|a, b| {
            path::depth(&a.dir)
                .cmp(&path::depth(&b.dir))
                .then_with(|| a.dir.cmp(&b.dir))
        });

        for listing in nested {
            if let Err(e) = next.apply(&listing.dir, listing.entries) {
                dropped.push(e);
            }
        }

        (next, dropped)
    }

    fn apply(&mut self, dir: &str, mut entries: Vec<TreeNode>) -> Result<()> {
        validate_entries(dir, &mut entries)?;

        if dir.is_empty() {
            let merged = merge_entries(self.root.as_deref(), entries);
            self.root = Some(merged);
            return Ok(());
        }

        let root = self
            .root
            .as_mut()
            .ok_or_else(|| MergeError::UnknownDirectory(dir.to_string()))?;
        let node =
            find_mut(root, dir).ok_or_else(|| MergeError::UnknownDirectory(dir.to_string()))?;
        if !node.is_dir {
            return Err(MergeError::NotADirectory(dir.to_string()));
        }

        let merged = merge_entries(node.children.as_deref(), entries);
        node.children = Some(merged);
        Ok(())
    }
}

impl From<Vec<TreeNode>> for TreeMirror {
    fn from(root: Vec<TreeNode>) -> Self {
        Self { root: Some(root) }
    }
}

/// Carry already-loaded subtrees over to fresh entries with the same path.
fn merge_entries(existing: Option<&[TreeNode]>, fresh: Vec<TreeNode>) -> Vec<TreeNode> {
    fresh
        .into_iter()
        .map(|mut entry| {
            if entry.is_dir && entry.children.is_none() {
                let previous = existing
                    .and_then(|nodes| nodes.iter().find(|n| n.path == entry.path && n.is_dir));
                if let Some(previous) = previous {
                    entry.children = previous.children.clone();
                }
            }
            entry
        })
        .collect()
}

/// Every entry must sit directly beneath `dir`. This also rules out a listing that
/// claims one of the directory's own ancestors as a child.
fn validate_entries(dir: &str, entries: &mut [TreeNode]) -> Result<()> {
    for entry in entries.iter_mut() {
        entry.path = path::normalize(&entry.path);
        if entry.path.is_empty() || path::parent(&entry.path) != Some(dir) {
            return Err(MergeError::ForeignEntry {
                dir: dir.to_string(),
                entry: entry.path.clone(),
            });
        }
        if let Some(children) = entry.children.as_mut() {
            if !entry.is_dir {
                return Err(MergeError::NotADirectory(entry.path.clone()));
            }
            validate_entries(&entry.path, children)?;
        }
    }
    Ok(())
}

fn find_mut<'a>(nodes: &'a mut Vec<TreeNode>, path: &str) -> Option<&'a mut TreeNode> {
    let prefixes = segment_prefixes(path);
    let (last, init) = prefixes.split_last()?;
    let mut level = nodes;
    for prefix in init {
        let current = level;
        let node = current.iter_mut().find(|n| &n.path == prefix)?;
        level = node.children.as_mut()?;
    }
    level.iter_mut().find(|n| &n.path == last)
}

/// `a/b/c` -> `["a", "a/b", "a/b/c"]`
fn segment_prefixes(path: &str) -> Vec<String> {
    let normalized = path::normalize(path);
    if normalized.is_empty() {
        return Vec::new();
    }
    let segments: Vec<&str> = normalized.split('/').collect();
    (1..=segments.len())
        .map(|end| segments[..end].join("/"))
        .collect()
}

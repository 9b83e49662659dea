//! The snapshot published to the UI layer.

use crate::transport::ConnectionState;
use mirror_core::{CommitInfo, ExpandedSet, FileContent, RecentFile, TreeMirror, TreeNode};
use std::collections::BTreeSet;

/// What the main pane currently shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewKind {
    #[default]
    None,
    File,
    Directory,
}

/// The recent-changes list.
///
/// A failed refresh sets `error` but keeps the last good `files`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentState {
    pub files: Vec<RecentFile>,
    pub error: bool,
    /// Generation of the request that produced `files`
    pub generation: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub current_path: Option<String>,
    pub view: ViewKind,
    pub tree: TreeMirror,
    pub expanded: ExpandedSet,
    /// Content of the displayed document
    pub file: Option<FileContent>,
    /// Last commit touching the displayed document
    pub file_status: Option<CommitInfo>,
    /// Listing of the displayed directory
    pub directory: Option<Vec<TreeNode>>,
    pub loading: bool,
    pub error: Option<String>,
    /// Blocks of the displayed document that changed in its latest render
    pub highlighted_blocks: BTreeSet<usize>,
    /// Paths touched by the latest flush, cleared after a fixed time-to-live
    pub recently_changed: BTreeSet<String>,
    pub recent: RecentState,
    pub connection: ConnectionState,
}

impl ViewState {
    /// Whether `path` is the document currently on screen.
    pub fn is_viewing_file(&self, path: &str) -> bool {
        self.view == ViewKind::File && self.current_path.as_deref() == Some(path)
    }

    pub fn is_recently_changed(&self, path: &str) -> bool {
        self.recently_changed.contains(path)
    }
}

//! Records returned by the remote tree API.

use serde::{Deserialize, Serialize};

/// Working-directory status of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitStatus {
    Modified,
    Added,
    Deleted,
    Untracked,
    /// Directory with at least one changed descendant
    ContainsChanges,
}

/// Last commit touching a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hexsha: String,
    pub author_name: String,
    #[serde(default)]
    pub author_email: String,
    /// ISO-8601 timestamp, passed through as sent
    pub date: String,
    pub message: String,
}

/// Content of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl FileContent {
    /// Whether the server gave up decoding the file.
    pub fn is_binary(&self) -> bool {
        self.encoding == "binary"
    }
}

/// One entry of the recent-changes list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentFile {
    pub path: String,
    pub date: String,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub hexsha: Option<String>,
    #[serde(default)]
    pub untracked: bool,
}

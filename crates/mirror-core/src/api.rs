//! Remote tree API abstraction.
//!
//! Implementations:
//! - `InMemoryTreeApi` - For testing
//! - `HttpTreeApi` (in mirror-client) - Talks to the server's REST endpoints
//!
//! Errors are `Clone` so one in-flight result can be handed to every caller sharing it.

use crate::models::{CommitInfo, FileContent, RecentFile};
use crate::path;
use crate::tree::TreeNode;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, RwLock};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server returned status {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("No repository selected")]
    NoContext,
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Read-only view of the server's tree.
#[async_trait]
pub trait TreeApi: Send + Sync {
    /// List one level of `path`. Dirs first, then files, each by name.
    async fn list(&self, path: &str) -> Result<Vec<TreeNode>>;

    /// Read a document.
    async fn read(&self, path: &str) -> Result<FileContent>;

    /// Last commit touching `path`, if any.
    async fn last_commit(&self, path: &str) -> Result<Option<CommitInfo>>;

    /// Most recently changed files, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<RecentFile>>;
}

/// A recorded call against [`InMemoryTreeApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    List(String),
    Read(String),
    LastCommit(String),
    Recent(usize),
}

/// In-memory tree for testing.
pub struct InMemoryTreeApi {
    files: RwLock<BTreeMap<String, String>>,
    dirs: RwLock<HashSet<String>>,
    commits: RwLock<HashMap<String, CommitInfo>>,
    recent: RwLock<Vec<RecentFile>>,
    failing: RwLock<HashMap<String, ApiError>>,
    calls: Mutex<Vec<ApiCall>>,
}

impl InMemoryTreeApi {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            dirs: RwLock::new(HashSet::new()),
            commits: RwLock::new(HashMap::new()),
            recent: RwLock::new(Vec::new()),
            failing: RwLock::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create or overwrite a file, creating parent directories.
    pub fn write(&self, path: &str, content: &str) {
        let path = path::normalize(path);
        self.mkdir_parents(&path);
        self.files.write().unwrap().insert(path, content.to_string());
    }

    /// Create a directory and its parents.
    pub fn mkdir(&self, path: &str) {
        let path = path::normalize(path);
        if path.is_empty() {
            return;
        }
        self.mkdir_parents(&path);
        self.dirs.write().unwrap().insert(path);
    }

    /// Remove a file, or a directory with everything beneath it.
    pub fn remove(&self, path: &str) {
        let path = path::normalize(path);
        self.files
            .write()
            .unwrap()
            .retain(|p, _| !path::is_ancestor_or_self(&path, p));
        self.dirs
            .write()
            .unwrap()
            .retain(|p| !path::is_ancestor_or_self(&path, p));
    }

    pub fn set_commit(&self, path: &str, commit: CommitInfo) {
        self.commits
            .write()
            .unwrap()
            .insert(path::normalize(path), commit);
    }

    pub fn set_recent(&self, recent: Vec<RecentFile>) {
        *self.recent.write().unwrap() = recent;
    }

    /// Make every call for `key` fail with `error`. Use `"recent"` for the recent list.
    pub fn fail(&self, key: &str, error: ApiError) {
        self.failing
            .write()
            .unwrap()
            .insert(path::normalize(key), error);
    }

    pub fn recover(&self, key: &str) {
        self.failing.write().unwrap().remove(&path::normalize(key));
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn mkdir_parents(&self, path: &str) {
        let mut dirs = self.dirs.write().unwrap();
        let mut current = path::parent(path);
        while let Some(dir) = current {
            if dir.is_empty() {
                break;
            }
            dirs.insert(dir.to_string());
            current = path::parent(dir);
        }
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_failure(&self, key: &str) -> Result<()> {
        match self.failing.read().unwrap().get(key) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryTreeApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TreeApi for InMemoryTreeApi {
    async fn list(&self, path: &str) -> Result<Vec<TreeNode>> {
        let dir = path::normalize(path);
        self.record(ApiCall::List(dir.clone()));
        self.check_failure(&dir)?;

        let dirs = self.dirs.read().unwrap();
        if !dir.is_empty() && !dirs.contains(&dir) {
            return Err(ApiError::NotFound(dir));
        }

        let is_child = |p: &str| path::parent(p) == Some(dir.as_str());

        let mut subdirs: Vec<TreeNode> = dirs
            .iter()
            .filter(|p| is_child(p.as_str()))
            .map(|p| TreeNode::dir(p))
            .collect();
        subdirs.sort_by(|a, b| a.name.cmp(&b.name));

        let files: Vec<TreeNode> = self
            .files
            .read()
            .unwrap()
            .keys()
            .filter(|p| is_child(p.as_str()))
            .map(|p| TreeNode::file(p))
            .collect();

        subdirs.extend(files);
        Ok(subdirs)
    }

    async fn read(&self, path: &str) -> Result<FileContent> {
        let path = path::normalize(path);
        self.record(ApiCall::Read(path.clone()));
        self.check_failure(&path)?;

        self.files
            .read()
            .unwrap()
            .get(&path)
            .map(|content| FileContent {
                path: path.clone(),
                content: content.clone(),
                encoding: "utf-8".to_string(),
            })
            .ok_or(ApiError::NotFound(path))
    }

    async fn last_commit(&self, path: &str) -> Result<Option<CommitInfo>> {
        let path = path::normalize(path);
        self.record(ApiCall::LastCommit(path.clone()));
        self.check_failure(&path)?;
        Ok(self.commits.read().unwrap().get(&path).cloned())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RecentFile>> {
        self.record(ApiCall::Recent(limit));
        self.check_failure("recent")?;
        Ok(self
            .recent
            .read()
            .unwrap()
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }
}

// Sharing one API between an engine and the test driving it
#[async_trait]
impl<T: TreeApi + ?Sized> TreeApi for std::sync::Arc<T> {
    async fn list(&self, path: &str) -> Result<Vec<TreeNode>> {
        (**self).list(path).await
    }

    async fn read(&self, path: &str) -> Result<FileContent> {
        (**self).read(path).await
    }

    async fn last_commit(&self, path: &str) -> Result<Option<CommitInfo>> {
        (**self).last_commit(path).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RecentFile>> {
        (**self).recent(limit).await
    }
}

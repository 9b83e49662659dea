//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use mirror_client::{EngineConfig, LiveEngine, ReconnectConfig, SharedApi};
use mirror_core::api::{ApiCall, ApiError, Result};
use mirror_core::{CommitInfo, FileContent, InMemoryTreeApi, RecentFile, TreeApi, TreeNode};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Start or end of a request against [`ScriptedApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(ApiCall),
    End(ApiCall),
}

/// In-memory tree with per-key delays, one-shot failures and a request log.
///
/// Keys are normalized paths, or `"recent"` for the recent-changes list.
pub struct ScriptedApi {
    pub tree: InMemoryTreeApi,
    delays: Mutex<HashMap<String, Duration>>,
    failures: Mutex<HashMap<String, (usize, ApiError)>>,
    log: Mutex<Vec<Event>>,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tree: InMemoryTreeApi::new(),
            delays: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        })
    }

    /// A repository with a few nested directories.
    pub fn with_docs() -> Arc<Self> {
        let api = Self::new();
        api.tree.write("README.md", "# Readme");
        api.tree.write("a.md", "# A\n\nfirst");
        api.tree.write("b.md", "# B");
        api.tree.write("docs/index.md", "# Docs");
        api.tree.write("docs/guide/setup.md", "# Setup");
        api.tree.write("docs/guide/deep/notes.md", "# Notes");
        api
    }

    pub fn delay(&self, key: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(mirror_core::path::normalize(key), delay);
    }

    /// Fail the next `times` requests for `key`.
    pub fn fail_times(&self, key: &str, times: usize, error: ApiError) {
        self.failures
            .lock()
            .unwrap()
            .insert(mirror_core::path::normalize(key), (times, error));
    }

    pub fn log(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Requests started so far, in order.
    pub fn started(&self) -> Vec<ApiCall> {
        self.log()
            .into_iter()
            .filter_map(|e| match e {
                Event::Start(call) => Some(call),
                Event::End(_) => None,
            })
            .collect()
    }

    pub fn count(&self, call: &ApiCall) -> usize {
        self.started().iter().filter(|c| *c == call).count()
    }

    /// Position of `event` in the log.
    pub fn position(&self, event: &Event) -> Option<usize> {
        self.log().iter().position(|e| e == event)
    }

    /// The response is produced when the request starts and delivered after the delay.
    async fn scripted<T, F>(&self, call: ApiCall, key: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.log.lock().unwrap().push(Event::Start(call.clone()));

        let failure = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(key) {
                Some((remaining, error)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(error.clone())
                }
                _ => None,
            }
        };
        let result = match failure {
            Some(error) => Err(error),
            None => fut.await,
        };

        let delay = self.delays.lock().unwrap().get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.log.lock().unwrap().push(Event::End(call));
        result
    }
}

#[async_trait]
impl TreeApi for ScriptedApi {
    async fn list(&self, path: &str) -> Result<Vec<TreeNode>> {
        let key = mirror_core::path::normalize(path);
        self.scripted(ApiCall::List(key.clone()), &key, self.tree.list(path))
            .await
    }

    async fn read(&self, path: &str) -> Result<FileContent> {
        let key = mirror_core::path::normalize(path);
        self.scripted(ApiCall::Read(key.clone()), &key, self.tree.read(path))
            .await
    }

    async fn last_commit(&self, path: &str) -> Result<Option<CommitInfo>> {
        let key = mirror_core::path::normalize(path);
        self.scripted(
            ApiCall::LastCommit(key.clone()),
            &key,
            self.tree.last_commit(path),
        )
        .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RecentFile>> {
        self.scripted(ApiCall::Recent(limit), "recent", self.tree.recent(limit))
            .await
    }
}

/// Engine timings suited to paused-clock tests.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            backoff_factor: 2.0,
        },
        ..EngineConfig::default()
    }
}

pub fn engine(api: &Arc<ScriptedApi>) -> LiveEngine {
    engine_with(api, test_config())
}

pub fn engine_with(api: &Arc<ScriptedApi>, config: EngineConfig) -> LiveEngine {
    let shared: SharedApi = api.clone();
    LiveEngine::new(shared, config, None)
}

pub fn commit(message: &str) -> CommitInfo {
    CommitInfo {
        hexsha: "0123456789abcdef".to_string(),
        author_name: "Test Author".to_string(),
        author_email: "author@example.com".to_string(),
        date: "2026-01-01T00:00:00Z".to_string(),
        message: message.to_string(),
    }
}

pub fn recent(path: &str) -> RecentFile {
    RecentFile {
        path: path.to_string(),
        date: "2026-01-01T00:00:00Z".to_string(),
        author_name: Some("Test Author".to_string()),
        message: Some("update".to_string()),
        hexsha: Some("0123456".to_string()),
        untracked: false,
    }
}
